use thiserror::Error;

/// Error taxonomy for the orchestration core.
///
/// `code()` maps every variant onto one of the wire error codes from the
/// client protocol (`error{code, message, details?, retryable?}`) so every
/// layer — hub, run controller, gateway — can convert a `ConduitError`
/// straight into a client-visible frame without re-deriving the mapping.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("session is not ready: {session_id}")]
    SessionNotReady { session_id: String },

    #[error("session has been deleted: {session_id}")]
    SessionDeleted { session_id: String },

    #[error("text input must not be empty")]
    EmptyText,

    #[error("invalid session id: {session_id}")]
    InvalidSessionId { session_id: String },

    #[error("queue error: {0}")]
    QueueError(String),

    #[error("upstream provider error: {0}")]
    UpstreamError(String),

    #[error("external agent error: {0}")]
    ExternalAgentError(String),

    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("session is busy: {session_id}")]
    SessionBusy { session_id: String },

    #[error("a window is required for this operation")]
    WindowRequired,

    #[error("window not found: {0}")]
    WindowNotFound(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("interaction unavailable: {0}")]
    InteractionUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConduitError {
    /// The wire error code sent in `error{code, ...}` frames (spec §6).
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotReady { .. } => "session_not_ready",
            Self::SessionDeleted { .. } => "session_deleted",
            Self::EmptyText => "empty_text",
            Self::InvalidSessionId { .. } => "invalid_session_id",
            Self::QueueError(_) => "queue_error",
            Self::UpstreamError(_) => "upstream_error",
            Self::ExternalAgentError(_) => "external_agent_error",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::SessionBusy { .. } => "session_busy",
            Self::WindowRequired => "window_required",
            Self::WindowNotFound(_) => "window_not_found",
            Self::StorageError(_) => "storage_error",
            Self::InteractionUnavailable(_) => "interaction_unavailable",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether a client may usefully retry the operation that produced this
    /// error. Per §7: transport-ish external errors are retryable, logical
    /// validation/not-found/conflict errors are not.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamError(_) | Self::ExternalAgentError(_) | Self::StorageError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConduitError>;
