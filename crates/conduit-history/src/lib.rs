pub mod cache;
pub mod claude_provider;
pub mod event_store_provider;
pub mod pi_provider;
pub mod projection;
pub mod provider;
pub mod registry;
pub mod translate;
pub mod types;

pub use event_store_provider::EventStoreHistoryProvider;
pub use claude_provider::ClaudeSessionHistoryProvider;
pub use pi_provider::PiSessionHistoryProvider;
pub use projection::{project_to_chat_messages, project_to_plain_transcript};
pub use provider::{HistoryProvider, HistoryRequest};
pub use registry::HistoryProviderRegistry;
pub use types::{ChatCompletionMessage, ChatRole, MessageMeta, MessageSource, ToolCallSpec, Visibility};
