pub mod attributes;
pub mod config;
pub mod error;
pub mod types;

pub use config::ConduitConfig;
pub use error::{ConduitError, Result};
pub use types::{AgentId, CallId, ConnId, InteractionId, ResponseId, SessionId, TurnId};
