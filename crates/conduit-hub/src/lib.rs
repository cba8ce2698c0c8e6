pub mod connection_hub;
pub mod hub;
pub mod interaction;
pub mod rendezvous;
pub mod turn_runner;
pub mod types;
pub mod working_dir;

pub use connection_hub::{ConnectionHub, InteractionSummary};
pub use hub::SessionHub;
pub use interaction::{InteractionError, InteractionRegistry, InteractionResponse};
pub use rendezvous::{CliToolCallQuery, CliToolCallRecord, CliToolCallRendezvous};
pub use turn_runner::{TurnRequest, TurnRunner};
pub use types::{ActiveChatRun, ActiveToolCall, LogicalSessionState, MessageOrigin, QueuedMessage};
pub use working_dir::{RootedWorkingDirResolver, WorkingDirResolver};
