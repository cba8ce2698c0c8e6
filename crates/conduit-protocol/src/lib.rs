pub mod client;
pub mod envelope;
pub mod handshake;
pub mod server;

pub use envelope::{ErrorPayload, EventFrame, InboundFrame, ReqFrame, ResFrame};
