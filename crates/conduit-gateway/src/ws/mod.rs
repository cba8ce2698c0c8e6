pub mod connection;
pub mod dispatch;
pub mod handshake;
pub mod send;
