pub mod client;
pub mod protocol;
pub mod server;

pub use client::GatewayClient;
pub use protocol::{GatewayRequest, GatewayResponse, ProtocolError, WireVerdict};
pub use server::GatewayServer;
