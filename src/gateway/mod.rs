//! Request pipeline, upstream forwarder, and server wiring.

pub mod forwarder;
pub mod pipeline;
pub mod server;

pub use forwarder::{Forwarder, HttpForwarder};
pub use pipeline::RequestPipeline;
pub use server::GatewayServer;
