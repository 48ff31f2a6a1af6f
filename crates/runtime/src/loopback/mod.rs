//! In-memory collaborators for tests and local demos.
//!
//! [`LoopbackNetwork::pair`] returns two transport factories wired to each
//! other. Transports created by one side pair with the transport of the same
//! kind on the other side once both have exchanged descriptions and at least
//! one candidate, mirroring when a real ICE agent would connect.
//!
//! [`MemoryCapture`] and [`MemorySink`] stand in for the camera and the
//! render surfaces, recording what the session asked of them.

mod media;
mod network;

pub use media::{MemoryCapture, MemorySink, SinkOp};
pub use network::{LoopbackChannel, LoopbackEndpoint, LoopbackNetwork, LoopbackTransport, Side};
