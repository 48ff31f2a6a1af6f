//! Negotiation engine for duo-rtc.
//!
//! This crate sits between the wire types in `duo-protocol` and the session
//! façade in `duo-rtc`:
//!
//! - [`transport`] - capability traits for the peer transport, capture device
//!   and render surfaces a session is handed at construction
//! - [`negotiator`] - the per-kind offer/answer state machine
//! - [`loopback`] - in-memory implementations of every capability, wired
//!   peer to peer, for tests and local demos
//! - [`error`] - the error taxonomy shared by the whole stack

pub mod error;
pub mod loopback;
pub mod negotiator;
pub mod transport;

pub use error::{ChannelError, ConfigurationError, Error, NegotiationError, Result};
pub use negotiator::{Epoch, EventPump, EventStream, NegotiationState, Negotiator, NegotiatorContext, Role};
pub use transport::{
	ChannelState, DataChannel, EventSender, MediaCapture, MediaStream, PeerTransport, PeerTransportFactory,
	SendSignaling, TransportEvent, TransportState, VideoSink,
};
