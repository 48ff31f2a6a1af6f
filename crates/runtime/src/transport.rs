//! Capability interfaces for the collaborators a session drives.
//!
//! The session never talks to a network, a camera, or a screen directly. It
//! is handed implementations of these traits at construction:
//!
//! - [`PeerTransportFactory`] / [`PeerTransport`] - the real-time transport
//!   (SDP generation, ICE gathering, data channels, streams)
//! - [`MediaCapture`] - camera/microphone acquisition
//! - [`VideoSink`] - render surfaces addressed by opaque ids
//! - [`SendSignaling`] - the outbound half of the signaling relay
//!
//! Transports report asynchronous happenings through a [`TransportEvent`]
//! channel handed to them on creation instead of per-event callbacks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use duo_protocol::{
	ConnectionKind, DataChannelInit, IceCandidate, MediaConstraints, OfferOptions, RtcConfiguration,
	SessionDescription, SignalingEnvelope,
};
use tokio::sync::mpsc;

use crate::error::Result;

/// Outbound signaling sink, injected at construction.
pub type SendSignaling = Arc<dyn Fn(SignalingEnvelope) + Send + Sync>;

/// Sender half used by a transport to surface its events.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Opaque handle to a stream owned by a capture device or a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaStream {
	id: Arc<str>,
	audio: bool,
	video: bool,
}

impl MediaStream {
	pub fn new(id: impl AsRef<str>, audio: bool, video: bool) -> Self {
		Self {
			id: Arc::from(id.as_ref()),
			audio,
			video,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn has_audio(&self) -> bool {
		self.audio
	}

	pub fn has_video(&self) -> bool {
		self.video
	}
}

/// Ready state of a transport-level data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
	Connecting,
	Open,
	Closing,
	Closed,
}

/// Aggregate connection state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
	New,
	Connecting,
	Connected,
	Disconnected,
	Failed,
	Closed,
}

/// Transport-level data channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
	fn label(&self) -> &str;

	fn ready_state(&self) -> ChannelState;

	/// Sends one text frame. Fails when the channel is not open.
	async fn send_text(&self, text: String) -> Result<()>;

	fn close(&self);
}

/// Something the transport wants the session to know.
///
/// Channel lifecycle events (`ChannelOpen`, `ChannelError`, `ChannelClose`)
/// describe channels created locally through
/// [`PeerTransport::create_data_channel`]. `ChannelMessage` carries every
/// inbound frame for a label, whichever side created the channel.
pub enum TransportEvent {
	/// A local candidate was gathered; `None` marks the end of gathering.
	IceCandidate(Option<IceCandidate>),
	/// The peer created a channel.
	DataChannel(Arc<dyn DataChannel>),
	ChannelOpen { label: String },
	ChannelMessage { label: String, data: String },
	ChannelError { label: String, error: String },
	ChannelClose { label: String },
	/// The peer's stream arrived.
	RemoteStream(MediaStream),
	StateChanged(TransportState),
}

impl fmt::Debug for TransportEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportEvent::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
			TransportEvent::DataChannel(dc) => f.debug_tuple("DataChannel").field(&dc.label()).finish(),
			TransportEvent::ChannelOpen { label } => f.debug_struct("ChannelOpen").field("label", label).finish(),
			TransportEvent::ChannelMessage { label, data } => f
				.debug_struct("ChannelMessage")
				.field("label", label)
				.field("len", &data.len())
				.finish(),
			TransportEvent::ChannelError { label, error } => f
				.debug_struct("ChannelError")
				.field("label", label)
				.field("error", error)
				.finish(),
			TransportEvent::ChannelClose { label } => f.debug_struct("ChannelClose").field("label", label).finish(),
			TransportEvent::RemoteStream(s) => f.debug_tuple("RemoteStream").field(&s.id()).finish(),
			TransportEvent::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
		}
	}
}

/// One underlying peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
	async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription>;

	async fn create_answer(&self, options: OfferOptions) -> Result<SessionDescription>;

	/// Applies our own description. Candidate gathering starts here.
	async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

	async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

	/// Fails when no remote description has been applied yet.
	async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

	async fn create_data_channel(&self, label: &str, init: DataChannelInit) -> Result<Arc<dyn DataChannel>>;

	fn add_stream(&self, stream: &MediaStream) -> Result<()>;

	fn remove_stream(&self, stream: &MediaStream);

	/// Releases the connection. Must be idempotent.
	fn close(&self);
}

/// Creates transports for a session.
pub trait PeerTransportFactory: Send + Sync {
	fn create(
		&self,
		kind: ConnectionKind,
		config: &RtcConfiguration,
		events: EventSender,
	) -> Result<Arc<dyn PeerTransport>>;
}

/// Camera/microphone access.
#[async_trait]
pub trait MediaCapture: Send + Sync {
	/// Acquires a stream; fails with [`Error::Capture`](crate::Error::Capture)
	/// when access is denied or no device matches.
	async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream>;

	/// Stops every track of the stream.
	fn release(&self, stream: &MediaStream);
}

/// Render surfaces addressed by the ids from the session configuration.
pub trait VideoSink: Send + Sync {
	/// Binds the stream to the surface and starts playback.
	fn attach(&self, surface: &str, stream: &MediaStream);

	fn pause(&self, _surface: &str) {}

	/// Unbinds whatever is shown and resets the surface.
	fn detach(&self, surface: &str);
}
