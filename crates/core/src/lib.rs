//! duo: a two-peer real-time session engine.
//!
//! A [`Session`] connects exactly two peers over a reliable `data` connection
//! and an optional `media` connection, both negotiated through an
//! application-provided signaling relay. Media start/stop is kept in sync with
//! the peer through control messages on the reserved `_default` channel.
//!
//! The transport, the capture device and the render surfaces are supplied as
//! capabilities; [`duo_runtime::loopback`] has in-memory versions of all of
//! them.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use duo::{ChannelCallbacks, ChannelConfig, MediaAction, MediaOptions, Observers, SessionBuilder, SessionConfig};
//!
//! let session = SessionBuilder::new()
//!     .config(SessionConfig::new("local-video", "remote-video").with_channel(ChannelConfig::new("text")))
//!     .signaling(move |envelope| relay.send(envelope))
//!     .transport_factory(factory)
//!     .media_capture(capture)
//!     .video_sink(sink)
//!     .observers(
//!         Observers::new()
//!             .on_connected(|| println!("connected"))
//!             .on_media_stream_connected(|| {})
//!             .on_media_stream_removed(|| {})
//!             .on_media_stream_remote_removed(|| {}),
//!     )
//!     .channel("text", ChannelCallbacks::new().on_message(|_, msg| println!("{msg}")))
//!     .build()?;
//!
//! session.connect(None).await?;
//! // feed every envelope from the relay into session.handle_signaling(..)
//! session.media(MediaAction::Start, MediaOptions::default()).await?;
//! session.send("text", &serde_json::json!({"hello": 1})).await?;
//! ```

pub mod builder;
pub mod callbacks;
pub mod channels;
pub mod config;
pub mod logging;
pub mod media;
pub mod session;

pub use builder::SessionBuilder;
pub use callbacks::{ChannelCallbacks, Observers};
pub use config::{ChannelConfig, SessionConfig};
pub use duo_protocol::{
	BinaryType, ConnectionKind, MediaAction, MediaOptions, Resolution, SignalingEnvelope, DEFAULT_CHANNEL,
};
pub use duo_runtime::error::{self, ChannelError, ConfigurationError, Error, NegotiationError, Result};
pub use duo_runtime::{MediaStream, NegotiationState};
pub use media::MediaState;
pub use session::Session;
