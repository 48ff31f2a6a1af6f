//! Wire types for duo-rtc.
//!
//! Everything a peer puts on the wire lives here, without any state:
//!
//! - [`SignalingEnvelope`] - offer/answer/candidate messages relayed by the
//!   signaling transport
//! - [`ControlEnvelope`] - media-control messages carried on the reserved
//!   [`DEFAULT_CHANNEL`]
//! - [`MediaOptions`] / [`MediaConstraints`] - capture presets
//! - [`RtcConfiguration`] / [`DataChannelInit`] - peer transport parameters

pub mod control;
pub mod media;
pub mod options;
pub mod signaling;

pub use control::{ControlEnvelope, ControlMessage, DEFAULT_CHANNEL};
pub use media::{MediaAction, MediaConstraints, MediaOptions, Resolution, VideoConstraints};
pub use options::{
	BinaryType, DEFAULT_STUN_URL, DataChannelInit, IceServer, OfferOptions, RtcConfiguration, default_ice_servers,
};
pub use signaling::{ConnectionKind, IceCandidate, SdpType, SessionDescription, SignalType, SignalingEnvelope};
