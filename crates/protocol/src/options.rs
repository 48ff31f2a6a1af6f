//! Peer transport configuration passed to the transport factory.

use serde::{Deserialize, Serialize};

use crate::signaling::ConnectionKind;

/// Public STUN relay used when the configuration does not name one.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// One STUN/TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
	pub urls: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credential: Option<String>,
}

impl IceServer {
	pub fn stun(url: impl Into<String>) -> Self {
		Self {
			urls: vec![url.into()],
			username: None,
			credential: None,
		}
	}
}

pub fn default_ice_servers() -> Vec<IceServer> {
	vec![IceServer::stun(DEFAULT_STUN_URL)]
}

/// Configuration used to create every underlying transport of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfiguration {
	pub ice_servers: Vec<IceServer>,
	/// DTLS-SRTP key agreement; always on for this crate.
	pub dtls_srtp_key_agreement: bool,
}

impl Default for RtcConfiguration {
	fn default() -> Self {
		Self {
			ice_servers: default_ice_servers(),
			dtls_srtp_key_agreement: true,
		}
	}
}

/// Offer/answer constraints, fixed per connection kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferOptions {
	pub offer_to_receive_audio: bool,
	pub offer_to_receive_video: bool,
}

impl OfferOptions {
	pub fn for_kind(kind: ConnectionKind) -> Self {
		let media = kind == ConnectionKind::Media;
		Self {
			offer_to_receive_audio: media,
			offer_to_receive_video: media,
		}
	}
}

/// How binary frames are surfaced to the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
	#[default]
	Blob,
	ArrayBuffer,
}

/// Creation parameters for a logical data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelInit {
	/// In-order delivery.
	pub ordered: bool,
	/// `None` retransmits until delivered.
	pub max_retransmits: Option<u16>,
	pub binary_type: BinaryType,
}

impl DataChannelInit {
	/// Ordered delivery with unlimited retransmits.
	pub fn reliable(binary_type: BinaryType) -> Self {
		Self {
			ordered: true,
			max_retransmits: None,
			binary_type,
		}
	}
}

impl Default for DataChannelInit {
	fn default() -> Self {
		Self::reliable(BinaryType::default())
	}
}
