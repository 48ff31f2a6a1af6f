//! Signaling envelopes exchanged with the peer through the out-of-band relay.
//!
//! One envelope per relay message, no batching:
//!
//! ```text
//! { "type": "receiveOffer" | "receiveAnswer" | "receiveCandidate",
//!   "connectionType": "data" | "media",
//!   "data": <description> | <candidate> }
//! ```
//!
//! The `type` names describe what the *receiver* should do with the envelope,
//! so the side producing an offer emits `receiveOffer`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two sub-connections of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
	/// Reliable data connection carrying every logical channel.
	Data,
	/// Audio/video connection carrying the local and remote streams.
	Media,
}

impl ConnectionKind {
	pub const ALL: [ConnectionKind; 2] = [ConnectionKind::Data, ConnectionKind::Media];

	pub fn as_str(self) -> &'static str {
		match self {
			ConnectionKind::Data => "data",
			ConnectionKind::Media => "media",
		}
	}
}

impl fmt::Display for ConnectionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// SDP description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
	Offer,
	Answer,
	Pranswer,
	Rollback,
}

/// Offer or answer description, in the shape browsers serialize it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
	#[serde(rename = "type")]
	pub sdp_type: SdpType,
	pub sdp: String,
}

impl SessionDescription {
	pub fn offer(sdp: impl Into<String>) -> Self {
		Self {
			sdp_type: SdpType::Offer,
			sdp: sdp.into(),
		}
	}

	pub fn answer(sdp: impl Into<String>) -> Self {
		Self {
			sdp_type: SdpType::Answer,
			sdp: sdp.into(),
		}
	}
}

/// ICE candidate descriptor as relayed between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
	/// Media line index (`sdpMLineIndex`).
	#[serde(default)]
	pub label: Option<u16>,
	/// Media stream identification tag (`sdpMid`).
	#[serde(default)]
	pub id: Option<String>,
	/// The `candidate:` attribute line.
	pub candidate: String,
}

impl IceCandidate {
	pub fn new(label: u16, id: impl Into<String>, candidate: impl Into<String>) -> Self {
		Self {
			label: Some(label),
			id: Some(id.into()),
			candidate: candidate.into(),
		}
	}
}

/// Discriminant of a [`SignalingEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
	ReceiveOffer,
	ReceiveAnswer,
	ReceiveCandidate,
}

impl SignalType {
	pub fn as_str(self) -> &'static str {
		match self {
			SignalType::ReceiveOffer => "receiveOffer",
			SignalType::ReceiveAnswer => "receiveAnswer",
			SignalType::ReceiveCandidate => "receiveCandidate",
		}
	}

	fn from_wire(s: &str) -> Option<Self> {
		match s {
			"receiveOffer" => Some(SignalType::ReceiveOffer),
			"receiveAnswer" => Some(SignalType::ReceiveAnswer),
			"receiveCandidate" => Some(SignalType::ReceiveCandidate),
			_ => None,
		}
	}
}

/// Message relayed to the peer through the signaling transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalingEnvelope {
	/// Remote side should answer this offer.
	ReceiveOffer {
		#[serde(rename = "connectionType")]
		connection_type: ConnectionKind,
		data: SessionDescription,
	},
	/// Remote side should apply this answer to its pending offer.
	ReceiveAnswer {
		#[serde(rename = "connectionType")]
		connection_type: ConnectionKind,
		data: SessionDescription,
	},
	/// Remote side should add this candidate to its transport.
	ReceiveCandidate {
		#[serde(rename = "connectionType")]
		connection_type: ConnectionKind,
		data: IceCandidate,
	},
}

impl SignalingEnvelope {
	pub fn offer(kind: ConnectionKind, description: SessionDescription) -> Self {
		SignalingEnvelope::ReceiveOffer {
			connection_type: kind,
			data: description,
		}
	}

	pub fn answer(kind: ConnectionKind, description: SessionDescription) -> Self {
		SignalingEnvelope::ReceiveAnswer {
			connection_type: kind,
			data: description,
		}
	}

	pub fn candidate(kind: ConnectionKind, candidate: IceCandidate) -> Self {
		SignalingEnvelope::ReceiveCandidate {
			connection_type: kind,
			data: candidate,
		}
	}

	pub fn signal_type(&self) -> SignalType {
		match self {
			SignalingEnvelope::ReceiveOffer { .. } => SignalType::ReceiveOffer,
			SignalingEnvelope::ReceiveAnswer { .. } => SignalType::ReceiveAnswer,
			SignalingEnvelope::ReceiveCandidate { .. } => SignalType::ReceiveCandidate,
		}
	}

	pub fn connection_type(&self) -> ConnectionKind {
		match self {
			SignalingEnvelope::ReceiveOffer { connection_type, .. }
			| SignalingEnvelope::ReceiveAnswer { connection_type, .. }
			| SignalingEnvelope::ReceiveCandidate { connection_type, .. } => *connection_type,
		}
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	/// Decodes an envelope, returning `Ok(None)` for an unrecognized `type`.
	///
	/// Unknown types are forward-compatible and must be ignored by the
	/// receiver; a known type with a malformed body is an error.
	pub fn from_json(text: &str) -> serde_json::Result<Option<Self>> {
		let value: Value = serde_json::from_str(text)?;
		Self::from_value(value)
	}

	/// Same as [`from_json`](Self::from_json) for an already-parsed value.
	pub fn from_value(value: Value) -> serde_json::Result<Option<Self>> {
		let known = value
			.get("type")
			.and_then(Value::as_str)
			.and_then(SignalType::from_wire)
			.is_some();
		if !known {
			return Ok(None);
		}
		serde_json::from_value(value).map(Some)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn envelopes() -> Vec<SignalingEnvelope> {
		let mut all = Vec::new();
		for kind in ConnectionKind::ALL {
			all.push(SignalingEnvelope::offer(kind, SessionDescription::offer("v=0 offer")));
			all.push(SignalingEnvelope::answer(kind, SessionDescription::answer("v=0 answer")));
			all.push(SignalingEnvelope::candidate(
				kind,
				IceCandidate::new(0, "0", "candidate:1 1 udp 2122260223 10.0.0.1 54400 typ host"),
			));
		}
		all
	}

	#[test]
	fn envelope_wire_shape() {
		let envelope = SignalingEnvelope::offer(ConnectionKind::Media, SessionDescription::offer("sdp"));
		let value = serde_json::to_value(&envelope).unwrap();
		assert_eq!(
			value,
			json!({
				"type": "receiveOffer",
				"connectionType": "media",
				"data": {"type": "offer", "sdp": "sdp"}
			})
		);
	}

	#[test]
	fn candidate_wire_shape() {
		let envelope = SignalingEnvelope::candidate(ConnectionKind::Data, IceCandidate::new(1, "data", "candidate:x"));
		let value = serde_json::to_value(&envelope).unwrap();
		assert_eq!(value["type"], "receiveCandidate");
		assert_eq!(value["connectionType"], "data");
		assert_eq!(value["data"], json!({"label": 1, "id": "data", "candidate": "candidate:x"}));
	}

	#[test]
	fn every_envelope_type_survives_the_wire() {
		for envelope in envelopes() {
			let text = envelope.to_json().unwrap();
			let decoded = SignalingEnvelope::from_json(&text).unwrap();
			assert_eq!(decoded, Some(envelope));
		}
	}

	#[test]
	fn unknown_type_is_not_an_error() {
		let decoded = SignalingEnvelope::from_json(r#"{"type": "bye", "connectionType": "data"}"#).unwrap();
		assert!(decoded.is_none());

		let decoded = SignalingEnvelope::from_json(r#"{"connectionType": "data"}"#).unwrap();
		assert!(decoded.is_none());
	}

	#[test]
	fn known_type_with_bad_body_is_an_error() {
		let result = SignalingEnvelope::from_json(r#"{"type": "receiveOffer", "connectionType": "video", "data": {}}"#);
		assert!(result.is_err());
	}

	#[test]
	fn candidate_accepts_missing_mline_fields() {
		let decoded = SignalingEnvelope::from_json(
			r#"{"type": "receiveCandidate", "connectionType": "media", "data": {"candidate": "candidate:y"}}"#,
		)
		.unwrap()
		.unwrap();
		match decoded {
			SignalingEnvelope::ReceiveCandidate { data, .. } => {
				assert_eq!(data.label, None);
				assert_eq!(data.id, None);
				assert_eq!(data.candidate, "candidate:y");
			}
			other => panic!("expected candidate, got {other:?}"),
		}
	}
}
