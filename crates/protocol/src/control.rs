//! Media-control messages piggy-backed on the reserved `_default` channel.
//!
//! ```text
//! { "channel": "_default",
//!   "message": { "type": "mediaStreamStart" | "mediaStreamStop" | "mediaStreamStopRemote",
//!                "voice": bool?, "NO_RESET": bool? } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the channel reserved for the media-control protocol.
pub const DEFAULT_CHANNEL: &str = "_default";

/// Media state change announced to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
	/// Sender started its local stream.
	MediaStreamStart {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		voice: Option<bool>,
	},
	/// Sender stopped its local stream; receiver resets its remote view.
	MediaStreamStop {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		voice: Option<bool>,
		#[serde(rename = "NO_RESET", default, skip_serializing_if = "Option::is_none")]
		no_reset: Option<bool>,
	},
	/// Sender asks the receiver to stop and release its own local capture.
	MediaStreamStopRemote {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		voice: Option<bool>,
		#[serde(rename = "NO_RESET", default, skip_serializing_if = "Option::is_none")]
		no_reset: Option<bool>,
	},
}

impl ControlMessage {
	pub fn start(voice: bool) -> Self {
		ControlMessage::MediaStreamStart { voice: Some(voice) }
	}

	pub fn stop(voice: bool, no_reset: bool) -> Self {
		ControlMessage::MediaStreamStop {
			voice: Some(voice),
			no_reset: Some(no_reset),
		}
	}

	pub fn stop_remote(voice: bool, no_reset: bool) -> Self {
		ControlMessage::MediaStreamStopRemote {
			voice: Some(voice),
			no_reset: Some(no_reset),
		}
	}

	/// Wire name of the message type.
	pub fn type_name(&self) -> &'static str {
		match self {
			ControlMessage::MediaStreamStart { .. } => "mediaStreamStart",
			ControlMessage::MediaStreamStop { .. } => "mediaStreamStop",
			ControlMessage::MediaStreamStopRemote { .. } => "mediaStreamStopRemote",
		}
	}

	/// Whether the sender asked the receiver to keep its surface as is.
	pub fn no_reset(&self) -> bool {
		match self {
			ControlMessage::MediaStreamStart { .. } => false,
			ControlMessage::MediaStreamStop { no_reset, .. }
			| ControlMessage::MediaStreamStopRemote { no_reset, .. } => no_reset.unwrap_or(false),
		}
	}

	fn is_known_type(name: &str) -> bool {
		matches!(name, "mediaStreamStart" | "mediaStreamStop" | "mediaStreamStopRemote")
	}
}

/// Full frame sent over [`DEFAULT_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEnvelope {
	pub channel: String,
	pub message: ControlMessage,
}

impl ControlEnvelope {
	pub fn new(message: ControlMessage) -> Self {
		Self {
			channel: DEFAULT_CHANNEL.to_string(),
			message,
		}
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	/// Decodes a control frame, returning `Ok(None)` when the message type is
	/// not one of the media-control types.
	pub fn from_json(text: &str) -> serde_json::Result<Option<Self>> {
		let value: Value = serde_json::from_str(text)?;
		let known = value
			.get("message")
			.and_then(|m| m.get("type"))
			.and_then(Value::as_str)
			.is_some_and(ControlMessage::is_known_type);
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

	#[test]
	fn stop_uses_upper_case_no_reset_key() {
		let envelope = ControlEnvelope::new(ControlMessage::stop(true, false));
		let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
		assert_eq!(
			value,
			json!({
				"channel": "_default",
				"message": {"type": "mediaStreamStop", "voice": true, "NO_RESET": false}
			})
		);
	}

	#[test]
	fn every_control_type_survives_the_wire() {
		let messages = [
			ControlMessage::start(false),
			ControlMessage::start(true),
			ControlMessage::stop(false, true),
			ControlMessage::stop_remote(true, false),
			ControlMessage::MediaStreamStart { voice: None },
			ControlMessage::MediaStreamStopRemote {
				voice: None,
				no_reset: None,
			},
		];
		for message in messages {
			let envelope = ControlEnvelope::new(message);
			let decoded = ControlEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
			assert_eq!(decoded, Some(envelope));
		}
	}

	#[test]
	fn flags_are_optional_on_the_wire() {
		let decoded = ControlEnvelope::from_json(r#"{"channel": "_default", "message": {"type": "mediaStreamStop"}}"#)
			.unwrap()
			.unwrap();
		assert!(!decoded.message.no_reset());
		assert_eq!(decoded.message.type_name(), "mediaStreamStop");
	}

	#[test]
	fn unknown_control_type_is_ignored() {
		let decoded = ControlEnvelope::from_json(r#"{"channel": "_default", "message": {"type": "ping"}}"#).unwrap();
		assert!(decoded.is_none());
	}

	#[test]
	fn garbage_is_an_error() {
		assert!(ControlEnvelope::from_json("not json").is_err());
	}
}
