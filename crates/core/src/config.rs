//! Session configuration record.

use duo_protocol::{BinaryType, IceServer, RtcConfiguration, default_ice_servers};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A data channel opened on every data connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
	pub name: String,
	#[serde(default)]
	pub binary_type: BinaryType,
}

impl ChannelConfig {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			binary_type: BinaryType::default(),
		}
	}
}

/// Static part of a session's configuration.
///
/// Callbacks are not part of this record; they are attached through
/// [`SessionBuilder`](crate::SessionBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
	/// Installs a development log subscriber when the session is built.
	#[serde(default)]
	pub dev_mode: bool,
	/// Render surface for local capture.
	#[serde(default)]
	pub video_id_local: String,
	/// Render surface for the peer's stream.
	#[serde(default)]
	pub video_id_remote: String,
	#[serde(default = "default_ice_servers")]
	pub ice_servers: Vec<IceServer>,
	/// Application channels, created with every data connection.
	#[serde(default)]
	pub datachannels: Vec<ChannelConfig>,
}

impl SessionConfig {
	/// Creates a config with the default relay list and no channels.
	pub fn new(video_id_local: impl Into<String>, video_id_remote: impl Into<String>) -> Self {
		Self {
			dev_mode: false,
			video_id_local: video_id_local.into(),
			video_id_remote: video_id_remote.into(),
			ice_servers: default_ice_servers(),
			datachannels: Vec::new(),
		}
	}

	pub fn from_json(text: &str) -> Result<Self> {
		Ok(serde_json::from_str(text)?)
	}

	pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
		self.datachannels.push(channel);
		self
	}

	pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
		self.dev_mode = dev_mode;
		self
	}

	/// Both render surfaces are named.
	pub(crate) fn has_surfaces(&self) -> bool {
		!self.video_id_local.trim().is_empty() && !self.video_id_remote.trim().is_empty()
	}

	/// Transport parameters shared by both connection kinds.
	pub fn rtc_configuration(&self) -> RtcConfiguration {
		let ice_servers = if self.ice_servers.is_empty() {
			default_ice_servers()
		} else {
			self.ice_servers.clone()
		};
		RtcConfiguration {
			ice_servers,
			..RtcConfiguration::default()
		}
	}
}

#[cfg(test)]
mod tests {
	use duo_protocol::DEFAULT_STUN_URL;

	use super::*;

	#[test]
	fn from_json_reads_camel_case_keys() {
		let cfg = SessionConfig::from_json(
			r#"{
				"devMode": true,
				"videoIdLocal": "local",
				"videoIdRemote": "remote",
				"datachannels": [{"name": "text"}, {"name": "file", "binaryType": "arraybuffer"}]
			}"#,
		)
		.unwrap();
		assert!(cfg.dev_mode);
		assert_eq!(cfg.video_id_local, "local");
		assert_eq!(cfg.datachannels[0], ChannelConfig::new("text"));
		assert_eq!(cfg.datachannels[1].binary_type, BinaryType::ArrayBuffer);
		assert_eq!(cfg.ice_servers[0].urls, vec![DEFAULT_STUN_URL.to_string()]);
	}

	#[test]
	fn missing_surfaces_are_detected() {
		let cfg = SessionConfig::from_json(r#"{"videoIdLocal": "local"}"#).unwrap();
		assert!(!cfg.has_surfaces());
		assert!(SessionConfig::new("local", "remote").has_surfaces());
	}

	#[test]
	fn empty_relay_list_falls_back_to_default() {
		let mut cfg = SessionConfig::new("l", "r");
		cfg.ice_servers.clear();
		let rtc = cfg.rtc_configuration();
		assert_eq!(rtc, RtcConfiguration::default());
	}

	#[test]
	fn malformed_json_is_an_error() {
		assert!(SessionConfig::from_json("{\"datachannels\": 3}").is_err());
	}
}
