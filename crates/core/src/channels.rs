//! Data channels of the current data connection.
//!
//! Each channel name maps to at most one descriptor holding the channel we
//! created and, once the peer announces its own channel with the same
//! label, the peer's handle. Inbound frames are routed by label; which handle
//! carried them does not matter.
//!
//! The reserved [`DEFAULT_CHANNEL`] is created with every data connection and
//! carries the media-control protocol. Its events are handled by the session,
//! never by application callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use duo_protocol::{BinaryType, DEFAULT_CHANNEL, DataChannelInit};
use duo_runtime::{ChannelError, ChannelState, DataChannel, PeerTransport};
use serde_json::Value;
use tracing::{debug, warn};

use crate::callbacks::ChannelCallbacks;
use crate::config::ChannelConfig;
use crate::error::Result;

struct ChannelEntry {
	name: String,
	binary_type: BinaryType,
	callbacks: ChannelCallbacks,
	local: Option<Arc<dyn DataChannel>>,
	remote: Option<Arc<dyn DataChannel>>,
}

impl ChannelEntry {
	fn is_open(handle: &Option<Arc<dyn DataChannel>>) -> bool {
		handle.as_ref().is_some_and(|c| c.ready_state() == ChannelState::Open)
	}

	fn close(&mut self) {
		if let Some(local) = self.local.take() {
			local.close();
		}
		if let Some(remote) = self.remote.take() {
			remote.close();
		}
	}
}

/// Per-session channel table.
pub struct ChannelRegistry {
	configured: Vec<ChannelConfig>,
	configured_callbacks: HashMap<String, ChannelCallbacks>,
	entries: Vec<ChannelEntry>,
}

impl ChannelRegistry {
	pub(crate) fn new(configured: Vec<ChannelConfig>, callbacks: HashMap<String, ChannelCallbacks>) -> Self {
		Self {
			configured,
			configured_callbacks: callbacks,
			entries: Vec::new(),
		}
	}

	/// Names of the channels currently known, in creation order.
	pub fn names(&self) -> Vec<String> {
		self.entries.iter().map(|e| e.name.clone()).collect()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.entry(name).is_some()
	}

	/// Creates the reserved channel and every configured channel on a fresh
	/// data transport, dropping whatever the previous connection left behind.
	pub(crate) async fn open_all(&mut self, transport: &Arc<dyn PeerTransport>) -> Result<()> {
		self.close_all();
		self.ensure_default(transport).await?;
		for config in self.configured.clone() {
			let callbacks = self.configured_callbacks.get(&config.name).cloned().unwrap_or_default();
			self.create(transport, &config.name, callbacks, config.binary_type).await?;
		}
		Ok(())
	}

	/// Creates [`DEFAULT_CHANNEL`] unless this connection already has it.
	/// Returns true when it was created.
	pub(crate) async fn ensure_default(&mut self, transport: &Arc<dyn PeerTransport>) -> Result<bool> {
		if self.entry(DEFAULT_CHANNEL).is_some_and(|e| e.local.is_some()) {
			return Ok(false);
		}
		self.create(transport, DEFAULT_CHANNEL, ChannelCallbacks::default(), BinaryType::default())
			.await?;
		Ok(true)
	}

	/// Adds an application channel on the current data transport.
	pub(crate) async fn add(
		&mut self,
		transport: Option<&Arc<dyn PeerTransport>>,
		name: &str,
		callbacks: ChannelCallbacks,
		binary_type: BinaryType,
	) -> Result<()> {
		if name == DEFAULT_CHANNEL {
			return Err(ChannelError::Reserved(name.to_string()).into());
		}
		let transport = transport.ok_or(ChannelError::NoDataConnection)?;
		self.create(transport, name, callbacks, binary_type).await
	}

	async fn create(
		&mut self,
		transport: &Arc<dyn PeerTransport>,
		name: &str,
		callbacks: ChannelCallbacks,
		binary_type: BinaryType,
	) -> Result<()> {
		let channel = transport
			.create_data_channel(name, DataChannelInit::reliable(binary_type))
			.await?;
		match self.entry_mut(name) {
			Some(entry) => {
				if let Some(old) = entry.local.replace(channel) {
					old.close();
				}
				entry.callbacks = callbacks;
				entry.binary_type = binary_type;
			}
			None => self.entries.push(ChannelEntry {
				name: name.to_string(),
				binary_type,
				callbacks,
				local: Some(channel),
				remote: None,
			}),
		}
		debug!(channel = name, ?binary_type, "datachannel added");
		Ok(())
	}

	/// Closes and forgets a channel.
	pub(crate) fn remove(&mut self, name: &str) -> Result<()> {
		let index = self
			.entries
			.iter()
			.position(|e| e.name == name)
			.ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
		let mut entry = self.entries.remove(index);
		entry.close();
		debug!(channel = name, "datachannel removed");
		Ok(())
	}

	/// Closes every channel of the connection.
	pub(crate) fn close_all(&mut self) {
		for mut entry in self.entries.drain(..) {
			entry.close();
			debug!(channel = %entry.name, "datachannel removed");
		}
	}

	/// Records a channel the peer created. Returns true for [`DEFAULT_CHANNEL`].
	pub(crate) fn announce(&mut self, channel: Arc<dyn DataChannel>) -> bool {
		let name = channel.label().to_string();
		match self.entry_mut(&name) {
			Some(entry) => entry.remote = Some(channel),
			None => self.entries.push(ChannelEntry {
				name: name.clone(),
				binary_type: BinaryType::default(),
				callbacks: ChannelCallbacks::default(),
				local: None,
				remote: Some(channel),
			}),
		}
		debug!(channel = %name, "remote datachannel announced");
		name == DEFAULT_CHANNEL
	}

	/// Whether `name` can carry frames right now.
	pub fn is_open(&self, name: &str) -> bool {
		self.entry(name)
			.is_some_and(|e| ChannelEntry::is_open(&e.local) || ChannelEntry::is_open(&e.remote))
	}

	/// Sends one text frame on `name`.
	pub(crate) async fn send_text(&self, name: &str, text: String) -> Result<()> {
		let handle = self.sender(name)?;
		handle.send_text(text).await
	}

	fn sender(&self, name: &str) -> Result<Arc<dyn DataChannel>> {
		let entry = self
			.entry(name)
			.ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
		[&entry.remote, &entry.local]
			.into_iter()
			.flatten()
			.find(|c| c.ready_state() == ChannelState::Open)
			.cloned()
			.ok_or_else(|| ChannelError::NotOpen(name.to_string()).into())
	}

	pub(crate) fn opened(&self, name: &str) {
		match self.entry(name) {
			Some(entry) => {
				debug!(channel = name, "datachannel opened");
				entry.callbacks.opened(name);
			}
			None => debug!(channel = name, "open for unknown datachannel"),
		}
	}

	/// Decodes and delivers one inbound application frame. Frames that are not
	/// JSON are dropped.
	pub(crate) fn message(&self, name: &str, data: &str) {
		let Some(entry) = self.entry(name) else {
			debug!(channel = name, "message for unknown datachannel dropped");
			return;
		};
		match serde_json::from_str::<Value>(data) {
			Ok(payload) => entry.callbacks.message(name, payload),
			Err(e) => warn!(channel = name, error = %e, "dropping malformed datachannel message"),
		}
	}

	pub(crate) fn errored(&self, name: &str, reason: &str) {
		warn!(channel = name, reason, "datachannel error");
		if let Some(entry) = self.entry(name) {
			entry.callbacks.errored(name, reason);
		}
	}

	pub(crate) fn closed(&self, name: &str) {
		debug!(channel = name, "datachannel closed");
		if let Some(entry) = self.entry(name) {
			entry.callbacks.closed(name);
		}
	}

	fn entry(&self, name: &str) -> Option<&ChannelEntry> {
		self.entries.iter().find(|e| e.name == name)
	}

	fn entry_mut(&mut self, name: &str) -> Option<&mut ChannelEntry> {
		self.entries.iter_mut().find(|e| e.name == name)
	}
}

#[cfg(test)]
mod tests {
	use duo_protocol::{ConnectionKind, RtcConfiguration};
	use duo_runtime::loopback::LoopbackNetwork;
	use duo_runtime::{Error, PeerTransportFactory};
	use parking_lot::Mutex;

	use super::*;

	fn transport() -> Arc<dyn PeerTransport> {
		let (a, _b) = LoopbackNetwork::pair();
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		a.create(ConnectionKind::Data, &RtcConfiguration::default(), tx).unwrap()
	}

	fn recording(seen: &Arc<Mutex<Vec<Value>>>) -> ChannelCallbacks {
		let sink = Arc::clone(seen);
		ChannelCallbacks::new().on_message(move |_, payload| sink.lock().push(payload))
	}

	#[tokio::test]
	async fn test_open_all_creates_default_and_configured() {
		let mut registry = ChannelRegistry::new(
			vec![ChannelConfig::new("text"), ChannelConfig::new("file")],
			HashMap::new(),
		);
		registry.open_all(&transport()).await.unwrap();
		assert_eq!(registry.names(), vec![DEFAULT_CHANNEL, "text", "file"]);
		assert!(!registry.is_open("text"));
	}

	#[tokio::test]
	async fn test_add_requires_data_connection() {
		let mut registry = ChannelRegistry::new(Vec::new(), HashMap::new());
		let err = registry
			.add(None, "text", ChannelCallbacks::new(), BinaryType::Blob)
			.await
			.unwrap_err();
		assert_eq!(err.channel(), Some(&ChannelError::NoDataConnection));
	}

	#[tokio::test]
	async fn test_default_name_is_reserved() {
		let mut registry = ChannelRegistry::new(Vec::new(), HashMap::new());
		let t = transport();
		let err = registry
			.add(Some(&t), DEFAULT_CHANNEL, ChannelCallbacks::new(), BinaryType::Blob)
			.await
			.unwrap_err();
		assert_eq!(err.channel(), Some(&ChannelError::Reserved(DEFAULT_CHANNEL.into())));
	}

	#[tokio::test]
	async fn test_send_errors() {
		let mut registry = ChannelRegistry::new(Vec::new(), HashMap::new());
		let err = registry.send_text("text", "{}".into()).await.unwrap_err();
		assert_eq!(err.channel(), Some(&ChannelError::NotFound("text".into())));

		let t = transport();
		registry
			.add(Some(&t), "text", ChannelCallbacks::new(), BinaryType::Blob)
			.await
			.unwrap();
		let err = registry.send_text("text", "{}".into()).await.unwrap_err();
		assert!(matches!(err, Error::Channel(ChannelError::NotOpen(_))));
	}

	#[tokio::test]
	async fn test_remove_unknown_channel() {
		let mut registry = ChannelRegistry::new(Vec::new(), HashMap::new());
		assert_eq!(
			registry.remove("nope").unwrap_err().channel(),
			Some(&ChannelError::NotFound("nope".into()))
		);
	}

	#[tokio::test]
	async fn test_messages_are_decoded_before_delivery() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let mut callbacks = HashMap::new();
		callbacks.insert("text".to_string(), recording(&seen));
		let mut registry = ChannelRegistry::new(vec![ChannelConfig::new("text")], callbacks);
		registry.open_all(&transport()).await.unwrap();

		registry.message("text", r#"{"hello":1}"#);
		registry.message("text", "not json");
		registry.message("other", r#"{"hello":2}"#);
		assert_eq!(*seen.lock(), vec![serde_json::json!({"hello": 1})]);
	}

	#[tokio::test]
	async fn test_announced_channel_merges_with_local() {
		let mut registry = ChannelRegistry::new(vec![ChannelConfig::new("text")], HashMap::new());
		let t = transport();
		registry.open_all(&t).await.unwrap();

		let (a, _b) = LoopbackNetwork::pair();
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		let other = a.create(ConnectionKind::Data, &RtcConfiguration::default(), tx).unwrap();
		let remote_default = other
			.create_data_channel(DEFAULT_CHANNEL, DataChannelInit::default())
			.await
			.unwrap();
		assert!(registry.announce(remote_default));
		let remote_extra = other
			.create_data_channel("extra", DataChannelInit::default())
			.await
			.unwrap();
		assert!(!registry.announce(remote_extra));
		assert_eq!(registry.names(), vec![DEFAULT_CHANNEL, "text", "extra"]);

		registry.close_all();
		assert!(registry.names().is_empty());
	}
}
