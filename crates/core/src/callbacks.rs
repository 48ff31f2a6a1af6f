//! Application callbacks.
//!
//! Two sets exist: [`Observers`] for session-level media and connection
//! events, and [`ChannelCallbacks`] for one application data channel. All
//! callbacks are plain synchronous closures invoked from the session's event
//! task; they must not block.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Session-level notification.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Channel open/close, called with the channel name.
pub type ChannelEventFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Channel message, called with the channel name and the decoded payload.
pub type ChannelMessageFn = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Channel error, called with the channel name and the transport's reason.
pub type ChannelErrorFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Observer set a session requires.
///
/// Every observer must be provided; [`is_complete`](Self::is_complete) is
/// checked when the session is built.
#[derive(Clone, Default)]
pub struct Observers {
	connected: Option<Callback>,
	media_stream_connected: Option<Callback>,
	media_stream_removed: Option<Callback>,
	media_stream_remote_removed: Option<Callback>,
}

impl Observers {
	pub fn new() -> Self {
		Self::default()
	}

	/// The reserved control channel opened.
	pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
		self.connected = Some(Arc::new(f));
		self
	}

	/// The peer announced that it started sending media.
	pub fn on_media_stream_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
		self.media_stream_connected = Some(Arc::new(f));
		self
	}

	/// The peer stopped its media.
	pub fn on_media_stream_removed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
		self.media_stream_removed = Some(Arc::new(f));
		self
	}

	/// The peer stopped our media.
	pub fn on_media_stream_remote_removed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
		self.media_stream_remote_removed = Some(Arc::new(f));
		self
	}

	pub fn is_complete(&self) -> bool {
		self.connected.is_some()
			&& self.media_stream_connected.is_some()
			&& self.media_stream_removed.is_some()
			&& self.media_stream_remote_removed.is_some()
	}

	pub(crate) fn connected(&self) {
		fire(&self.connected);
	}

	pub(crate) fn media_stream_connected(&self) {
		fire(&self.media_stream_connected);
	}

	pub(crate) fn media_stream_removed(&self) {
		fire(&self.media_stream_removed);
	}

	pub(crate) fn media_stream_remote_removed(&self) {
		fire(&self.media_stream_remote_removed);
	}
}

impl fmt::Debug for Observers {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Observers")
			.field("complete", &self.is_complete())
			.finish()
	}
}

fn fire(callback: &Option<Callback>) {
	if let Some(callback) = callback {
		callback();
	}
}

/// Callbacks for one application data channel. Any of them may be absent.
#[derive(Clone, Default)]
pub struct ChannelCallbacks {
	open: Option<ChannelEventFn>,
	message: Option<ChannelMessageFn>,
	error: Option<ChannelErrorFn>,
	close: Option<ChannelEventFn>,
}

impl ChannelCallbacks {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn on_open(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
		self.open = Some(Arc::new(f));
		self
	}

	pub fn on_message(mut self, f: impl Fn(&str, Value) + Send + Sync + 'static) -> Self {
		self.message = Some(Arc::new(f));
		self
	}

	pub fn on_error(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
		self.error = Some(Arc::new(f));
		self
	}

	pub fn on_close(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
		self.close = Some(Arc::new(f));
		self
	}

	pub(crate) fn opened(&self, channel: &str) {
		if let Some(f) = &self.open {
			f(channel);
		}
	}

	pub(crate) fn message(&self, channel: &str, payload: Value) {
		if let Some(f) = &self.message {
			f(channel, payload);
		}
	}

	pub(crate) fn errored(&self, channel: &str, reason: &str) {
		if let Some(f) = &self.error {
			f(channel, reason);
		}
	}

	pub(crate) fn closed(&self, channel: &str) {
		if let Some(f) = &self.close {
			f(channel);
		}
	}
}

impl fmt::Debug for ChannelCallbacks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChannelCallbacks")
			.field("open", &self.open.is_some())
			.field("message", &self.message.is_some())
			.field("error", &self.error.is_some())
			.field("close", &self.close.is_some())
			.finish()
	}
}
