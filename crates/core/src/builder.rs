//! Session construction and validation.

use std::collections::HashMap;
use std::sync::Arc;

use duo_protocol::SignalingEnvelope;
use duo_runtime::{ConfigurationError, MediaCapture, PeerTransportFactory, SendSignaling, VideoSink};
use tracing::debug;

use crate::callbacks::{ChannelCallbacks, Observers};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::logging;
use crate::session::{Session, SessionParts};

/// Collects a session's configuration, callbacks and collaborators.
///
/// [`build`](Self::build) fails with
/// [`ConfigurationError::ParametersNotSet`] when the configuration, the
/// signaling callback or a collaborator is missing, and with
/// [`ConfigurationError::ParametersIncomplete`] when a render surface id or
/// an observer is missing.
#[derive(Default)]
pub struct SessionBuilder {
	config: Option<SessionConfig>,
	signaling: Option<SendSignaling>,
	factory: Option<Arc<dyn PeerTransportFactory>>,
	capture: Option<Arc<dyn MediaCapture>>,
	sink: Option<Arc<dyn VideoSink>>,
	observers: Observers,
	channel_callbacks: HashMap<String, ChannelCallbacks>,
}

impl SessionBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn config(mut self, config: SessionConfig) -> Self {
		self.config = Some(config);
		self
	}

	/// Outbound half of the signaling relay. Called with the session lock
	/// held, so it must hand the envelope off rather than block.
	pub fn signaling(mut self, send: impl Fn(SignalingEnvelope) + Send + Sync + 'static) -> Self {
		self.signaling = Some(Arc::new(send));
		self
	}

	pub fn transport_factory(mut self, factory: Arc<dyn PeerTransportFactory>) -> Self {
		self.factory = Some(factory);
		self
	}

	pub fn media_capture(mut self, capture: Arc<dyn MediaCapture>) -> Self {
		self.capture = Some(capture);
		self
	}

	pub fn video_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
		self.sink = Some(sink);
		self
	}

	pub fn observers(mut self, observers: Observers) -> Self {
		self.observers = observers;
		self
	}

	/// Callbacks for a channel listed in the configuration.
	pub fn channel(mut self, name: impl Into<String>, callbacks: ChannelCallbacks) -> Self {
		self.channel_callbacks.insert(name.into(), callbacks);
		self
	}

	pub fn build(self) -> Result<Arc<Session>> {
		let (Some(config), Some(signaling)) = (self.config, self.signaling) else {
			return Err(ConfigurationError::ParametersNotSet.into());
		};
		let (Some(factory), Some(capture), Some(sink)) = (self.factory, self.capture, self.sink) else {
			return Err(ConfigurationError::ParametersNotSet.into());
		};
		if !config.has_surfaces() || !self.observers.is_complete() {
			return Err(ConfigurationError::ParametersIncomplete.into());
		}

		if config.dev_mode && logging::try_init_dev_logging() {
			debug!("development logging enabled");
		}

		Ok(Session::new(SessionParts {
			config,
			signaling,
			factory,
			capture,
			sink,
			observers: self.observers,
			channel_callbacks: self.channel_callbacks,
		}))
	}
}

#[cfg(test)]
mod tests {
	use duo_runtime::loopback::{LoopbackNetwork, MemoryCapture, MemorySink};

	use super::*;

	fn observers() -> Observers {
		Observers::new()
			.on_connected(|| {})
			.on_media_stream_connected(|| {})
			.on_media_stream_removed(|| {})
			.on_media_stream_remote_removed(|| {})
	}

	fn collaborators(builder: SessionBuilder) -> SessionBuilder {
		let (endpoint, _) = LoopbackNetwork::pair();
		builder
			.transport_factory(Arc::new(endpoint))
			.media_capture(Arc::new(MemoryCapture::new()))
			.video_sink(Arc::new(MemorySink::new()))
	}

	fn reason(result: Result<Arc<Session>>) -> Option<ConfigurationError> {
		result.err().and_then(|e| e.configuration())
	}

	#[test]
	fn missing_config_or_signaling_is_not_set() {
		let no_config = collaborators(SessionBuilder::new()).signaling(|_| {}).observers(observers());
		assert_eq!(reason(no_config.build()), Some(ConfigurationError::ParametersNotSet));

		let no_signaling = collaborators(SessionBuilder::new())
			.config(SessionConfig::new("local", "remote"))
			.observers(observers());
		assert_eq!(reason(no_signaling.build()), Some(ConfigurationError::ParametersNotSet));
	}

	#[test]
	fn missing_collaborator_is_not_set() {
		let builder = SessionBuilder::new()
			.config(SessionConfig::new("local", "remote"))
			.signaling(|_| {})
			.observers(observers())
			.media_capture(Arc::new(MemoryCapture::new()));
		assert_eq!(reason(builder.build()), Some(ConfigurationError::ParametersNotSet));
	}

	#[test]
	fn missing_surface_or_observer_is_incomplete() {
		let no_surface = collaborators(SessionBuilder::new())
			.config(SessionConfig::new("local", ""))
			.signaling(|_| {})
			.observers(observers());
		assert_eq!(reason(no_surface.build()), Some(ConfigurationError::ParametersIncomplete));

		let no_observer = collaborators(SessionBuilder::new())
			.config(SessionConfig::new("local", "remote"))
			.signaling(|_| {})
			.observers(Observers::new().on_connected(|| {}));
		assert_eq!(reason(no_observer.build()), Some(ConfigurationError::ParametersIncomplete));
	}

	#[test]
	fn complete_builder_produces_session() {
		let session = collaborators(SessionBuilder::new())
			.config(SessionConfig::new("local", "remote"))
			.signaling(|_| {})
			.observers(observers())
			.build()
			.unwrap();
		assert_eq!(session.config().video_id_local, "local");
	}
}
