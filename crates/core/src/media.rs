//! Local capture and render-surface bookkeeping.
//!
//! [`MediaManager`] owns [`MediaState`] and drives the capture device and the
//! two render surfaces. It knows nothing about connections: the session
//! decides when a stream is attached to the media transport and when control
//! messages go out.

use std::sync::Arc;

use duo_runtime::{MediaCapture, MediaStream, VideoSink};
use tracing::debug;

/// What each side is currently showing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaState {
	pub local_active: bool,
	pub remote_active: bool,
	pub local_stream: Option<MediaStream>,
	pub remote_stream: Option<MediaStream>,
}

pub struct MediaManager {
	capture: Arc<dyn MediaCapture>,
	sink: Arc<dyn VideoSink>,
	local_surface: String,
	remote_surface: String,
	state: MediaState,
}

impl MediaManager {
	pub(crate) fn new(
		capture: Arc<dyn MediaCapture>,
		sink: Arc<dyn VideoSink>,
		local_surface: String,
		remote_surface: String,
	) -> Self {
		Self {
			capture,
			sink,
			local_surface,
			remote_surface,
			state: MediaState::default(),
		}
	}

	pub fn state(&self) -> &MediaState {
		&self.state
	}

	pub fn is_local_active(&self) -> bool {
		self.state.local_active
	}

	pub fn local_stream(&self) -> Option<&MediaStream> {
		self.state.local_stream.as_ref()
	}

	/// Shows a freshly captured stream on the local surface.
	///
	/// A stream that was already active is released first.
	pub(crate) fn activate_local(&mut self, stream: MediaStream) {
		if let Some(previous) = self.state.local_stream.take() {
			self.capture.release(&previous);
		}
		self.sink.attach(&self.local_surface, &stream);
		debug!(stream = stream.id(), "local stream active");
		self.state.local_stream = Some(stream);
		self.state.local_active = true;
	}

	/// Stops local capture. Returns false when nothing was active.
	///
	/// The surface keeps its last frame when `no_reset` is set.
	pub(crate) fn stop_local(&mut self, no_reset: bool) -> bool {
		if !self.state.local_active {
			return false;
		}
		self.state.local_active = false;
		if let Some(stream) = self.state.local_stream.take() {
			self.capture.release(&stream);
			debug!(stream = stream.id(), "local stream stopped");
		}
		self.sink.pause(&self.local_surface);
		if !no_reset {
			self.sink.detach(&self.local_surface);
		}
		true
	}

	/// Shows the peer's stream unless one is already shown. Returns true when
	/// the stream was attached.
	pub(crate) fn attach_remote(&mut self, stream: MediaStream) -> bool {
		if self.state.remote_active {
			debug!(stream = stream.id(), "remote stream already attached");
			return false;
		}
		self.sink.attach(&self.remote_surface, &stream);
		debug!(stream = stream.id(), "remote stream attached");
		self.state.remote_stream = Some(stream);
		self.state.remote_active = true;
		true
	}

	/// Drops the reference to the peer's stream.
	pub(crate) fn reset_remote(&mut self, no_reset: bool) {
		self.state.remote_active = false;
		self.state.remote_stream = None;
		self.sink.pause(&self.remote_surface);
		if !no_reset {
			self.sink.detach(&self.remote_surface);
		}
	}

	/// Releases the capture device and both surfaces.
	pub(crate) fn reset(&mut self) {
		self.stop_local(false);
		if let Some(stream) = self.state.local_stream.take() {
			self.capture.release(&stream);
		}
		self.reset_remote(false);
		self.state = MediaState::default();
	}

	/// Gives back a stream whose acquisition completed too late to be used.
	pub(crate) fn discard(&self, stream: &MediaStream) {
		debug!(stream = stream.id(), "discarding late capture");
		self.capture.release(stream);
	}
}

#[cfg(test)]
mod tests {
	use duo_protocol::{MediaConstraints, MediaOptions};
	use duo_runtime::loopback::{MemoryCapture, MemorySink, SinkOp};

	use super::*;

	fn manager() -> (MediaManager, Arc<MemoryCapture>, Arc<MemorySink>) {
		let capture = Arc::new(MemoryCapture::new());
		let sink = Arc::new(MemorySink::new());
		let manager = MediaManager::new(capture.clone(), sink.clone(), "local".into(), "remote".into());
		(manager, capture, sink)
	}

	async fn captured(capture: &MemoryCapture) -> MediaStream {
		capture
			.acquire(MediaConstraints::from_options(&MediaOptions::default()))
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn start_then_stop_releases_capture() {
		let (mut media, capture, sink) = manager();
		media.activate_local(captured(&capture).await);
		assert!(media.is_local_active());
		assert!(sink.is_playing("local"));

		assert!(media.stop_local(false));
		assert!(capture.active_streams().is_empty());
		assert!(sink.attached("local").is_none());
		assert!(!media.stop_local(false), "second stop is a no-op");
	}

	#[tokio::test]
	async fn stop_without_reset_keeps_surface() {
		let (mut media, capture, sink) = manager();
		media.activate_local(captured(&capture).await);
		media.stop_local(true);
		assert!(sink.attached("local").is_some());
		assert!(!sink.is_playing("local"));
	}

	#[tokio::test]
	async fn only_first_remote_stream_is_attached() {
		let (mut media, _capture, sink) = manager();
		assert!(media.attach_remote(MediaStream::new("r1", true, true)));
		assert!(!media.attach_remote(MediaStream::new("r2", true, true)));
		assert_eq!(sink.attached("remote").unwrap().id(), "r1");

		media.reset_remote(false);
		assert!(!media.state().remote_active);
		assert!(media.state().remote_stream.is_none());
		assert_eq!(
			sink.ops().last(),
			Some(&SinkOp::Detach {
				surface: "remote".into()
			})
		);
	}

	#[tokio::test]
	async fn reset_clears_everything() {
		let (mut media, capture, _sink) = manager();
		media.activate_local(captured(&capture).await);
		media.attach_remote(MediaStream::new("r1", true, false));
		media.reset();
		assert_eq!(media.state(), &MediaState::default());
		assert!(capture.active_streams().is_empty());
	}
}
