use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use duo_protocol::MediaConstraints;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{MediaCapture, MediaStream, VideoSink};

/// Capture device that hands out synthetic streams.
#[derive(Default)]
pub struct MemoryCapture {
	next_id: AtomicU64,
	denied: AtomicBool,
	active: Mutex<HashSet<MediaStream>>,
	requests: Mutex<Vec<MediaConstraints>>,
}

impl MemoryCapture {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every later `acquire` fail as if the user refused access.
	pub fn set_denied(&self, denied: bool) {
		self.denied.store(denied, Ordering::SeqCst);
	}

	/// Streams acquired and not yet released.
	pub fn active_streams(&self) -> Vec<MediaStream> {
		self.active.lock().iter().cloned().collect()
	}

	/// Constraints of every acquisition attempt, in order.
	pub fn requests(&self) -> Vec<MediaConstraints> {
		self.requests.lock().clone()
	}
}

#[async_trait]
impl MediaCapture for MemoryCapture {
	async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream> {
		let video = constraints.video.is_some();
		let audio = constraints.audio;
		self.requests.lock().push(constraints);
		if self.denied.load(Ordering::SeqCst) {
			return Err(Error::Capture("Permission denied".into()));
		}
		let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		let stream = MediaStream::new(format!("capture-{n}"), audio, video);
		self.active.lock().insert(stream.clone());
		debug!(stream = stream.id(), audio, video, "capture acquired");
		Ok(stream)
	}

	fn release(&self, stream: &MediaStream) {
		if self.active.lock().remove(stream) {
			debug!(stream = stream.id(), "capture released");
		}
	}
}

/// One call made on a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOp {
	Attach { surface: String, stream: String },
	Pause { surface: String },
	Detach { surface: String },
}

#[derive(Debug, Clone)]
struct Surface {
	stream: MediaStream,
	playing: bool,
}

/// Render surfaces kept in memory.
#[derive(Default)]
pub struct MemorySink {
	surfaces: Mutex<HashMap<String, Surface>>,
	ops: Mutex<Vec<SinkOp>>,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stream currently bound to `surface`.
	pub fn attached(&self, surface: &str) -> Option<MediaStream> {
		self.surfaces.lock().get(surface).map(|s| s.stream.clone())
	}

	pub fn is_playing(&self, surface: &str) -> bool {
		self.surfaces.lock().get(surface).is_some_and(|s| s.playing)
	}

	pub fn ops(&self) -> Vec<SinkOp> {
		self.ops.lock().clone()
	}
}

impl VideoSink for MemorySink {
	fn attach(&self, surface: &str, stream: &MediaStream) {
		self.surfaces.lock().insert(
			surface.to_string(),
			Surface {
				stream: stream.clone(),
				playing: true,
			},
		);
		self.ops.lock().push(SinkOp::Attach {
			surface: surface.to_string(),
			stream: stream.id().to_string(),
		});
	}

	fn pause(&self, surface: &str) {
		if let Some(s) = self.surfaces.lock().get_mut(surface) {
			s.playing = false;
		}
		self.ops.lock().push(SinkOp::Pause {
			surface: surface.to_string(),
		});
	}

	fn detach(&self, surface: &str) {
		self.surfaces.lock().remove(surface);
		self.ops.lock().push(SinkOp::Detach {
			surface: surface.to_string(),
		});
	}
}
