//! Capture constraints and the options accepted by the `media` operation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Video resolution tier requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
	Hd720,
	Hd1080,
}

impl FromStr for Resolution {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"hd720" => Ok(Resolution::Hd720),
			"hd1080" => Ok(Resolution::Hd1080),
			other => Err(format!("unknown resolution: {other}")),
		}
	}
}

/// Width/height bounds for the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
	pub min_width: u32,
	pub min_height: u32,
	pub max_width: u32,
	pub max_height: u32,
}

impl VideoConstraints {
	/// 320×240 up to 640×480.
	pub const STANDARD: VideoConstraints = VideoConstraints {
		min_width: 320,
		min_height: 240,
		max_width: 640,
		max_height: 480,
	};

	pub const HD720: VideoConstraints = VideoConstraints::exact(1280, 720);

	pub const HD1080: VideoConstraints = VideoConstraints::exact(1920, 1080);

	const fn exact(width: u32, height: u32) -> Self {
		Self {
			min_width: width,
			min_height: height,
			max_width: width,
			max_height: height,
		}
	}

	pub fn for_resolution(resolution: Option<Resolution>) -> Self {
		match resolution {
			None => Self::STANDARD,
			Some(Resolution::Hd720) => Self::HD720,
			Some(Resolution::Hd1080) => Self::HD1080,
		}
	}
}

/// What to ask the capture collaborator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
	pub audio: bool,
	/// `None` requests an audio-only stream.
	pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
	/// Maps `media(start)` options onto one of the fixed presets.
	pub fn from_options(options: &MediaOptions) -> Self {
		let video = if options.voice {
			None
		} else {
			Some(VideoConstraints::for_resolution(options.resolution))
		};
		Self { audio: true, video }
	}
}

/// Local media operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAction {
	/// Acquire local capture and send it to the peer.
	Start,
	/// Stop and release local capture.
	Stop,
	/// Drop the peer's stream and ask the peer to stop its capture.
	StopRemote,
}

impl FromStr for MediaAction {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"start" => Ok(MediaAction::Start),
			"stop" => Ok(MediaAction::Stop),
			"stopremote" => Ok(MediaAction::StopRemote),
			other => Err(format!("unknown media action: {other}")),
		}
	}
}

impl fmt::Display for MediaAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			MediaAction::Start => "start",
			MediaAction::Stop => "stop",
			MediaAction::StopRemote => "stopRemote",
		})
	}
}

/// Options recognized by the `media` operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaOptions {
	pub resolution: Option<Resolution>,
	/// Audio only.
	pub voice: bool,
	/// Do not notify the peer.
	#[serde(rename = "NO_MESSAGE")]
	pub no_message: bool,
	/// Keep the render surface as is instead of resetting it.
	#[serde(rename = "NO_RESET")]
	pub no_reset: bool,
}

impl MediaOptions {
	pub fn voice() -> Self {
		Self {
			voice: true,
			..Self::default()
		}
	}

	pub fn with_resolution(mut self, resolution: Resolution) -> Self {
		self.resolution = Some(resolution);
		self
	}

	pub fn no_message(mut self) -> Self {
		self.no_message = true;
		self
	}

	pub fn no_reset(mut self) -> Self {
		self.no_reset = true;
		self
	}
}
