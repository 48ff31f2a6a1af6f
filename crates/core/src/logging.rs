//! Log subscriber setup.
//!
//! The library only emits `tracing` events. Applications install their own
//! subscriber or call one of these helpers.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

fn filter(dev_mode: bool) -> EnvFilter {
	// RUST_LOG wins over both presets
	let preset = if dev_mode {
		"warn,duo=debug,duo_runtime=debug"
	} else {
		"warn"
	};
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(preset))
}

/// Installs a global stderr subscriber. Panics if one is already installed.
pub fn init_logging(dev_mode: bool) {
	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);
	tracing_subscriber::fmt()
		.with_env_filter(filter(dev_mode))
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

/// Installs the development subscriber unless one is already in place.
///
/// Returns true when this call installed it.
pub fn try_init_dev_logging() -> bool {
	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);
	tracing_subscriber::fmt()
		.with_env_filter(filter(true))
		.with_writer(stderr)
		.with_target(true)
		.compact()
		.try_init()
		.is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dev_logging_installs_once() {
		try_init_dev_logging();
		assert!(!try_init_dev_logging());
	}
}
