//! Tracing bootstrap.

use std::fs::OpenOptions;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::config::LogConfig;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LogError {
	/// The log file could not be opened for appending.
	#[error("cannot open log file {path}: {error}")]
	File {
		/// Requested log file.
		path: std::path::PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},
	/// A global subscriber is already installed.
	#[error("tracing subscriber already installed: {0}")]
	Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Builds the filter: `RUST_LOG` when set, the configured directives otherwise.
pub fn filter(config: &LogConfig) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Installs the global tracing subscriber.
///
/// With `log.file` set, events are appended to that file without ANSI colors
/// and span closes are recorded; otherwise they go to stderr.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
	let filter = filter(config);

	if let Some(path) = &config.file {
		if let Some(parent) = path.parent()
			&& !parent.as_os_str().is_empty()
		{
			std::fs::create_dir_all(parent).map_err(|error| LogError::File { path: path.clone(), error })?;
		}
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(path)
			.map_err(|error| LogError::File { path: path.clone(), error })?;

		let file_layer = tracing_subscriber::fmt::layer()
			.with_writer(file)
			.with_ansi(false)
			.with_span_events(FmtSpan::CLOSE)
			.with_target(true);

		tracing_subscriber::registry().with(filter).with(file_layer).try_init()?;
		tracing::info!(path = %path.display(), "dispatch.logging.file");
		return Ok(());
	}

	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.try_init()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unopenable_file_is_reported() {
		let dir = tempfile::tempdir().expect("temp dir");
		let config = LogConfig {
			filter: "debug".to_string(),
			file: Some(dir.path().to_path_buf()),
		};
		assert!(matches!(init(&config), Err(LogError::File { .. })));
	}

	#[test]
	fn file_logging_appends() {
		let dir = tempfile::tempdir().expect("temp dir");
		let path = dir.path().join("logs").join("ferry.log");
		let config = LogConfig {
			filter: "ferry_dispatch=info".to_string(),
			file: Some(path.clone()),
		};

		match init(&config) {
			Ok(()) => {
				let text = std::fs::read_to_string(&path).expect("log file");
				assert!(text.contains("dispatch.logging.file"));
			}
			// Another test in this process installed a subscriber first.
			Err(LogError::Install(_)) => assert!(path.exists()),
			Err(err) => panic!("unexpected logging error: {err}"),
		}
	}
}
