//! Dispatcher configuration.
//!
//! Every field has a default, so an empty document (or no document at all)
//! yields a working configuration:
//!
//! ```toml
//! [busy]
//! mode = "queue"      # or "reject"
//! max_queued = 64     # omit for an unbounded queue
//!
//! [host]
//! thread_name = "ferry-host"
//!
//! [log]
//! filter = "ferry=debug,info"
//! file = "/tmp/ferry.log"
//! ```

use std::path::{Path, PathBuf};

use ferry_bridge::BusyPolicy;
use ferry_host::HostThread;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or structure.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A queue bound of zero would refuse every busy call; use `mode = "reject"`.
	#[error("busy.max_queued must be at least 1")]
	ZeroQueueBound,
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
	/// What bridges do with calls that arrive while busy.
	pub busy: BusyConfig,
	/// Reference host settings.
	pub host: HostConfig,
	/// Tracing settings.
	pub log: LogConfig,
}

/// Busy policy section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusyConfig {
	/// Queue or reject.
	pub mode: BusyMode,
	/// Queue bound; `None` is unbounded. Ignored by `reject`.
	pub max_queued: Option<usize>,
}

/// Busy mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusyMode {
	/// Wait FIFO behind the in-flight call.
	#[default]
	Queue,
	/// Fail immediately.
	Reject,
}

impl BusyConfig {
	/// Policy handed to bridges.
	pub fn policy(&self) -> BusyPolicy {
		match self.mode {
			BusyMode::Queue => BusyPolicy::Queue { max_queued: self.max_queued },
			BusyMode::Reject => BusyPolicy::Reject,
		}
	}
}

/// Reference host section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
	/// Name of the privileged thread spawned by [`DispatchConfig::spawn_host`].
	pub thread_name: String,
}

impl Default for HostConfig {
	fn default() -> Self {
		Self {
			thread_name: "ferry-host".to_string(),
		}
	}
}

/// Tracing section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
	/// `EnvFilter` directives used when `RUST_LOG` is unset.
	pub filter: String,
	/// Append-only log file; stderr when absent.
	pub file: Option<PathBuf>,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			filter: "info".to_string(),
			file: None,
		}
	}
}

impl DispatchConfig {
	/// Parses configuration from TOML text.
	pub fn from_toml(text: &str) -> Result<Self> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a TOML configuration file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::from_toml(&text)?;
		tracing::debug!(path = %path.display(), "dispatch.config.loaded");
		Ok(config)
	}

	fn validate(&self) -> Result<()> {
		if self.busy.mode == BusyMode::Queue && self.busy.max_queued == Some(0) {
			return Err(ConfigError::ZeroQueueBound);
		}
		Ok(())
	}

	/// Spawns a [`HostThread`] named after `host.thread_name`.
	pub fn spawn_host(&self) -> ferry_host::Result<HostThread> {
		HostThread::spawn(self.host.thread_name.clone())
	}
}
