//! Error types for host registration.

use thiserror::Error;

/// Errors reported by a host when a registration cannot be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
	/// The host has not started or has already shut down.
	#[error("host `{0}` is not running")]
	NotRunning(String),
	/// The privileged thread could not be spawned.
	#[error("failed to spawn privileged thread `{name}`: {reason}")]
	Spawn {
		/// Requested thread name.
		name: String,
		/// OS error description.
		reason: String,
	},
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
