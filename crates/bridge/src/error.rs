//! Error taxonomy for bridged calls.

use std::error::Error as StdError;
use std::sync::Arc;

use ferry_host::HostError;
use thiserror::Error;

/// Failure produced by a handler while running on the privileged thread.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
	/// The handler returned an error.
	#[error("{0}")]
	Failed(Arc<dyn StdError + Send + Sync + 'static>),
	/// The handler panicked; carries the panic message.
	#[error("handler panicked: {0}")]
	Panicked(String),
}

impl HandlerError {
	/// Wraps any error value produced by a handler.
	pub fn new(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
		Self::Failed(Arc::from(err.into()))
	}

	/// Creates a failure from a plain message.
	pub fn msg(message: impl Into<String>) -> Self {
		Self::new(message.into())
	}

	/// Returns the original error when it is of type `E`.
	pub fn downcast_ref<E>(&self) -> Option<&E>
	where
		E: StdError + 'static,
	{
		match self {
			Self::Failed(err) => err.downcast_ref::<E>(),
			Self::Panicked(_) => None,
		}
	}

	/// Returns `true` for panics caught at the bridge boundary.
	pub const fn is_panic(&self) -> bool {
		matches!(self, Self::Panicked(_))
	}
}

/// Error delivered through a pending result.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
	/// No handler of the requested type is registered.
	#[error("no handler registered for `{0}`")]
	NotRegistered(&'static str),
	/// The handler failed or panicked.
	#[error(transparent)]
	Handler(#[from] HandlerError),
	/// The call was torn down before it could complete.
	#[error("call abandoned before completion")]
	Abandoned,
	/// The bridging subsystem has not been initialized.
	#[error("bridge subsystem is not initialized")]
	NotInitialized,
	/// The host registration could not be created.
	#[error("host registration failed: {0}")]
	Host(#[from] HostError),
	/// The bridge was busy and the busy policy rejects new calls.
	#[error("bridge `{0}` is busy")]
	Busy(String),
	/// The bridge's waiting queue reached its bound.
	#[error("bridge `{name}` queue is full ({limit} waiting)")]
	QueueFull {
		/// Bridge display name.
		name: String,
		/// Configured queue bound.
		limit: usize,
	},
}

impl BridgeError {
	/// Returns `true` for cancellation-class outcomes.
	pub const fn is_abandoned(&self) -> bool {
		matches!(self, Self::Abandoned)
	}

	/// Returns `true` when the subsystem or host was not ready.
	pub const fn is_initialization(&self) -> bool {
		matches!(self, Self::NotInitialized | Self::Host(_))
	}

	/// Returns the handler failure, if any.
	pub fn handler_error(&self) -> Option<&HandlerError> {
		match self {
			Self::Handler(err) => Some(err),
			_ => None,
		}
	}
}

/// Result type for bridged calls.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[derive(Debug, Error)]
	#[error("document is read-only")]
	struct ReadOnly;

	#[test]
	fn handler_error_keeps_original_error() {
		let err = BridgeError::from(HandlerError::new(ReadOnly));
		assert_eq!(err.to_string(), "document is read-only");
		let inner = err.handler_error().expect("handler failure");
		assert!(inner.downcast_ref::<ReadOnly>().is_some());
		assert!(!inner.is_panic());
	}

	#[test]
	fn classification() {
		assert!(BridgeError::Abandoned.is_abandoned());
		assert!(BridgeError::NotInitialized.is_initialization());
		assert!(BridgeError::Host(HostError::NotRunning("h".into())).is_initialization());
		assert!(!BridgeError::Busy("b".into()).is_abandoned());
	}
}
