//! Scoped registries.

use std::ops::Deref;

use ferry_bridge::BridgeEnv;
use ferry_host::Host;

use crate::Dispatcher;

/// Registry whose bridges live as long as one session.
///
/// Dereferences to a [`Dispatcher`] with its own namespace: handler types
/// registered here are invisible to the global dispatcher and to other
/// scopes. Closing or dropping the scope abandons every outstanding call.
#[derive(Debug)]
pub struct Scope {
	dispatcher: Dispatcher,
}

impl Scope {
	/// Creates an empty scope.
	pub fn new(env: BridgeEnv) -> Self {
		tracing::trace!(host = env.host().name(), "dispatch.scope.open");
		Self {
			dispatcher: Dispatcher::new(env),
		}
	}

	/// Tears the scope down. Returns the number of calls abandoned.
	pub fn close(self) -> usize {
		self.dispatcher.shutdown()
	}
}

impl Deref for Scope {
	type Target = Dispatcher;

	fn deref(&self) -> &Dispatcher {
		&self.dispatcher
	}
}

impl Drop for Scope {
	fn drop(&mut self) {
		let abandoned = self.dispatcher.shutdown();
		tracing::trace!(abandoned, "dispatch.scope.closed");
	}
}
