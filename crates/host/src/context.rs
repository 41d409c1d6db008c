use std::sync::Arc;
use std::thread::ThreadId;

/// Opaque token describing the privileged thread a handler runs on.
///
/// Hosts create one per service round and pass it by reference into every
/// ready callback. The bridge never interprets it.
#[derive(Debug, Clone)]
pub struct HostContext {
	host: Arc<str>,
	thread: ThreadId,
	round: u64,
}

impl HostContext {
	/// Creates a context bound to the calling thread.
	pub fn current(host: impl Into<Arc<str>>, round: u64) -> Self {
		Self {
			host: host.into(),
			thread: std::thread::current().id(),
			round,
		}
	}

	/// Name of the host that produced this context.
	pub fn host_name(&self) -> &str {
		&self.host
	}

	/// Identifier of the privileged thread.
	pub fn thread_id(&self) -> ThreadId {
		self.thread
	}

	/// Monotonic service round in which the callback was invoked.
	pub fn round(&self) -> u64 {
		self.round
	}

	/// Returns `true` when called from the privileged thread itself.
	pub fn is_privileged_thread(&self) -> bool {
		std::thread::current().id() == self.thread
	}
}
