use std::fmt;
use std::sync::Arc;

use ferry_host::Host;
use tokio::runtime::Handle;

use crate::{BridgeError, BusyPolicy, Result};

/// Everything a bridge needs from its surroundings.
///
/// Shared by every bridge created under one dispatcher: the host whose
/// privileged thread runs handlers, the runtime on which deferred handler
/// computations settle, and the busy policy.
#[derive(Clone)]
pub struct BridgeEnv {
	host: Arc<dyn Host>,
	runtime: Handle,
	policy: BusyPolicy,
}

impl BridgeEnv {
	/// Creates an environment with the default queueing policy.
	pub fn new(host: Arc<dyn Host>, runtime: Handle) -> Self {
		Self {
			host,
			runtime,
			policy: BusyPolicy::default(),
		}
	}

	/// Creates an environment on the ambient tokio runtime.
	///
	/// Fails with [`BridgeError::NotInitialized`] outside a runtime context.
	pub fn current(host: Arc<dyn Host>) -> Result<Self> {
		let runtime = Handle::try_current().map_err(|_| BridgeError::NotInitialized)?;
		Ok(Self::new(host, runtime))
	}

	/// Replaces the busy policy.
	#[must_use]
	pub fn with_policy(mut self, policy: BusyPolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Host whose privileged thread runs handlers.
	pub fn host(&self) -> &Arc<dyn Host> {
		&self.host
	}

	/// Runtime on which deferred computations settle.
	pub fn runtime(&self) -> &Handle {
		&self.runtime
	}

	/// Busy policy applied by every bridge in this environment.
	pub fn policy(&self) -> BusyPolicy {
		self.policy
	}
}

impl fmt::Debug for BridgeEnv {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BridgeEnv").field("host", &self.host.name()).field("policy", &self.policy).finish()
	}
}
