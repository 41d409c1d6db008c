use std::fmt;
use std::sync::Arc;

use crate::{HostContext, Result};

/// Opaque handle for one external event registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
	pub(crate) const fn new(raw: u64) -> Self {
		Self(raw)
	}

	/// Returns the raw numeric id.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for RegistrationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "reg#{}", self.0)
	}
}

/// Outcome of raising a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
	/// The host will invoke the callback on its privileged thread.
	Accepted,
	/// The registration was already pending; the raise was folded into it.
	Coalesced,
	/// The host refused the raise (shut down or unknown registration).
	Denied,
}

impl RaiseOutcome {
	/// Returns `true` when a callback invocation is scheduled.
	pub const fn is_scheduled(self) -> bool {
		matches!(self, Self::Accepted | Self::Coalesced)
	}
}

/// Callback invoked by the host on its privileged thread.
pub type ReadyCallback = Arc<dyn Fn(&HostContext) + Send + Sync>;

/// Callback invoked when the host drops a pending raise without servicing it.
///
/// Runs on whichever thread shuts the host down, never on the privileged
/// thread's behalf, and without any host lock held.
pub type DiscardCallback = Arc<dyn Fn(RegistrationId) + Send + Sync>;

/// Host application boundary.
///
/// Implementations own exactly one privileged thread and decide alone when
/// raised callbacks run. Callbacks must be invoked without holding any host
/// lock so they may call back into [`Host::raise`].
pub trait Host: Send + Sync + 'static {
	/// Host display name used in logs and contexts.
	fn name(&self) -> &str;

	/// Installs a ready callback and returns its registration.
	fn register(&self, on_ready: ReadyCallback) -> Result<RegistrationId> {
		self.register_with(on_ready, None)
	}

	/// Installs a ready callback plus an optional discard callback.
	///
	/// `on_discard` fires once if the host stops while the registration has a
	/// pending raise, so the owner can fail whatever waited on that raise.
	fn register_with(&self, on_ready: ReadyCallback, on_discard: Option<DiscardCallback>) -> Result<RegistrationId>;

	/// Schedules one invocation of the registration's callback.
	///
	/// Raising a registration that is already pending returns
	/// [`RaiseOutcome::Coalesced`] and does not schedule a second invocation.
	fn raise(&self, id: RegistrationId) -> RaiseOutcome;

	/// Removes a registration. Pending raises for it are discarded.
	fn unregister(&self, id: RegistrationId);
}
