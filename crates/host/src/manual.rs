use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::registrations::{Discarded, Registrations};
use crate::{DiscardCallback, Host, HostContext, HostError, HostStats, RaiseOutcome, ReadyCallback, RegistrationId, Result};

/// Host serviced by an external loop.
///
/// Raises are recorded and only run when the owner calls [`ManualHost::pump`]
/// or [`ManualHost::pump_once`]; whichever thread pumps is the privileged
/// thread for that round. Cloning yields another handle to the same host.
#[derive(Clone)]
pub struct ManualHost {
	inner: Arc<ManualInner>,
}

struct ManualInner {
	name: Arc<str>,
	table: Mutex<Registrations>,
	rounds: AtomicU64,
}

impl ManualHost {
	/// Creates a running host with the given display name.
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self {
			inner: Arc::new(ManualInner {
				name: name.into(),
				table: Mutex::new(Registrations::default()),
				rounds: AtomicU64::new(0),
			}),
		}
	}

	/// Services every registration that is pending right now.
	///
	/// Raises issued by the callbacks themselves are left for the next round.
	/// Returns the number of callbacks invoked.
	pub fn pump_once(&self) -> usize {
		let due = self.inner.table.lock().pending_len();
		if due == 0 {
			return 0;
		}
		let round = self.inner.rounds.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let ctx = HostContext::current(Arc::clone(&self.inner.name), round);
		let mut serviced = 0;
		for _ in 0..due {
			let Some((id, callback)) = self.inner.table.lock().take_next() else {
				break;
			};
			invoke(&self.inner.name, id, &callback, &ctx);
			serviced += 1;
		}
		tracing::trace!(host = %self.inner.name, round, serviced, "host.manual.pump");
		serviced
	}

	/// Pumps rounds until no registration is pending.
	///
	/// Does not return while callbacks keep re-raising themselves.
	pub fn pump(&self) -> usize {
		let mut total = 0;
		loop {
			let serviced = self.pump_once();
			if serviced == 0 {
				return total;
			}
			total += serviced;
		}
	}

	/// Number of registrations waiting to be serviced.
	pub fn pending(&self) -> usize {
		self.inner.table.lock().pending_len()
	}

	/// Number of live registrations.
	pub fn registrations(&self) -> usize {
		self.inner.table.lock().len()
	}

	/// Traffic counters.
	pub fn stats(&self) -> HostStats {
		self.inner.table.lock().stats()
	}

	/// Returns `false` once [`ManualHost::shutdown`] has been called.
	pub fn is_running(&self) -> bool {
		!self.inner.table.lock().is_closed()
	}

	/// Stops the host; later raises are denied and registrations fail.
	///
	/// Discard callbacks of pending registrations run on the calling thread.
	/// Returns the number of discarded pending raises.
	pub fn shutdown(&self) -> usize {
		let discarded = self.inner.table.lock().close();
		let count = discarded.len();
		tracing::debug!(host = %self.inner.name, discarded = count, "host.manual.shutdown");
		discard(&self.inner.name, discarded);
		count
	}
}

impl Host for ManualHost {
	fn name(&self) -> &str {
		&self.inner.name
	}

	fn register_with(&self, on_ready: ReadyCallback, on_discard: Option<DiscardCallback>) -> Result<RegistrationId> {
		let id = self.inner.table.lock().register(on_ready, on_discard).ok_or_else(|| HostError::NotRunning(self.inner.name.to_string()))?;
		tracing::trace!(host = %self.inner.name, registration = %id, "host.register");
		Ok(id)
	}

	fn raise(&self, id: RegistrationId) -> RaiseOutcome {
		let outcome = self.inner.table.lock().raise(id);
		tracing::trace!(host = %self.inner.name, registration = %id, ?outcome, "host.raise");
		outcome
	}

	fn unregister(&self, id: RegistrationId) {
		self.inner.table.lock().unregister(id);
		tracing::trace!(host = %self.inner.name, registration = %id, "host.unregister");
	}
}

/// Runs one ready callback, containing any panic on the privileged thread.
pub(crate) fn invoke(host: &str, id: RegistrationId, callback: &ReadyCallback, ctx: &HostContext) {
	if std::panic::catch_unwind(AssertUnwindSafe(|| callback(ctx))).is_err() {
		tracing::error!(host, registration = %id, "host.callback.panicked");
	}
}

/// Runs the discard callbacks of raises dropped at shutdown.
///
/// Must be called after the table lock is released.
pub(crate) fn discard(host: &str, discarded: Vec<Discarded>) {
	for Discarded { id, on_discard } in discarded {
		let Some(on_discard) = on_discard else {
			continue;
		};
		if std::panic::catch_unwind(AssertUnwindSafe(|| on_discard(id))).is_err() {
			tracing::error!(host, registration = %id, "host.discard.panicked");
		}
	}
}
