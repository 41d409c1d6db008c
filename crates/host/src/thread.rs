//! Dedicated privileged thread host.
//!
//! One named OS thread owns the privileged context and services raised
//! registrations in raise order. Each accepted raise sends one `Service` job;
//! coalesced raises send nothing, so the thread invokes a callback once per
//! pending mark.
//!
//! Shutdown is explicit and deterministic: dropping [`HostThread`] closes the
//! registration table, sends a `Shutdown` job and waits briefly for an ack.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::manual::{discard, invoke};
use crate::registrations::Registrations;
use crate::{DiscardCallback, Host, HostContext, HostError, HostStats, RaiseOutcome, ReadyCallback, RegistrationId, Result};

const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_millis(250);

enum Job {
	Service(RegistrationId),
	Shutdown { ack: mpsc::SyncSender<()> },
}

/// Host backed by one dedicated privileged thread.
pub struct HostThread {
	name: Arc<str>,
	table: Arc<Mutex<Registrations>>,
	tx: mpsc::Sender<Job>,
	thread_id: ThreadId,
	join: Mutex<Option<JoinHandle<()>>>,
}

impl HostThread {
	/// Spawns the privileged thread under the given name.
	pub fn spawn(name: impl Into<String>) -> Result<Self> {
		let name: String = name.into();
		let shared_name: Arc<str> = Arc::from(name.as_str());
		let table = Arc::new(Mutex::new(Registrations::default()));
		let (tx, rx) = mpsc::channel::<Job>();

		let worker_name = Arc::clone(&shared_name);
		let worker_table = Arc::clone(&table);
		let join = std::thread::Builder::new()
			.name(name.clone())
			.spawn(move || service_loop(&worker_name, &worker_table, &rx))
			.map_err(|err| HostError::Spawn {
				name: name.clone(),
				reason: err.to_string(),
			})?;

		tracing::debug!(host = %shared_name, "host.thread.spawned");
		Ok(Self {
			name: shared_name,
			table,
			tx,
			thread_id: join.thread().id(),
			join: Mutex::new(Some(join)),
		})
	}

	/// Identifier of the privileged thread.
	pub fn thread_id(&self) -> ThreadId {
		self.thread_id
	}

	/// Traffic counters.
	pub fn stats(&self) -> HostStats {
		self.table.lock().stats()
	}

	/// Returns `false` once the host has been shut down.
	pub fn is_running(&self) -> bool {
		!self.table.lock().is_closed()
	}

	/// Closes the registration table and stops the privileged thread.
	///
	/// Pending raises are discarded and their discard callbacks run on the
	/// calling thread. Waits a bounded time for the thread to acknowledge
	/// unless called from the privileged thread itself.
	pub fn shutdown(&self) {
		let discarded = {
			let mut table = self.table.lock();
			if table.is_closed() {
				return;
			}
			table.close()
		};
		tracing::debug!(host = %self.name, discarded = discarded.len(), "host.thread.shutdown");
		discard(&self.name, discarded);

		let (ack_tx, ack_rx) = mpsc::sync_channel(1);
		if self.tx.send(Job::Shutdown { ack: ack_tx }).is_err() {
			return;
		}
		if std::thread::current().id() == self.thread_id {
			return;
		}
		if ack_rx.recv_timeout(SHUTDOWN_ACK_TIMEOUT).is_ok()
			&& let Some(join) = self.join.lock().take()
			&& join.join().is_err()
		{
			tracing::warn!(host = %self.name, "host.thread.join_failed");
		}
	}
}

fn service_loop(name: &Arc<str>, table: &Mutex<Registrations>, rx: &mpsc::Receiver<Job>) {
	let mut round = 0u64;
	while let Ok(job) = rx.recv() {
		match job {
			Job::Service(id) => {
				let Some(callback) = table.lock().take(id) else {
					continue;
				};
				round = round.wrapping_add(1);
				let ctx = HostContext::current(Arc::clone(name), round);
				invoke(name, id, &callback, &ctx);
			}
			Job::Shutdown { ack } => {
				let _ = ack.send(());
				break;
			}
		}
	}
	tracing::trace!(host = %name, rounds = round, "host.thread.exited");
}

impl Host for HostThread {
	fn name(&self) -> &str {
		&self.name
	}

	fn register_with(&self, on_ready: ReadyCallback, on_discard: Option<DiscardCallback>) -> Result<RegistrationId> {
		let id = self.table.lock().register(on_ready, on_discard).ok_or_else(|| HostError::NotRunning(self.name.to_string()))?;
		tracing::trace!(host = %self.name, registration = %id, "host.register");
		Ok(id)
	}

	fn raise(&self, id: RegistrationId) -> RaiseOutcome {
		let mut table = self.table.lock();
		let outcome = table.raise(id);
		if outcome == RaiseOutcome::Accepted && self.tx.send(Job::Service(id)).is_err() {
			table.unregister(id);
			tracing::warn!(host = %self.name, registration = %id, "host.raise.thread_gone");
			return RaiseOutcome::Denied;
		}
		drop(table);
		tracing::trace!(host = %self.name, registration = %id, ?outcome, "host.raise");
		outcome
	}

	fn unregister(&self, id: RegistrationId) {
		self.table.lock().unregister(id);
		tracing::trace!(host = %self.name, registration = %id, "host.unregister");
	}
}

impl Drop for HostThread {
	fn drop(&mut self) {
		self.shutdown();
	}
}
