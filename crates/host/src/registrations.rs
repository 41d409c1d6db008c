use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::{DiscardCallback, RaiseOutcome, ReadyCallback, RegistrationId};

/// Counters describing host traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
	/// Registrations created.
	pub registered: u64,
	/// Raises that scheduled a callback.
	pub accepted: u64,
	/// Raises folded into an already pending one.
	pub coalesced: u64,
	/// Raises refused by the host.
	pub denied: u64,
	/// Callbacks invoked on the privileged thread.
	pub serviced: u64,
}

impl HostStats {
	/// Total raise attempts of any outcome.
	pub const fn raises(&self) -> u64 {
		self.accepted + self.coalesced + self.denied
	}
}

/// Registration table shared by the built-in hosts.
///
/// Pending raises are kept in FIFO order; a registration appears at most once
/// in the pending queue.
#[derive(Default)]
pub(crate) struct Registrations {
	next_id: u64,
	callbacks: FxHashMap<RegistrationId, Entry>,
	pending: VecDeque<RegistrationId>,
	closed: bool,
	stats: HostStats,
}

struct Entry {
	on_ready: ReadyCallback,
	on_discard: Option<DiscardCallback>,
}

/// Pending raise dropped by [`Registrations::close`].
pub(crate) struct Discarded {
	pub id: RegistrationId,
	pub on_discard: Option<DiscardCallback>,
}

impl Registrations {
	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Returns `None` once the table is closed.
	pub fn register(&mut self, on_ready: ReadyCallback, on_discard: Option<DiscardCallback>) -> Option<RegistrationId> {
		if self.closed {
			return None;
		}
		self.next_id = self.next_id.wrapping_add(1);
		let id = RegistrationId::new(self.next_id);
		self.callbacks.insert(id, Entry { on_ready, on_discard });
		self.stats.registered += 1;
		Some(id)
	}

	pub fn raise(&mut self, id: RegistrationId) -> RaiseOutcome {
		if self.closed || !self.callbacks.contains_key(&id) {
			self.stats.denied += 1;
			return RaiseOutcome::Denied;
		}
		if self.pending.contains(&id) {
			self.stats.coalesced += 1;
			return RaiseOutcome::Coalesced;
		}
		self.pending.push_back(id);
		self.stats.accepted += 1;
		RaiseOutcome::Accepted
	}

	/// Clears the pending mark for `id` and returns its callback.
	///
	/// The mark is cleared before the callback runs so that a raise issued from
	/// inside the callback schedules a fresh invocation.
	pub fn take(&mut self, id: RegistrationId) -> Option<ReadyCallback> {
		let idx = self.pending.iter().position(|pending| *pending == id)?;
		let _ = self.pending.remove(idx);
		let callback = self.callbacks.get(&id).map(|entry| Arc::clone(&entry.on_ready))?;
		self.stats.serviced += 1;
		Some(callback)
	}

	/// Pops the oldest pending registration that still has a callback.
	pub fn take_next(&mut self) -> Option<(RegistrationId, ReadyCallback)> {
		while let Some(id) = self.pending.pop_front() {
			if let Some(callback) = self.callbacks.get(&id).map(|entry| Arc::clone(&entry.on_ready)) {
				self.stats.serviced += 1;
				return Some((id, callback));
			}
		}
		None
	}

	pub fn unregister(&mut self, id: RegistrationId) {
		self.callbacks.remove(&id);
		self.pending.retain(|pending| *pending != id);
	}

	/// Closes the table and returns the pending raises it dropped, in raise order.
	pub fn close(&mut self) -> Vec<Discarded> {
		self.closed = true;
		let discarded = self
			.pending
			.drain(..)
			.filter_map(|id| {
				self.callbacks.get(&id).map(|entry| Discarded {
					id,
					on_discard: entry.on_discard.clone(),
				})
			})
			.collect();
		self.callbacks.clear();
		discarded
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	pub fn len(&self) -> usize {
		self.callbacks.len()
	}

	pub fn stats(&self) -> HostStats {
		self.stats
	}
}
