//! Type-keyed bridge table.

use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use ferry_bridge::{AnyBridge, Bridge, BridgeSnapshot, Handler};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Concurrent table mapping a handler type to its shared bridge.
///
/// Insertion is a single write-locked entry operation, so racing creators of
/// the same handler type converge on one bridge.
#[derive(Default)]
pub struct BridgeRegistry {
	entries: RwLock<FxHashMap<TypeId, Arc<dyn AnyBridge>>>,
}

fn downcast<H: Handler>(entry: &Arc<dyn AnyBridge>) -> Option<Bridge<H>> {
	entry.as_any().downcast_ref::<Bridge<H>>().cloned()
}

impl BridgeRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the bridge registered for `H`.
	pub fn lookup<H: Handler>(&self) -> Option<Bridge<H>> {
		self.entries.read().get(&TypeId::of::<H>()).and_then(downcast::<H>)
	}

	/// Returns the bridge for `H`, creating it with `factory` if absent.
	///
	/// `factory` runs under the write lock and at most once per call.
	pub fn get_or_create<H: Handler>(&self, factory: impl FnOnce() -> Bridge<H>) -> Bridge<H> {
		let mut entries = self.entries.write();
		match entries.entry(TypeId::of::<H>()) {
			Entry::Occupied(mut entry) => {
				if let Some(bridge) = downcast::<H>(entry.get()) {
					return bridge;
				}
				tracing::error!(handler = std::any::type_name::<H>(), "dispatch.registry.type_mismatch");
				let bridge = factory();
				entry.insert(Arc::new(bridge.clone()));
				bridge
			}
			Entry::Vacant(entry) => {
				let bridge = factory();
				tracing::debug!(handler = bridge.name(), "dispatch.registry.created");
				entry.insert(Arc::new(bridge.clone()));
				bridge
			}
		}
	}

	/// Inserts the bridge built by `factory` unless `H` is already registered.
	///
	/// The first registration wins; later ones are ignored and return `false`.
	pub fn register<H: Handler>(&self, factory: impl FnOnce() -> Bridge<H>) -> bool {
		let mut entries = self.entries.write();
		match entries.entry(TypeId::of::<H>()) {
			Entry::Occupied(entry) => {
				tracing::warn!(handler = entry.get().name(), "dispatch.register.duplicate");
				false
			}
			Entry::Vacant(entry) => {
				let bridge = factory();
				tracing::debug!(handler = bridge.name(), "dispatch.register");
				entry.insert(Arc::new(bridge));
				true
			}
		}
	}

	/// Removes every entry and abandons their in-flight and queued calls.
	///
	/// Returns the number of calls abandoned.
	pub fn remove_all(&self) -> usize {
		let removed: Vec<_> = self.entries.write().drain().map(|(_, bridge)| bridge).collect();
		let abandoned = removed.iter().map(|bridge| bridge.abandon()).sum();
		if !removed.is_empty() {
			tracing::debug!(bridges = removed.len(), abandoned, "dispatch.registry.cleared");
		}
		abandoned
	}

	/// Number of registered handler types.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns `true` if nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Snapshots of every registered bridge, sorted by name.
	pub fn snapshots(&self) -> Vec<BridgeSnapshot> {
		let mut snapshots: Vec<_> = self.entries.read().values().map(|bridge| bridge.snapshot()).collect();
		snapshots.sort_by(|a, b| a.name.cmp(&b.name));
		snapshots
	}
}

impl std::fmt::Debug for BridgeRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BridgeRegistry").field("len", &self.len()).finish()
	}
}
