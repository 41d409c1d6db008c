//! Bridge core: single-slot raise/execute protocol.
//!
//! A [`Bridge`] owns one host registration and one handler. Calls move through
//! three states:
//!
//! * `Idle`: no call in flight
//! * `Pending`: one call is parked in the slot and its registration is raised
//! * `Executing`: the privileged thread took the call and is running it, or a
//!   deferred computation it started has not settled yet
//!
//! The host coalesces duplicate raises, so a call arriving while the slot is
//! occupied never overwrites it; the [`BusyPolicy`](crate::BusyPolicy) queues or refuses it
//! instead. Slot, queue and raise are updated under one lock, so a slot that
//! is written but not yet raised is never observable.
//!
//! Completion order for one call: the slot is cleared and the next queued
//! call is installed and raised, then the finished call's handle is resolved.
//! A caller observing its result therefore never sees its own call in flight.
//!
//! A host that stops with the registration raised reports the dropped raise
//! through the discard callback, and the parked call plus its queue resolve
//! as abandoned. Enqueueing behind a parked call re-raises the registration
//! so a stopped host is also noticed on the submitting side.

use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ferry_host::{HostContext, HostError, RegistrationId};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::completion::{self, CallClock, CallId, Completer, PendingResult};
use crate::handler::{BoxFuture, Execution, Handler, panic_message};
use crate::policy::Admission;
use crate::{BridgeEnv, BridgeError, HandlerError, Result};

#[cfg(test)]
mod tests;

/// Observable bridge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
	/// No call in flight.
	Idle,
	/// A call is parked in the slot and the registration is raised.
	Pending,
	/// The privileged thread is running the call or awaiting its inner computation.
	Executing,
}

/// Monotonic per-bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
	/// Calls handed to `submit`.
	pub submitted: u64,
	/// Handler invocations on the privileged thread.
	pub executed: u64,
	/// Calls refused by the busy policy or by a failed host registration.
	pub rejected: u64,
	/// Calls resolved as abandoned by teardown or a denied raise.
	pub abandoned: u64,
	/// Largest number of calls that waited in the queue at once.
	pub peak_queued: u64,
}

/// Point-in-time view of one bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSnapshot {
	/// Handler display name.
	pub name: String,
	/// Current state.
	pub state: BridgeState,
	/// Call occupying the slot.
	pub in_flight: Option<CallId>,
	/// Calls waiting behind the in-flight one.
	pub queued: usize,
	/// Host registration, once created.
	pub registration: Option<RegistrationId>,
	/// Counters.
	pub stats: BridgeStats,
}

struct Call<H: Handler> {
	param: H::Param,
	completer: Completer<H::Output>,
	span: tracing::Span,
}

enum InFlight<H: Handler> {
	Raised(Call<H>),
	Running { call: CallId, abort: Option<AbortHandle> },
}

struct Slot<H: Handler> {
	registration: Option<RegistrationId>,
	in_flight: Option<InFlight<H>>,
	queue: VecDeque<Call<H>>,
	/// Keeps the bridge alive while it has work, so dropping every handle
	/// never strands an accepted call.
	retain: Option<Arc<Shared<H>>>,
}

impl<H: Handler> Slot<H> {
	fn state(&self) -> BridgeState {
		match self.in_flight {
			None => BridgeState::Idle,
			Some(InFlight::Raised(_)) => BridgeState::Pending,
			Some(InFlight::Running { .. }) => BridgeState::Executing,
		}
	}

	fn in_flight_call(&self) -> Option<CallId> {
		match &self.in_flight {
			None => None,
			Some(InFlight::Raised(call)) => Some(call.completer.call()),
			Some(InFlight::Running { call, .. }) => Some(*call),
		}
	}
}

#[derive(Default)]
struct Counters {
	submitted: AtomicU64,
	executed: AtomicU64,
	rejected: AtomicU64,
	abandoned: AtomicU64,
	peak_queued: AtomicU64,
}

impl Counters {
	fn snapshot(&self) -> BridgeStats {
		BridgeStats {
			submitted: self.submitted.load(Ordering::Relaxed),
			executed: self.executed.load(Ordering::Relaxed),
			rejected: self.rejected.load(Ordering::Relaxed),
			abandoned: self.abandoned.load(Ordering::Relaxed),
			peak_queued: self.peak_queued.load(Ordering::Relaxed),
		}
	}
}

struct Shared<H: Handler> {
	handler: Arc<H>,
	env: BridgeEnv,
	clock: CallClock,
	slot: Mutex<Slot<H>>,
	counters: Counters,
	this: Weak<Shared<H>>,
}

/// Handle to one bridge. Clones refer to the same bridge.
pub struct Bridge<H: Handler> {
	shared: Arc<Shared<H>>,
}

impl<H: Handler> Clone for Bridge<H> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<H: Handler> Bridge<H> {
	/// Creates an idle bridge. The host registration is created on first submit.
	pub fn new(handler: H, env: BridgeEnv) -> Self {
		Self::build(Arc::new(handler), env, CallClock::new())
	}

	fn build(handler: Arc<H>, env: BridgeEnv, clock: CallClock) -> Self {
		let shared = Arc::new_cyclic(|this| Shared {
			handler,
			env,
			clock,
			slot: Mutex::new(Slot {
				registration: None,
				in_flight: None,
				queue: VecDeque::new(),
				retain: None,
			}),
			counters: Counters::default(),
			this: this.clone(),
		});
		Self { shared }
	}

	/// Handler display name.
	pub fn name(&self) -> &str {
		self.shared.handler.name()
	}

	/// Shared handler instance.
	pub fn handler(&self) -> &Arc<H> {
		&self.shared.handler
	}

	/// Environment this bridge runs in.
	pub fn env(&self) -> &BridgeEnv {
		&self.shared.env
	}

	/// Creates an independent bridge over the same handler instance.
	///
	/// The new bridge gets its own registration, slot and queue; calls on it
	/// never wait behind calls on `self`.
	pub fn independent(&self) -> Self {
		Self::build(Arc::clone(&self.shared.handler), self.shared.env.clone(), self.shared.clock.clone())
	}

	/// Returns `true` if both handles refer to the same bridge.
	pub fn same_bridge(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.shared, &other.shared)
	}

	/// Submits one call and returns its pending result without blocking.
	///
	/// An idle bridge parks the call and raises its registration. A busy bridge
	/// applies the environment's [`BusyPolicy`](crate::BusyPolicy).
	/// Registration failures and refusals resolve the returned handle
	/// immediately. Call ids are assigned under the slot lock, so within one
	/// bridge they increase in acceptance order.
	pub fn submit(&self, param: H::Param) -> PendingResult<H::Output> {
		let shared = &self.shared;
		let span = tracing::Span::current();
		shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

		let (pending, refused, released) = {
			let mut slot = shared.slot.lock();
			let (completer, pending) = completion::channel(shared.clock.next());
			let call = Call { param, completer, span };
			let refused = if slot.in_flight.is_none() {
				shared.start(&mut slot, call).err().into_iter().collect::<Vec<_>>()
			} else {
				match shared.env.policy().admit(shared.handler.name(), slot.queue.len()) {
					Admission::Enqueue => shared.enqueue(&mut slot, call),
					Admission::Refuse(err) => vec![(call, err)],
				}
			};
			let released = if slot.in_flight.is_none() { slot.retain.take() } else { None };
			(pending, refused, released)
		};

		shared.refuse(refused);
		drop(released);
		pending
	}

	/// Current state.
	pub fn state(&self) -> BridgeState {
		self.shared.slot.lock().state()
	}

	/// Call occupying the slot, if any.
	pub fn in_flight(&self) -> Option<CallId> {
		self.shared.slot.lock().in_flight_call()
	}

	/// Number of calls waiting behind the in-flight one.
	pub fn queued(&self) -> usize {
		self.shared.slot.lock().queue.len()
	}

	/// Applies `f` to the parameter parked in the slot while `Pending`.
	pub fn inspect_pending<T>(&self, f: impl FnOnce(&H::Param) -> T) -> Option<T> {
		match &self.shared.slot.lock().in_flight {
			Some(InFlight::Raised(call)) => Some(f(&call.param)),
			_ => None,
		}
	}

	/// Point-in-time view of this bridge.
	pub fn snapshot(&self) -> BridgeSnapshot {
		let slot = self.shared.slot.lock();
		BridgeSnapshot {
			name: self.name().to_string(),
			state: slot.state(),
			in_flight: slot.in_flight_call(),
			queued: slot.queue.len(),
			registration: slot.registration,
			stats: self.shared.counters.snapshot(),
		}
	}

	/// Resolves every parked and queued call as [`BridgeError::Abandoned`].
	///
	/// A deferred computation still running is aborted and its caller sees
	/// the same outcome. A synchronous handler already running on the
	/// privileged thread finishes and delivers its own result. Returns the
	/// number of calls abandoned here.
	pub fn abandon(&self) -> usize {
		self.shared.abandon()
	}

	/// Weak watch used to abandon this bridge's work without keeping it alive.
	pub fn watch(&self) -> BridgeWatch {
		let weak: Weak<dyn Abandon> = Arc::downgrade(&self.shared) as Weak<dyn Abandon>;
		BridgeWatch { inner: weak }
	}
}

impl<H: Handler> fmt::Debug for Bridge<H> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Bridge").field("name", &self.name()).field("state", &self.state()).finish()
	}
}

impl<H: Handler> Shared<H> {
	/// Parks `call` in the empty slot and raises the registration.
	fn start(&self, slot: &mut Slot<H>, call: Call<H>) -> std::result::Result<(), (Call<H>, BridgeError)> {
		debug_assert!(slot.in_flight.is_none(), "slot must be empty before start");
		let registration = match slot.registration {
			Some(id) => id,
			None => match self.register() {
				Ok(id) => {
					slot.registration = Some(id);
					id
				}
				Err(err) => return Err((call, BridgeError::Host(err))),
			},
		};

		let outcome = self.env.host().raise(registration);
		if !outcome.is_scheduled() {
			return Err((call, BridgeError::Abandoned));
		}
		tracing::trace!(bridge = self.handler.name(), call = %call.completer.call(), %registration, ?outcome, "bridge.raise");
		slot.in_flight = Some(InFlight::Raised(call));
		if slot.retain.is_none() {
			slot.retain = self.this.upgrade();
		}
		Ok(())
	}

	/// Queues `call` behind the one in flight.
	///
	/// While the slot call is still parked the registration is raised again;
	/// a live host coalesces it, a stopped one strands the whole queue.
	fn enqueue(&self, slot: &mut Slot<H>, call: Call<H>) -> Vec<(Call<H>, BridgeError)> {
		tracing::trace!(bridge = self.handler.name(), call = %call.completer.call(), depth = slot.queue.len() + 1, "bridge.submit.queued");
		slot.queue.push_back(call);
		self.counters.peak_queued.fetch_max(slot.queue.len() as u64, Ordering::Relaxed);

		if let Some(InFlight::Raised(_)) = slot.in_flight
			&& let Some(registration) = slot.registration
			&& !self.env.host().raise(registration).is_scheduled()
		{
			tracing::warn!(bridge = self.handler.name(), %registration, "bridge.raise.denied");
			return Self::strand(slot);
		}
		Vec::new()
	}

	/// Empties a parked slot and the queue behind it after the host dropped the raise.
	fn strand(slot: &mut Slot<H>) -> Vec<(Call<H>, BridgeError)> {
		let mut stranded = Vec::with_capacity(slot.queue.len() + 1);
		if let Some(InFlight::Raised(call)) = slot.in_flight.take() {
			stranded.push((call, BridgeError::Abandoned));
		}
		stranded.extend(slot.queue.drain(..).map(|call| (call, BridgeError::Abandoned)));
		stranded
	}

	/// Resolves calls refused at submission or stranded by the host.
	fn refuse(&self, refused: Vec<(Call<H>, BridgeError)>) {
		for (call, err) in refused {
			let counter = if err.is_abandoned() { &self.counters.abandoned } else { &self.counters.rejected };
			counter.fetch_add(1, Ordering::Relaxed);
			tracing::debug!(bridge = self.handler.name(), call = %call.completer.call(), error = %err, "bridge.call.refused");
			call.completer.resolve(Err(err));
		}
	}

	fn register(&self) -> std::result::Result<RegistrationId, HostError> {
		let ready = self.this.clone();
		let discarded = self.this.clone();
		let id = self.env.host().register_with(
			Arc::new(move |ctx: &HostContext| {
				if let Some(shared) = ready.upgrade() {
					shared.execute(ctx);
				}
			}),
			Some(Arc::new(move |_: RegistrationId| {
				if let Some(shared) = discarded.upgrade() {
					shared.discarded();
				}
			})),
		)?;
		tracing::debug!(bridge = self.handler.name(), host = self.env.host().name(), registration = %id, "bridge.registered");
		Ok(id)
	}

	/// Host discard callback: the raise for the parked call will never be serviced.
	///
	/// A running call is left alone; its completion finds the host stopped
	/// when it tries to raise the next queued call.
	fn discarded(&self) {
		let (stranded, released) = {
			let mut slot = self.slot.lock();
			if !matches!(slot.in_flight, Some(InFlight::Raised(_))) {
				return;
			}
			let stranded = Self::strand(&mut slot);
			(stranded, slot.retain.take())
		};
		tracing::warn!(bridge = self.handler.name(), count = stranded.len(), "bridge.host.discarded");
		self.refuse(stranded);
		drop(released);
	}

	/// Host callback on the privileged thread.
	fn execute(self: &Arc<Self>, ctx: &HostContext) {
		let call = {
			let mut slot = self.slot.lock();
			match slot.in_flight.take() {
				Some(InFlight::Raised(call)) => {
					slot.in_flight = Some(InFlight::Running {
						call: call.completer.call(),
						abort: None,
					});
					call
				}
				other => {
					slot.in_flight = other;
					tracing::trace!(bridge = self.handler.name(), "bridge.execute.spurious");
					return;
				}
			}
		};
		self.counters.executed.fetch_add(1, Ordering::Relaxed);

		let Call { param, completer, span } = call;
		let settle = Settle {
			shared: Arc::clone(self),
			call: completer.call(),
			completer: Some(completer),
		};
		let _entered = span.enter();
		tracing::debug!(bridge = self.handler.name(), call = %settle.call, round = ctx.round(), "bridge.execute");

		match std::panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(ctx, param))) {
			Ok(Execution::Ready(result)) => settle.finish(result.map_err(BridgeError::from)),
			Ok(Execution::Deferred(fut)) => self.defer(settle, fut, span.clone()),
			Err(payload) => settle.finish(Err(HandlerError::Panicked(panic_message(payload.as_ref())).into())),
		}
	}

	/// Starts a deferred computation off the privileged thread.
	fn defer(self: &Arc<Self>, settle: Settle<H>, fut: BoxFuture<std::result::Result<H::Output, HandlerError>>, span: tracing::Span) {
		let runtime = self.env.runtime();
		let inner = runtime.spawn(fut.instrument(span.clone()));
		{
			let mut slot = self.slot.lock();
			if let Some(InFlight::Running { call, abort }) = slot.in_flight.as_mut()
				&& *call == settle.call
			{
				*abort = Some(inner.abort_handle());
			}
		}
		tracing::trace!(bridge = self.handler.name(), call = %settle.call, "bridge.execute.deferred");

		runtime.spawn(
			async move {
				let result = match inner.await {
					Ok(result) => result.map_err(BridgeError::from),
					Err(err) if err.is_panic() => Err(HandlerError::Panicked(panic_message(err.into_panic().as_ref())).into()),
					Err(_) => Err(BridgeError::Abandoned),
				};
				settle.finish(result);
			}
			.instrument(span),
		);
	}

	/// Clears the slot for `call`, installs the next queued call, then resolves.
	fn complete(&self, call: CallId, completer: Completer<H::Output>, result: Result<H::Output>) {
		let (refused, released) = {
			let mut slot = self.slot.lock();
			let current = matches!(&slot.in_flight, Some(InFlight::Running { call: running, .. }) if *running == call);
			let refused = if current {
				slot.in_flight = None;
				self.drain(&mut slot)
			} else {
				Vec::new()
			};
			let released = if slot.in_flight.is_none() { slot.retain.take() } else { None };
			(refused, released)
		};

		match &result {
			Ok(_) => tracing::debug!(bridge = self.handler.name(), %call, "bridge.call.completed"),
			Err(err) => tracing::debug!(bridge = self.handler.name(), %call, error = %err, "bridge.call.failed"),
		}
		if err_is_abandoned(&result) {
			self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
		}
		completer.resolve(result);

		if !refused.is_empty() {
			tracing::warn!(bridge = self.handler.name(), count = refused.len(), "bridge.drain.denied");
		}
		self.refuse(refused);
		drop(released);
	}

	/// Installs the oldest queued call. If the host refuses it, every waiting
	/// call is handed back for resolution.
	fn drain(&self, slot: &mut Slot<H>) -> Vec<(Call<H>, BridgeError)> {
		let Some(next) = slot.queue.pop_front() else {
			return Vec::new();
		};
		match self.start(slot, next) {
			Ok(()) => Vec::new(),
			Err((call, err)) => {
				let mut refused = vec![(call, err.clone())];
				refused.extend(slot.queue.drain(..).map(|call| (call, err.clone())));
				refused
			}
		}
	}
}

fn err_is_abandoned<R>(result: &Result<R>) -> bool {
	matches!(result, Err(err) if err.is_abandoned())
}

/// Type-erased teardown access to a bridge.
trait Abandon: Send + Sync {
	fn abandon(&self) -> usize;
}

impl<H: Handler> Abandon for Shared<H> {
	fn abandon(&self) -> usize {
		let (victims, abort, released) = {
			let mut slot = self.slot.lock();
			let mut victims = Vec::new();
			let mut abort = None;
			match slot.in_flight.take() {
				Some(InFlight::Raised(call)) => victims.push(call),
				Some(InFlight::Running { abort: handle, .. }) => abort = handle,
				None => {}
			}
			victims.extend(slot.queue.drain(..));
			(victims, abort, slot.retain.take())
		};

		if let Some(handle) = abort {
			handle.abort();
		}
		let count = victims.len();
		if count > 0 {
			self.counters.abandoned.fetch_add(count as u64, Ordering::Relaxed);
			tracing::debug!(bridge = self.handler.name(), count, "bridge.abandon");
		}
		for call in victims {
			call.completer.resolve(Err(BridgeError::Abandoned));
		}
		drop(released);
		count
	}
}

impl<H: Handler> Drop for Shared<H> {
	fn drop(&mut self) {
		if let Some(id) = self.slot.get_mut().registration.take() {
			self.env.host().unregister(id);
			tracing::trace!(bridge = self.handler.name(), registration = %id, "bridge.unregistered");
		}
	}
}

/// Resolves one call exactly once, as abandoned if dropped unresolved.
struct Settle<H: Handler> {
	shared: Arc<Shared<H>>,
	call: CallId,
	completer: Option<Completer<H::Output>>,
}

impl<H: Handler> Settle<H> {
	fn finish(mut self, result: Result<H::Output>) {
		if let Some(completer) = self.completer.take() {
			self.shared.complete(self.call, completer, result);
		}
	}
}

impl<H: Handler> Drop for Settle<H> {
	fn drop(&mut self) {
		if let Some(completer) = self.completer.take() {
			self.shared.complete(self.call, completer, Err(BridgeError::Abandoned));
		}
	}
}

/// Weak, type-erased handle used to tear down a bridge's outstanding work.
#[derive(Clone)]
pub struct BridgeWatch {
	inner: Weak<dyn Abandon>,
}

impl BridgeWatch {
	/// Returns `true` while the bridge is alive.
	///
	/// Busy bridges keep themselves alive, so a dead watch has no work left.
	pub fn is_alive(&self) -> bool {
		self.inner.strong_count() > 0
	}

	/// Abandons the bridge's outstanding calls, if it is still alive.
	pub fn abandon(&self) -> usize {
		self.inner.upgrade().map_or(0, |bridge| bridge.abandon())
	}
}

impl fmt::Debug for BridgeWatch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BridgeWatch").field("alive", &self.is_alive()).finish()
	}
}

/// Type-erased view of a bridge held by registries.
pub trait AnyBridge: Send + Sync + 'static {
	/// Handler display name.
	fn name(&self) -> &str;
	/// Point-in-time view.
	fn snapshot(&self) -> BridgeSnapshot;
	/// Abandons outstanding calls.
	fn abandon(&self) -> usize;
	/// Downcast support.
	fn as_any(&self) -> &dyn std::any::Any;
}

impl<H: Handler> AnyBridge for Bridge<H> {
	fn name(&self) -> &str {
		Bridge::name(self)
	}

	fn snapshot(&self) -> BridgeSnapshot {
		Bridge::snapshot(self)
	}

	fn abandon(&self) -> usize {
		Bridge::abandon(self)
	}

	fn as_any(&self) -> &dyn std::any::Any {
		self
	}
}
