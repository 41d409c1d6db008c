//! Facade over one bridge registry.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use ferry_bridge::{AsyncDelegate, AsyncJob, BoxFuture, Bridge, BridgeEnv, BridgeError, BridgeSnapshot, BridgeWatch, Handler, HandlerError, PendingResult, SyncDelegate, SyncJob};
use ferry_host::{Host, HostContext};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::config::DispatchConfig;
use crate::registry::BridgeRegistry;
use crate::scope::Scope;

/// Resolves bridges by handler type and submits calls to them.
///
/// `raise` serializes calls through the handler's shared bridge. `raise_new`
/// and the `run` family go through fresh one-shot bridges that never wait
/// behind other calls; those are tracked weakly so [`Dispatcher::shutdown`]
/// can abandon whatever they still have in flight.
pub struct Dispatcher {
	env: BridgeEnv,
	registry: BridgeRegistry,
	detached: Mutex<Vec<BridgeWatch>>,
}

impl Dispatcher {
	/// Creates a dispatcher with an empty registry.
	pub fn new(env: BridgeEnv) -> Self {
		Self {
			env,
			registry: BridgeRegistry::new(),
			detached: Mutex::new(Vec::new()),
		}
	}

	/// Creates a dispatcher whose bridges follow `config`'s busy policy.
	pub fn with_config(host: Arc<dyn Host>, runtime: Handle, config: &DispatchConfig) -> Self {
		Self::new(BridgeEnv::new(host, runtime).with_policy(config.busy.policy()))
	}

	/// Environment shared by every bridge created here.
	pub fn env(&self) -> &BridgeEnv {
		&self.env
	}

	/// Underlying registry.
	pub fn registry(&self) -> &BridgeRegistry {
		&self.registry
	}

	/// Registers `handler`. The first registration of a handler type wins.
	pub fn register<H: Handler>(&self, handler: H) -> bool {
		self.registry.register(|| Bridge::new(handler, self.env.clone()))
	}

	/// Returns the shared bridge for `H`, creating it with `factory` if absent.
	pub fn get_or_register<H: Handler>(&self, factory: impl FnOnce() -> H) -> Bridge<H> {
		self.registry.get_or_create(|| Bridge::new(factory(), self.env.clone()))
	}

	/// Returns the shared bridge for `H`.
	pub fn bridge<H: Handler>(&self) -> ferry_bridge::Result<Bridge<H>> {
		self.registry.lookup::<H>().ok_or(BridgeError::NotRegistered(std::any::type_name::<H>()))
	}

	/// Submits through the shared bridge for `H`.
	///
	/// An unregistered handler type resolves immediately to `Output::default()`
	/// without contacting the host.
	pub fn raise<H>(&self, param: H::Param) -> PendingResult<H::Output>
	where
		H: Handler,
		H::Output: Default,
	{
		self.try_raise::<H>(param).unwrap_or_else(unregistered::<H>)
	}

	/// Submits through the shared bridge for `H`, or `None` if unregistered.
	pub fn try_raise<H: Handler>(&self, param: H::Param) -> Option<PendingResult<H::Output>> {
		self.registry.lookup::<H>().map(|bridge| bridge.submit(param))
	}

	/// Submits through a fresh bridge over `H`'s handler instance.
	///
	/// The call never waits behind calls on the shared bridge. An unregistered
	/// handler type resolves immediately to `Output::default()`.
	pub fn raise_new<H>(&self, param: H::Param) -> PendingResult<H::Output>
	where
		H: Handler,
		H::Output: Default,
	{
		match self.registry.lookup::<H>() {
			Some(bridge) => self.submit_detached(&bridge.independent(), param),
			None => unregistered::<H>(),
		}
	}

	/// Runs `f` once on the privileged thread.
	pub fn run<F, R>(&self, f: F) -> PendingResult<R>
	where
		F: FnOnce(&HostContext) -> R + Send + 'static,
		R: Send + 'static,
	{
		self.try_run(move |ctx| Ok::<_, Infallible>(f(ctx)))
	}

	/// Runs a fallible `f` once on the privileged thread.
	pub fn try_run<F, R, E>(&self, f: F) -> PendingResult<R>
	where
		F: FnOnce(&HostContext) -> Result<R, E> + Send + 'static,
		E: Into<Box<dyn StdError + Send + Sync + 'static>>,
		R: Send + 'static,
	{
		let job: SyncJob<R> = Box::new(move |ctx: &HostContext| f(ctx).map_err(HandlerError::new));
		self.submit_detached(&Bridge::new(SyncDelegate::default(), self.env.clone()), job)
	}

	/// Calls `f` on the privileged thread and awaits the computation it
	/// returns off that thread.
	pub fn run_async<F, Fut, R, E>(&self, f: F) -> PendingResult<R>
	where
		F: FnOnce(&HostContext) -> Fut + Send + 'static,
		Fut: Future<Output = Result<R, E>> + Send + 'static,
		E: Into<Box<dyn StdError + Send + Sync + 'static>>,
		R: Send + 'static,
	{
		let job: AsyncJob<R> = Box::new(move |ctx: &HostContext| -> BoxFuture<Result<R, HandlerError>> {
			let fut = f(ctx);
			Box::pin(async move { fut.await.map_err(HandlerError::new) })
		});
		self.submit_detached(&Bridge::new(AsyncDelegate::default(), self.env.clone()), job)
	}

	fn submit_detached<H: Handler>(&self, bridge: &Bridge<H>, param: H::Param) -> PendingResult<H::Output> {
		let pending = bridge.submit(param);
		let mut detached = self.detached.lock();
		detached.retain(BridgeWatch::is_alive);
		detached.push(bridge.watch());
		pending
	}

	/// Creates a scoped registry sharing this dispatcher's environment.
	pub fn scope(&self) -> Scope {
		Scope::new(self.env.clone())
	}

	/// Removes every registered bridge, abandoning their outstanding calls.
	///
	/// Returns the number of calls abandoned.
	pub fn unregister_all(&self) -> usize {
		self.registry.remove_all()
	}

	/// Unregisters everything and abandons calls still held by one-shot bridges.
	///
	/// Returns the number of calls abandoned.
	pub fn shutdown(&self) -> usize {
		let registered = self.unregister_all();
		let detached: Vec<_> = std::mem::take(&mut *self.detached.lock());
		let detached = detached.iter().map(BridgeWatch::abandon).sum::<usize>();
		tracing::debug!(host = self.env.host().name(), registered, detached, "dispatch.shutdown");
		registered + detached
	}

	/// Snapshots of every registered bridge.
	pub fn snapshots(&self) -> Vec<BridgeSnapshot> {
		self.registry.snapshots()
	}

	/// Number of one-shot bridges still alive.
	pub fn detached(&self) -> usize {
		self.detached.lock().iter().filter(|watch| watch.is_alive()).count()
	}
}

fn unregistered<H>() -> PendingResult<H::Output>
where
	H: Handler,
	H::Output: Default,
{
	tracing::trace!(handler = std::any::type_name::<H>(), "dispatch.raise.unregistered");
	PendingResult::ready(H::Output::default())
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher").field("env", &self.env).field("registry", &self.registry).finish()
	}
}
