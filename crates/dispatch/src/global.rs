//! Process-wide dispatcher.
//!
//! The global dispatcher has an explicit owner: it exists between
//! [`initialize`] and [`shutdown`], and the free functions here fail with
//! [`BridgeError::NotInitialized`] outside that window.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use ferry_bridge::{BridgeEnv, BridgeError, Handler, PendingResult, Result};
use ferry_host::{Host, HostContext};
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::{DispatchConfig, Dispatcher};

static GLOBAL: RwLock<Option<Arc<Dispatcher>>> = parking_lot::const_rwlock(None);

/// Installs the global dispatcher over `host`, on the ambient tokio runtime.
///
/// Calling it again while initialized returns the existing dispatcher.
pub fn initialize(host: Arc<dyn Host>) -> Result<Arc<Dispatcher>> {
	Ok(install(Dispatcher::new(BridgeEnv::current(host)?)))
}

/// Installs the global dispatcher with an explicit runtime and configuration.
pub fn initialize_with(host: Arc<dyn Host>, runtime: Handle, config: &DispatchConfig) -> Arc<Dispatcher> {
	install(Dispatcher::with_config(host, runtime, config))
}

/// Spawns the configured host thread and installs the global dispatcher over it.
pub fn initialize_hosted(config: &DispatchConfig, runtime: Handle) -> Result<Arc<Dispatcher>> {
	let host = config.spawn_host()?;
	Ok(initialize_with(Arc::new(host), runtime, config))
}

fn install(dispatcher: Dispatcher) -> Arc<Dispatcher> {
	let mut global = GLOBAL.write();
	if let Some(existing) = global.as_ref() {
		tracing::warn!(host = existing.env().host().name(), "dispatch.global.already_initialized");
		return Arc::clone(existing);
	}
	let dispatcher = Arc::new(dispatcher);
	*global = Some(Arc::clone(&dispatcher));
	tracing::info!(host = dispatcher.env().host().name(), policy = ?dispatcher.env().policy(), "dispatch.global.initialized");
	dispatcher
}

/// Returns the global dispatcher.
pub fn global() -> Result<Arc<Dispatcher>> {
	GLOBAL.read().clone().ok_or(BridgeError::NotInitialized)
}

/// Returns `true` between [`initialize`] and [`shutdown`].
pub fn is_initialized() -> bool {
	GLOBAL.read().is_some()
}

/// Removes the global dispatcher and abandons its outstanding calls.
///
/// Returns the number of calls abandoned. A no-op when not initialized.
pub fn shutdown() -> usize {
	let Some(dispatcher) = GLOBAL.write().take() else {
		return 0;
	};
	dispatcher.shutdown()
}

/// Registers `handler` globally. The first registration of a type wins.
pub fn register<H: Handler>(handler: H) -> Result<bool> {
	Ok(global()?.register(handler))
}

/// Removes every globally registered bridge, abandoning their calls.
pub fn unregister_all() -> Result<usize> {
	Ok(global()?.unregister_all())
}

/// Submits through `H`'s global shared bridge; see [`Dispatcher::raise`].
pub fn raise<H>(param: H::Param) -> PendingResult<H::Output>
where
	H: Handler,
	H::Output: Default,
{
	match global() {
		Ok(dispatcher) => dispatcher.raise::<H>(param),
		Err(err) => PendingResult::failed(err),
	}
}

/// Submits through a fresh bridge over `H`'s global handler; see [`Dispatcher::raise_new`].
pub fn raise_new<H>(param: H::Param) -> PendingResult<H::Output>
where
	H: Handler,
	H::Output: Default,
{
	match global() {
		Ok(dispatcher) => dispatcher.raise_new::<H>(param),
		Err(err) => PendingResult::failed(err),
	}
}

/// Runs `f` once on the global host's privileged thread.
pub fn run<F, R>(f: F) -> PendingResult<R>
where
	F: FnOnce(&HostContext) -> R + Send + 'static,
	R: Send + 'static,
{
	match global() {
		Ok(dispatcher) => dispatcher.run(f),
		Err(err) => PendingResult::failed(err),
	}
}

/// Runs a fallible `f` once on the global host's privileged thread.
pub fn try_run<F, R, E>(f: F) -> PendingResult<R>
where
	F: FnOnce(&HostContext) -> std::result::Result<R, E> + Send + 'static,
	E: Into<Box<dyn StdError + Send + Sync + 'static>>,
	R: Send + 'static,
{
	match global() {
		Ok(dispatcher) => dispatcher.try_run(f),
		Err(err) => PendingResult::failed(err),
	}
}

/// Runs `f` on the global host's privileged thread and awaits its computation.
pub fn run_async<F, Fut, R, E>(f: F) -> PendingResult<R>
where
	F: FnOnce(&HostContext) -> Fut + Send + 'static,
	Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
	E: Into<Box<dyn StdError + Send + Sync + 'static>>,
	R: Send + 'static,
{
	match global() {
		Ok(dispatcher) => dispatcher.run_async(f),
		Err(err) => PendingResult::failed(err),
	}
}
