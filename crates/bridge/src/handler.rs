//! Handler capability and the built-in adapters.
//!
//! A [`Handler`] is a stateless unit of work executed on the host's privileged
//! thread. It either finishes there ([`Execution::Ready`]) or starts an inner
//! computation that the bridge awaits off the privileged thread
//! ([`Execution::Deferred`]).

use std::error::Error as StdError;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use ferry_host::HostContext;

use crate::HandlerError;

/// Boxed `Send` future used by deferred executions.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Result of invoking a handler on the privileged thread.
pub enum Execution<R> {
	/// The handler finished on the privileged thread.
	Ready(Result<R, HandlerError>),
	/// The handler started an inner computation; the call settles when it does.
	Deferred(BoxFuture<Result<R, HandlerError>>),
}

impl<R> Execution<R> {
	/// Successful synchronous completion.
	pub fn ready(value: R) -> Self {
		Self::Ready(Ok(value))
	}

	/// Failed synchronous completion.
	pub fn failed(err: HandlerError) -> Self {
		Self::Ready(Err(err))
	}

	/// Deferred completion driven by `fut`.
	pub fn deferred<F>(fut: F) -> Self
	where
		F: Future<Output = Result<R, HandlerError>> + Send + 'static,
	{
		Self::Deferred(Box::pin(fut))
	}
}

/// Unit of work runnable on the host's privileged thread.
///
/// Implementations hold no per-call state; one instance is shared by a bridge
/// and all of its independent copies.
pub trait Handler: Send + Sync + 'static {
	/// Parameter supplied by the caller.
	type Param: Send + 'static;
	/// Value delivered to the caller.
	type Output: Send + 'static;

	/// Display name used in logs and errors.
	fn name(&self) -> &str {
		std::any::type_name::<Self>()
	}

	/// Runs on the privileged thread.
	fn handle(&self, ctx: &HostContext, param: Self::Param) -> Execution<Self::Output>;
}

/// Synchronous adapter over a plain function.
pub struct FnHandler<F, P, R, E> {
	name: String,
	f: F,
	_marker: PhantomData<fn(P) -> Result<R, E>>,
}

/// Wraps `f` as a synchronous handler.
pub fn from_fn<F, P, R, E>(name: impl Into<String>, f: F) -> FnHandler<F, P, R, E>
where
	F: Fn(&HostContext, P) -> Result<R, E> + Send + Sync + 'static,
	E: Into<Box<dyn StdError + Send + Sync + 'static>> + 'static,
{
	FnHandler {
		name: name.into(),
		f,
		_marker: PhantomData,
	}
}

impl<F, P, R, E> Handler for FnHandler<F, P, R, E>
where
	F: Fn(&HostContext, P) -> Result<R, E> + Send + Sync + 'static,
	E: Into<Box<dyn StdError + Send + Sync + 'static>> + 'static,
	P: Send + 'static,
	R: Send + 'static,
{
	type Param = P;
	type Output = R;

	fn name(&self) -> &str {
		&self.name
	}

	fn handle(&self, ctx: &HostContext, param: P) -> Execution<R> {
		Execution::Ready((self.f)(ctx, param).map_err(HandlerError::new))
	}
}

/// Asynchronous adapter over a function returning a future.
pub struct AsyncFnHandler<F, Fut, P, R, E> {
	name: String,
	f: F,
	_marker: PhantomData<fn(P) -> (Fut, Result<R, E>)>,
}

/// Wraps `f` as an asynchronous handler.
///
/// `f` itself runs on the privileged thread; the future it returns is awaited
/// off that thread.
pub fn from_async_fn<F, Fut, P, R, E>(name: impl Into<String>, f: F) -> AsyncFnHandler<F, Fut, P, R, E>
where
	F: Fn(&HostContext, P) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<R, E>> + Send + 'static,
	E: Into<Box<dyn StdError + Send + Sync + 'static>> + 'static,
{
	AsyncFnHandler {
		name: name.into(),
		f,
		_marker: PhantomData,
	}
}

impl<F, Fut, P, R, E> Handler for AsyncFnHandler<F, Fut, P, R, E>
where
	F: Fn(&HostContext, P) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<R, E>> + Send + 'static,
	E: Into<Box<dyn StdError + Send + Sync + 'static>> + 'static,
	P: Send + 'static,
	R: Send + 'static,
{
	type Param = P;
	type Output = R;

	fn name(&self) -> &str {
		&self.name
	}

	fn handle(&self, ctx: &HostContext, param: P) -> Execution<R> {
		let fut = (self.f)(ctx, param);
		Execution::deferred(async move { fut.await.map_err(HandlerError::new) })
	}
}

/// Closure run by [`SyncDelegate`].
pub type SyncJob<R> = Box<dyn FnOnce(&HostContext) -> Result<R, HandlerError> + Send>;

/// Closure run by [`AsyncDelegate`].
pub type AsyncJob<R> = Box<dyn FnOnce(&HostContext) -> BoxFuture<Result<R, HandlerError>> + Send>;

/// Handler whose parameter is the closure to run.
pub struct SyncDelegate<R>(PhantomData<fn() -> R>);

impl<R> Default for SyncDelegate<R> {
	fn default() -> Self {
		Self(PhantomData)
	}
}

impl<R: Send + 'static> Handler for SyncDelegate<R> {
	type Param = SyncJob<R>;
	type Output = R;

	fn name(&self) -> &str {
		"sync-delegate"
	}

	fn handle(&self, ctx: &HostContext, job: SyncJob<R>) -> Execution<R> {
		Execution::Ready(job(ctx))
	}
}

/// Handler whose parameter starts an inner computation.
pub struct AsyncDelegate<R>(PhantomData<fn() -> R>);

impl<R> Default for AsyncDelegate<R> {
	fn default() -> Self {
		Self(PhantomData)
	}
}

impl<R: Send + 'static> Handler for AsyncDelegate<R> {
	type Param = AsyncJob<R>;
	type Output = R;

	fn name(&self) -> &str {
		"async-delegate"
	}

	fn handle(&self, ctx: &HostContext, job: AsyncJob<R>) -> Execution<R> {
		Execution::Deferred(job(ctx))
	}
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn ctx() -> HostContext {
		HostContext::current("test-host", 1)
	}

	#[test]
	fn fn_handler_maps_errors() {
		let handler = from_fn("parse", |_: &HostContext, text: &'static str| text.parse::<i32>());
		assert_eq!(handler.name(), "parse");

		let Execution::Ready(ok) = handler.handle(&ctx(), "12") else {
			panic!("sync handler should complete on the privileged thread");
		};
		assert_eq!(ok.ok(), Some(12));

		let Execution::Ready(Err(err)) = handler.handle(&ctx(), "x") else {
			panic!("parse failure should surface as a handler error");
		};
		assert!(err.downcast_ref::<std::num::ParseIntError>().is_some());
	}

	#[tokio::test]
	async fn async_fn_handler_defers() {
		let handler = from_async_fn("later", |_: &HostContext, n: u32| async move { Ok::<_, HandlerError>(n + 1) });
		let Execution::Deferred(fut) = handler.handle(&ctx(), 1) else {
			panic!("async handler should defer");
		};
		assert_eq!(fut.await.ok(), Some(2));
	}

	#[test]
	fn sync_delegate_runs_job() {
		let handler = SyncDelegate::<String>::default();
		let job: SyncJob<String> = Box::new(|ctx: &HostContext| Ok(ctx.host_name().to_string()));
		let Execution::Ready(result) = handler.handle(&ctx(), job) else {
			panic!("delegate should complete synchronously");
		};
		assert_eq!(result.ok().as_deref(), Some("test-host"));
	}

	#[test]
	fn panic_payloads() {
		let payload = std::panic::catch_unwind(|| panic!("boom-str")).expect_err("should panic");
		assert_eq!(panic_message(payload.as_ref()), "boom-str");
		let payload = std::panic::catch_unwind(|| panic!("{}", String::from("boom-string"))).expect_err("should panic");
		assert_eq!(panic_message(payload.as_ref()), "boom-string");
		let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).expect_err("should panic");
		assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
	}
}
