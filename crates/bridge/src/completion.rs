//! Single-assignment completion handles.
//!
//! Every accepted call owns one [`Completer`] (held by the bridge) and one
//! [`PendingResult`] (held by the caller). The completer resolves exactly
//! once; dropping it unresolved resolves the caller with
//! [`BridgeError::Abandoned`], so a waiter can never hang on a lost call.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::{BridgeError, Result};

/// Identifier of one accepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
	/// Returns the raw numeric id.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for CallId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "call#{}", self.0)
	}
}

/// Monotonic call id clock, shared by a bridge and its independent copies.
#[derive(Debug, Default, Clone)]
pub(crate) struct CallClock {
	next: Arc<AtomicU64>,
}

impl CallClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn next(&self) -> CallId {
		CallId(self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
	}
}

/// Creates a linked completer/pending-result pair for one call.
pub(crate) fn channel<R>(call: CallId) -> (Completer<R>, PendingResult<R>) {
	let (tx, rx) = oneshot::channel();
	(
		Completer { call, tx: Some(tx) },
		PendingResult {
			call: Some(call),
			inner: Inner::Waiting(rx),
		},
	)
}

/// Bridge-side half of a completion handle.
pub(crate) struct Completer<R> {
	call: CallId,
	tx: Option<oneshot::Sender<Result<R>>>,
}

impl<R> Completer<R> {
	/// Call this completer belongs to.
	pub fn call(&self) -> CallId {
		self.call
	}

	/// Resolves the call. Returns `false` if the caller stopped waiting.
	pub fn resolve(mut self, result: Result<R>) -> bool {
		match self.tx.take() {
			Some(tx) => tx.send(result).is_ok(),
			None => false,
		}
	}
}

impl<R> Drop for Completer<R> {
	fn drop(&mut self) {
		if let Some(tx) = self.tx.take() {
			tracing::trace!(call = %self.call, "bridge.call.abandoned");
			let _ = tx.send(Err(BridgeError::Abandoned));
		}
	}
}

impl<R> fmt::Debug for Completer<R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Completer").field("call", &self.call).field("resolved", &self.tx.is_none()).finish()
	}
}

/// Caller-side half of a completion handle.
///
/// Awaiting it yields the handler's result, the handler's failure, or a
/// cancellation-class [`BridgeError::Abandoned`].
#[must_use = "a pending result does nothing unless awaited"]
pub struct PendingResult<R> {
	call: Option<CallId>,
	inner: Inner<R>,
}

enum Inner<R> {
	Waiting(oneshot::Receiver<Result<R>>),
	Ready(Option<Result<R>>),
}

// Never pin-projected: the receiver is `Unpin` and the ready value is moved out.
impl<R> Unpin for PendingResult<R> {}

impl<R> PendingResult<R> {
	/// An already-resolved successful result that never touched a host.
	pub fn ready(value: R) -> Self {
		Self {
			call: None,
			inner: Inner::Ready(Some(Ok(value))),
		}
	}

	/// An already-resolved failed result.
	pub fn failed(err: BridgeError) -> Self {
		Self {
			call: None,
			inner: Inner::Ready(Some(Err(err))),
		}
	}

	/// Call id assigned when the call was accepted by a bridge.
	///
	/// `None` for results resolved without a bridge.
	pub fn call_id(&self) -> Option<CallId> {
		self.call
	}

	/// Returns the outcome if it is already available, without waiting.
	pub fn try_take(&mut self) -> Option<Result<R>> {
		match &mut self.inner {
			Inner::Ready(value) => value.take(),
			Inner::Waiting(rx) => match rx.try_recv() {
				Ok(result) => {
					self.inner = Inner::Ready(None);
					Some(result)
				}
				Err(oneshot::error::TryRecvError::Empty) => None,
				Err(oneshot::error::TryRecvError::Closed) => {
					self.inner = Inner::Ready(None);
					Some(Err(BridgeError::Abandoned))
				}
			},
		}
	}

	/// Blocks the calling thread until the call settles.
	///
	/// Must not be called from an async context or from the host's
	/// privileged thread, which would deadlock the call it waits for.
	pub fn wait(self) -> Result<R> {
		match self.inner {
			Inner::Ready(Some(result)) => result,
			Inner::Ready(None) => Err(BridgeError::Abandoned),
			Inner::Waiting(rx) => rx.blocking_recv().unwrap_or(Err(BridgeError::Abandoned)),
		}
	}
}

impl<R> Future for PendingResult<R> {
	type Output = Result<R>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		match &mut this.inner {
			Inner::Ready(value) => Poll::Ready(value.take().unwrap_or(Err(BridgeError::Abandoned))),
			Inner::Waiting(rx) => match Pin::new(rx).poll(cx) {
				Poll::Ready(result) => {
					this.inner = Inner::Ready(None);
					Poll::Ready(result.unwrap_or(Err(BridgeError::Abandoned)))
				}
				Poll::Pending => Poll::Pending,
			},
		}
	}
}

impl<R> fmt::Debug for PendingResult<R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = match &self.inner {
			Inner::Waiting(_) => "waiting",
			Inner::Ready(Some(_)) => "ready",
			Inner::Ready(None) => "taken",
		};
		f.debug_struct("PendingResult").field("call", &self.call).field("state", &state).finish()
	}
}
