//! Async bridge from arbitrary threads onto a host's privileged thread.
//!
//! A [`Bridge`] pairs one [`Handler`] with one host registration. Callers
//! [`submit`](Bridge::submit) a parameter from any thread and receive a
//! [`PendingResult`]; the handler later runs on the privileged thread and its
//! outcome resolves the pending result exactly once.
//!
//! # Busy bridges
//!
//! One call occupies a bridge at a time. Calls arriving while it is busy are
//! handled by the [`BusyPolicy`] of the bridge's [`BridgeEnv`]: queued FIFO
//! (the default, optionally bounded) or rejected with [`BridgeError::Busy`].
//! [`Bridge::independent`] creates a sibling with its own slot for callers
//! that must not wait behind one another.
//!
//! # Outcomes
//!
//! A pending result resolves to the handler's value, a
//! [`BridgeError::Handler`] failure (including caught panics), or the
//! cancellation-class [`BridgeError::Abandoned`] when the call is torn down.

#![warn(missing_docs)]

mod bridge;
mod completion;
mod env;
mod error;
mod handler;
mod policy;

pub use bridge::{AnyBridge, Bridge, BridgeSnapshot, BridgeState, BridgeStats, BridgeWatch};
pub use completion::{CallId, PendingResult};
pub use env::BridgeEnv;
pub use error::{BridgeError, HandlerError, Result};
pub use handler::{AsyncDelegate, AsyncFnHandler, AsyncJob, BoxFuture, Execution, FnHandler, Handler, SyncDelegate, SyncJob, from_async_fn, from_fn};
pub use policy::BusyPolicy;
