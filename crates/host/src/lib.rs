//! Host boundary for privileged-thread external events.
//!
//! A host owns exactly one privileged thread and exposes a raise-then-callback
//! primitive:
//! * `register` installs a ready callback and yields an opaque [`RegistrationId`]
//! * `raise` asks the host to invoke that callback once on its privileged thread;
//!   raising an already pending registration coalesces instead of queuing
//! * the callback receives a [`HostContext`] token describing the privileged thread
//!
//! Two hosts are provided: [`HostThread`] owns a dedicated named thread, and
//! [`ManualHost`] services raises when the embedding loop calls
//! [`ManualHost::pump`].

#![warn(missing_docs)]

mod context;
mod error;
mod event;
mod manual;
mod registrations;
mod thread;

pub use context::HostContext;
pub use error::{HostError, Result};
pub use event::{DiscardCallback, Host, RaiseOutcome, ReadyCallback, RegistrationId};
pub use manual::ManualHost;
pub use registrations::HostStats;
pub use thread::HostThread;
