//! Registries and facade for bridged host calls.
//!
//! A [`Dispatcher`] maps handler types to shared [`Bridge`]s:
//! * [`Dispatcher::raise`] serializes calls through the handler's shared bridge
//! * [`Dispatcher::raise_new`] runs a call on a fresh bridge over the same handler
//! * [`Dispatcher::run`] and [`Dispatcher::run_async`] run an ad-hoc closure
//!
//! Calls for an unregistered handler type resolve to the output's default value
//! without touching the host; [`Dispatcher::try_raise`] tells the two apart.
//!
//! The process-wide dispatcher lives in [`global`] and is owned explicitly
//! through [`initialize`] and [`shutdown`]. A [`Scope`] is an independent
//! registry whose bridges are torn down with it.
//!
//! ```no_run
//! # async fn demo() -> ferry_bridge::Result<()> {
//! use std::sync::Arc;
//!
//! use ferry_bridge::{Execution, Handler};
//! use ferry_host::{HostContext, HostThread};
//!
//! struct Double;
//!
//! impl Handler for Double {
//! 	type Param = i32;
//! 	type Output = i32;
//!
//! 	fn handle(&self, _ctx: &HostContext, x: i32) -> Execution<i32> {
//! 		Execution::ready(x * 2)
//! 	}
//! }
//!
//! let host = Arc::new(HostThread::spawn("app-main")?);
//! ferry_dispatch::initialize(host)?;
//! ferry_dispatch::register(Double)?;
//! assert_eq!(ferry_dispatch::raise::<Double>(21).await?, 42);
//! ferry_dispatch::shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
mod dispatcher;
pub mod global;
pub mod logging;
mod registry;
mod scope;

pub use config::{ConfigError, DispatchConfig};
pub use dispatcher::Dispatcher;
pub use ferry_bridge::{Bridge, BridgeError, BusyPolicy, Handler, PendingResult};
pub use global::{global, initialize, initialize_hosted, initialize_with, is_initialized, raise, raise_new, register, run, run_async, shutdown, try_run, unregister_all};
pub use registry::BridgeRegistry;
pub use scope::Scope;
