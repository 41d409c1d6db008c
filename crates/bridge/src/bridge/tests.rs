use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::mpsc;
use std::time::Duration;

use ferry_host::{DiscardCallback, Host, HostThread, ManualHost, RaiseOutcome, ReadyCallback};
use pretty_assertions::assert_eq;

use super::*;
use crate::{BusyPolicy, from_async_fn, from_fn};

struct Double;

impl Handler for Double {
	type Param = i32;
	type Output = i32;

	fn handle(&self, _ctx: &HostContext, x: i32) -> Execution<i32> {
		Execution::ready(x * 2)
	}
}

fn env(host: &ManualHost) -> BridgeEnv {
	BridgeEnv::current(Arc::new(host.clone())).expect("tests run inside a tokio runtime")
}

fn recorder(seen: &Arc<Mutex<Vec<i32>>>) -> impl Handler<Param = i32, Output = i32> + use<> {
	let seen = Arc::clone(seen);
	from_fn("recorder", move |_: &HostContext, x: i32| {
		seen.lock().push(x);
		Ok::<_, HandlerError>(x)
	})
}

/// Handler whose first call blocks until the returned gate sender is dropped.
fn gated(seen: &Arc<Mutex<Vec<u32>>>) -> (impl Handler<Param = u32, Output = u32> + use<>, mpsc::Receiver<()>, mpsc::Sender<()>) {
	let (started_tx, started_rx) = mpsc::channel();
	let (gate_tx, gate_rx) = mpsc::channel::<()>();
	let gate = Mutex::new(Some(gate_rx));
	let seen = Arc::clone(seen);
	let handler = from_fn("gated", move |_: &HostContext, n: u32| {
		let first = gate.lock().take();
		if let Some(gate) = first {
			let _ = started_tx.send(());
			let _ = gate.recv_timeout(Duration::from_secs(5));
		}
		seen.lock().push(n);
		Ok::<_, HandlerError>(n * 10)
	});
	(handler, started_rx, gate_tx)
}

/// Host that never reports dropped raises, so only a later raise sees the shutdown.
struct Silent(ManualHost);

impl Host for Silent {
	fn name(&self) -> &str {
		self.0.name()
	}

	fn register_with(&self, on_ready: ReadyCallback, _on_discard: Option<DiscardCallback>) -> ferry_host::Result<RegistrationId> {
		self.0.register(on_ready)
	}

	fn raise(&self, id: RegistrationId) -> RaiseOutcome {
		self.0.raise(id)
	}

	fn unregister(&self, id: RegistrationId) {
		self.0.unregister(id);
	}
}

#[tokio::test]
async fn doubles_on_privileged_thread() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host));

	let pending = bridge.submit(21);
	assert_eq!(bridge.state(), BridgeState::Pending);
	assert_eq!(host.pending(), 1);

	assert_eq!(host.pump(), 1);
	assert_eq!(pending.await.ok(), Some(42));
	assert_eq!(bridge.state(), BridgeState::Idle);
}

#[tokio::test]
async fn busy_bridge_queues_in_submission_order() {
	let host = ManualHost::new("manual");
	let seen = Arc::new(Mutex::new(Vec::new()));
	let bridge = Bridge::new(recorder(&seen), env(&host));

	let first = bridge.submit(1);
	let second = bridge.submit(2);
	assert_eq!(bridge.inspect_pending(|x| *x), Some(1), "second call must not overwrite the slot");
	assert_eq!(bridge.queued(), 1);
	assert_eq!(host.stats().accepted, 1);

	assert_eq!(host.pump_once(), 1);
	assert_eq!(*seen.lock(), vec![1]);
	assert_eq!(bridge.inspect_pending(|x| *x), Some(2));

	host.pump();
	assert_eq!(first.await.ok(), Some(1));
	assert_eq!(second.await.ok(), Some(2));
	assert_eq!(*seen.lock(), vec![1, 2]);

	let snapshot = bridge.snapshot();
	assert_eq!(snapshot.state, BridgeState::Idle);
	assert_eq!(snapshot.queued, 0);
	assert_eq!(snapshot.stats.submitted, 2);
	assert_eq!(snapshot.stats.executed, 2);
	assert_eq!(snapshot.stats.peak_queued, 1);
}

#[tokio::test]
async fn independent_bridge_does_not_wait() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host));
	let sibling = bridge.independent();
	assert!(!bridge.same_bridge(&sibling));
	assert!(Arc::ptr_eq(bridge.handler(), sibling.handler()));

	let a = bridge.submit(1);
	let b = sibling.submit(2);
	assert_eq!(bridge.queued(), 0);
	assert_eq!(sibling.state(), BridgeState::Pending);
	assert_eq!(host.registrations(), 2);

	assert_eq!(host.pump_once(), 2);
	assert_eq!(a.await.ok(), Some(2));
	assert_eq!(b.await.ok(), Some(4));
}

#[tokio::test]
async fn handler_failure_is_delivered() {
	#[derive(Debug, thiserror::Error)]
	#[error("element is pinned")]
	struct Pinned;

	let host = ManualHost::new("manual");
	let bridge = Bridge::new(from_fn("move-element", |_: &HostContext, _: ()| Err::<(), _>(Pinned)), env(&host));
	let pending = bridge.submit(());
	host.pump();

	let err = pending.await.expect_err("handler failed");
	let handler = err.handler_error().expect("handler failure");
	assert!(handler.downcast_ref::<Pinned>().is_some());
	assert_eq!(bridge.state(), BridgeState::Idle);
}

#[tokio::test]
async fn handler_panic_is_contained() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(
		from_fn("explode", |_: &HostContext, x: i32| {
			if x < 0 {
				panic!("negative input");
			}
			Ok::<_, HandlerError>(x)
		}),
		env(&host),
	);

	let boom = bridge.submit(-1);
	let after = bridge.submit(5);
	host.pump();

	let err = boom.await.expect_err("panic becomes a failure");
	assert!(err.handler_error().is_some_and(HandlerError::is_panic));
	assert_eq!(err.to_string(), "handler panicked: negative input");
	assert_eq!(after.await.ok(), Some(5));
}

#[tokio::test]
async fn reject_policy_refuses_busy_calls() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host).with_policy(BusyPolicy::Reject));

	let first = bridge.submit(1);
	let refused = bridge.submit(2);
	assert!(matches!(refused.await, Err(BridgeError::Busy(_))));

	host.pump();
	assert_eq!(first.await.ok(), Some(2));
	assert_eq!(bridge.snapshot().stats.rejected, 1);
}

#[tokio::test]
async fn bounded_queue_refuses_overflow() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host).with_policy(BusyPolicy::bounded(1)));

	let a = bridge.submit(1);
	let b = bridge.submit(2);
	let c = bridge.submit(3);
	assert!(matches!(c.await, Err(BridgeError::QueueFull { limit: 1, .. })));

	host.pump();
	assert_eq!(a.await.ok(), Some(2));
	assert_eq!(b.await.ok(), Some(4));
}

#[tokio::test]
async fn abandon_resolves_waiters_and_keeps_bridge_usable() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host));

	let a = bridge.submit(1);
	let b = bridge.submit(2);
	assert_eq!(bridge.abandon(), 2);
	assert!(a.await.is_err_and(|err| err.is_abandoned()));
	assert!(b.await.is_err_and(|err| err.is_abandoned()));
	assert_eq!(bridge.state(), BridgeState::Idle);

	let c = bridge.submit(3);
	host.pump();
	assert_eq!(c.await.ok(), Some(6));
	assert_eq!(bridge.snapshot().stats.abandoned, 2);
}

#[tokio::test]
async fn accepted_call_outlives_dropped_handles() {
	let host = ManualHost::new("manual");
	let pending = Bridge::new(Double, env(&host)).submit(21);
	assert_eq!(host.registrations(), 1);

	host.pump();
	assert_eq!(pending.await.ok(), Some(42));
	assert_eq!(host.registrations(), 0, "idle bridge unregisters once released");
}

#[tokio::test]
async fn stopped_host_refuses_calls() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host));
	let first = bridge.submit(1);
	host.pump();
	assert_eq!(first.await.ok(), Some(2));

	host.shutdown();
	assert!(bridge.submit(2).await.is_err_and(|err| err.is_abandoned()));

	let fresh = Bridge::new(Double, env(&host));
	assert!(matches!(fresh.submit(1).await, Err(BridgeError::Host(_))));
}

#[tokio::test]
async fn queued_calls_are_abandoned_when_host_stops() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host));
	let a = bridge.submit(1);
	let b = bridge.submit(2);

	assert_eq!(host.shutdown(), 1);
	assert_eq!(bridge.watch().abandon(), 0, "host shutdown already settled both calls");
	assert!(a.await.is_err_and(|err| err.is_abandoned()));
	assert!(b.await.is_err_and(|err| err.is_abandoned()));
	assert_eq!(bridge.snapshot().stats.abandoned, 2);
}

#[tokio::test]
async fn parked_call_resolves_when_host_stops() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host));
	let parked = bridge.submit(1);
	assert_eq!(bridge.state(), BridgeState::Pending);

	host.shutdown();
	let late = bridge.submit(2);
	let parked = tokio::time::timeout(Duration::from_secs(1), parked).await.expect("parked call settles");
	let late = tokio::time::timeout(Duration::from_secs(1), late).await.expect("late call settles");
	assert!(parked.is_err_and(|err| err.is_abandoned()));
	assert!(late.is_err_and(|err| err.is_abandoned()));
	assert_eq!(bridge.state(), BridgeState::Idle);
	assert_eq!(bridge.snapshot().stats.abandoned, 2);
}

#[tokio::test]
async fn enqueue_notices_stopped_host() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, BridgeEnv::current(Arc::new(Silent(host.clone()))).expect("runtime"));
	let parked = bridge.submit(1);

	host.shutdown();
	assert_eq!(bridge.state(), BridgeState::Pending, "silent host left the call parked");
	let late = bridge.submit(2);
	assert_eq!(bridge.state(), BridgeState::Idle);
	assert_eq!(bridge.queued(), 0);
	assert!(parked.await.is_err_and(|err| err.is_abandoned()));
	assert!(late.await.is_err_and(|err| err.is_abandoned()));
}

#[tokio::test]
async fn queued_raise_coalesces_on_live_host() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(Double, env(&host));
	let a = bridge.submit(1);
	let b = bridge.submit(2);
	let stats = host.stats();
	assert_eq!((stats.accepted, stats.coalesced), (1, 1));

	host.pump();
	assert_eq!(a.await.ok(), Some(2));
	assert_eq!(b.await.ok(), Some(4));
}

#[tokio::test]
async fn deferred_handler_settles_off_thread() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(
		from_async_fn("later", |_: &HostContext, x: u32| async move {
			tokio::task::yield_now().await;
			Ok::<_, HandlerError>(x + 1)
		}),
		env(&host),
	);

	let a = bridge.submit(1);
	let b = bridge.submit(10);
	host.pump();
	assert_eq!(bridge.state(), BridgeState::Executing);

	assert_eq!(a.await.ok(), Some(2));
	host.pump();
	assert_eq!(b.await.ok(), Some(11));
}

#[tokio::test]
async fn deferred_panic_is_contained() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(
		from_async_fn("later", |_: &HostContext, fail: bool| async move {
			tokio::task::yield_now().await;
			if fail {
				panic!("inner failure");
			}
			Ok::<_, HandlerError>(())
		}),
		env(&host),
	);

	let pending = bridge.submit(true);
	host.pump();
	let err = pending.await.expect_err("inner panic becomes a failure");
	assert!(err.handler_error().is_some_and(HandlerError::is_panic));
}

#[tokio::test]
async fn abandon_cancels_deferred_computation() {
	let host = ManualHost::new("manual");
	let bridge = Bridge::new(
		from_async_fn("forever", |_: &HostContext, (): ()| std::future::pending::<std::result::Result<(), HandlerError>>()),
		env(&host),
	);

	let pending = bridge.submit(());
	host.pump();
	assert_eq!(bridge.state(), BridgeState::Executing);

	assert_eq!(bridge.abandon(), 0);
	assert!(pending.await.is_err_and(|err| err.is_abandoned()));
	assert_eq!(bridge.state(), BridgeState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deferred_handler_releases_privileged_thread() {
	let host = Arc::new(HostThread::spawn("ferry-release").expect("host thread"));
	let env = BridgeEnv::current(host.clone()).expect("runtime");

	let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
	let rx = Mutex::new(Some(rx));
	let waiter = Bridge::new(
		from_async_fn("waiter", move |ctx: &HostContext, (): ()| {
			let privileged = ctx.is_privileged_thread();
			let rx = rx.lock().take();
			async move {
				let rx = rx.ok_or_else(|| HandlerError::msg("receiver already taken"))?;
				let value = rx.await.map_err(HandlerError::new)?;
				Ok::<_, HandlerError>((privileged, value))
			}
		}),
		env.clone(),
	);

	let tx = Mutex::new(Some(tx));
	let signal = Bridge::new(
		from_fn("signal", move |_: &HostContext, value: u32| {
			let sent = tx.lock().take().is_some_and(|tx| tx.send(value).is_ok());
			Ok::<_, HandlerError>(sent)
		}),
		env,
	);

	let waiting = waiter.submit(());
	let sent = tokio::time::timeout(Duration::from_secs(5), signal.submit(7)).await.expect("privileged thread stayed free");
	assert_eq!(sent.ok(), Some(true));

	let result = tokio::time::timeout(Duration::from_secs(5), waiting).await.expect("waiter settles");
	assert_eq!(result.ok(), Some((true, 7)));
}

#[test]
fn blocking_callers_from_many_threads() {
	let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
	let host = Arc::new(HostThread::spawn("ferry-callers").expect("host thread"));
	let env = BridgeEnv::new(host.clone(), runtime.handle().clone());

	let active = Arc::new(AtomicBool::new(false));
	let overlaps = Arc::new(AtomicUsize::new(0));
	let bridge = Bridge::new(
		from_fn("exclusive", {
			let active = Arc::clone(&active);
			let overlaps = Arc::clone(&overlaps);
			move |_: &HostContext, n: u64| {
				if active.swap(true, Ordering::SeqCst) {
					overlaps.fetch_add(1, Ordering::SeqCst);
				}
				std::thread::yield_now();
				active.store(false, Ordering::SeqCst);
				Ok::<_, HandlerError>(n * 2)
			}
		}),
		env,
	);

	let callers: Vec<_> = (0..8u64)
		.map(|n| {
			let bridge = bridge.clone();
			std::thread::spawn(move || bridge.submit(n).wait())
		})
		.collect();
	for (n, caller) in callers.into_iter().enumerate() {
		let result = caller.join().expect("caller thread");
		assert_eq!(result.ok(), Some(n as u64 * 2));
	}
	assert_eq!(overlaps.load(Ordering::SeqCst), 0);
	assert_eq!(bridge.snapshot().stats.executed, 8);
}

#[test]
fn host_thread_serves_queue_in_submission_order() {
	let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
	let host = Arc::new(HostThread::spawn("ferry-fifo").expect("host thread"));
	let seen = Arc::new(Mutex::new(Vec::new()));
	let (handler, started, gate) = gated(&seen);
	let bridge = Bridge::new(handler, BridgeEnv::new(host.clone(), runtime.handle().clone()));

	let first = bridge.submit(0);
	started.recv_timeout(Duration::from_secs(5)).expect("first call running");
	let queued: Vec<_> = (1..=8u32).map(|n| bridge.submit(n)).collect();
	assert_eq!(bridge.queued(), 8);
	drop(gate);

	assert_eq!(first.wait().ok(), Some(0));
	for (n, pending) in (1..=8u32).zip(queued) {
		assert_eq!(pending.wait().ok(), Some(n * 10));
	}
	assert_eq!(*seen.lock(), (0..=8).collect::<Vec<u32>>());
	assert_eq!(bridge.snapshot().stats.peak_queued, 8);
}

#[test]
fn call_ids_follow_acceptance_order() {
	let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
	let host = Arc::new(HostThread::spawn("ferry-ids").expect("host thread"));
	let seen = Arc::new(Mutex::new(Vec::new()));
	let (handler, started, gate) = gated(&seen);
	let bridge = Bridge::new(handler, BridgeEnv::new(host.clone(), runtime.handle().clone()));

	let first = bridge.submit(0);
	started.recv_timeout(Duration::from_secs(5)).expect("first call running");
	let submitters: Vec<_> = (1..=8u32)
		.map(|n| {
			let bridge = bridge.clone();
			std::thread::spawn(move || {
				let pending = bridge.submit(n);
				(n, pending.call_id().expect("accepted call has an id"), pending)
			})
		})
		.collect();
	let mut accepted: Vec<_> = submitters.into_iter().map(|submitter| submitter.join().expect("submitter thread")).collect();
	drop(gate);

	assert_eq!(first.wait().ok(), Some(0));
	accepted.sort_by_key(|(_, id, _)| *id);
	let by_id: Vec<u32> = accepted.iter().map(|(n, _, _)| *n).collect();
	for (n, _, pending) in accepted {
		assert_eq!(pending.wait().ok(), Some(n * 10));
	}
	assert_eq!(seen.lock()[1..].to_vec(), by_id, "queue order matches id order");
}
