use crate::BridgeError;

/// What a bridge does with a call that arrives while another is in flight.
///
/// The host's raise primitive coalesces duplicate raises, so the in-flight
/// slot is never overwritten; the policy only decides the newcomer's fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
	/// Wait in a FIFO queue, optionally bounded.
	Queue {
		/// Maximum number of waiting calls; `None` is unbounded.
		max_queued: Option<usize>,
	},
	/// Fail the newcomer immediately with [`BridgeError::Busy`].
	Reject,
}

impl Default for BusyPolicy {
	fn default() -> Self {
		Self::Queue { max_queued: None }
	}
}

/// Decision for one call arriving at a busy bridge.
#[derive(Debug)]
pub(crate) enum Admission {
	Enqueue,
	Refuse(BridgeError),
}

impl BusyPolicy {
	/// Unbounded FIFO queue.
	pub const fn queue() -> Self {
		Self::Queue { max_queued: None }
	}

	/// FIFO queue holding at most `limit` waiting calls.
	pub const fn bounded(limit: usize) -> Self {
		Self::Queue { max_queued: Some(limit) }
	}

	pub(crate) fn admit(&self, bridge: &str, queued: usize) -> Admission {
		match *self {
			Self::Queue { max_queued: None } => Admission::Enqueue,
			Self::Queue { max_queued: Some(limit) } if queued < limit => Admission::Enqueue,
			Self::Queue { max_queued: Some(limit) } => Admission::Refuse(BridgeError::QueueFull {
				name: bridge.to_string(),
				limit,
			}),
			Self::Reject => Admission::Refuse(BridgeError::Busy(bridge.to_string())),
		}
	}
}
