use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{ErrorKind, GpuError, GpuResult};
use crate::gpu::{Device, Fence, Queue};

/// How long the CPU is willing to block on a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Wait as long as it takes.
    #[default]
    Infinite,
    /// Give up after the duration and report the device as lost.
    Bounded(Duration),
}

impl WaitPolicy {
    pub fn timeout(self) -> Option<Duration> {
        match self {
            WaitPolicy::Infinite => None,
            WaitPolicy::Bounded(timeout) => Some(timeout),
        }
    }
}

/// Enqueues a signal of `value` on `queue`. Returns without waiting.
pub fn signal<Q: Queue>(queue: &Q, fence: &Q::Fence, value: u64) -> GpuResult<()> {
    trace!(value, "Signal");
    queue.signal(fence, value)
}

/// Blocks until `fence` has completed `value`.
///
/// Returns at once when the fence is already there. An expired bounded wait
/// is reported as [`ErrorKind::DeviceLost`].
pub fn wait_until<F: Fence>(fence: &F, value: u64, policy: WaitPolicy) -> GpuResult<()> {
    let completed = fence.completed_value();
    if completed >= value {
        return Ok(());
    }

    debug!(value, completed, "Waiting for the GPU");
    if fence.wait(value, policy.timeout())? {
        return Ok(());
    }
    Err(GpuError::new(ErrorKind::DeviceLost, 0, "wait_until").with_message(format!(
        "fence stuck at {} while waiting for {value} ({policy:?})",
        fence.completed_value()
    )))
}

/// Signals the value after `last_signaled`, then waits for it.
///
/// `last_signaled` is advanced even when the wait fails, so values handed to
/// the queue never repeat.
pub fn flush_all<Q>(
    queue: &Q,
    fence: &Q::Fence,
    last_signaled: &mut u64,
    policy: WaitPolicy,
) -> GpuResult<u64>
where
    Q: Queue,
    Q::Fence: Fence,
{
    *last_signaled += 1;
    let value = *last_signaled;
    signal(queue, fence, value)?;
    wait_until(fence, value, policy)?;
    debug!(value, "Flushed command queue");
    Ok(value)
}

/// A queue together with the fence that tracks it and the last value handed out.
pub struct Timeline<D: Device> {
    queue: D::Queue,
    fence: D::Fence,
    last_signaled: u64,
    policy: WaitPolicy,
}

impl<D: Device> Timeline<D> {
    /// The fence's current completed value becomes the starting point.
    pub fn new(queue: D::Queue, fence: D::Fence, policy: WaitPolicy) -> Self {
        let last_signaled = fence.completed_value();
        Self {
            queue,
            fence,
            last_signaled,
            policy,
        }
    }

    /// Signals a fresh value and returns it.
    pub fn signal_next(&mut self) -> GpuResult<u64> {
        let value = self.last_signaled + 1;
        signal(&self.queue, &self.fence, value)?;
        self.last_signaled = value;
        Ok(value)
    }

    pub fn wait_until(&self, value: u64) -> GpuResult<()> {
        wait_until(&self.fence, value, self.policy)
    }

    /// Waits for everything signaled so far without signaling again.
    pub fn drain(&self) -> GpuResult<()> {
        self.wait_until(self.last_signaled)
    }

    /// Signals a fresh value and waits for it. Afterwards the queue is idle.
    pub fn flush(&mut self) -> GpuResult<u64> {
        flush_all(&self.queue, &self.fence, &mut self.last_signaled, self.policy)
    }

    pub fn is_complete(&self, value: u64) -> bool {
        self.fence.completed_value() >= value
    }

    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub fn queue(&self) -> &D::Queue {
        &self.queue
    }

    pub fn fence(&self) -> &D::Fence {
        &self.fence
    }
}
