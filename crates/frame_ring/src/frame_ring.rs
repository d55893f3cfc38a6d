use tracing::{debug, info, trace, warn};

use crate::error::{ErrorKind, GpuError, GpuResult};
use crate::frame_slot::FrameSlot;
use crate::gpu::{CommandAllocator, CommandList, Device, Queue};
use crate::timeline::{Timeline, WaitPolicy};

/// Frames the CPU may queue ahead of the GPU.
pub const DEFAULT_FRAME_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Between a submit and the next advance.
    Idle,
    /// The current slot is safe to reuse but nothing is being recorded.
    Advanced,
    /// The command list is open against the current slot's allocator.
    Recording,
}

/// A fixed ring of [`FrameSlot`]s that lets the CPU record frame `n + 1` while
/// the GPU is still executing frame `n`.
///
/// Each frame goes through [`advance`](FrameRing::advance),
/// [`record`](FrameRing::record) and [`submit`](FrameRing::submit), or all
/// three at once through [`render_frame`](FrameRing::render_frame). The only
/// blocking point is `advance`, which waits when the slot it lands on still
/// has work in flight.
///
/// With `N == 1` every frame waits for the previous one, which is the same as
/// flushing the queue after each submit.
pub struct FrameRing<D: Device, R, const N: usize = DEFAULT_FRAME_COUNT> {
    slots: [FrameSlot<D, R>; N],
    index: usize,
    phase: Phase,
    timeline: Timeline<D>,
}

impl<D: Device, R, const N: usize> FrameRing<D, R, N> {
    /// Creates every slot up front. `build` is called once per slot index to
    /// allocate that slot's upload regions.
    pub fn new<F>(device: &D, queue: D::Queue, policy: WaitPolicy, mut build: F) -> GpuResult<Self>
    where
        F: FnMut(&D, usize) -> GpuResult<R>,
    {
        if N == 0 {
            return Err(GpuError::new(ErrorKind::InvalidArgument, 0, "FrameRing::new")
                .with_message("a frame ring needs at least one slot"));
        }

        let fence = device.create_fence(0)?;
        let slots = array_init::try_array_init(|index| -> GpuResult<FrameSlot<D, R>> {
            let regions = build(device, index)?;
            FrameSlot::new(device, regions)
        })?;
        info!(frame_count = N, ?policy, "Created frame ring");

        Ok(Self {
            slots,
            // The first advance lands on slot 0.
            index: N - 1,
            phase: Phase::Idle,
            timeline: Timeline::new(queue, fence, policy),
        })
    }

    /// Moves to the next slot and blocks until the GPU has finished the work
    /// that slot last submitted. Returns the new slot index.
    pub fn advance(&mut self) -> GpuResult<usize> {
        if self.phase == Phase::Recording {
            return Err(GpuError::new(ErrorKind::Usage, 0, "FrameRing::advance")
                .with_message("the current frame was recorded but never submitted"));
        }

        self.index = (self.index + 1) % N;
        let marker = self.slots[self.index].marker_value();
        if marker != 0 && !self.timeline.is_complete(marker) {
            debug!(slot = self.index, marker, "Frame slot still in flight");
            self.timeline.wait_until(marker)?;
        }
        trace!(slot = self.index, marker, "Advanced frame ring");

        self.phase = Phase::Advanced;
        Ok(self.index)
    }

    /// Resets the current slot's allocator and opens `list` against it.
    pub fn record(&mut self, list: &mut D::CommandList) -> GpuResult<()> {
        if self.phase != Phase::Advanced {
            return Err(GpuError::new(ErrorKind::Usage, 0, "FrameRing::record")
                .with_message("advance the ring before recording a frame"));
        }

        let slot = &self.slots[self.index];
        slot.allocator().reset()?;
        list.reset(slot.allocator())?;
        self.phase = Phase::Recording;
        Ok(())
    }

    /// Closes and executes `list`, then signals the fence and stamps the value
    /// into the current slot. Returns the stamped value.
    ///
    /// If closing or executing fails the frame is abandoned, so the ring can
    /// be advanced again once the caller has dealt with the error.
    pub fn submit(&mut self, list: &mut D::CommandList) -> GpuResult<u64> {
        if self.phase != Phase::Recording {
            return Err(GpuError::new(ErrorKind::Usage, 0, "FrameRing::submit")
                .with_message("nothing has been recorded for the current frame"));
        }

        if let Err(error) = list.close() {
            self.abandon(list);
            return Err(error);
        }
        if let Err(error) = self.timeline.queue().execute(&[&*list]) {
            self.phase = Phase::Advanced;
            return Err(error);
        }
        // The list is in flight from here on; a failed signal leaves the old
        // marker in place and is fatal for the device.
        self.phase = Phase::Idle;
        let value = self.timeline.signal_next()?;
        self.slots[self.index].set_marker_value(value);
        trace!(slot = self.index, value, "Submitted frame");
        Ok(value)
    }

    /// Runs one whole frame: advance, record, `f`, submit.
    ///
    /// `f` receives the current slot's regions, the open command list and the
    /// slot index. When `f` fails the frame is abandoned and its error is
    /// returned unchanged.
    pub fn render_frame<T, F>(&mut self, list: &mut D::CommandList, f: F) -> GpuResult<T>
    where
        F: FnOnce(&mut R, &mut D::CommandList, usize) -> GpuResult<T>,
    {
        let index = self.advance()?;
        self.record(list)?;
        let output = match f(self.slots[index].regions_mut(), list, index) {
            Ok(output) => output,
            Err(error) => {
                self.abandon(list);
                return Err(error);
            }
        };
        self.submit(list)?;
        Ok(output)
    }

    /// Drops the frame being recorded without executing it. `list` is closed
    /// and the current slot can be recorded again, or the ring advanced.
    /// Does nothing unless a frame is being recorded.
    pub fn abandon(&mut self, list: &mut D::CommandList) {
        if self.phase != Phase::Recording {
            return;
        }
        if let Err(error) = list.close() {
            debug!(%error, "Abandoned command list did not close cleanly");
        }
        self.phase = Phase::Advanced;
        warn!(slot = self.index, "Abandoned frame");
    }

    /// Signals a fresh value and waits for it, leaving the queue idle.
    /// Required before releasing or replacing anything in-flight frames may
    /// still reference.
    pub fn flush(&mut self) -> GpuResult<u64> {
        self.timeline.flush()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &FrameSlot<D, R> {
        &self.slots[self.index]
    }

    pub fn slots(&self) -> &[FrameSlot<D, R>; N] {
        &self.slots
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_recording(&self) -> bool {
        self.phase == Phase::Recording
    }

    pub fn queue(&self) -> &D::Queue {
        self.timeline.queue()
    }

    pub fn fence(&self) -> &D::Fence {
        self.timeline.fence()
    }

    pub fn timeline(&self) -> &Timeline<D> {
        &self.timeline
    }
}

impl<D: Device, R, const N: usize> Drop for FrameRing<D, R, N> {
    fn drop(&mut self) {
        if let Err(error) = self.timeline.drain() {
            warn!(%error, "Frame ring dropped while the GPU was still busy");
        }
    }
}
