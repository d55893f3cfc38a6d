//! The device object model the frame ring is written against.
//!
//! A backend supplies one concrete type per role. The ring never interprets
//! draw commands; it only resets, closes and submits command lists and talks
//! to the fence.

use std::ptr::NonNull;
use std::time::Duration;

use crate::error::GpuResult;

/// A GPU virtual address as consumed by the device when binding buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

pub trait Device {
    type Queue: Queue<Fence = Self::Fence, CommandList = Self::CommandList>;
    type Fence: Fence;
    type Allocator: CommandAllocator;
    type CommandList: CommandList<Allocator = Self::Allocator>;
    type Buffer: UploadBuffer;

    fn create_command_queue(&self) -> GpuResult<Self::Queue>;

    fn create_command_allocator(&self) -> GpuResult<Self::Allocator>;

    /// Creates a command list bound to `allocator`. The list is returned closed,
    /// so the first frame can reset it like every other frame.
    fn create_command_list(&self, allocator: &Self::Allocator) -> GpuResult<Self::CommandList>;

    fn create_fence(&self, initial_value: u64) -> GpuResult<Self::Fence>;

    /// Allocates a CPU-writable, GPU-readable buffer of `byte_size` bytes.
    fn create_upload_buffer(&self, byte_size: u64, label: &str) -> GpuResult<Self::Buffer>;
}

/// An in-order execution queue.
pub trait Queue {
    type Fence;
    type CommandList;

    fn execute(&self, lists: &[&Self::CommandList]) -> GpuResult<()>;

    /// Enqueues a command that sets `fence` to `value` once everything submitted
    /// before it has finished. Returns without waiting.
    fn signal(&self, fence: &Self::Fence, value: u64) -> GpuResult<()>;
}

/// A monotonic counter written by the GPU and read by the CPU.
pub trait Fence {
    fn completed_value(&self) -> u64;

    /// Blocks until the completed value reaches `value`.
    ///
    /// `None` waits without a deadline. Returns `Ok(false)` when the timeout
    /// expired first.
    fn wait(&self, value: u64, timeout: Option<Duration>) -> GpuResult<bool>;
}

pub trait CommandAllocator {
    /// Reclaims the memory of everything recorded through this allocator.
    /// Only legal once the GPU has finished executing those commands.
    fn reset(&self) -> GpuResult<()>;
}

pub trait CommandList {
    type Allocator;

    fn reset(&mut self, allocator: &Self::Allocator) -> GpuResult<()>;

    fn close(&mut self) -> GpuResult<()>;
}

pub trait UploadBuffer {
    fn byte_size(&self) -> u64;

    /// Maps the whole buffer for CPU writes. The pointer stays valid for
    /// `byte_size` bytes until [`unmap`](UploadBuffer::unmap) is called.
    fn map(&mut self) -> GpuResult<NonNull<u8>>;

    /// Releases the CPU mapping. Calling it on an unmapped buffer does nothing.
    fn unmap(&mut self);

    fn gpu_address(&self) -> GpuAddress;
}
