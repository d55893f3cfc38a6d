//! A software backend with no GPU behind it.
//!
//! Command lists record opaque commands, queues log what they execute, and
//! fences are plain counters. Completion is either immediate (a GPU that takes
//! zero time) or driven by hand, which lets tests hold the "GPU" behind the CPU
//! and watch the frame ring block.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{ErrorKind, GpuError, GpuResult};
use crate::gpu::{self, GpuAddress};

/// How a [`HeadlessQueue`] retires the values it signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// The fence reaches a signaled value as soon as it is enqueued.
    #[default]
    Immediate,
    /// Signaled values stay pending until [`HeadlessFence::complete_to`] or
    /// [`HeadlessFence::retire_pending`] is called.
    Manual,
}

#[derive(Debug, Default)]
struct DeviceStats {
    live_buffers: AtomicUsize,
    live_mappings: AtomicUsize,
    next_allocator: AtomicUsize,
    next_address: AtomicU64,
}

/// How many executed lists and signaled values queues and fences remember.
/// Older entries are only counted.
pub const HISTORY_LIMIT: usize = 64;

#[derive(Debug)]
struct History<T> {
    total: usize,
    recent: VecDeque<T>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self {
            total: 0,
            recent: VecDeque::new(),
        }
    }
}

impl<T: Clone> History<T> {
    fn push(&mut self, entry: T) {
        if self.recent.len() == HISTORY_LIMIT {
            self.recent.pop_front();
        }
        self.recent.push_back(entry);
        self.total += 1;
    }

    fn recent(&self) -> Vec<T> {
        self.recent.iter().cloned().collect()
    }
}

const ADDRESS_BASE: u64 = 0x0001_0000_0000;
const ADDRESS_ALIGNMENT: u64 = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct HeadlessDevice {
    stats: Arc<DeviceStats>,
    mode: CompletionMode,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(mode: CompletionMode) -> Self {
        Self {
            stats: Arc::default(),
            mode,
        }
    }

    /// Upload buffers created by this device that have not been dropped.
    pub fn live_buffers(&self) -> usize {
        self.stats.live_buffers.load(Ordering::SeqCst)
    }

    /// Upload buffers currently mapped for CPU writes.
    pub fn live_mappings(&self) -> usize {
        self.stats.live_mappings.load(Ordering::SeqCst)
    }
}

impl gpu::Device for HeadlessDevice {
    type Queue = HeadlessQueue;
    type Fence = HeadlessFence;
    type Allocator = HeadlessAllocator;
    type CommandList = HeadlessCommandList;
    type Buffer = HeadlessBuffer;

    fn create_command_queue(&self) -> GpuResult<HeadlessQueue> {
        Ok(HeadlessQueue {
            mode: self.mode,
            executed: Mutex::default(),
        })
    }

    fn create_command_allocator(&self) -> GpuResult<HeadlessAllocator> {
        let id = self.stats.next_allocator.fetch_add(1, Ordering::SeqCst);
        Ok(HeadlessAllocator {
            id,
            resets: AtomicUsize::new(0),
        })
    }

    fn create_command_list(&self, allocator: &HeadlessAllocator) -> GpuResult<HeadlessCommandList> {
        Ok(HeadlessCommandList {
            allocator: allocator.id,
            open: false,
            commands: Vec::new(),
        })
    }

    fn create_fence(&self, initial_value: u64) -> GpuResult<HeadlessFence> {
        Ok(HeadlessFence::new(initial_value))
    }

    fn create_upload_buffer(&self, byte_size: u64, label: &str) -> GpuResult<HeadlessBuffer> {
        let len = usize::try_from(byte_size).map_err(|_| {
            GpuError::new(ErrorKind::ResourceCreation, 0, "create_upload_buffer")
                .with_message(format!("{byte_size} bytes do not fit the address space"))
        })?;
        let span = byte_size.div_ceil(ADDRESS_ALIGNMENT).max(1) * ADDRESS_ALIGNMENT;
        let offset = self.stats.next_address.fetch_add(span, Ordering::SeqCst);
        self.stats.live_buffers.fetch_add(1, Ordering::SeqCst);
        trace!(label, byte_size, "Created headless upload buffer");
        Ok(HeadlessBuffer {
            bytes: vec![0; len].into_boxed_slice(),
            address: GpuAddress(ADDRESS_BASE + offset),
            mapped: false,
            stats: self.stats.clone(),
        })
    }
}

/// A command recorded into a [`HeadlessCommandList`]. The backend never
/// interprets these; they are kept so tests can see what a frame recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BindConstants { slot: u32, address: GpuAddress },
    BindVertices { address: GpuAddress, stride: u32, count: u32 },
    Draw { vertex_count: u32, instance_count: u32 },
    Marker(String),
}

/// One command list as the queue saw it at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedList {
    pub allocator: usize,
    pub commands: Vec<Command>,
}

#[derive(Debug)]
pub struct HeadlessQueue {
    mode: CompletionMode,
    executed: Mutex<History<ExecutedList>>,
}

impl HeadlessQueue {
    /// The last [`HISTORY_LIMIT`] lists executed, oldest first.
    pub fn executed(&self) -> Vec<ExecutedList> {
        lock(&self.executed).recent()
    }

    /// Lists executed over the queue's lifetime.
    pub fn executed_count(&self) -> usize {
        lock(&self.executed).total
    }
}

impl gpu::Queue for HeadlessQueue {
    type Fence = HeadlessFence;
    type CommandList = HeadlessCommandList;

    fn execute(&self, lists: &[&HeadlessCommandList]) -> GpuResult<()> {
        let mut executed = lock(&self.executed);
        for list in lists {
            if list.open {
                return Err(GpuError::new(ErrorKind::Usage, 0, "ExecuteCommandLists")
                    .with_message("command list is still open"));
            }
            executed.push(ExecutedList {
                allocator: list.allocator,
                commands: list.commands.clone(),
            });
        }
        Ok(())
    }

    fn signal(&self, fence: &HeadlessFence, value: u64) -> GpuResult<()> {
        fence.record_signal(value);
        match self.mode {
            CompletionMode::Immediate => fence.complete_to(value),
            CompletionMode::Manual => fence.push_pending(value),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FenceState {
    completed: u64,
    pending: VecDeque<u64>,
    signaled: History<u64>,
}

#[derive(Debug, Default)]
struct FenceShared {
    state: Mutex<FenceState>,
    reached: Condvar,
    wait_calls: AtomicUsize,
    blocking_waits: AtomicUsize,
}

/// A counter shared between the CPU side and whoever plays the GPU.
/// Clones observe and drive the same fence, so one can be handed to another
/// thread.
#[derive(Debug, Clone)]
pub struct HeadlessFence {
    shared: Arc<FenceShared>,
}

impl HeadlessFence {
    pub fn new(initial_value: u64) -> Self {
        let shared = FenceShared::default();
        lock(&shared.state).completed = initial_value;
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Moves the completed value up to `value` and wakes any waiter.
    /// Values at or below the current one are ignored.
    pub fn complete_to(&self, value: u64) {
        let mut state = lock(&self.shared.state);
        if value > state.completed {
            state.completed = value;
        }
        let completed = state.completed;
        state.pending.retain(|&pending| pending > completed);
        drop(state);
        self.shared.reached.notify_all();
    }

    /// Completes the oldest pending signal, returning its value.
    pub fn retire_pending(&self) -> Option<u64> {
        let next = lock(&self.shared.state).pending.front().copied();
        if let Some(value) = next {
            self.complete_to(value);
        }
        next
    }

    /// Signaled values that have not completed yet, oldest first.
    pub fn pending(&self) -> Vec<u64> {
        lock(&self.shared.state).pending.iter().copied().collect()
    }

    /// The last [`HISTORY_LIMIT`] values signaled on this fence, in signal
    /// order.
    pub fn signaled(&self) -> Vec<u64> {
        lock(&self.shared.state).signaled.recent()
    }

    /// Signals over the fence's lifetime.
    pub fn signal_count(&self) -> usize {
        lock(&self.shared.state).signaled.total
    }

    /// Number of calls to [`gpu::Fence::wait`].
    pub fn wait_calls(&self) -> usize {
        self.shared.wait_calls.load(Ordering::SeqCst)
    }

    /// Number of waits that found the fence behind and had to sleep.
    pub fn blocking_waits(&self) -> usize {
        self.shared.blocking_waits.load(Ordering::SeqCst)
    }

    fn record_signal(&self, value: u64) {
        lock(&self.shared.state).signaled.push(value);
    }

    fn push_pending(&self, value: u64) {
        lock(&self.shared.state).pending.push_back(value);
    }
}

impl gpu::Fence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        lock(&self.shared.state).completed
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> GpuResult<bool> {
        self.shared.wait_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.shared.state);
        if state.completed >= value {
            return Ok(true);
        }
        self.shared.blocking_waits.fetch_add(1, Ordering::SeqCst);

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        while state.completed < value {
            state = match deadline {
                None => self
                    .shared
                    .reached
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.shared
                        .reached
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
        Ok(true)
    }
}

#[derive(Debug)]
pub struct HeadlessAllocator {
    id: usize,
    resets: AtomicUsize,
}

impl HeadlessAllocator {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl gpu::CommandAllocator for HeadlessAllocator {
    fn reset(&self) -> GpuResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
pub struct HeadlessCommandList {
    allocator: usize,
    open: bool,
    commands: Vec<Command>,
}

impl HeadlessCommandList {
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The allocator the list was last reset against.
    pub fn allocator(&self) -> usize {
        self.allocator
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn bind_constants(&mut self, slot: u32, address: GpuAddress) -> GpuResult<()> {
        self.push(Command::BindConstants { slot, address })
    }

    pub fn bind_vertices(&mut self, address: GpuAddress, stride: u32, count: u32) -> GpuResult<()> {
        self.push(Command::BindVertices {
            address,
            stride,
            count,
        })
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> GpuResult<()> {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
        })
    }

    pub fn marker(&mut self, label: impl Into<String>) -> GpuResult<()> {
        self.push(Command::Marker(label.into()))
    }

    fn push(&mut self, command: Command) -> GpuResult<()> {
        if !self.open {
            return Err(GpuError::new(ErrorKind::Usage, 0, "record")
                .with_message("command list is closed"));
        }
        self.commands.push(command);
        Ok(())
    }
}

impl gpu::CommandList for HeadlessCommandList {
    type Allocator = HeadlessAllocator;

    fn reset(&mut self, allocator: &HeadlessAllocator) -> GpuResult<()> {
        if self.open {
            return Err(GpuError::new(ErrorKind::Usage, 0, "CommandList::reset")
                .with_message("command list is still open"));
        }
        self.allocator = allocator.id;
        self.commands.clear();
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> GpuResult<()> {
        if !self.open {
            return Err(GpuError::new(ErrorKind::Usage, 0, "CommandList::close")
                .with_message("command list is already closed"));
        }
        self.open = false;
        Ok(())
    }
}

/// Zero-initialised host memory standing in for an upload heap allocation.
#[derive(Debug)]
pub struct HeadlessBuffer {
    bytes: Box<[u8]>,
    address: GpuAddress,
    mapped: bool,
    stats: Arc<DeviceStats>,
}

impl HeadlessBuffer {
    /// A copy of the buffer's current contents.
    pub fn read(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

impl gpu::UploadBuffer for HeadlessBuffer {
    fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn map(&mut self) -> GpuResult<NonNull<u8>> {
        if !self.mapped {
            self.mapped = true;
            self.stats.live_mappings.fetch_add(1, Ordering::SeqCst);
        }
        NonNull::new(self.bytes.as_mut_ptr()).ok_or_else(|| {
            GpuError::new(ErrorKind::Mapping, 0, "Map").with_message("null host allocation")
        })
    }

    fn unmap(&mut self) {
        if self.mapped {
            self.mapped = false;
            self.stats.live_mappings.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn gpu_address(&self) -> GpuAddress {
        self.address
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        gpu::UploadBuffer::unmap(self);
        self.stats.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{CommandList as _, Device as _, Fence as _, Queue as _, UploadBuffer as _};

    #[test]
    fn immediate_queue_completes_on_signal() {
        let device = HeadlessDevice::new();
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        queue.signal(&fence, 3).unwrap();
        assert_eq!(fence.completed_value(), 3);
        assert!(fence.pending().is_empty());
    }

    #[test]
    fn manual_queue_holds_signals_until_retired() {
        let device = HeadlessDevice::with_completion(CompletionMode::Manual);
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        queue.signal(&fence, 1).unwrap();
        queue.signal(&fence, 2).unwrap();
        assert_eq!(fence.completed_value(), 0);
        assert_eq!(fence.pending(), vec![1, 2]);

        assert_eq!(fence.retire_pending(), Some(1));
        assert_eq!(fence.completed_value(), 1);
        fence.complete_to(2);
        assert_eq!(fence.retire_pending(), None);
        assert_eq!(fence.signaled(), vec![1, 2]);
    }

    #[test]
    fn long_runs_keep_only_recent_history() {
        let device = HeadlessDevice::new();
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();

        let runs = HISTORY_LIMIT * 3 + 5;
        for value in 1..=runs as u64 {
            list.reset(&allocator).unwrap();
            list.marker(format!("frame {value}")).unwrap();
            list.close().unwrap();
            queue.execute(&[&list]).unwrap();
            queue.signal(&fence, value).unwrap();
        }

        assert_eq!(queue.executed_count(), runs);
        let executed = queue.executed();
        assert_eq!(executed.len(), HISTORY_LIMIT);
        assert_eq!(
            executed.last().map(|list| list.commands.clone()),
            Some(vec![Command::Marker(format!("frame {runs}"))])
        );

        assert_eq!(fence.signal_count(), runs);
        let signaled = fence.signaled();
        assert_eq!(signaled.len(), HISTORY_LIMIT);
        assert_eq!(signaled.first(), Some(&((runs - HISTORY_LIMIT + 1) as u64)));
        assert_eq!(signaled.last(), Some(&(runs as u64)));
    }

    #[test]
    fn bounded_wait_times_out_on_a_stalled_fence() {
        let fence = HeadlessFence::new(0);
        let reached = fence.wait(1, Some(Duration::from_millis(10))).unwrap();
        assert!(!reached);
        assert_eq!(fence.blocking_waits(), 1);
    }

    #[test]
    fn wait_wakes_when_another_thread_completes() {
        let fence = HeadlessFence::new(0);
        let gpu = fence.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            gpu.complete_to(5);
        });
        assert!(fence.wait(5, None).unwrap());
        worker.join().unwrap();
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    fn command_list_state_is_enforced() {
        let device = HeadlessDevice::new();
        let queue = device.create_command_queue().unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();

        assert_eq!(list.draw(3, 1).unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(list.close().unwrap_err().kind(), ErrorKind::Usage);

        list.reset(&allocator).unwrap();
        list.draw(3, 1).unwrap();
        assert_eq!(list.reset(&allocator).unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(queue.execute(&[&list]).unwrap_err().kind(), ErrorKind::Usage);

        list.close().unwrap();
        queue.execute(&[&list]).unwrap();
        assert_eq!(
            queue.executed()[0].commands,
            vec![Command::Draw {
                vertex_count: 3,
                instance_count: 1
            }]
        );
    }

    #[test]
    fn buffers_get_distinct_addresses() {
        let device = HeadlessDevice::new();
        let a = device.create_upload_buffer(10, "a").unwrap();
        let b = device.create_upload_buffer(10, "b").unwrap();
        assert_ne!(a.gpu_address(), b.gpu_address());
        assert!(b.gpu_address().0 >= a.gpu_address().0 + a.byte_size());
        assert_eq!(device.live_buffers(), 2);
        drop(a);
        assert_eq!(device.live_buffers(), 1);
    }
}
