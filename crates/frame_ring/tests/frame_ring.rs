use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use frame_ring::gpu::{Device, Fence};
use frame_ring::headless::{CompletionMode, HeadlessCommandList, HeadlessDevice};
use frame_ring::{ErrorKind, FrameRing, WaitPolicy};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn ring<const N: usize>(device: &HeadlessDevice) -> FrameRing<HeadlessDevice, (), N> {
    let queue = device.create_command_queue().unwrap();
    FrameRing::new(device, queue, WaitPolicy::Infinite, |_, _| Ok(())).unwrap()
}

fn command_list<const N: usize>(
    device: &HeadlessDevice,
    ring: &FrameRing<HeadlessDevice, (), N>,
) -> HeadlessCommandList {
    device
        .create_command_list(ring.slots()[0].allocator())
        .unwrap()
}

#[test]
fn ten_frames_with_an_instant_gpu_never_block() {
    init_tracing();
    let device = HeadlessDevice::new();
    let mut ring = ring::<3>(&device);
    let mut list = command_list(&device, &ring);

    let mut slot_zero_markers = Vec::new();
    for _ in 0..10 {
        let index = ring.advance().unwrap();
        ring.record(&mut list).unwrap();
        list.draw(3, 1).unwrap();
        let value = ring.submit(&mut list).unwrap();
        if index == 0 {
            slot_zero_markers.push(value);
        }
    }

    assert_eq!(slot_zero_markers, vec![1, 4, 7, 10]);
    assert_eq!(ring.fence().wait_calls(), 0);
    assert_eq!(ring.fence().blocking_waits(), 0);
    assert_eq!(ring.queue().executed_count(), 10);
}

#[test]
fn markers_increase_strictly_in_every_slot() {
    let device = HeadlessDevice::new();
    let mut ring = ring::<3>(&device);
    let mut list = command_list(&device, &ring);

    let mut history: [Vec<u64>; 3] = Default::default();
    for _ in 0..25 {
        let index = ring.advance().unwrap();
        ring.record(&mut list).unwrap();
        history[index].push(ring.submit(&mut list).unwrap());
    }

    for markers in &history {
        assert!(!markers.is_empty());
        assert!(markers.windows(2).all(|pair| pair[0] < pair[1]), "{markers:?}");
    }
}

#[test]
fn a_slot_is_never_recorded_before_the_gpu_is_done_with_it() {
    let device = HeadlessDevice::with_completion(CompletionMode::Manual);
    let mut ring = ring::<3>(&device);
    let mut list = command_list(&device, &ring);
    let gpu = ring.fence().clone();

    // Keep two frames in flight. With three slots the slot being reused has
    // always just retired, so the ring must not wait.
    for _ in 0..30 {
        let pending = gpu.pending();
        if pending.len() >= 3 {
            gpu.complete_to(pending[pending.len() - 3]);
        }

        let index = ring.advance().unwrap();
        let marker = ring.slots()[index].marker_value();
        assert!(gpu.completed_value() >= marker);
        ring.record(&mut list).unwrap();
        ring.submit(&mut list).unwrap();
    }
    assert_eq!(gpu.wait_calls(), 0);

    gpu.complete_to(ring.timeline().last_signaled());
}

#[test]
fn reusing_an_unfinished_slot_blocks_until_the_gpu_catches_up() {
    init_tracing();
    let device = HeadlessDevice::with_completion(CompletionMode::Manual);
    let mut ring = ring::<3>(&device);
    let mut list = command_list(&device, &ring);

    for _ in 0..3 {
        ring.advance().unwrap();
        ring.record(&mut list).unwrap();
        ring.submit(&mut list).unwrap();
    }
    assert_eq!(ring.fence().pending(), vec![1, 2, 3]);

    let released = Arc::new(AtomicBool::new(false));
    let gpu = ring.fence().clone();
    let worker = {
        let released = released.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            gpu.complete_to(1);
        })
    };

    assert_eq!(ring.advance().unwrap(), 0);
    assert!(released.load(Ordering::SeqCst));
    worker.join().unwrap();

    assert_eq!(ring.fence().blocking_waits(), 1);
    assert_eq!(ring.fence().completed_value(), 1);

    // Slot 1 is still in flight, but recording into slot 0 is fine now.
    ring.record(&mut list).unwrap();
    assert_eq!(ring.submit(&mut list).unwrap(), 4);

    ring.fence().complete_to(4);
}

#[test]
fn bounded_wait_on_a_stalled_gpu_reports_device_lost() {
    let device = HeadlessDevice::with_completion(CompletionMode::Manual);
    let queue = device.create_command_queue().unwrap();
    let mut ring: FrameRing<_, (), 1> = FrameRing::new(
        &device,
        queue,
        WaitPolicy::Bounded(Duration::from_millis(20)),
        |_, _| Ok(()),
    )
    .unwrap();
    let mut list = command_list(&device, &ring);

    ring.advance().unwrap();
    ring.record(&mut list).unwrap();
    ring.submit(&mut list).unwrap();

    let error = ring.advance().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DeviceLost);

    ring.fence().complete_to(1);
}

#[test]
fn dropping_the_ring_drains_in_flight_frames() {
    let device = HeadlessDevice::with_completion(CompletionMode::Manual);
    let mut ring = ring::<3>(&device);
    let mut list = command_list(&device, &ring);
    for _ in 0..3 {
        ring.advance().unwrap();
        ring.record(&mut list).unwrap();
        ring.submit(&mut list).unwrap();
    }

    let gpu = ring.fence().clone();
    let worker = {
        let gpu = gpu.clone();
        thread::spawn(move || {
            while gpu.retire_pending().is_some() {
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    drop(ring);
    assert_eq!(gpu.completed_value(), 3);
    worker.join().unwrap();
}
