//! The platform-independent half of a sample's main loop.
//!
//! A platform layer (a Win32 window, or nothing at all when headless) turns
//! its messages into [`AppEvent`]s and calls [`RunLoop::frame`] whenever it is
//! idle. The run loop owns the [`Clock`], decides when the app is paused and
//! drives the [`Scene`].

use std::time::Duration;

use tracing::{debug, info};

use crate::clock::{Clock, MonotonicTicks, TickSource};
use crate::error::GpuResult;

/// How long the platform layer should sleep between frames while paused.
pub const PAUSED_SLEEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTime {
    /// Seconds since the previous frame.
    pub delta: f32,
    /// Seconds the app has been running, excluding pauses.
    pub total: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseButtons {
    pub left: bool,
    pub right: bool,
    pub middle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEvent {
    Down { button: MouseButton, x: i32, y: i32 },
    Up { button: MouseButton, x: i32, y: i32 },
    Move { held: MouseButtons, x: i32, y: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    F2,
    /// A number row key, `0` to `9`.
    Digit(u8),
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    Minimized,
    Maximized,
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    Activated,
    Deactivated,
    Resized { width: u32, height: u32, kind: SizeKind },
    EnterSizeMove,
    ExitSizeMove,
    Mouse(MouseEvent),
    KeyUp(Key),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub fps: f32,
    pub ms_per_frame: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Update and draw ran. `stats` is set once per second of running time.
    Rendered { stats: Option<FrameStats> },
    /// Nothing ran; the caller should sleep for [`PAUSED_SLEEP`].
    Paused,
}

/// What a sample implements to be driven by a [`RunLoop`].
pub trait Scene {
    fn update(&mut self, time: FrameTime) -> GpuResult<()>;

    fn draw(&mut self, time: FrameTime) -> GpuResult<()>;

    /// Called whenever the client area changes size and is not minimised.
    /// Implementations must flush in-flight frames before replacing anything
    /// those frames reference.
    fn on_resize(&mut self, width: u32, height: u32) -> GpuResult<()>;

    fn on_mouse(&mut self, _event: MouseEvent) {}

    /// Scenes that swap GPU-visible resources in response must flush first,
    /// as in [`Scene::on_resize`].
    fn on_key(&mut self, _key: Key) -> GpuResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StatsWindow {
    frames: u32,
    window_start: f32,
}

impl StatsWindow {
    fn record(&mut self, total: f32) -> Option<FrameStats> {
        self.frames += 1;
        if total - self.window_start < 1.0 {
            return None;
        }
        let fps = self.frames as f32;
        self.frames = 0;
        self.window_start += 1.0;
        Some(FrameStats {
            fps,
            ms_per_frame: 1000.0 / fps,
        })
    }
}

pub struct RunLoop<S, T = MonotonicTicks> {
    scene: S,
    clock: Clock<T>,
    stats: StatsWindow,
    width: u32,
    height: u32,
    paused: bool,
    minimized: bool,
    maximized: bool,
    resizing: bool,
}

impl<S: Scene> RunLoop<S> {
    pub fn new(scene: S, width: u32, height: u32) -> Self {
        Self::with_clock(scene, Clock::new(), width, height)
    }
}

impl<S: Scene, T: TickSource> RunLoop<S, T> {
    pub fn with_clock(scene: S, clock: Clock<T>, width: u32, height: u32) -> Self {
        Self {
            scene,
            clock,
            stats: StatsWindow::default(),
            width,
            height,
            paused: false,
            minimized: false,
            maximized: false,
            resizing: false,
        }
    }

    /// Resets the clock. Call once, right before the first frame.
    pub fn begin(&mut self) {
        self.clock.reset();
        self.stats = StatsWindow::default();
    }

    /// Ticks the clock and, unless paused, updates and draws the scene.
    pub fn frame(&mut self) -> GpuResult<FrameOutcome> {
        self.clock.tick();
        if self.paused {
            return Ok(FrameOutcome::Paused);
        }

        let time = self.frame_time();
        let stats = self.stats.record(time.total);
        if let Some(stats) = stats {
            info!(
                fps = stats.fps,
                ms_per_frame = stats.ms_per_frame,
                "Frame statistics"
            );
        }

        self.scene.update(time)?;
        self.scene.draw(time)?;
        Ok(FrameOutcome::Rendered { stats })
    }

    /// Applies one window event. Resizes are forwarded to the scene here, so
    /// this fails whenever [`Scene::on_resize`] does.
    pub fn handle_event(&mut self, event: AppEvent) -> GpuResult<ControlFlow> {
        match event {
            AppEvent::Activated => {
                self.paused = false;
                self.clock.start();
            }
            AppEvent::Deactivated => {
                self.paused = true;
                self.clock.stop();
            }
            AppEvent::Resized {
                width,
                height,
                kind,
            } => {
                self.width = width;
                self.height = height;
                self.apply_size(kind)?;
            }
            AppEvent::EnterSizeMove => {
                self.paused = true;
                self.resizing = true;
                self.clock.stop();
            }
            AppEvent::ExitSizeMove => {
                self.paused = false;
                self.resizing = false;
                self.clock.start();
                self.resize()?;
            }
            AppEvent::Mouse(mouse) => self.scene.on_mouse(mouse),
            AppEvent::KeyUp(Key::Escape) | AppEvent::Quit => return Ok(ControlFlow::Exit),
            AppEvent::KeyUp(key) => self.scene.on_key(key)?,
        }
        Ok(ControlFlow::Continue)
    }

    fn apply_size(&mut self, kind: SizeKind) -> GpuResult<()> {
        match kind {
            SizeKind::Minimized => {
                self.paused = true;
                self.minimized = true;
                self.maximized = false;
                Ok(())
            }
            SizeKind::Maximized => {
                self.paused = false;
                self.minimized = false;
                self.maximized = true;
                self.resize()
            }
            SizeKind::Restored if self.minimized => {
                self.paused = false;
                self.minimized = false;
                self.resize()
            }
            SizeKind::Restored if self.maximized => {
                self.paused = false;
                self.maximized = false;
                self.resize()
            }
            // The drag reports a stream of sizes; resize once when it ends.
            SizeKind::Restored if self.resizing => Ok(()),
            SizeKind::Restored => self.resize(),
        }
    }

    fn resize(&mut self) -> GpuResult<()> {
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }
        debug!(width = self.width, height = self.height, "Resizing scene");
        self.scene.on_resize(self.width, self.height)
    }

    pub fn frame_time(&self) -> FrameTime {
        FrameTime {
            delta: self.clock.delta_time(),
            total: self.clock.total_time(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn client_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn clock(&self) -> &Clock<T> {
        &self.clock
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn into_scene(self) -> S {
        self.scene
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTicks;
    use crate::error::{ErrorKind, GpuError};

    #[derive(Debug, Default)]
    struct Recorder {
        updates: Vec<FrameTime>,
        draws: usize,
        resizes: Vec<(u32, u32)>,
        keys: Vec<Key>,
    }

    impl Scene for Recorder {
        fn update(&mut self, time: FrameTime) -> GpuResult<()> {
            self.updates.push(time);
            Ok(())
        }

        fn draw(&mut self, _time: FrameTime) -> GpuResult<()> {
            self.draws += 1;
            Ok(())
        }

        fn on_resize(&mut self, width: u32, height: u32) -> GpuResult<()> {
            self.resizes.push((width, height));
            Ok(())
        }

        fn on_key(&mut self, key: Key) -> GpuResult<()> {
            if key == Key::Digit(0) {
                return Err(GpuError::new(ErrorKind::DeviceLost, 0, "on_key"));
            }
            self.keys.push(key);
            Ok(())
        }
    }

    fn run_loop() -> (ManualTicks, RunLoop<Recorder, ManualTicks>) {
        let ticks = ManualTicks::new(1_000);
        let mut run_loop =
            RunLoop::with_clock(Recorder::default(), Clock::with_source(ticks.clone()), 800, 600);
        run_loop.begin();
        (ticks, run_loop)
    }

    fn resized(width: u32, height: u32, kind: SizeKind) -> AppEvent {
        AppEvent::Resized {
            width,
            height,
            kind,
        }
    }

    #[test]
    fn deactivation_pauses_and_freezes_time() {
        let (ticks, mut run_loop) = run_loop();
        ticks.advance(10);
        run_loop.frame().unwrap();

        run_loop.handle_event(AppEvent::Deactivated).unwrap();
        ticks.advance(500);
        assert_eq!(run_loop.frame().unwrap(), FrameOutcome::Paused);

        run_loop.handle_event(AppEvent::Activated).unwrap();
        ticks.advance(10);
        run_loop.frame().unwrap();

        let scene = run_loop.scene();
        assert_eq!(scene.draws, 2);
        assert!((scene.updates[1].total - 0.020).abs() < 1e-6);
        assert!((scene.updates[1].delta - 0.010).abs() < 1e-6);
    }

    #[test]
    fn minimise_and_restore() {
        let (_ticks, mut run_loop) = run_loop();
        run_loop
            .handle_event(resized(0, 0, SizeKind::Minimized))
            .unwrap();
        assert!(run_loop.is_paused());
        assert_eq!(run_loop.frame().unwrap(), FrameOutcome::Paused);

        run_loop
            .handle_event(resized(800, 600, SizeKind::Restored))
            .unwrap();
        assert!(!run_loop.is_paused());
        assert_eq!(run_loop.scene().resizes, vec![(800, 600)]);
    }

    #[test]
    fn interactive_resize_resizes_once_at_the_end() {
        let (_ticks, mut run_loop) = run_loop();
        run_loop.handle_event(AppEvent::EnterSizeMove).unwrap();
        for width in [810, 820, 830] {
            run_loop
                .handle_event(resized(width, 600, SizeKind::Restored))
                .unwrap();
        }
        assert!(run_loop.scene().resizes.is_empty());
        assert!(run_loop.clock().is_stopped());

        run_loop.handle_event(AppEvent::ExitSizeMove).unwrap();
        assert_eq!(run_loop.scene().resizes, vec![(830, 600)]);
        assert!(!run_loop.clock().is_stopped());
    }

    #[test]
    fn maximise_then_restore_resizes_both_times() {
        let (_ticks, mut run_loop) = run_loop();
        run_loop
            .handle_event(resized(1920, 1080, SizeKind::Maximized))
            .unwrap();
        run_loop
            .handle_event(resized(800, 600, SizeKind::Restored))
            .unwrap();
        assert_eq!(run_loop.scene().resizes, vec![(1920, 1080), (800, 600)]);
    }

    #[test]
    fn escape_exits_and_other_keys_reach_the_scene() {
        let (_ticks, mut run_loop) = run_loop();
        assert_eq!(
            run_loop.handle_event(AppEvent::KeyUp(Key::F2)).unwrap(),
            ControlFlow::Continue
        );
        assert_eq!(
            run_loop.handle_event(AppEvent::KeyUp(Key::Escape)).unwrap(),
            ControlFlow::Exit
        );
        assert_eq!(
            run_loop.handle_event(AppEvent::Quit).unwrap(),
            ControlFlow::Exit
        );
        assert_eq!(run_loop.scene().keys, vec![Key::F2]);
    }

    #[test]
    fn key_handler_errors_are_returned() {
        let (_ticks, mut run_loop) = run_loop();
        let error = run_loop
            .handle_event(AppEvent::KeyUp(Key::Digit(0)))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DeviceLost);
    }

    #[test]
    fn stats_are_reported_once_per_second() {
        let (ticks, mut run_loop) = run_loop();
        let mut reports = Vec::new();
        for _ in 0..120 {
            ticks.advance(20);
            if let FrameOutcome::Rendered { stats: Some(stats) } = run_loop.frame().unwrap() {
                reports.push(stats);
            }
        }
        assert_eq!(reports.len(), 2);
        assert!((reports[0].fps - 50.0).abs() <= 1.0, "fps {}", reports[0].fps);
        assert!((reports[0].ms_per_frame * reports[0].fps - 1000.0).abs() < 1e-2);
    }
}
