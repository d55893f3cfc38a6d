//! The windowed Direct3D 12 front end.

pub mod create_window;
pub mod pipeline;
pub mod shapes_scene;
pub mod window_class;

use frame_ring::app::PAUSED_SLEEP;
use frame_ring::d3d12::create_device;
use frame_ring::{ControlFlow, FrameOutcome, FrameStats, RunLoop, SampleCommandLine};
use tracing::info;
use tracing::warn;
use widestring::U16CString;
use windows::Win32::Foundation::*;
use windows::Win32::System::LibraryLoader::*;
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::*;

use crate::demo_error::{DemoReport, DemoResult};
use create_window::create_window;
use shapes_scene::D3d12Shapes;
use window_class::{ShapesWindow, WindowEvents, register_window_class};

const CLIENT_SIZE: (u32, u32) = (1280, 720);

pub fn run(command_line: &SampleCommandLine) -> DemoResult<()> {
    let our_module = get_handle_to_file_used_to_create_the_calling_process()?;
    register_window_class::<ShapesWindow>(our_module)?;

    let base_title = match command_line.use_warp_device {
        true => "Frame Ring Shapes (WARP)",
        false => "Frame Ring Shapes",
    };
    let title = U16CString::from_str_truncate(base_title);
    // Declared before anything holding the window so it outlives it.
    let events = WindowEvents::default();
    let hwnd = create_window::<ShapesWindow>(
        our_module,
        CLIENT_SIZE,
        PCWSTR(title.as_ptr()),
        &events,
    )?;

    let (factory, device) = create_device(command_line.use_warp_device)?;
    let scene = D3d12Shapes::new(&factory, device, hwnd, CLIENT_SIZE, command_line)?;
    let mut run_loop = RunLoop::new(scene, CLIENT_SIZE.0, CLIENT_SIZE.1);

    unsafe { _ = ShowWindow(hwnd, SW_SHOW) };
    run_loop.begin();
    let result = message_loop(&mut run_loop, &events, hwnd, base_title);

    // Drains the frame ring while the window and swap chain still exist.
    drop(run_loop);
    // Already gone when the user closed it.
    unsafe { _ = DestroyWindow(hwnd) };
    result
}

fn message_loop(
    run_loop: &mut RunLoop<D3d12Shapes>,
    events: &WindowEvents,
    hwnd: HWND,
    base_title: &str,
) -> DemoResult<()> {
    loop {
        let mut message = MSG::default();
        let dispatched: bool = unsafe { PeekMessageW(&mut message, None, 0, 0, PM_REMOVE) }.into();
        if dispatched {
            if message.message == WM_QUIT {
                info!("Received WM_QUIT");
                return Ok(());
            }
            unsafe {
                _ = TranslateMessage(&message);
                DispatchMessageW(&message);
            }
        }

        while let Some(event) = events.pop() {
            if run_loop.handle_event(event)? == ControlFlow::Exit {
                unsafe { PostQuitMessage(0) };
            }
        }

        // Only draw once the message queue is empty.
        if dispatched {
            continue;
        }
        match run_loop.frame()? {
            FrameOutcome::Paused => std::thread::sleep(PAUSED_SLEEP),
            FrameOutcome::Rendered { stats: Some(stats) } => {
                show_frame_stats(hwnd, base_title, stats)
            }
            FrameOutcome::Rendered { stats: None } => {}
        }
    }
}

fn show_frame_stats(hwnd: HWND, base_title: &str, stats: FrameStats) {
    let text = format!(
        "{base_title}    fps: {:.0}   mspf: {:.3}",
        stats.fps, stats.ms_per_frame
    );
    let text = U16CString::from_str_truncate(text);
    if let Err(error) = unsafe { SetWindowTextW(hwnd, PCWSTR(text.as_ptr())) } {
        warn!(%error, "Failed to update window title");
    }
}

/// Reports a fatal error to the user before the process exits.
pub fn show_fatal_error(report: &DemoReport) {
    let text = U16CString::from_str_truncate(report.to_string());
    unsafe {
        MessageBoxW(
            None,
            PCWSTR(text.as_ptr()),
            w!("Frame Ring Shapes"),
            MB_OK | MB_ICONERROR,
        );
    }
}

fn get_handle_to_file_used_to_create_the_calling_process() -> DemoResult<HMODULE> {
    let mut out = Default::default();
    unsafe { GetModuleHandleExW(Default::default(), None, &mut out)? };
    Ok(out)
}
