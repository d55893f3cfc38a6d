use windows::Win32::Foundation::*;
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::*;

use crate::demo_error::DemoResult;
use crate::win32::window_class::WindowClass;

/// Creates a window of class `W` sized so its client area matches
/// `client_size`. `window_data` must outlive the window.
pub fn create_window<W: WindowClass>(
    our_module: HMODULE,
    client_size: (u32, u32),
    title: PCWSTR,
    window_data: &W::WindowData,
) -> DemoResult<HWND> {
    let mut window_rect = RECT {
        left: 0,
        top: 0,
        right: client_size.0 as i32,
        bottom: client_size.1 as i32,
    };
    unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false)? };

    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            W::ID,
            title,
            WS_OVERLAPPEDWINDOW,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            window_rect.right - window_rect.left,
            window_rect.bottom - window_rect.top,
            None,
            None,
            Some(our_module.into()),
            Some(window_data as *const W::WindowData as _),
        )
    }?;
    Ok(hwnd)
}
