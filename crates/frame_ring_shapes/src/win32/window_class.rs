use std::cell::RefCell;
use std::collections::VecDeque;

use frame_ring::app::{AppEvent, Key, MouseButton, MouseButtons, MouseEvent, SizeKind};
use windows::Win32::Foundation::*;
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::*;

use crate::demo_error::DemoResult;

// winuser.h values, typed to match the raw message parameters.
const WA_INACTIVE: u32 = 0;
const SIZE_RESTORED: u32 = 0;
const SIZE_MINIMIZED: u32 = 1;
const SIZE_MAXIMIZED: u32 = 2;
const MK_LBUTTON: usize = 0x0001;
const MK_RBUTTON: usize = 0x0002;
const MK_MBUTTON: usize = 0x0010;
const VK_ESCAPE: u32 = 0x1B;
const VK_F2: u32 = 0x71;
const VK_0: u32 = 0x30;
const VK_9: u32 = 0x39;
const MNC_CLOSE: isize = 1;
const MIN_TRACK_SIZE: i32 = 200;

pub trait WindowClass {
    const ID: PCWSTR;

    /// Lives behind `GWLP_USERDATA` for the lifetime of the window.
    type WindowData;

    /// Returns `Some` to report the message handled with that result.
    fn handle(
        data: &Self::WindowData,
        message: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> Option<LRESULT>;
}

/// Events the window procedure produced since the main loop last looked.
#[derive(Debug, Default)]
pub struct WindowEvents {
    queue: RefCell<VecDeque<AppEvent>>,
}

impl WindowEvents {
    pub fn push(&self, event: AppEvent) {
        self.queue.borrow_mut().push_back(event);
    }

    pub fn pop(&self) -> Option<AppEvent> {
        self.queue.borrow_mut().pop_front()
    }
}

pub struct ShapesWindow;

impl WindowClass for ShapesWindow {
    const ID: PCWSTR = w!("FrameRingShapesWindow");

    type WindowData = WindowEvents;

    fn handle(
        events: &WindowEvents,
        message: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> Option<LRESULT> {
        match message {
            WM_GETMINMAXINFO => {
                let info = unsafe { &mut *(lparam.0 as *mut MINMAXINFO) };
                info.ptMinTrackSize = POINT {
                    x: MIN_TRACK_SIZE,
                    y: MIN_TRACK_SIZE,
                };
                Some(LRESULT(0))
            }
            // Alt-Enter would otherwise beep for a missing menu mnemonic.
            WM_MENUCHAR => Some(LRESULT(MNC_CLOSE << 16)),
            WM_DESTROY => {
                events.push(AppEvent::Quit);
                unsafe { PostQuitMessage(0) };
                Some(LRESULT(0))
            }
            _ => {
                let event = translate_message(message, wparam, lparam)?;
                events.push(event);
                Some(LRESULT(0))
            }
        }
    }
}

/// Maps a window message onto the platform-independent event it stands for.
pub fn translate_message(message: u32, wparam: WPARAM, lparam: LPARAM) -> Option<AppEvent> {
    let x = (lparam.0 & 0xFFFF) as u16 as i16 as i32;
    let y = ((lparam.0 >> 16) & 0xFFFF) as u16 as i16 as i32;
    let event = match message {
        WM_ACTIVATE if (wparam.0 & 0xFFFF) as u32 == WA_INACTIVE => AppEvent::Deactivated,
        WM_ACTIVATE => AppEvent::Activated,
        WM_SIZE => {
            let kind = match wparam.0 as u32 {
                SIZE_MINIMIZED => SizeKind::Minimized,
                SIZE_MAXIMIZED => SizeKind::Maximized,
                SIZE_RESTORED => SizeKind::Restored,
                _ => return None,
            };
            AppEvent::Resized {
                width: (lparam.0 & 0xFFFF) as u32,
                height: ((lparam.0 >> 16) & 0xFFFF) as u32,
                kind,
            }
        }
        WM_ENTERSIZEMOVE => AppEvent::EnterSizeMove,
        WM_EXITSIZEMOVE => AppEvent::ExitSizeMove,
        WM_LBUTTONDOWN => mouse_down(MouseButton::Left, x, y),
        WM_RBUTTONDOWN => mouse_down(MouseButton::Right, x, y),
        WM_MBUTTONDOWN => mouse_down(MouseButton::Middle, x, y),
        WM_LBUTTONUP => mouse_up(MouseButton::Left, x, y),
        WM_RBUTTONUP => mouse_up(MouseButton::Right, x, y),
        WM_MBUTTONUP => mouse_up(MouseButton::Middle, x, y),
        WM_MOUSEMOVE => AppEvent::Mouse(MouseEvent::Move {
            held: MouseButtons {
                left: wparam.0 & MK_LBUTTON != 0,
                right: wparam.0 & MK_RBUTTON != 0,
                middle: wparam.0 & MK_MBUTTON != 0,
            },
            x,
            y,
        }),
        WM_KEYUP => AppEvent::KeyUp(match wparam.0 as u32 {
            VK_ESCAPE => Key::Escape,
            VK_F2 => Key::F2,
            digit @ VK_0..=VK_9 => Key::Digit((digit - VK_0) as u8),
            other => Key::Other(other),
        }),
        _ => return None,
    };
    Some(event)
}

fn mouse_down(button: MouseButton, x: i32, y: i32) -> AppEvent {
    AppEvent::Mouse(MouseEvent::Down { button, x, y })
}

fn mouse_up(button: MouseButton, x: i32, y: i32) -> AppEvent {
    AppEvent::Mouse(MouseEvent::Up { button, x, y })
}

pub fn register_window_class<W: WindowClass>(instance: HMODULE) -> DemoResult<()> {
    let wc = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc::<W>),
        hInstance: instance.into(),
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW)? },
        lpszClassName: W::ID,
        ..Default::default()
    };
    let atom = unsafe { RegisterClassExW(&wc) };
    if atom == 0 {
        return Err(Error::from_win32().into());
    }
    Ok(())
}

extern "system" fn wndproc<W: WindowClass>(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if message == WM_CREATE {
        unsafe {
            let create_struct: &CREATESTRUCTW = &*(lparam.0 as *const CREATESTRUCTW);
            SetWindowLongPtrW(window, GWLP_USERDATA, create_struct.lpCreateParams as _);
        }
        return LRESULT(0);
    }

    let user_data = unsafe { GetWindowLongPtrW(window, GWLP_USERDATA) };
    if user_data == 0 {
        // Messages can arrive before WM_CREATE and after WM_DESTROY.
        return unsafe { DefWindowProcW(window, message, wparam, lparam) };
    }

    // SAFETY: set from the `create_window` parameter, which outlives the window.
    let data = unsafe { &*(user_data as *const W::WindowData) };
    let handled = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        W::handle(data, message, wparam, lparam)
    }))
    .unwrap_or(None);

    match handled {
        Some(result) => result,
        None => unsafe { DefWindowProcW(window, message, wparam, lparam) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lparam(low: u16, high: u16) -> LPARAM {
        LPARAM(((high as isize) << 16) | low as isize)
    }

    #[test]
    fn size_messages_carry_the_client_size() {
        assert_eq!(
            translate_message(WM_SIZE, WPARAM(SIZE_MAXIMIZED as usize), lparam(1920, 1080)),
            Some(AppEvent::Resized {
                width: 1920,
                height: 1080,
                kind: SizeKind::Maximized,
            })
        );
        assert_eq!(translate_message(WM_SIZE, WPARAM(4), lparam(1, 1)), None);
    }

    #[test]
    fn mouse_coordinates_are_signed() {
        assert_eq!(
            translate_message(WM_LBUTTONDOWN, WPARAM(0), lparam(0xFFFF, 12)),
            Some(mouse_down(MouseButton::Left, -1, 12))
        );
    }

    #[test]
    fn activation_and_keys() {
        assert_eq!(
            translate_message(WM_ACTIVATE, WPARAM(WA_INACTIVE as usize), LPARAM(0)),
            Some(AppEvent::Deactivated)
        );
        assert_eq!(
            translate_message(WM_KEYUP, WPARAM(VK_ESCAPE as usize), LPARAM(0)),
            Some(AppEvent::KeyUp(Key::Escape))
        );
        assert_eq!(
            translate_message(WM_KEYUP, WPARAM(0x31), LPARAM(0)),
            Some(AppEvent::KeyUp(Key::Digit(1)))
        );
    }
}
