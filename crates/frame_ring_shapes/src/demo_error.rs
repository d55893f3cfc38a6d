use frame_ring::GpuError;

pub type DemoResult<T, E = DemoReport> = core::result::Result<T, E>;

pub struct DemoReport {
    inner: eyre::Report,
}

impl From<eyre::Report> for DemoReport {
    fn from(report: eyre::Report) -> Self {
        Self { inner: report }
    }
}

impl From<GpuError> for DemoReport {
    fn from(error: GpuError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl std::fmt::Display for DemoReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl std::fmt::Debug for DemoReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.inner, f)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for DemoReport {
    #[track_caller]
    fn from(error: windows::core::Error) -> Self {
        platform_report(error.code().0, error.message())
    }
}

/// Reports a failed platform call by its result code. `windows::core::Error`
/// is not a `std::error::Error` without the crate's `std` feature, which this
/// workspace leaves off, so only its code and text are kept.
#[cfg_attr(not(windows), allow(dead_code))]
#[track_caller]
fn platform_report(code: i32, message: impl std::fmt::Display) -> DemoReport {
    let location = std::panic::Location::caller();
    eyre::eyre!("{message} (HRESULT {:#010x}) at {location}", code as u32).into()
}
