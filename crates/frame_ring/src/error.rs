use std::borrow::Cow;
use std::panic::Location;

pub type GpuResult<T, E = GpuError> = core::result::Result<T, E>;

/// Broad category of a device failure.
///
/// Every kind is treated as fatal by the render loop; the split only exists so
/// callers and tests can tell what went wrong without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A device object (allocator, list, fence, buffer, queue) could not be created.
    ResourceCreation,
    /// Mapping an upload buffer for CPU writes failed.
    Mapping,
    /// Resetting, closing or executing command lists failed.
    Submission,
    /// The fence could not register or wait on a completion event.
    FenceWait,
    /// A bounded fence wait expired; the device is presumed unresponsive.
    DeviceLost,
    /// An upload region index was outside `[0, element_count)`.
    OutOfBounds,
    /// A constructor argument was rejected before touching the device.
    InvalidArgument,
    /// An API was called out of order (record before advance, submit an open list, ...).
    Usage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ResourceCreation => "resource creation",
            ErrorKind::Mapping => "mapping",
            ErrorKind::Submission => "submission",
            ErrorKind::FenceWait => "fence wait",
            ErrorKind::DeviceLost => "device lost",
            ErrorKind::OutOfBounds => "out of bounds",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Usage => "usage",
        };
        f.write_str(name)
    }
}

/// A failed device call: the result code, the expression that produced it, and
/// where in the source it was issued.
#[derive(Clone, PartialEq, Eq)]
pub struct GpuError {
    kind: ErrorKind,
    code: i32,
    call: Cow<'static, str>,
    file: &'static str,
    line: u32,
    message: Option<String>,
}

impl GpuError {
    /// Builds an error located at the caller.
    #[track_caller]
    pub fn new(kind: ErrorKind, code: i32, call: impl Into<Cow<'static, str>>) -> Self {
        let location = Location::caller();
        Self::at(kind, code, call, location.file(), location.line())
    }

    /// Builds an error with an explicit source location. Used by [`gpu_call!`](crate::gpu_call).
    pub fn at(
        kind: ErrorKind,
        code: i32,
        call: impl Into<Cow<'static, str>>,
        file: &'static str,
        line: u32,
    ) -> Self {
        Self {
            kind,
            code,
            call: call.into(),
            file,
            line,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Raw result code reported by the device, `0` when the failure was detected on the CPU side.
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn call(&self) -> &str {
        &self.call
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl std::error::Error for GpuError {}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed ({}, code {:#010x}) at {}:{}",
            self.call, self.kind, self.code as u32, self.file, self.line
        )?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// Evaluates a device call returning `Result<T, E>` and converts the error into
/// a [`GpuError`] carrying the call's source text, file and line.
///
/// The error type must implement [`ResultCode`](crate::error::ResultCode).
#[macro_export]
macro_rules! gpu_call {
    ($kind:expr, $call:expr) => {
        ($call).map_err(|error| {
            let code = $crate::error::ResultCode::result_code(&error);
            $crate::error::GpuError::at($kind, code, stringify!($call), file!(), line!())
                .with_message(error.to_string())
        })
    };
}

/// Errors that expose a numeric result code (an HRESULT on Windows).
pub trait ResultCode: std::fmt::Display {
    fn result_code(&self) -> i32;
}

impl ResultCode for GpuError {
    fn result_code(&self) -> i32 {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeHresult(i32);

    impl std::fmt::Display for FakeHresult {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake hresult {}", self.0)
        }
    }

    impl ResultCode for FakeHresult {
        fn result_code(&self) -> i32 {
            self.0
        }
    }

    fn failing_create() -> Result<u32, FakeHresult> {
        Err(FakeHresult(0x8007000Eu32 as i32))
    }

    #[test]
    fn gpu_call_captures_expression_and_location() {
        let error = gpu_call!(ErrorKind::ResourceCreation, failing_create()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResourceCreation);
        assert_eq!(error.code() as u32, 0x8007000E);
        assert_eq!(error.call(), "failing_create()");
        assert!(error.file().ends_with("error.rs"));
        assert!(error.line() > 0);
        assert_eq!(error.message(), Some("fake hresult -2147024882"));
    }

    #[test]
    fn new_records_the_caller_line() {
        let line = line!() + 1;
        let error = GpuError::new(ErrorKind::Usage, 0, "submit");
        assert_eq!(error.line(), line);
    }

    #[test]
    fn display_includes_code_call_and_location() {
        let error = GpuError::at(ErrorKind::FenceWait, 5, "SetEventOnCompletion", "fence.rs", 12)
            .with_message("access denied");
        assert_eq!(
            error.to_string(),
            "SetEventOnCompletion failed (fence wait, code 0x00000005) at fence.rs:12: access denied"
        );
    }
}
