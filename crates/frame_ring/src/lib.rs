//! Pipelined CPU/GPU frame submission.
//!
//! A [`FrameRing`] cycles through a fixed number of [`FrameSlot`]s, each with
//! its own command allocator and [`UploadRegion`]s. Before a slot is reused the
//! ring waits on the fence value stamped when that slot was last submitted, so
//! the CPU can record the next frame while the GPU is still drawing earlier
//! ones without ever overwriting memory the GPU is reading.
//!
//! The ring is written against the traits in [`gpu`]. [`headless`] implements
//! them in software; on Windows, `d3d12` implements them over Direct3D 12.

pub mod app;
pub mod clock;
pub mod config;
#[cfg(windows)]
pub mod d3d12;
pub mod dirty;
pub mod error;
pub mod frame_ring;
pub mod frame_slot;
pub mod gpu;
pub mod headless;
pub mod timeline;
pub mod upload_region;

pub use app::{AppEvent, ControlFlow, FrameOutcome, FrameStats, FrameTime, RunLoop, Scene};
pub use clock::Clock;
pub use config::SampleCommandLine;
pub use dirty::DirtyFrames;
pub use error::{ErrorKind, GpuError, GpuResult};
pub use frame_ring::{DEFAULT_FRAME_COUNT, FrameRing};
pub use frame_slot::{FrameConstants, FrameSlot, StreamedFrame};
pub use gpu::GpuAddress;
pub use timeline::{Timeline, WaitPolicy};
pub use upload_region::{CONSTANT_BUFFER_ALIGNMENT, UploadRegion, constant_buffer_stride};
