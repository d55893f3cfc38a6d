use bytemuck::Pod;

use crate::error::GpuResult;
use crate::gpu::{Device, UploadBuffer};
use crate::upload_region::UploadRegion;

/// Per-frame state one in-flight frame owns exclusively: the allocator its
/// commands live in, the upload regions its draws read from, and the fence
/// value that marks when the GPU is done with both.
pub struct FrameSlot<D: Device, R> {
    allocator: D::Allocator,
    regions: R,
    marker: u64,
}

impl<D: Device, R> FrameSlot<D, R> {
    /// Creates the slot's command allocator around already built `regions`.
    pub fn new(device: &D, regions: R) -> GpuResult<Self> {
        Ok(Self {
            allocator: device.create_command_allocator()?,
            regions,
            marker: 0,
        })
    }

    pub fn allocator(&self) -> &D::Allocator {
        &self.allocator
    }

    pub fn regions(&self) -> &R {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut R {
        &mut self.regions
    }

    /// The fence value stamped by this slot's last submit; `0` before the
    /// first one.
    pub fn marker_value(&self) -> u64 {
        self.marker
    }

    pub fn set_marker_value(&mut self, value: u64) {
        self.marker = value;
    }

    /// Whether the GPU has finished everything this slot last submitted.
    pub fn is_retired(&self, completed: u64) -> bool {
        self.marker == 0 || completed >= self.marker
    }
}

/// The usual slot payload: one region of per-pass constants and one of
/// per-object constants, both padded for constant buffer binding.
pub struct FrameConstants<B: UploadBuffer, P: Pod, O: Pod> {
    pub pass: UploadRegion<B, P>,
    pub objects: UploadRegion<B, O>,
}

impl<B: UploadBuffer, P: Pod, O: Pod> FrameConstants<B, P, O> {
    pub fn new<D>(device: &D, pass_count: usize, object_count: usize) -> GpuResult<Self>
    where
        D: Device<Buffer = B>,
    {
        Ok(Self {
            pass: UploadRegion::new(device, pass_count, true)?,
            objects: UploadRegion::new(device, object_count, true)?,
        })
    }
}

/// [`FrameConstants`] plus a vertex region that is rewritten every frame, for
/// geometry animated on the CPU.
pub struct StreamedFrame<B: UploadBuffer, P: Pod, O: Pod, V: Pod> {
    pub constants: FrameConstants<B, P, O>,
    pub vertices: UploadRegion<B, V>,
}

impl<B: UploadBuffer, P: Pod, O: Pod, V: Pod> StreamedFrame<B, P, O, V> {
    pub fn new<D>(
        device: &D,
        pass_count: usize,
        object_count: usize,
        vertex_count: usize,
    ) -> GpuResult<Self>
    where
        D: Device<Buffer = B>,
    {
        Ok(Self {
            constants: FrameConstants::new(device, pass_count, object_count)?,
            vertices: UploadRegion::new(device, vertex_count, false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::headless::HeadlessDevice;

    #[test]
    fn new_slot_is_unsubmitted() {
        let device = HeadlessDevice::new();
        let slot = FrameSlot::new(&device, ()).unwrap();
        assert_eq!(slot.marker_value(), 0);
        assert!(slot.is_retired(0));
    }

    #[test]
    fn retired_once_the_fence_passes_the_marker() {
        let device = HeadlessDevice::new();
        let mut slot = FrameSlot::new(&device, ()).unwrap();
        slot.set_marker_value(4);
        assert!(!slot.is_retired(3));
        assert!(slot.is_retired(4));
        assert!(slot.is_retired(9));
    }

    #[test]
    fn streamed_frame_sizes_each_region() {
        let device = HeadlessDevice::new();
        let frame =
            StreamedFrame::<_, [f32; 8], [f32; 16], [f32; 6]>::new(&device, 1, 5, 40).unwrap();
        assert_eq!(frame.constants.pass.element_count(), 1);
        assert_eq!(frame.constants.objects.element_count(), 5);
        assert_eq!(frame.constants.objects.stride(), 256);
        assert_eq!(frame.vertices.stride(), 24);
        assert_eq!(device.live_mappings(), 3);
    }

    #[test]
    fn zero_objects_fails_construction() {
        let device = HeadlessDevice::new();
        let error = FrameConstants::<_, u32, u32>::new(&device, 1, 0)
            .err()
            .map(|error| error.kind());
        assert_eq!(error, Some(ErrorKind::InvalidArgument));
        assert_eq!(device.live_buffers(), 0);
    }
}
