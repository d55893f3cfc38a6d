use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;
use tracing::trace;

use crate::error::{ErrorKind, GpuError, GpuResult};
use crate::gpu::{Device, GpuAddress, UploadBuffer};

/// Constant buffer views must start on this boundary and span a multiple of it.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Rounds `byte_size` up to the next multiple of [`CONSTANT_BUFFER_ALIGNMENT`].
pub const fn constant_buffer_stride(byte_size: u64) -> u64 {
    (byte_size + (CONSTANT_BUFFER_ALIGNMENT - 1)) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// A persistently mapped upload buffer holding `element_count` values of `T`.
///
/// The mapping is taken in [`new`](UploadRegion::new) and held until the region
/// is released or dropped. Writing an element the GPU is still reading is not
/// prevented here; the frame ring guarantees it never happens by waiting on the
/// owning slot's marker before the slot is reused.
pub struct UploadRegion<B: UploadBuffer, T: Pod> {
    buffer: B,
    mapped: Option<NonNull<u8>>,
    stride: u64,
    element_count: usize,
    _element: PhantomData<T>,
}

impl<B: UploadBuffer, T: Pod> UploadRegion<B, T> {
    /// Allocates and maps the region. With `is_constant` set each element is
    /// padded to [`CONSTANT_BUFFER_ALIGNMENT`] so it can be bound as a constant
    /// buffer view on its own.
    pub fn new<D>(device: &D, element_count: usize, is_constant: bool) -> GpuResult<Self>
    where
        D: Device<Buffer = B>,
    {
        let element_size = size_of::<T>() as u64;
        if element_count == 0 {
            return Err(GpuError::new(
                ErrorKind::InvalidArgument,
                0,
                "UploadRegion::new",
            )
            .with_message("element count must be at least 1"));
        }
        if element_size == 0 {
            return Err(GpuError::new(
                ErrorKind::InvalidArgument,
                0,
                "UploadRegion::new",
            )
            .with_message("element type has zero size"));
        }

        let stride = if is_constant {
            constant_buffer_stride(element_size)
        } else {
            element_size
        };
        let byte_size = stride.checked_mul(element_count as u64).ok_or_else(|| {
            GpuError::new(ErrorKind::InvalidArgument, 0, "UploadRegion::new").with_message(
                format!("{element_count} elements of stride {stride} overflow the buffer size"),
            )
        })?;

        let mut buffer = device.create_upload_buffer(byte_size, std::any::type_name::<T>())?;
        let mapped = buffer.map()?;
        trace!(
            element = std::any::type_name::<T>(),
            element_count,
            stride,
            byte_size,
            "Mapped upload region"
        );

        Ok(Self {
            buffer,
            mapped: Some(mapped),
            stride,
            element_count,
            _element: PhantomData,
        })
    }

    /// Overwrites element `index` with `value`.
    ///
    /// Fails with [`ErrorKind::OutOfBounds`] when `index >= element_count` and
    /// with [`ErrorKind::Usage`] after the region has been released.
    pub fn copy_data(&mut self, index: usize, value: &T) -> GpuResult<()> {
        if index >= self.element_count {
            return Err(GpuError::new(ErrorKind::OutOfBounds, 0, "UploadRegion::copy_data")
                .with_message(format!(
                    "index {index} is outside a region of {} elements",
                    self.element_count
                )));
        }
        let Some(mapped) = self.mapped else {
            return Err(GpuError::new(ErrorKind::Usage, 0, "UploadRegion::copy_data")
                .with_message("region has been released"));
        };

        let bytes = bytemuck::bytes_of(value);
        let offset = index as u64 * self.stride;
        // SAFETY: the mapping covers `stride * element_count` bytes, `index` was
        // bounds-checked above and `size_of::<T>() <= stride`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapped.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Writes `values` into consecutive elements starting at 0.
    pub fn copy_slice(&mut self, values: &[T]) -> GpuResult<()> {
        if values.len() > self.element_count {
            return Err(GpuError::new(ErrorKind::OutOfBounds, 0, "UploadRegion::copy_slice")
                .with_message(format!(
                    "{} values do not fit a region of {} elements",
                    values.len(),
                    self.element_count
                )));
        }
        for (index, value) in values.iter().enumerate() {
            self.copy_data(index, value)?;
        }
        Ok(())
    }

    /// Address of the first element, for binding the whole region.
    pub fn resource_handle(&self) -> GpuAddress {
        self.buffer.gpu_address()
    }

    /// Address of element `index`. Not bounds-checked beyond the region end.
    pub fn element_address(&self, index: usize) -> GpuAddress {
        self.buffer.gpu_address().offset(index as u64 * self.stride)
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn byte_size(&self) -> u64 {
        self.stride * self.element_count as u64
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Drops the CPU mapping early. Safe to call any number of times.
    pub fn release(&mut self) {
        if self.mapped.take().is_some() {
            self.buffer.unmap();
        }
    }
}

impl<B: UploadBuffer, T: Pod> Drop for UploadRegion<B, T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<B: UploadBuffer, T: Pod> std::fmt::Debug for UploadRegion<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRegion")
            .field("element", &std::any::type_name::<T>())
            .field("element_count", &self.element_count)
            .field("stride", &self.stride)
            .field("mapped", &self.mapped.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Transform {
        world: [[f32; 4]; 4],
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Odd {
        values: [u8; 300],
    }

    #[test]
    fn constant_stride_rounds_up_to_256() {
        assert_eq!(constant_buffer_stride(4), 256);
        assert_eq!(constant_buffer_stride(256), 256);
        assert_eq!(constant_buffer_stride(257), 512);
        assert_eq!(constant_buffer_stride(300), 512);
        for size in 1..2048 {
            let stride = constant_buffer_stride(size);
            assert!(stride >= size);
            assert_eq!(stride % CONSTANT_BUFFER_ALIGNMENT, 0);
        }
    }

    #[test]
    fn constant_region_uses_padded_stride() {
        let device = HeadlessDevice::new();
        let region = UploadRegion::<_, Odd>::new(&device, 3, true).unwrap();
        assert_eq!(region.stride(), 512);
        assert_eq!(region.buffer().byte_size(), 1536);
        assert_eq!(
            region.element_address(2),
            region.resource_handle().offset(1024)
        );
    }

    #[test]
    fn vertex_region_uses_raw_stride() {
        let device = HeadlessDevice::new();
        let region = UploadRegion::<_, [f32; 3]>::new(&device, 10, false).unwrap();
        assert_eq!(region.stride(), 12);
        assert_eq!(region.byte_size(), 120);
    }

    #[test]
    fn copy_data_checks_bounds() {
        let device = HeadlessDevice::new();
        let mut region = UploadRegion::<_, Transform>::new(&device, 4, true).unwrap();
        let value = Transform {
            world: [[1.0; 4]; 4],
        };

        region.copy_data(0, &value).unwrap();
        region.copy_data(3, &value).unwrap();
        let error = region.copy_data(4, &value).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::OutOfBounds);
    }

    #[test]
    fn copy_data_lands_at_index_times_stride() {
        let device = HeadlessDevice::new();
        let mut region = UploadRegion::<_, u32>::new(&device, 3, true).unwrap();
        region.copy_data(1, &0xDEAD_BEEF).unwrap();

        let bytes = region.buffer().read();
        assert_eq!(&bytes[256..260], &0xDEAD_BEEFu32.to_ne_bytes());
        assert!(bytes[..256].iter().all(|&b| b == 0));
        assert!(bytes[260..].iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_elements_is_rejected() {
        let device = HeadlessDevice::new();
        let error = UploadRegion::<_, u32>::new(&device, 0, true).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn oversized_regions_are_rejected() {
        let device = HeadlessDevice::new();
        let error = UploadRegion::<_, u32>::new(&device, (1 << 56) + 1, true).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        assert_eq!(device.live_buffers(), 0);

        let error = UploadRegion::<_, [u8; 16]>::new(&device, usize::MAX, false).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn release_is_idempotent_and_drop_unmaps() {
        let device = HeadlessDevice::new();
        let mut region = UploadRegion::<_, u32>::new(&device, 1, false).unwrap();
        assert_eq!(device.live_mappings(), 1);
        assert!(region.is_mapped() && region.buffer().is_mapped());

        region.release();
        region.release();
        assert_eq!(device.live_mappings(), 0);
        assert!(!region.is_mapped() && !region.buffer().is_mapped());
        assert_eq!(
            region.copy_data(0, &1).unwrap_err().kind(),
            ErrorKind::Usage
        );
        drop(region);
        assert_eq!(device.live_mappings(), 0);

        let region = UploadRegion::<_, u32>::new(&device, 1, false).unwrap();
        assert_eq!(device.live_mappings(), 1);
        drop(region);
        assert_eq!(device.live_mappings(), 0);
    }
}
