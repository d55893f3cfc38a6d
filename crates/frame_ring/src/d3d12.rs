//! The Direct3D 12 backend.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::time::Duration;

use tracing::{info, warn};
use widestring::U16CString;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::*;
use windows::core::{Interface, PCWSTR};

use crate::error::{ErrorKind, GpuError, GpuResult, ResultCode};
use crate::gpu::{self, GpuAddress};
use crate::gpu_call;

impl ResultCode for windows::core::Error {
    fn result_code(&self) -> i32 {
        self.code().0
    }
}

/// Creates the DXGI factory and a Direct3D 12 device, enabling the debug
/// layer in debug builds.
pub fn create_device(use_warp_device: bool) -> GpuResult<(IDXGIFactory4, D3d12Device)> {
    let mut factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);
    if cfg!(debug_assertions) {
        let mut debug: Option<ID3D12Debug> = None;
        if let Some(debug) = unsafe { D3D12GetDebugInterface(&mut debug) }
            .ok()
            .and(debug)
        {
            unsafe { debug.EnableDebugLayer() };
            factory_flags |= DXGI_CREATE_FACTORY_DEBUG;
            info!("D3D12 debug layer enabled");
        } else {
            warn!("D3D12 debug layer unavailable");
        }
    }

    let factory: IDXGIFactory4 = gpu_call!(
        ErrorKind::ResourceCreation,
        unsafe { CreateDXGIFactory2(factory_flags) }
    )?;

    let adapter: IDXGIAdapter1 = if use_warp_device {
        info!("Using WARP adapter");
        gpu_call!(ErrorKind::ResourceCreation, unsafe { factory.EnumWarpAdapter() })?
    } else {
        get_hardware_adapter(&factory)?
    };

    let mut device: Option<ID3D12Device> = None;
    gpu_call!(
        ErrorKind::ResourceCreation,
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
    )?;
    let device = device.ok_or_else(|| {
        GpuError::new(ErrorKind::ResourceCreation, E_POINTER.0, "D3D12CreateDevice")
            .with_message("no device returned")
    })?;
    Ok((factory, D3d12Device::new(device)))
}

/// The first hardware adapter that supports feature level 11.0.
fn get_hardware_adapter(factory: &IDXGIFactory4) -> GpuResult<IDXGIAdapter1> {
    for i in 0.. {
        let adapter = match unsafe { factory.EnumAdapters1(i) } {
            Ok(adapter) => adapter,
            Err(error) if error.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(error) => {
                return Err(GpuError::new(
                    ErrorKind::ResourceCreation,
                    error.code().0,
                    "EnumAdapters1",
                )
                .with_message(error.to_string()));
            }
        };

        let desc = gpu_call!(ErrorKind::ResourceCreation, unsafe { adapter.GetDesc1() })?;
        let name = String::from_utf16_lossy(&desc.Description);
        let name = name.trim_end_matches('\0');

        if (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE)
            != DXGI_ADAPTER_FLAG_NONE
        {
            info!(adapter = name, "Skipping software adapter");
            continue;
        }

        let supported = unsafe {
            D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        }
        .is_ok();
        if supported {
            info!(adapter = name, "Using hardware adapter");
            return Ok(adapter);
        }
        info!(adapter = name, "Adapter lacks feature level 11.0");
    }

    Err(
        GpuError::new(ErrorKind::ResourceCreation, DXGI_ERROR_NOT_FOUND.0, "get_hardware_adapter")
            .with_message("no suitable D3D12 hardware adapter found"),
    )
}

#[derive(Debug, Clone)]
pub struct D3d12Device {
    device: ID3D12Device,
}

impl D3d12Device {
    pub fn new(device: ID3D12Device) -> Self {
        Self { device }
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    /// Like [`gpu::Device::create_command_list`] but with an initial pipeline
    /// state that every reset restores.
    pub fn create_command_list_with_state(
        &self,
        allocator: &D3d12Allocator,
        pipeline_state: Option<ID3D12PipelineState>,
    ) -> GpuResult<D3d12CommandList> {
        let list: ID3D12GraphicsCommandList = gpu_call!(
            ErrorKind::ResourceCreation,
            unsafe {
                self.device.CreateCommandList(
                    0,
                    D3D12_COMMAND_LIST_TYPE_DIRECT,
                    &allocator.allocator,
                    pipeline_state.as_ref(),
                )
            }
        )?;
        // Lists are created open; the frame ring expects to reset them first.
        gpu_call!(ErrorKind::Submission, unsafe { list.Close() })?;
        Ok(D3d12CommandList {
            list,
            pipeline_state,
        })
    }
}

impl gpu::Device for D3d12Device {
    type Queue = D3d12Queue;
    type Fence = D3d12Fence;
    type Allocator = D3d12Allocator;
    type CommandList = D3d12CommandList;
    type Buffer = D3d12Buffer;

    fn create_command_queue(&self) -> GpuResult<D3d12Queue> {
        let queue: ID3D12CommandQueue = gpu_call!(
            ErrorKind::ResourceCreation,
            unsafe {
                self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                    Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                    ..Default::default()
                })
            }
        )?;
        Ok(D3d12Queue { queue })
    }

    fn create_command_allocator(&self) -> GpuResult<D3d12Allocator> {
        let allocator: ID3D12CommandAllocator = gpu_call!(
            ErrorKind::ResourceCreation,
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
        )?;
        Ok(D3d12Allocator { allocator })
    }

    fn create_command_list(&self, allocator: &D3d12Allocator) -> GpuResult<D3d12CommandList> {
        self.create_command_list_with_state(allocator, None)
    }

    fn create_fence(&self, initial_value: u64) -> GpuResult<D3d12Fence> {
        let fence: ID3D12Fence = gpu_call!(
            ErrorKind::ResourceCreation,
            unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
        )?;
        Ok(D3d12Fence { fence })
    }

    fn create_upload_buffer(&self, byte_size: u64, label: &str) -> GpuResult<D3d12Buffer> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: byte_size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        gpu_call!(
            ErrorKind::ResourceCreation,
            unsafe {
                self.device.CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    D3D12_RESOURCE_STATE_GENERIC_READ,
                    None,
                    &mut resource,
                )
            }
        )?;
        let resource = resource.ok_or_else(|| {
            GpuError::new(ErrorKind::ResourceCreation, E_POINTER.0, "CreateCommittedResource")
                .with_message("no resource returned")
        })?;

        let name = U16CString::from_str_truncate(label);
        if let Err(error) = unsafe { resource.SetName(PCWSTR(name.as_ptr())) } {
            warn!(label, %error, "Failed to name upload buffer");
        }

        Ok(D3d12Buffer {
            resource,
            byte_size,
            mapped: false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct D3d12Queue {
    queue: ID3D12CommandQueue,
}

impl D3d12Queue {
    pub fn raw(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

impl gpu::Queue for D3d12Queue {
    type Fence = D3d12Fence;
    type CommandList = D3d12CommandList;

    fn execute(&self, lists: &[&D3d12CommandList]) -> GpuResult<()> {
        let lists = lists
            .iter()
            .map(|list| gpu_call!(ErrorKind::Submission, list.list.cast::<ID3D12CommandList>()).map(Some))
            .collect::<GpuResult<Vec<_>>>()?;
        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn signal(&self, fence: &D3d12Fence, value: u64) -> GpuResult<()> {
        gpu_call!(ErrorKind::Submission, unsafe { self.queue.Signal(&fence.fence, value) })
    }
}

/// An auto-reset event that is closed when dropped.
struct FenceEvent(HANDLE);

impl FenceEvent {
    fn new() -> GpuResult<Self> {
        let handle = gpu_call!(
            ErrorKind::FenceWait,
            unsafe { CreateEventA(None, false, false, None) }
        )?;
        if handle.is_invalid() {
            let error = windows::core::Error::from_win32();
            return Err(GpuError::new(ErrorKind::FenceWait, error.code().0, "CreateEventA")
                .with_message(error.to_string()));
        }
        Ok(Self(handle))
    }
}

impl Drop for FenceEvent {
    fn drop(&mut self) {
        if let Err(error) = unsafe { CloseHandle(self.0) } {
            warn!(%error, "Failed to close fence event");
        }
    }
}

#[derive(Debug, Clone)]
pub struct D3d12Fence {
    fence: ID3D12Fence,
}

impl D3d12Fence {
    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl gpu::Fence for D3d12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> GpuResult<bool> {
        if self.completed_value() >= value {
            return Ok(true);
        }

        let event = FenceEvent::new()?;
        gpu_call!(
            ErrorKind::FenceWait,
            unsafe { self.fence.SetEventOnCompletion(value, event.0) }
        )?;

        let millis = match timeout {
            None => INFINITE,
            // INFINITE is u32::MAX, so cap just below it.
            Some(timeout) => timeout.as_millis().min(u128::from(INFINITE - 1)) as u32,
        };
        match unsafe { WaitForSingleObject(event.0, millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            other => {
                let error = windows::core::Error::from_win32();
                Err(
                    GpuError::new(ErrorKind::FenceWait, error.code().0, "WaitForSingleObject")
                        .with_message(format!("wait returned {:#x}: {error}", other.0)),
                )
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct D3d12Allocator {
    allocator: ID3D12CommandAllocator,
}

impl D3d12Allocator {
    pub fn raw(&self) -> &ID3D12CommandAllocator {
        &self.allocator
    }
}

impl gpu::CommandAllocator for D3d12Allocator {
    fn reset(&self) -> GpuResult<()> {
        gpu_call!(ErrorKind::Submission, unsafe { self.allocator.Reset() })
    }
}

#[derive(Debug, Clone)]
pub struct D3d12CommandList {
    list: ID3D12GraphicsCommandList,
    pipeline_state: Option<ID3D12PipelineState>,
}

impl D3d12CommandList {
    pub fn raw(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }

    pub fn set_initial_state(&mut self, pipeline_state: Option<ID3D12PipelineState>) {
        self.pipeline_state = pipeline_state;
    }
}

impl gpu::CommandList for D3d12CommandList {
    type Allocator = D3d12Allocator;

    fn reset(&mut self, allocator: &D3d12Allocator) -> GpuResult<()> {
        gpu_call!(
            ErrorKind::Submission,
            unsafe { self.list.Reset(&allocator.allocator, self.pipeline_state.as_ref()) }
        )
    }

    fn close(&mut self) -> GpuResult<()> {
        gpu_call!(ErrorKind::Submission, unsafe { self.list.Close() })
    }
}

/// A committed buffer on the upload heap.
#[derive(Debug)]
pub struct D3d12Buffer {
    resource: ID3D12Resource,
    byte_size: u64,
    mapped: bool,
}

impl D3d12Buffer {
    pub fn raw(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl gpu::UploadBuffer for D3d12Buffer {
    fn byte_size(&self) -> u64 {
        self.byte_size
    }

    fn map(&mut self) -> GpuResult<NonNull<u8>> {
        let mut data: *mut c_void = std::ptr::null_mut();
        // The CPU never reads this memory back.
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        gpu_call!(
            ErrorKind::Mapping,
            unsafe { self.resource.Map(0, Some(&read_range), Some(&mut data)) }
        )?;
        self.mapped = true;
        NonNull::new(data.cast::<u8>()).ok_or_else(|| {
            GpuError::new(ErrorKind::Mapping, E_POINTER.0, "ID3D12Resource::Map")
                .with_message("mapped pointer is null")
        })
    }

    fn unmap(&mut self) {
        if self.mapped {
            unsafe { self.resource.Unmap(0, None) };
            self.mapped = false;
        }
    }

    fn gpu_address(&self) -> GpuAddress {
        GpuAddress(unsafe { self.resource.GetGPUVirtualAddress() })
    }
}

impl Drop for D3d12Buffer {
    fn drop(&mut self) {
        gpu::UploadBuffer::unmap(self);
    }
}
