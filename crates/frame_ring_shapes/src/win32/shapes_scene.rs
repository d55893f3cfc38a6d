use std::mem::ManuallyDrop;

use frame_ring::app::Key;
use frame_ring::d3d12::{D3d12Buffer, D3d12CommandList, D3d12Device};
use frame_ring::gpu::Device;
use frame_ring::{
    ErrorKind, FrameRing, FrameTime, GpuError, GpuResult, SampleCommandLine, Scene, UploadRegion,
    gpu_call,
};
use tracing::{debug, info, warn};
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::Interface;

use crate::scene_data::{
    Geometry, RenderSettings, SettingsChange, ShapesFrame, ShapesWorld, Vertex,
    WAVE_VERTEX_COUNT, create_triangle,
};
use crate::win32::pipeline::{
    BACK_BUFFER_FORMAT, OBJECT_CONSTANTS_SLOT, PASS_CONSTANTS_SLOT, PipelineStates,
    create_pipeline_states, create_root_signature,
};

const SWAP_CHAIN_BUFFER_COUNT: u32 = 2;
/// The multisampled target's view sits after the back buffers' views.
const MSAA_RTV_INDEX: u32 = SWAP_CHAIN_BUFFER_COUNT;
const MSAA_SAMPLE_COUNT: u32 = 4;
const CLEAR_COLOR: [f32; 4] = [0.0, 0.2, 0.4, 1.0];

/// The sample scene drawn into a window through Direct3D 12.
pub struct D3d12Shapes {
    // Drops first so in-flight frames drain before anything they use goes.
    ring: FrameRing<D3d12Device, ShapesFrame<D3d12Buffer>>,
    device: D3d12Device,
    swap_chain: IDXGISwapChain3,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_descriptor_size: u32,
    render_targets: Vec<ID3D12Resource>,
    // Drawn into instead of the back buffer while 4x MSAA is on, then
    // resolved into it.
    msaa_target: Option<ID3D12Resource>,
    msaa_supported: bool,
    settings: RenderSettings,
    client_size: (u32, u32),
    viewport: D3D12_VIEWPORT,
    scissor_rect: RECT,
    root_signature: ID3D12RootSignature,
    pipelines: PipelineStates,
    list: D3d12CommandList,
    triangle: UploadRegion<D3d12Buffer, Vertex>,
    world: ShapesWorld,
}

impl D3d12Shapes {
    pub fn new(
        factory: &IDXGIFactory4,
        device: D3d12Device,
        hwnd: HWND,
        client_size: (u32, u32),
        command_line: &SampleCommandLine,
    ) -> crate::demo_error::DemoResult<Self> {
        let (width, height) = client_size;
        let world = ShapesWorld::new(frame_ring::DEFAULT_FRAME_COUNT, width, height);
        let object_count = world.object_count();

        let queue = device.create_command_queue()?;
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: SWAP_CHAIN_BUFFER_COUNT,
            Width: width,
            Height: height,
            Format: BACK_BUFFER_FORMAT,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let swap_chain: IDXGISwapChain1 = unsafe {
            factory.CreateSwapChainForHwnd(queue.raw(), hwnd, &swap_chain_desc, None, None)?
        };
        let swap_chain: IDXGISwapChain3 = swap_chain.cast()?;
        unsafe { factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)? };

        let rtv_heap: ID3D12DescriptorHeap = unsafe {
            device.raw().CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: SWAP_CHAIN_BUFFER_COUNT + 1,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                ..Default::default()
            })
        }?;
        let rtv_descriptor_size = unsafe {
            device
                .raw()
                .GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV)
        };

        let msaa_supported = supports_4x_msaa(&device);
        info!(msaa_supported, "Checked 4x MSAA quality levels");

        let root_signature = create_root_signature(device.raw())?;
        let pipelines = create_pipeline_states(device.raw(), &root_signature)?;
        let settings = RenderSettings::default();

        let ring = FrameRing::new(&device, queue, command_line.wait_policy, |device, _| {
            ShapesFrame::new(device, 1, object_count, WAVE_VERTEX_COUNT)
        })?;
        let list = device.create_command_list_with_state(
            ring.current().allocator(),
            Some(pipelines.get(settings).clone()),
        )?;
        let triangle = create_triangle(&device)?;

        let mut shapes = Self {
            ring,
            device,
            swap_chain,
            rtv_heap,
            rtv_descriptor_size,
            render_targets: Vec::new(),
            msaa_target: None,
            msaa_supported,
            settings,
            client_size,
            viewport: D3D12_VIEWPORT::default(),
            scissor_rect: RECT::default(),
            root_signature,
            pipelines,
            list,
            triangle,
            world,
        };
        shapes.create_render_targets(width, height)?;
        Ok(shapes)
    }

    fn create_render_targets(&mut self, width: u32, height: u32) -> GpuResult<()> {
        self.render_targets.clear();
        for i in 0..SWAP_CHAIN_BUFFER_COUNT {
            let resource: ID3D12Resource = gpu_call!(
                ErrorKind::ResourceCreation,
                unsafe { self.swap_chain.GetBuffer(i) }
            )?;
            unsafe {
                self.device
                    .raw()
                    .CreateRenderTargetView(&resource, None, self.rtv_handle(i));
            }
            self.render_targets.push(resource);
        }

        self.client_size = (width, height);
        self.create_msaa_target()?;

        self.viewport = D3D12_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: width as f32,
            Height: height as f32,
            MinDepth: D3D12_MIN_DEPTH,
            MaxDepth: D3D12_MAX_DEPTH,
        };
        self.scissor_rect = RECT {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        };
        Ok(())
    }

    /// Creates or releases the multisampled target to match the settings.
    fn create_msaa_target(&mut self) -> GpuResult<()> {
        self.msaa_target = None;
        if !self.settings.msaa_4x {
            return Ok(());
        }

        let (width, height) = self.client_size;
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: width as u64,
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: BACK_BUFFER_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: MSAA_SAMPLE_COUNT,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
            ..Default::default()
        };
        let clear_value = D3D12_CLEAR_VALUE {
            Format: BACK_BUFFER_FORMAT,
            Anonymous: D3D12_CLEAR_VALUE_0 { Color: CLEAR_COLOR },
        };
        let mut target: Option<ID3D12Resource> = None;
        gpu_call!(
            ErrorKind::ResourceCreation,
            unsafe {
                self.device.raw().CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &desc,
                    D3D12_RESOURCE_STATE_RESOLVE_SOURCE,
                    Some(&clear_value),
                    &mut target,
                )
            }
        )?;
        let target = target.ok_or_else(|| {
            GpuError::new(ErrorKind::ResourceCreation, E_POINTER.0, "CreateCommittedResource")
                .with_message("no multisampled target returned")
        })?;
        unsafe {
            self.device
                .raw()
                .CreateRenderTargetView(&target, None, self.rtv_handle(MSAA_RTV_INDEX));
        }
        self.msaa_target = Some(target);
        Ok(())
    }

    fn rtv_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() }.ptr
                + (index * self.rtv_descriptor_size) as usize,
        }
    }

    fn present(&self) -> GpuResult<()> {
        gpu_call!(
            ErrorKind::Submission,
            unsafe { self.swap_chain.Present(1, DXGI_PRESENT::default()) }.ok()
        )
    }
}

impl Scene for D3d12Shapes {
    fn update(&mut self, time: FrameTime) -> GpuResult<()> {
        self.world.update(time);
        Ok(())
    }

    fn draw(&mut self, _time: FrameTime) -> GpuResult<()> {
        let back_buffer_index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() };
        let back_buffer = &self.render_targets[back_buffer_index as usize];
        // Multisampled frames draw into their own target and resolve at the end.
        let (target, rtv_handle, target_state) = match &self.msaa_target {
            Some(msaa_target) => (
                msaa_target,
                self.rtv_handle(MSAA_RTV_INDEX),
                D3D12_RESOURCE_STATE_RESOLVE_SOURCE,
            ),
            None => (
                back_buffer,
                self.rtv_handle(back_buffer_index),
                D3D12_RESOURCE_STATE_PRESENT,
            ),
        };
        let resolve = self.msaa_target.is_some();
        // The list resets with the state the current settings draw with.
        self.list
            .set_initial_state(Some(self.pipelines.get(self.settings).clone()));
        let world = &mut self.world;
        let triangle = &self.triangle;
        let root_signature = &self.root_signature;
        let viewport = self.viewport;
        let scissor_rect = self.scissor_rect;

        self.ring.render_frame(&mut self.list, |frame, list, _| {
            world.upload(frame)?;

            let command_list = list.raw();
            unsafe {
                command_list.SetGraphicsRootSignature(root_signature);
                command_list.RSSetViewports(&[viewport]);
                command_list.RSSetScissorRects(&[scissor_rect]);
                command_list.ResourceBarrier(&[transition_barrier(
                    target,
                    target_state,
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                )]);
                command_list.OMSetRenderTargets(1, Some(&rtv_handle), false, None);
                command_list.ClearRenderTargetView(rtv_handle, &CLEAR_COLOR, None);
                command_list.SetGraphicsRootConstantBufferView(
                    PASS_CONSTANTS_SLOT,
                    frame.constants.pass.resource_handle().0,
                );
            }

            for item in world.items() {
                let (vertices, topology) = match item.geometry {
                    Geometry::Triangle => (triangle, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST),
                    Geometry::Wave => (&frame.vertices, D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP),
                };
                let vbv = D3D12_VERTEX_BUFFER_VIEW {
                    BufferLocation: vertices.resource_handle().0,
                    SizeInBytes: vertices.byte_size() as u32,
                    StrideInBytes: vertices.stride() as u32,
                };
                unsafe {
                    command_list.SetGraphicsRootConstantBufferView(
                        OBJECT_CONSTANTS_SLOT,
                        frame.constants.objects.element_address(item.object_index).0,
                    );
                    command_list.IASetPrimitiveTopology(topology);
                    command_list.IASetVertexBuffers(0, Some(&[vbv]));
                    command_list.DrawInstanced(item.vertex_count(), 1, 0, 0);
                }
            }

            unsafe {
                command_list.ResourceBarrier(&[transition_barrier(
                    target,
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                    target_state,
                )]);
                if resolve {
                    command_list.ResourceBarrier(&[transition_barrier(
                        back_buffer,
                        D3D12_RESOURCE_STATE_PRESENT,
                        D3D12_RESOURCE_STATE_RESOLVE_DEST,
                    )]);
                    command_list.ResolveSubresource(
                        back_buffer,
                        0,
                        target,
                        0,
                        BACK_BUFFER_FORMAT,
                    );
                    command_list.ResourceBarrier(&[transition_barrier(
                        back_buffer,
                        D3D12_RESOURCE_STATE_RESOLVE_DEST,
                        D3D12_RESOURCE_STATE_PRESENT,
                    )]);
                }
            }
            Ok(())
        })?;

        self.present()
    }

    fn on_resize(&mut self, width: u32, height: u32) -> GpuResult<()> {
        // The back buffers may still be referenced by queued frames.
        self.ring.flush()?;
        self.render_targets.clear();
        gpu_call!(
            ErrorKind::ResourceCreation,
            unsafe {
                self.swap_chain.ResizeBuffers(
                    SWAP_CHAIN_BUFFER_COUNT,
                    width,
                    height,
                    BACK_BUFFER_FORMAT,
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
            }
        )?;
        self.create_render_targets(width, height)?;
        self.world.set_render_target_size(width, height);
        info!(width, height, "Resized swap chain");
        Ok(())
    }

    fn on_key(&mut self, key: Key) -> GpuResult<()> {
        match self.settings.apply_key(key) {
            Some(SettingsChange::Multisampling) => {
                if self.settings.msaa_4x && !self.msaa_supported {
                    self.settings.msaa_4x = false;
                    warn!("4x MSAA is not supported by this adapter");
                    return Ok(());
                }
                // Queued frames may still draw into the old target.
                self.ring.flush()?;
                self.create_msaa_target()?;
                info!(msaa_4x = self.settings.msaa_4x, "Toggled 4x MSAA");
            }
            Some(SettingsChange::FillMode) => {
                debug!(wireframe = self.settings.wireframe, "Toggled wireframe");
            }
            None => {}
        }
        Ok(())
    }
}

fn supports_4x_msaa(device: &D3d12Device) -> bool {
    let mut levels = D3D12_FEATURE_DATA_MULTISAMPLE_QUALITY_LEVELS {
        Format: BACK_BUFFER_FORMAT,
        SampleCount: MSAA_SAMPLE_COUNT,
        Flags: D3D12_MULTISAMPLE_QUALITY_LEVELS_FLAG_NONE,
        NumQualityLevels: 0,
    };
    let checked = unsafe {
        device.raw().CheckFeatureSupport(
            D3D12_FEATURE_MULTISAMPLE_QUALITY_LEVELS,
            &mut levels as *mut _ as *mut _,
            std::mem::size_of_val(&levels) as u32,
        )
    };
    checked.is_ok() && levels.NumQualityLevels > 0
}

fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: state_before,
                StateAfter: state_after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}
