use tracing::error;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::core::*;

use widestring::U16CString;

use crate::demo_error::DemoResult;
use crate::scene_data::RenderSettings;

const SHADERS_HLSL: &str = include_str!("shaders.hlsl");

/// Root parameter slot of the per-object constants (`b0`).
pub const OBJECT_CONSTANTS_SLOT: u32 = 0;
/// Root parameter slot of the per-pass constants (`b1`).
pub const PASS_CONSTANTS_SLOT: u32 = 1;

pub const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

/// Two root constant buffer views, so every draw binds its object constants
/// straight from the frame slot's upload region.
pub fn create_root_signature(device: &ID3D12Device) -> DemoResult<ID3D12RootSignature> {
    let root_cbv = |register: u32| D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            Descriptor: D3D12_ROOT_DESCRIPTOR {
                ShaderRegister: register,
                RegisterSpace: 0,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };
    let parameters = [
        root_cbv(OBJECT_CONSTANTS_SLOT),
        root_cbv(PASS_CONSTANTS_SLOT),
    ];
    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        ..Default::default()
    };

    let mut signature_blob = None;
    let mut error_blob = None;
    let serialized = unsafe {
        D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut signature_blob,
            Some(&mut error_blob),
        )
    };
    if let Err(e) = serialized {
        if let Some(message) = error_blob.as_ref().map(blob_text) {
            error!("Root signature error: {message}");
        }
        return Err(e.into());
    }
    let signature_blob = signature_blob
        .ok_or_else(|| eyre::eyre!("D3D12SerializeRootSignature returned no blob"))?;

    let root_signature = unsafe {
        device.CreateRootSignature(
            0,
            std::slice::from_raw_parts(
                signature_blob.GetBufferPointer() as *const u8,
                signature_blob.GetBufferSize(),
            ),
        )
    }?;
    Ok(root_signature)
}

/// Every pipeline state the sample can draw with, one per combination of
/// [`RenderSettings`].
pub struct PipelineStates {
    // Indexed by [msaa_4x][wireframe].
    states: [[ID3D12PipelineState; 2]; 2],
}

impl PipelineStates {
    pub fn get(&self, settings: RenderSettings) -> &ID3D12PipelineState {
        &self.states[settings.msaa_4x as usize][settings.wireframe as usize]
    }
}

pub fn create_pipeline_states(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
) -> DemoResult<PipelineStates> {
    let compile_flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        0
    };
    let vertex_shader = compile_shader(s!("VSMain"), s!("vs_5_0"), compile_flags)?;
    let pixel_shader = compile_shader(s!("PSMain"), s!("ps_5_0"), compile_flags)?;

    let create = |msaa_4x: bool, wireframe: bool| {
        let settings = RenderSettings { msaa_4x, wireframe };
        let pso = create_pipeline_state(
            device,
            root_signature,
            &vertex_shader,
            &pixel_shader,
            settings,
        )?;
        let name = U16CString::from_str_truncate(settings.pipeline_label());
        unsafe { pso.SetName(PCWSTR(name.as_ptr()))? };
        DemoResult::Ok(pso)
    };
    Ok(PipelineStates {
        states: [
            [create(false, false)?, create(false, true)?],
            [create(true, false)?, create(true, true)?],
        ],
    })
}

fn create_pipeline_state(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    vertex_shader: &ID3DBlob,
    pixel_shader: &ID3DBlob,
    settings: RenderSettings,
) -> DemoResult<ID3D12PipelineState> {
    let input_element_descs: [D3D12_INPUT_ELEMENT_DESC; 2] = [
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            ..Default::default()
        },
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: s!("COLOR"),
            Format: DXGI_FORMAT_R32G32B32A32_FLOAT,
            AlignedByteOffset: 12,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            ..Default::default()
        },
    ];

    let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
    rtv_formats[0] = BACK_BUFFER_FORMAT;

    let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: unsafe { vertex_shader.GetBufferPointer() },
            BytecodeLength: unsafe { vertex_shader.GetBufferSize() },
        },
        PS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: unsafe { pixel_shader.GetBufferPointer() },
            BytecodeLength: unsafe { pixel_shader.GetBufferSize() },
        },
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: input_element_descs.as_ptr(),
            NumElements: input_element_descs.len() as u32,
        },
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: if settings.wireframe {
                D3D12_FILL_MODE_WIREFRAME
            } else {
                D3D12_FILL_MODE_SOLID
            },
            // The spinner and the wave strip are seen from both sides.
            CullMode: D3D12_CULL_MODE_NONE,
            DepthClipEnable: TRUE,
            MultisampleEnable: settings.msaa_4x.into(),
            ..Default::default()
        },
        BlendState: D3D12_BLEND_DESC {
            AlphaToCoverageEnable: FALSE,
            IndependentBlendEnable: FALSE,
            RenderTarget: [D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: FALSE,
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                ..Default::default()
            }; 8],
        },
        DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: FALSE,
            StencilEnable: FALSE,
            ..Default::default()
        },
        SampleMask: u32::MAX,
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        NumRenderTargets: 1,
        RTVFormats: rtv_formats,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: settings.sample_count(),
            Quality: 0,
        },
        ..Default::default()
    };

    let pso = unsafe { device.CreateGraphicsPipelineState(&pso_desc) }?;
    Ok(pso)
}

fn compile_shader(entry_point: PCSTR, target: PCSTR, flags: u32) -> DemoResult<ID3DBlob> {
    let mut shader_blob = None;
    let mut error_blob = None;
    let result = unsafe {
        D3DCompile(
            SHADERS_HLSL.as_ptr().cast(),
            SHADERS_HLSL.len(),
            s!("shaders.hlsl"),
            None,
            None,
            entry_point,
            target,
            flags,
            0,
            &mut shader_blob,
            Some(&mut error_blob),
        )
    };

    if let Err(e) = result {
        let entry_point = unsafe { entry_point.to_string() }.unwrap_or_default();
        let target = unsafe { target.to_string() }.unwrap_or_default();
        if let Some(message) = error_blob.as_ref().map(blob_text) {
            error!(entry_point, target, "Shader compile error: {message}");
        }
        return Err(e.into());
    }
    Ok(shader_blob.ok_or_else(|| eyre::eyre!("D3DCompile returned no bytecode"))?)
}

fn blob_text(blob: &ID3DBlob) -> String {
    unsafe {
        String::from_utf8_lossy(std::slice::from_raw_parts(
            blob.GetBufferPointer() as *const u8,
            blob.GetBufferSize(),
        ))
        .into_owned()
    }
}
