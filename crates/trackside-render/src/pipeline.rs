//! Render pipelines and WGSL shaders of the wgpu backend.
//!
//! The shaders implement the draw rules documented on
//! [`trackside_core::gpu`]; the software mock follows the same rules.

use bytemuck::{Pod, Zeroable};
use trackside_core::gpu::{DrawLineInstance, DrawRectInstance};
use wgpu::util::DeviceExt;

use crate::error::{GraphicsError, Result};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Per-pass uniforms shared by the rect and line shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PassUniforms {
    pub screen_size: [f32; 2],
    pub peeling: u32,
    pub _padding: u32,
}

pub struct Pipelines {
    pub rect_layout: wgpu::BindGroupLayout,
    pub rect_opaque: wgpu::RenderPipeline,
    pub rect_transparent: wgpu::RenderPipeline,
    pub line_layout: wgpu::BindGroupLayout,
    pub line: wgpu::RenderPipeline,
    pub composite_layout: wgpu::BindGroupLayout,
    pub composite: wgpu::RenderPipeline,
    pub quad_buffer: wgpu::Buffer,
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(
    binding: u32,
    sample_type: wgpu::TextureSampleType,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

const UINT: wgpu::TextureSampleType = wgpu::TextureSampleType::Uint;
const DEPTH: wgpu::TextureSampleType = wgpu::TextureSampleType::Depth;
const D2: wgpu::TextureViewDimension = wgpu::TextureViewDimension::D2;

const RECT_INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 11] = wgpu::vertex_attr_array![
    1 => Sint32x4,   // clip
    2 => Float32x4,  // tex_colour_bounds
    3 => Float32x4,  // tex_mask_bounds
    4 => Sint32x4,   // bounds
    5 => Sint32x3,   // palettes
    6 => Sint32,     // tex_colour_atlas
    7 => Sint32,     // tex_mask_atlas
    8 => Uint32,     // flags
    9 => Uint32,     // colour
    10 => Sint32,    // depth
    11 => Float32,   // zoom
];

const LINE_INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Sint32x4,   // clip
    1 => Sint32x4,   // bounds
    2 => Uint32,     // colour
    3 => Sint32,     // depth
];

fn depth_state(compare: wgpu::CompareFunction) -> Option<wgpu::DepthStencilState> {
    Some(wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: true,
        depth_compare: compare,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    })
}

impl Pipelines {
    /// Compile the shaders and build every pipeline.
    pub fn new(device: &wgpu::Device) -> Result<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipelines = Self::create(device);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(GraphicsError::ShaderCompilation(error.to_string()));
        }
        Ok(pipelines)
    }

    fn create(device: &wgpu::Device) -> Self {
        let rect_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Rect Bind Group Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT),
                texture_entry(1, UINT, wgpu::TextureViewDimension::D2Array),
                texture_entry(2, UINT, D2),
                texture_entry(3, DEPTH, D2),
            ],
        });
        let line_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Line Bind Group Layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Bind Group Layout"),
            entries: &[
                texture_entry(0, UINT, D2),
                texture_entry(1, DEPTH, D2),
                texture_entry(2, UINT, D2),
                texture_entry(3, DEPTH, D2),
                texture_entry(4, UINT, D2),
                texture_entry(5, UINT, D2),
            ],
        });

        let rect_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Rect Shader"),
            source: wgpu::ShaderSource::Wgsl(RECT_SHADER.into()),
        });
        let line_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Line Shader"),
            source: wgpu::ShaderSource::Wgsl(LINE_SHADER.into()),
        });
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITE_SHADER.into()),
        });

        let rect_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Rect Pipeline Layout"),
            bind_group_layouts: &[&rect_layout],
            push_constant_ranges: &[],
        });

        let rect_buffers = [
            // Unit quad vertices
            wgpu::VertexBufferLayout {
                array_stride: 8,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 0,
                    shader_location: 0,
                }],
            },
            // Rect instances
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<DrawRectInstance>() as u64,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &RECT_INSTANCE_ATTRIBUTES,
            },
        ];

        let rect_pipeline = |label: &str, entry_point: &str, format: wgpu::TextureFormat, compare| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&rect_pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &rect_shader,
                    entry_point: Some("vs_main"),
                    buffers: &rect_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &rect_shader,
                    entry_point: Some(entry_point),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: depth_state(compare),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };
        let rect_opaque = rect_pipeline(
            "Rect Opaque Pipeline",
            "fs_opaque",
            wgpu::TextureFormat::R8Uint,
            wgpu::CompareFunction::Less,
        );
        let rect_transparent = rect_pipeline(
            "Rect Transparent Pipeline",
            "fs_transparent",
            wgpu::TextureFormat::Rg8Uint,
            wgpu::CompareFunction::Greater,
        );

        let line_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Line Pipeline Layout"),
            bind_group_layouts: &[&line_layout],
            push_constant_ranges: &[],
        });
        let line = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Line Pipeline"),
            layout: Some(&line_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &line_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<DrawLineInstance>() as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &LINE_INSTANCE_ATTRIBUTES,
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &line_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::R8Uint,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: depth_state(wgpu::CompareFunction::Less),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let composite_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Composite Pipeline Layout"),
            bind_group_layouts: &[&composite_layout],
            push_constant_ranges: &[],
        });
        let composite = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Composite Pipeline"),
            layout: Some(&composite_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &composite_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &composite_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::R8Uint,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Unit quad
        let quad_vertices: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Rect Quad Buffer"),
            contents: bytemuck::cast_slice(&quad_vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            rect_layout,
            rect_opaque,
            rect_transparent,
            line_layout,
            line,
            composite_layout,
            composite,
            quad_buffer,
        }
    }
}

const RECT_SHADER: &str = r#"
struct Uniforms {
    screen_size: vec2<f32>,
    peeling: u32,
    _padding: u32,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var atlas: texture_2d_array<u32>;
@group(0) @binding(2) var palette: texture_2d<u32>;
@group(0) @binding(3) var peel_depth: texture_depth_2d;

const DEPTH_STEPS: f32 = 16777216.0;

const FLAG_PALETTE_COUNT: u32 = 3u;
const FLAG_NO_TEXTURE: u32 = 4u;
const FLAG_MASK: u32 = 8u;
const FLAG_CROSS_HATCH: u32 = 16u;
const FLAG_TEXT: u32 = 32u;
const FLAG_BLEND: u32 = 64u;

struct VertexInput {
    @location(0) quad: vec2<f32>,
    @location(1) clip: vec4<i32>,
    @location(2) tex_colour_bounds: vec4<f32>,
    @location(3) tex_mask_bounds: vec4<f32>,
    @location(4) bounds: vec4<i32>,
    @location(5) palettes: vec3<i32>,
    @location(6) tex_colour_atlas: i32,
    @location(7) tex_mask_atlas: i32,
    @location(8) flags: u32,
    @location(9) colour: u32,
    @location(10) depth: i32,
    @location(11) zoom: f32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) @interpolate(flat) clip: vec4<i32>,
    @location(1) @interpolate(flat) tex_colour_bounds: vec4<f32>,
    @location(2) @interpolate(flat) tex_mask_bounds: vec4<f32>,
    @location(3) @interpolate(flat) bounds: vec4<i32>,
    @location(4) @interpolate(flat) palettes: vec3<i32>,
    @location(5) @interpolate(flat) atlases: vec2<i32>,
    @location(6) @interpolate(flat) flags: u32,
    @location(7) @interpolate(flat) colour: u32,
    @location(8) @interpolate(flat) zoom: f32,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    let bounds = vec4<f32>(input.bounds);
    let pixel = mix(bounds.xy, bounds.zw, input.quad);
    let ndc = vec2<f32>(
        pixel.x / uniforms.screen_size.x * 2.0 - 1.0,
        1.0 - pixel.y / uniforms.screen_size.y * 2.0,
    );
    let depth = 1.0 - (f32(input.depth) + 1.0) / DEPTH_STEPS;

    var out: VertexOutput;
    out.position = vec4<f32>(ndc, depth, 1.0);
    out.clip = input.clip;
    out.tex_colour_bounds = input.tex_colour_bounds;
    out.tex_mask_bounds = input.tex_mask_bounds;
    out.bounds = input.bounds;
    out.palettes = input.palettes;
    out.atlases = vec2<i32>(input.tex_colour_atlas, input.tex_mask_atlas);
    out.flags = input.flags;
    out.colour = input.colour;
    out.zoom = input.zoom;
    return out;
}

// Atlas texel under a screen pixel, stepping `zoom` texels per pixel from
// the image origin. Pixels past the image read as transparent.
fn sample_atlas(layer: i32, tex_bounds: vec4<f32>, bounds: vec4<i32>, px: vec2<i32>, zoom: f32) -> u32 {
    let dims = vec2<f32>(textureDimensions(atlas));
    let origin = vec2<i32>(round(tex_bounds.xy * dims));
    let end = vec2<i32>(round(tex_bounds.zw * dims));
    let texel = origin + vec2<i32>(floor(vec2<f32>(px - bounds.xy) * zoom));
    if any(texel < origin) || any(texel >= end) {
        return 0u;
    }
    return textureLoad(atlas, texel, max(layer, 0), 0).r;
}

fn lookup(row: i32, index: u32) -> u32 {
    return textureLoad(palette, vec2<i32>(i32(index), row), 0).r;
}

fn in_range(index: u32, lo: u32, hi: u32) -> bool {
    return index >= lo && index <= hi;
}

fn remap(index: u32, count: u32, rows: vec3<i32>) -> u32 {
    if count == 0u {
        return index;
    }
    if count == 1u || in_range(index, 243u, 254u) {
        return lookup(rows.x, index);
    }
    if in_range(index, 202u, 213u) {
        return lookup(rows.y, index);
    }
    if count >= 3u && in_range(index, 46u, 57u) {
        return lookup(rows.z, index);
    }
    return index;
}

// Palette index of a fragment, or -1 when it is discarded.
fn shade(input: VertexOutput) -> i32 {
    let frag = input.position.xy;
    let px = vec2<i32>(floor(frag));
    if px.x < input.clip.x || px.y < input.clip.y || px.x >= input.clip.z || px.y >= input.clip.w {
        return -1;
    }

    var index: u32;
    if (input.flags & FLAG_NO_TEXTURE) != 0u {
        index = input.colour & 0xFFu;
    } else {
        let texel = sample_atlas(input.atlases.x, input.tex_colour_bounds, input.bounds, px, input.zoom);
        if texel == 0u {
            return -1;
        }
        if (input.flags & FLAG_TEXT) != 0u {
            index = input.colour & 0xFFu;
        } else {
            index = texel;
        }
    }

    if (input.flags & FLAG_MASK) != 0u
        && sample_atlas(input.atlases.y, input.tex_mask_bounds, input.bounds, px, input.zoom) == 0u {
        return -1;
    }
    if (input.flags & FLAG_CROSS_HATCH) != 0u && ((px.x + px.y) & 1) == 0 {
        return -1;
    }

    return i32(remap(index, input.flags & FLAG_PALETTE_COUNT, input.palettes));
}

@fragment
fn fs_opaque(input: VertexOutput) -> @location(0) vec4<u32> {
    let index = shade(input);
    if index < 0 {
        discard;
    }
    return vec4<u32>(u32(index), 0u, 0u, 0u);
}

@fragment
fn fs_transparent(input: VertexOutput) -> @location(0) vec4<u32> {
    let index = shade(input);
    if index < 0 {
        discard;
    }
    if uniforms.peeling != 0u {
        let reference = textureLoad(peel_depth, vec2<i32>(floor(input.position.xy)), 0);
        if input.position.z >= reference {
            discard;
        }
    }
    var mode = 1u;
    if (input.flags & FLAG_BLEND) != 0u {
        mode = 2u;
    }
    return vec4<u32>(u32(index), mode, 0u, 0u);
}
"#;

const LINE_SHADER: &str = r#"
struct Uniforms {
    screen_size: vec2<f32>,
    peeling: u32,
    _padding: u32,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;

const DEPTH_STEPS: f32 = 16777216.0;

struct LineInput {
    @location(0) clip: vec4<i32>,
    @location(1) bounds: vec4<i32>,
    @location(2) colour: u32,
    @location(3) depth: i32,
}

struct LineOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) @interpolate(flat) clip: vec4<i32>,
    @location(1) @interpolate(flat) colour: u32,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex: u32, input: LineInput) -> LineOutput {
    let bounds = vec4<f32>(input.bounds);
    var point = bounds.xy;
    if vertex == 1u {
        point = bounds.zw;
    }
    let pixel = point + vec2<f32>(0.5);
    let ndc = vec2<f32>(
        pixel.x / uniforms.screen_size.x * 2.0 - 1.0,
        1.0 - pixel.y / uniforms.screen_size.y * 2.0,
    );

    var out: LineOutput;
    out.position = vec4<f32>(ndc, 1.0 - (f32(input.depth) + 1.0) / DEPTH_STEPS, 1.0);
    out.clip = input.clip;
    out.colour = input.colour;
    return out;
}

@fragment
fn fs_main(input: LineOutput) -> @location(0) vec4<u32> {
    let px = vec2<i32>(floor(input.position.xy));
    if px.x < input.clip.x || px.y < input.clip.y || px.x >= input.clip.z || px.y >= input.clip.w {
        discard;
    }
    return vec4<u32>(input.colour & 0xFFu, 0u, 0u, 0u);
}
"#;

const COMPOSITE_SHADER: &str = r#"
@group(0) @binding(0) var opaque_colour: texture_2d<u32>;
@group(0) @binding(1) var opaque_depth: texture_depth_2d;
@group(0) @binding(2) var transparent_colour: texture_2d<u32>;
@group(0) @binding(3) var transparent_depth: texture_depth_2d;
@group(0) @binding(4) var palette: texture_2d<u32>;
@group(0) @binding(5) var blend_palette: texture_2d<u32>;

@vertex
fn vs_main(@builtin(vertex_index) vertex: u32) -> @builtin(position) vec4<f32> {
    // Full-screen triangle
    let uv = vec2<f32>(f32((vertex << 1u) & 2u), f32(vertex & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<u32> {
    let px = vec2<i32>(floor(position.xy));
    let base = textureLoad(opaque_colour, px, 0).r;
    let peel = textureLoad(transparent_colour, px, 0);
    let behind = textureLoad(opaque_depth, px, 0);
    let front = textureLoad(transparent_depth, px, 0);

    var colour = base;
    if peel.g != 0u && front < behind {
        if peel.g == 1u {
            colour = textureLoad(palette, vec2<i32>(i32(base), i32(peel.r) + 1), 0).r;
        } else if peel.g == 2u {
            colour = textureLoad(blend_palette, vec2<i32>(i32(peel.r), i32(base)), 0).r;
        }
    }
    return vec4<u32>(colour, 0u, 0u, 0u);
}
"#;
