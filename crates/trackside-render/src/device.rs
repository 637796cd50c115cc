//! [`RenderDevice`] implementation on top of wgpu.

use std::sync::Arc;

use ahash::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};
use trackside_core::gpu::{
    BufferDescriptor, BufferHandle, CompositePass, DeviceError, DeviceLimits, LinePass, RectPass, RectPassKind,
    RenderDevice, TargetBinding, TextureDescriptor, TextureDimension, TextureFormat, TextureHandle, TextureRegion,
};
use trackside_core::profiling::profile_function;

use crate::context::GraphicsContext;
use crate::error::{GraphicsError, Result};
use crate::pipeline::{DEPTH_FORMAT, PassUniforms, Pipelines};

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Uint => wgpu::TextureFormat::R8Uint,
        TextureFormat::Rg8Uint => wgpu::TextureFormat::Rg8Uint,
        TextureFormat::Depth32Float => DEPTH_FORMAT,
    }
}

fn texture_usages(format: TextureFormat, dimension: TextureDimension) -> wgpu::TextureUsages {
    if format.is_depth() {
        return wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
    }
    match dimension {
        TextureDimension::D2 => {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        }
        TextureDimension::D2Array { .. } => {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST
        }
    }
}

/// Formats and usages the renderer creates: render targets, the peel
/// target, depth buffers and the atlas array.
const REQUIRED_FORMATS: [(TextureFormat, TextureDimension); 4] = [
    (TextureFormat::R8Uint, TextureDimension::D2),
    (TextureFormat::Rg8Uint, TextureDimension::D2),
    (TextureFormat::Depth32Float, TextureDimension::D2),
    (TextureFormat::R8Uint, TextureDimension::D2Array { layers: 1 }),
];

fn device_error(error: wgpu::Error) -> DeviceError {
    match error {
        wgpu::Error::OutOfMemory { .. } => DeviceError::OutOfMemory(error.to_string()),
        wgpu::Error::Validation { .. } => DeviceError::Validation(error.to_string()),
        other => DeviceError::Internal(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy)]
enum ClearValue {
    Color(u8),
    Depth(f32),
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: TextureFormat,
    width: u32,
    height: u32,
    layers: u32,
}

#[derive(Default)]
struct Resources {
    textures: HashMap<u32, GpuTexture>,
    buffers: HashMap<u32, wgpu::Buffer>,
    next_id: u32,
}

impl Resources {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// GPU device backed by a shared [`GraphicsContext`].
///
/// Every operation runs inside wgpu error scopes. The first captured error is
/// kept until [`RenderDevice::take_error`] collects it.
pub struct WgpuRenderDevice {
    context: Arc<GraphicsContext>,
    pipelines: Pipelines,
    uniforms: wgpu::Buffer,
    /// Bound as the peel reference when a pass has none.
    empty_depth: wgpu::TextureView,
    resources: Mutex<Resources>,
    error: Mutex<Option<DeviceError>>,
}

impl WgpuRenderDevice {
    /// Build the pipelines on `context`.
    ///
    /// Fails when the adapter cannot render to or sample one of the integer
    /// and depth formats the renderer uses.
    pub fn new(context: Arc<GraphicsContext>) -> Result<Self> {
        for (format, dimension) in REQUIRED_FORMATS {
            let format_wgpu = wgpu_format(format);
            if !context.supports_texture_format(format_wgpu, texture_usages(format, dimension)) {
                return Err(GraphicsError::UnsupportedFormat(format_wgpu));
            }
        }
        let device = context.device();
        let pipelines = Pipelines::new(device)?;

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniforms"),
            size: std::mem::size_of::<PassUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let empty_depth = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Empty Peel Depth"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        debug!("Created wgpu render device");
        Ok(Self {
            context,
            pipelines,
            uniforms,
            empty_depth,
            resources: Mutex::new(Resources::default()),
            error: Mutex::new(None),
        })
    }

    /// Convenience constructor that also creates the graphics context.
    pub fn new_sync() -> Result<Self> {
        Self::new(GraphicsContext::new_owned_sync()?)
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.context
    }

    fn latch(&self, error: DeviceError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Run `op` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, op: impl FnOnce(&wgpu::Device, &wgpu::Queue) -> T) -> T {
        let device = self.context.device();
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = op(device, self.context.queue());
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(error) = validation.or(out_of_memory) {
            self.latch(device_error(error));
        }
        out
    }

    fn unknown_texture(&self, texture: TextureHandle) {
        self.latch(DeviceError::Validation(format!("unknown texture {}", texture.0)));
    }

    fn write_uniforms(&self, queue: &wgpu::Queue, width: u32, height: u32, peeling: bool) {
        let uniforms = PassUniforms {
            screen_size: [width as f32, height as f32],
            peeling: peeling as u32,
            _padding: 0,
        };
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));
    }

    fn clear(&self, texture: TextureHandle, value: ClearValue) {
        self.scoped(|device, queue| {
            let resources = self.resources.lock();
            let Some(gpu) = resources.textures.get(&texture.0) else {
                self.unknown_texture(texture);
                return;
            };
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
            {
                let color_attachment = match value {
                    ClearValue::Color(index) => Some(wgpu::RenderPassColorAttachment {
                        view: &gpu.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: index as f64,
                                g: 0.0,
                                b: 0.0,
                                a: 0.0,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    ClearValue::Depth(_) => None,
                };
                let depth_stencil_attachment = match value {
                    ClearValue::Depth(depth) => Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &gpu.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(depth),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    ClearValue::Color(_) => None,
                };
                let color_attachments = [color_attachment];
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Pass"),
                    color_attachments: if depth_stencil_attachment.is_some() { &[] } else { &color_attachments[..] },
                    depth_stencil_attachment,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            queue.submit(Some(encoder.finish()));
        });
    }

    fn begin_target_pass<'e>(
        encoder: &'e mut wgpu::CommandEncoder,
        label: &str,
        color: &'e wgpu::TextureView,
        depth: Option<&'e wgpu::TextureView>,
    ) -> wgpu::RenderPass<'e> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    fn target_views<'r>(
        &self,
        resources: &'r Resources,
        target: &TargetBinding,
    ) -> Option<(&'r wgpu::TextureView, Option<&'r wgpu::TextureView>)> {
        let Some(color) = resources.textures.get(&target.color.0) else {
            self.unknown_texture(target.color);
            return None;
        };
        let depth = match target.depth {
            Some(handle) => match resources.textures.get(&handle.0) {
                Some(depth) => Some(&depth.view),
                None => {
                    self.unknown_texture(handle);
                    return None;
                }
            },
            None => None,
        };
        Some((&color.view, depth))
    }
}

impl RenderDevice for WgpuRenderDevice {
    fn limits(&self) -> DeviceLimits {
        let limits = self.context.limits();
        DeviceLimits {
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_texture_array_layers: limits.max_texture_array_layers,
        }
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> TextureHandle {
        let layers = desc.dimension.layers();
        let usage = texture_usages(desc.format, desc.dimension);

        let texture = self.scoped(|device, _| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: desc.label,
                size: wgpu::Extent3d {
                    width: desc.width.max(1),
                    height: desc.height.max(1),
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu_format(desc.format),
                usage,
                view_formats: &[],
            })
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(match desc.dimension {
                TextureDimension::D2 => wgpu::TextureViewDimension::D2,
                TextureDimension::D2Array { .. } => wgpu::TextureViewDimension::D2Array,
            }),
            ..Default::default()
        });

        let mut resources = self.resources.lock();
        let id = resources.allocate_id();
        resources.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                format: desc.format,
                width: desc.width.max(1),
                height: desc.height.max(1),
                layers,
            },
        );
        trace!(id, width = desc.width, height = desc.height, layers, "Created texture");
        TextureHandle(id)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        match self.resources.lock().textures.remove(&texture.0) {
            Some(gpu) => gpu.texture.destroy(),
            None => self.unknown_texture(texture),
        }
    }

    fn write_texture(&self, texture: TextureHandle, region: TextureRegion, data: &[u8]) {
        let resources = self.resources.lock();
        let Some(gpu) = resources.textures.get(&texture.0) else {
            self.unknown_texture(texture);
            return;
        };
        self.scoped(|_, queue| {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &gpu.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: region.x,
                        y: region.y,
                        z: region.layer,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(region.width * gpu.format.bytes_per_pixel()),
                    rows_per_image: Some(region.height),
                },
                wgpu::Extent3d {
                    width: region.width,
                    height: region.height,
                    depth_or_array_layers: 1,
                },
            );
        });
    }

    fn copy_texture_layers(&self, src: TextureHandle, dst: TextureHandle, layers: u32) {
        let resources = self.resources.lock();
        let (Some(source), Some(destination)) = (resources.textures.get(&src.0), resources.textures.get(&dst.0)) else {
            self.latch(DeviceError::Validation(format!("copy between unknown textures {} and {}", src.0, dst.0)));
            return;
        };
        self.scoped(|device, queue| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Atlas Copy Encoder"),
            });
            encoder.copy_texture_to_texture(
                source.texture.as_image_copy(),
                destination.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: source.width,
                    height: source.height,
                    depth_or_array_layers: layers,
                },
            );
            queue.submit(Some(encoder.finish()));
        });
    }

    fn clear_color(&self, texture: TextureHandle, value: u8) {
        self.clear(texture, ClearValue::Color(value));
    }

    fn clear_depth(&self, texture: TextureHandle, value: f32) {
        self.clear(texture, ClearValue::Depth(value));
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BufferHandle {
        let size = desc.size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
        let buffer = self.scoped(|device, _| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: desc.label,
                size,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let mut resources = self.resources.lock();
        let id = resources.allocate_id();
        resources.buffers.insert(id, buffer);
        BufferHandle(id)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let resources = self.resources.lock();
        let Some(gpu) = resources.buffers.get(&buffer.0) else {
            self.latch(DeviceError::Validation(format!("unknown buffer {}", buffer.0)));
            return;
        };
        self.scoped(|_, queue| queue.write_buffer(gpu, offset, data));
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        match self.resources.lock().buffers.remove(&buffer.0) {
            Some(gpu) => gpu.destroy(),
            None => self.latch(DeviceError::Validation(format!("unknown buffer {}", buffer.0))),
        }
    }

    fn draw_lines(&self, pass: &LinePass, instances: BufferHandle, count: u32) {
        profile_function!();
        if count == 0 {
            return;
        }
        let resources = self.resources.lock();
        let Some((color, depth)) = self.target_views(&resources, &pass.target) else {
            return;
        };
        let Some(buffer) = resources.buffers.get(&instances.0) else {
            self.latch(DeviceError::Validation(format!("unknown buffer {}", instances.0)));
            return;
        };

        self.scoped(|device, queue| {
            self.write_uniforms(queue, pass.target.width, pass.target.height, false);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Line Bind Group"),
                layout: &self.pipelines.line_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.as_entire_binding(),
                }],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Line Encoder"),
            });
            {
                let mut render_pass = Self::begin_target_pass(&mut encoder, "Line Pass", color, depth);
                render_pass.set_pipeline(&self.pipelines.line);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.set_vertex_buffer(0, buffer.slice(..));
                render_pass.draw(0..2, 0..count);
            }
            queue.submit(Some(encoder.finish()));
        });
    }

    fn draw_rects(&self, pass: &RectPass, instances: BufferHandle, count: u32) {
        profile_function!();
        if count == 0 {
            return;
        }
        let resources = self.resources.lock();
        let Some((color, depth)) = self.target_views(&resources, &pass.target) else {
            return;
        };
        let Some(buffer) = resources.buffers.get(&instances.0) else {
            self.latch(DeviceError::Validation(format!("unknown buffer {}", instances.0)));
            return;
        };
        let (Some(atlases), Some(palette)) = (
            resources.textures.get(&pass.atlases.0),
            resources.textures.get(&pass.palette.0),
        ) else {
            self.latch(DeviceError::Validation("rect pass references unknown textures".into()));
            return;
        };
        let peel_depth = match pass.peel_depth {
            Some(handle) => match resources.textures.get(&handle.0) {
                Some(texture) => Some(&texture.view),
                None => {
                    self.unknown_texture(handle);
                    return;
                }
            },
            None => None,
        };

        let (pipeline, label) = match pass.kind {
            RectPassKind::Opaque => (&self.pipelines.rect_opaque, "Rect Opaque Pass"),
            RectPassKind::Transparent => (&self.pipelines.rect_transparent, "Rect Transparent Pass"),
        };

        self.scoped(|device, queue| {
            self.write_uniforms(queue, pass.target.width, pass.target.height, peel_depth.is_some());
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Rect Bind Group"),
                layout: &self.pipelines.rect_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&atlases.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&palette.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(peel_depth.unwrap_or(&self.empty_depth)),
                    },
                ],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Rect Encoder"),
            });
            {
                let mut render_pass = Self::begin_target_pass(&mut encoder, label, color, depth);
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.pipelines.quad_buffer.slice(..));
                render_pass.set_vertex_buffer(1, buffer.slice(..));
                render_pass.draw(0..4, 0..count);
            }
            queue.submit(Some(encoder.finish()));
        });
    }

    fn apply_transparency(&self, pass: &CompositePass) {
        profile_function!();
        let resources = self.resources.lock();
        let handles = [
            pass.target,
            pass.opaque_color,
            pass.opaque_depth,
            pass.transparent_color,
            pass.transparent_depth,
            pass.palette,
            pass.blend_palette,
        ];
        let mut views = Vec::with_capacity(handles.len());
        for handle in handles {
            match resources.textures.get(&handle.0) {
                Some(texture) => views.push(&texture.view),
                None => {
                    self.unknown_texture(handle);
                    return;
                }
            }
        }

        self.scoped(|device, queue| {
            let entries: Vec<wgpu::BindGroupEntry> = views[1..]
                .iter()
                .enumerate()
                .map(|(binding, view)| wgpu::BindGroupEntry {
                    binding: binding as u32,
                    resource: wgpu::BindingResource::TextureView(view),
                })
                .collect();
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Composite Bind Group"),
                layout: &self.pipelines.composite_layout,
                entries: &entries,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Composite Encoder"),
            });
            {
                let mut render_pass = Self::begin_target_pass(&mut encoder, "Composite Pass", views[0], None);
                render_pass.set_pipeline(&self.pipelines.composite);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }
            queue.submit(Some(encoder.finish()));
        });
    }

    fn read_texture(&self, texture: TextureHandle, layer: u32) -> std::result::Result<Vec<u8>, DeviceError> {
        profile_function!();
        let resources = self.resources.lock();
        let gpu = resources
            .textures
            .get(&texture.0)
            .ok_or_else(|| DeviceError::Validation(format!("read of unknown texture {}", texture.0)))?;
        if layer >= gpu.layers {
            return Err(DeviceError::Validation(format!(
                "read of layer {layer} from texture {} with {} layers",
                texture.0, gpu.layers
            )));
        }

        let device = self.context.device();
        let unpadded_bytes_per_row = gpu.width * gpu.format.bytes_per_pixel();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (bytes_per_row * gpu.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: if gpu.format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(gpu.height),
                },
            },
            wgpu::Extent3d {
                width: gpu.width,
                height: gpu.height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue().submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| DeviceError::Internal(e.to_string()))?;
        rx.recv()
            .map_err(|e| DeviceError::Internal(e.to_string()))?
            .map_err(|e| DeviceError::Internal(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * gpu.height) as usize);
        for row in data.chunks(bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        drop(data);
        buffer.unmap();

        Ok(pixels)
    }

    fn take_error(&self) -> Option<DeviceError> {
        self.error.lock().take()
    }
}

impl Drop for WgpuRenderDevice {
    fn drop(&mut self) {
        let resources = self.resources.get_mut();
        for (_, texture) in resources.textures.drain() {
            texture.texture.destroy();
        }
        for (_, buffer) in resources.buffers.drain() {
            buffer.destroy();
        }
    }
}
