//! Mock implementation of RenderDevice for testing.
//!
//! The mock records every call and keeps texture contents in memory. Draws are
//! executed by a small software rasterizer that follows the same rules as the
//! wgpu shaders, so tests can assert on rendered palette indices.

use ahash::HashMap;
use parking_lot::Mutex;
use trackside_core::geometry::Bounds;
use trackside_core::gpu::*;

/// Records a device call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    CreateTexture {
        id: u32,
        width: u32,
        height: u32,
        layers: u32,
        format: TextureFormat,
    },
    DestroyTexture {
        id: u32,
    },
    WriteTexture {
        id: u32,
        region: TextureRegion,
    },
    CopyTextureLayers {
        src: u32,
        dst: u32,
        layers: u32,
    },
    ClearColor {
        id: u32,
        value: u8,
    },
    ClearDepth {
        id: u32,
        value: f32,
    },
    CreateBuffer {
        id: u32,
        size: u64,
    },
    WriteBuffer {
        id: u32,
        offset: u64,
        size: usize,
    },
    DestroyBuffer {
        id: u32,
    },
    DrawLines {
        target: u32,
        count: u32,
    },
    DrawRects {
        target: u32,
        kind: RectPassKind,
        count: u32,
        peeling: bool,
    },
    ApplyTransparency {
        target: u32,
    },
    ReadTexture {
        id: u32,
        layer: u32,
    },
}

#[derive(Debug, Clone)]
enum Texels {
    Color(Vec<u8>),
    Depth(Vec<f32>),
}

/// Mock textures stored in the device.
#[derive(Debug, Clone)]
struct MockTexture {
    width: u32,
    height: u32,
    layers: u32,
    format: TextureFormat,
    texels: Texels,
}

impl MockTexture {
    fn new(desc: &TextureDescriptor) -> Self {
        let layers = desc.dimension.layers();
        let pixels = (desc.width * desc.height * layers) as usize;
        let texels = if desc.format.is_depth() {
            Texels::Depth(vec![0.0; pixels])
        } else {
            Texels::Color(vec![0; pixels * desc.format.bytes_per_pixel() as usize])
        };
        Self {
            width: desc.width,
            height: desc.height,
            layers,
            format: desc.format,
            texels,
        }
    }

    fn channels(&self) -> usize {
        self.format.bytes_per_pixel() as usize
    }

    fn pixel_index(&self, layer: u32, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 || layer >= self.layers {
            return None;
        }
        Some(((layer * self.height + y as u32) * self.width + x as u32) as usize)
    }

    fn color(&self, layer: u32, x: i32, y: i32) -> u8 {
        match (&self.texels, self.pixel_index(layer, x, y)) {
            (Texels::Color(data), Some(index)) => data[index * self.channels()],
            _ => 0,
        }
    }

    fn depth(&self, x: i32, y: i32) -> f32 {
        match (&self.texels, self.pixel_index(0, x, y)) {
            (Texels::Depth(data), Some(index)) => data[index],
            _ => 0.0,
        }
    }

    fn texels_per_layer(&self) -> usize {
        (self.width * self.height) as usize
    }
}

#[derive(Default)]
struct MockState {
    textures: HashMap<u32, MockTexture>,
    buffers: HashMap<u32, Vec<u8>>,
    next_id: u32,
    error: Option<DeviceError>,
}

impl MockState {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Latch the first error, later ones are dropped until it is taken.
    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(DeviceError::Validation(message));
        }
    }
}

/// Mock implementation of RenderDevice for testing.
///
/// # Example
///
/// ```rust
/// use trackside_core::gpu::{BufferDescriptor, RenderDevice};
/// use trackside_test_utils::MockRenderDevice;
///
/// let mock = MockRenderDevice::new();
/// let buffer = mock.create_buffer(&BufferDescriptor { label: None, size: 64 });
/// mock.write_buffer(buffer, 0, &[0u8; 16]);
///
/// assert_eq!(mock.count_buffer_creates(), 1);
/// assert_eq!(mock.call_count(), 2);
/// ```
pub struct MockRenderDevice {
    /// Recorded calls for verification
    calls: Mutex<Vec<RenderCall>>,
    state: Mutex<MockState>,
    limits: DeviceLimits,
}

impl MockRenderDevice {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(MockState::default()),
            limits,
        }
    }

    fn record(&self, call: RenderCall) {
        self.calls.lock().push(call);
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Get total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn count(&self, predicate: impl Fn(&RenderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn count_texture_creates(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CreateTexture { .. }))
    }

    pub fn count_texture_writes(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::WriteTexture { .. }))
    }

    pub fn count_layer_copies(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CopyTextureLayers { .. }))
    }

    pub fn count_buffer_creates(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CreateBuffer { .. }))
    }

    pub fn count_line_draws(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::DrawLines { .. }))
    }

    /// Count rect draws of one pass kind.
    pub fn count_rect_draws(&self, kind: RectPassKind) -> usize {
        self.count(|call| matches!(call, RenderCall::DrawRects { kind: k, .. } if *k == kind))
    }

    pub fn count_composites(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::ApplyTransparency { .. }))
    }

    /// Number of textures created and not yet destroyed.
    pub fn live_texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Layer count of a live texture.
    pub fn texture_layers(&self, texture: TextureHandle) -> Option<u32> {
        self.state.lock().textures.get(&texture.0).map(|t| t.layers)
    }

    /// First channel of a colour texel on layer 0.
    pub fn pixel(&self, texture: TextureHandle, x: i32, y: i32) -> Option<u8> {
        self.layer_pixel(texture, 0, x, y)
    }

    pub fn layer_pixel(&self, texture: TextureHandle, layer: u32, x: i32, y: i32) -> Option<u8> {
        let state = self.state.lock();
        let tex = state.textures.get(&texture.0)?;
        let index = tex.pixel_index(layer, x, y)?;
        match &tex.texels {
            Texels::Color(data) => Some(data[index * tex.channels()]),
            Texels::Depth(_) => None,
        }
    }

    pub fn depth(&self, texture: TextureHandle, x: i32, y: i32) -> Option<f32> {
        let state = self.state.lock();
        let tex = state.textures.get(&texture.0)?;
        let index = tex.pixel_index(0, x, y)?;
        match &tex.texels {
            Texels::Depth(data) => Some(data[index]),
            Texels::Color(_) => None,
        }
    }

    /// Latch an error as if a device operation had failed.
    pub fn inject_error(&self, error: DeviceError) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            state.error = Some(error);
        }
    }

    fn read_instances<T: bytemuck::Pod>(
        state: &mut MockState,
        buffer: BufferHandle,
        count: u32,
    ) -> Option<Vec<T>> {
        let stride = std::mem::size_of::<T>();
        let needed = stride * count as usize;
        let Some(bytes) = state.buffers.get(&buffer.0) else {
            state.fail(format!("draw from unknown buffer {}", buffer.0));
            return None;
        };
        if bytes.len() < needed {
            state.fail(format!(
                "buffer {} holds {} bytes, draw needs {}",
                buffer.0,
                bytes.len(),
                needed
            ));
            return None;
        }
        Some(
            bytes[..needed]
                .chunks_exact(stride)
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        )
    }

    fn snapshot(state: &mut MockState, texture: TextureHandle, what: &str) -> Option<MockTexture> {
        match state.textures.get(&texture.0) {
            Some(tex) => Some(tex.clone()),
            None => {
                state.fail(format!("{what} references unknown texture {}", texture.0));
                None
            }
        }
    }

    /// Write one fragment through the depth test of `target`.
    fn write_fragment(
        state: &mut MockState,
        target: &TargetBinding,
        x: i32,
        y: i32,
        depth: f32,
        passes: impl Fn(f32, f32) -> bool,
        value: [u8; 2],
    ) {
        if let Some(depth_handle) = target.depth {
            let Some(depth_tex) = state.textures.get_mut(&depth_handle.0) else {
                return;
            };
            let Some(index) = depth_tex.pixel_index(0, x, y) else {
                return;
            };
            let Texels::Depth(data) = &mut depth_tex.texels else {
                return;
            };
            if !passes(depth, data[index]) {
                return;
            }
            data[index] = depth;
        }

        let Some(color_tex) = state.textures.get_mut(&target.color.0) else {
            return;
        };
        let channels = color_tex.channels();
        let Some(index) = color_tex.pixel_index(0, x, y) else {
            return;
        };
        if let Texels::Color(data) = &mut color_tex.texels {
            data[index * channels..(index + 1) * channels].copy_from_slice(&value[..channels]);
        }
    }
}

impl Default for MockRenderDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Atlas texel under pixel `(x, y)` of a rect, stepping `zoom` texels per
/// pixel from the image origin. Pixels past the image read as transparent.
fn sample(atlas: &MockTexture, layer: i32, tex_bounds: [f32; 4], bounds: &Bounds, zoom: f32, x: i32, y: i32) -> u8 {
    let width = atlas.width as f32;
    let height = atlas.height as f32;
    let image = Bounds::new(
        (tex_bounds[0] * width).round() as i32,
        (tex_bounds[1] * height).round() as i32,
        (tex_bounds[2] * width).round() as i32,
        (tex_bounds[3] * height).round() as i32,
    );
    let texel_x = image.left + ((x - bounds.left) as f32 * zoom).floor() as i32;
    let texel_y = image.top + ((y - bounds.top) as f32 * zoom).floor() as i32;
    if !image.contains(texel_x, texel_y) {
        return 0;
    }
    atlas.color(layer.max(0) as u32, texel_x, texel_y)
}

fn lookup(palette: &MockTexture, row: i32, index: u8) -> u8 {
    palette.color(0, index as i32, row)
}

fn remap(index: u8, count: u32, rows: [i32; 3], palette: &MockTexture) -> u8 {
    match count {
        0 => index,
        1 => lookup(palette, rows[0], index),
        _ => REMAP_RANGES
            .iter()
            .take(count as usize)
            .position(|&(lo, hi)| (lo..=hi).contains(&index))
            .map_or(index, |range| lookup(palette, rows[range], index)),
    }
}

/// Shade one rect fragment, `None` means discard.
fn shade_rect(
    instance: &DrawRectInstance,
    kind: RectPassKind,
    x: i32,
    y: i32,
    atlas: &MockTexture,
    palette: &MockTexture,
) -> Option<[u8; 2]> {
    let flags = instance.rect_flags();
    let bounds = Bounds::from_array(instance.bounds);

    let mut index = if flags.contains(RectFlags::NO_TEXTURE) {
        instance.colour as u8
    } else {
        let texel = sample(
            atlas,
            instance.tex_colour_atlas,
            instance.tex_colour_bounds,
            &bounds,
            instance.zoom,
            x,
            y,
        );
        if texel == 0 {
            return None;
        }
        if flags.contains(RectFlags::TEXT) {
            instance.colour as u8
        } else {
            texel
        }
    };

    if flags.contains(RectFlags::MASK)
        && sample(
            atlas,
            instance.tex_mask_atlas,
            instance.tex_mask_bounds,
            &bounds,
            instance.zoom,
            x,
            y,
        ) == 0
    {
        return None;
    }

    if flags.contains(RectFlags::CROSS_HATCH) && (x + y) & 1 == 0 {
        return None;
    }

    index = remap(index, flags.palette_count(), instance.palettes, palette);

    Some(match kind {
        RectPassKind::Opaque => [index, 0],
        RectPassKind::Transparent if flags.contains(RectFlags::BLEND) => [index, transparency_mode::BLEND],
        RectPassKind::Transparent => [index, transparency_mode::REMAP],
    })
}

/// Pixels of a line from `(x1, y1)` to `(x2, y2)`, both endpoints included.
fn line_pixels(x1: i32, y1: i32, x2: i32, y2: i32) -> Vec<(i32, i32)> {
    let dx = (x2 - x1).abs();
    let dy = -(y2 - y1).abs();
    let sx = if x1 < x2 { 1 } else { -1 };
    let sy = if y1 < y2 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x1, y1);
    let mut pixels = Vec::with_capacity((dx - dy + 1) as usize);
    loop {
        pixels.push((x, y));
        if x == x2 && y == y2 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    pixels
}

impl RenderDevice for MockRenderDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> TextureHandle {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        if desc.width > self.limits.max_texture_dimension_2d
            || desc.height > self.limits.max_texture_dimension_2d
            || desc.dimension.layers() > self.limits.max_texture_array_layers
        {
            state.fail(format!(
                "texture {:?} of {}x{}x{} exceeds device limits",
                desc.label,
                desc.width,
                desc.height,
                desc.dimension.layers()
            ));
        }
        state.textures.insert(id, MockTexture::new(desc));
        drop(state);

        self.record(RenderCall::CreateTexture {
            id,
            width: desc.width,
            height: desc.height,
            layers: desc.dimension.layers(),
            format: desc.format,
        });
        TextureHandle(id)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.record(RenderCall::DestroyTexture { id: texture.0 });
        let mut state = self.state.lock();
        if state.textures.remove(&texture.0).is_none() {
            state.fail(format!("destroy of unknown texture {}", texture.0));
        }
    }

    fn write_texture(&self, texture: TextureHandle, region: TextureRegion, data: &[u8]) {
        self.record(RenderCall::WriteTexture {
            id: texture.0,
            region,
        });
        let mut state = self.state.lock();
        let Some(tex) = state.textures.get_mut(&texture.0) else {
            state.fail(format!("write to unknown texture {}", texture.0));
            return;
        };
        let channels = tex.channels();
        let fits = region.x + region.width <= tex.width
            && region.y + region.height <= tex.height
            && region.layer < tex.layers;
        let expected = (region.width * region.height) as usize * channels;
        if !fits || data.len() < expected {
            state.fail(format!("write of {region:?} does not fit texture {}", texture.0));
            return;
        }
        let (width, height) = (tex.width, tex.height);
        let Texels::Color(texels) = &mut tex.texels else {
            state.fail(format!("write to depth texture {}", texture.0));
            return;
        };
        let row_bytes = region.width as usize * channels;
        for row in 0..region.height {
            let dst_pixel = ((region.layer * height + region.y + row) * width + region.x) as usize;
            let dst = dst_pixel * channels;
            let src = row as usize * row_bytes;
            texels[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
    }

    fn copy_texture_layers(&self, src: TextureHandle, dst: TextureHandle, layers: u32) {
        self.record(RenderCall::CopyTextureLayers {
            src: src.0,
            dst: dst.0,
            layers,
        });
        let mut state = self.state.lock();
        let Some(source) = Self::snapshot(&mut state, src, "layer copy") else {
            return;
        };
        let Some(dest) = state.textures.get_mut(&dst.0) else {
            state.fail(format!("layer copy references unknown texture {}", dst.0));
            return;
        };
        if source.width != dest.width
            || source.height != dest.height
            || source.format != dest.format
            || layers > source.layers.min(dest.layers)
        {
            state.fail(format!("incompatible layer copy {} -> {}", src.0, dst.0));
            return;
        }
        let count = source.texels_per_layer() * layers as usize;
        match (&source.texels, &mut dest.texels) {
            (Texels::Color(from), Texels::Color(to)) => {
                let bytes = count * source.channels();
                to[..bytes].copy_from_slice(&from[..bytes]);
            }
            (Texels::Depth(from), Texels::Depth(to)) => to[..count].copy_from_slice(&from[..count]),
            _ => {}
        }
    }

    fn clear_color(&self, texture: TextureHandle, value: u8) {
        self.record(RenderCall::ClearColor {
            id: texture.0,
            value,
        });
        let mut state = self.state.lock();
        let cleared = match state.textures.get_mut(&texture.0) {
            Some(tex) => {
                let channels = tex.channels();
                match &mut tex.texels {
                    Texels::Color(data) => {
                        for texel in data.chunks_exact_mut(channels) {
                            texel.fill(0);
                            texel[0] = value;
                        }
                        true
                    }
                    Texels::Depth(_) => false,
                }
            }
            None => false,
        };
        if !cleared {
            state.fail(format!("colour clear of invalid texture {}", texture.0));
        }
    }

    fn clear_depth(&self, texture: TextureHandle, value: f32) {
        self.record(RenderCall::ClearDepth {
            id: texture.0,
            value,
        });
        let mut state = self.state.lock();
        match state.textures.get_mut(&texture.0).map(|t| &mut t.texels) {
            Some(Texels::Depth(data)) => data.fill(value),
            _ => state.fail(format!("depth clear of invalid texture {}", texture.0)),
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BufferHandle {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.buffers.insert(id, vec![0; desc.size as usize]);
        drop(state);
        self.record(RenderCall::CreateBuffer {
            id,
            size: desc.size,
        });
        BufferHandle(id)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.record(RenderCall::WriteBuffer {
            id: buffer.0,
            offset,
            size: data.len(),
        });
        let mut state = self.state.lock();
        let Some(bytes) = state.buffers.get_mut(&buffer.0) else {
            state.fail(format!("write to unknown buffer {}", buffer.0));
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            state.fail(format!("write of {} bytes overflows buffer {}", data.len(), buffer.0));
            return;
        }
        bytes[start..end].copy_from_slice(data);
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.record(RenderCall::DestroyBuffer { id: buffer.0 });
        let mut state = self.state.lock();
        if state.buffers.remove(&buffer.0).is_none() {
            state.fail(format!("destroy of unknown buffer {}", buffer.0));
        }
    }

    fn draw_lines(&self, pass: &LinePass, instances: BufferHandle, count: u32) {
        self.record(RenderCall::DrawLines {
            target: pass.target.color.0,
            count,
        });
        let mut state = self.state.lock();
        let Some(lines) = Self::read_instances::<DrawLineInstance>(&mut state, instances, count) else {
            return;
        };
        let target = pass.target;
        let screen = Bounds::new(0, 0, target.width as i32, target.height as i32);
        for line in &lines {
            let clip = Bounds::from_array(line.clip).intersect(&screen);
            let depth = depth_value(line.depth);
            let [x1, y1, x2, y2] = line.bounds;
            for (x, y) in line_pixels(x1, y1, x2, y2) {
                if clip.contains(x, y) {
                    Self::write_fragment(&mut state, &target, x, y, depth, |d, current| d < current, [
                        line.colour as u8,
                        0,
                    ]);
                }
            }
        }
    }

    fn draw_rects(&self, pass: &RectPass, instances: BufferHandle, count: u32) {
        self.record(RenderCall::DrawRects {
            target: pass.target.color.0,
            kind: pass.kind,
            count,
            peeling: pass.peel_depth.is_some(),
        });
        let mut state = self.state.lock();
        let Some(rects) = Self::read_instances::<DrawRectInstance>(&mut state, instances, count) else {
            return;
        };
        let Some(atlas) = Self::snapshot(&mut state, pass.atlases, "rect draw") else {
            return;
        };
        let Some(palette) = Self::snapshot(&mut state, pass.palette, "rect draw") else {
            return;
        };
        let peel = match pass.peel_depth {
            Some(handle) => match Self::snapshot(&mut state, handle, "peel") {
                Some(tex) => Some(tex),
                None => return,
            },
            None => None,
        };

        let target = pass.target;
        let screen = Bounds::new(0, 0, target.width as i32, target.height as i32);
        for rect in &rects {
            let area = Bounds::from_array(rect.bounds)
                .intersect(&Bounds::from_array(rect.clip))
                .intersect(&screen);
            if area.is_empty() {
                continue;
            }
            let depth = depth_value(rect.depth);
            for y in area.top..area.bottom {
                for x in area.left..area.right {
                    let Some(value) = shade_rect(rect, pass.kind, x, y, &atlas, &palette) else {
                        continue;
                    };
                    if let Some(peel) = &peel
                        && depth >= peel.depth(x, y)
                    {
                        continue;
                    }
                    match pass.kind {
                        RectPassKind::Opaque => {
                            Self::write_fragment(&mut state, &target, x, y, depth, |d, current| d < current, value)
                        }
                        RectPassKind::Transparent => {
                            Self::write_fragment(&mut state, &target, x, y, depth, |d, current| d > current, value)
                        }
                    }
                }
            }
        }
    }

    fn apply_transparency(&self, pass: &CompositePass) {
        self.record(RenderCall::ApplyTransparency {
            target: pass.target.0,
        });
        let mut state = self.state.lock();
        let inputs = [
            pass.opaque_color,
            pass.opaque_depth,
            pass.transparent_color,
            pass.transparent_depth,
            pass.palette,
            pass.blend_palette,
        ];
        let mut snapshots = Vec::with_capacity(inputs.len());
        for handle in inputs {
            match Self::snapshot(&mut state, handle, "composite") {
                Some(tex) => snapshots.push(tex),
                None => return,
            }
        }
        let [opaque, opaque_depth, transparent, transparent_depth, palette, blend] = &snapshots[..] else {
            return;
        };

        let Some(target) = state.textures.get_mut(&pass.target.0) else {
            state.fail(format!("composite into unknown texture {}", pass.target.0));
            return;
        };
        let Texels::Color(out) = &mut target.texels else {
            return;
        };
        let Texels::Color(transparent_texels) = &transparent.texels else {
            return;
        };
        for y in 0..pass.height as i32 {
            for x in 0..pass.width as i32 {
                let base = opaque.color(0, x, y);
                let mut colour = base;
                if let Some(index) = transparent.pixel_index(0, x, y) {
                    let value = transparent_texels[index * 2];
                    let mode = transparent_texels[index * 2 + 1];
                    if mode != transparency_mode::NONE && transparent_depth.depth(x, y) < opaque_depth.depth(x, y) {
                        colour = match mode {
                            transparency_mode::REMAP => lookup(palette, value as i32 + 1, base),
                            transparency_mode::BLEND => {
                                blend.color(0, value as i32, base as i32)
                            }
                            _ => base,
                        };
                    }
                }
                let out_index = (y as u32 * pass.width + x as u32) as usize;
                if out_index < out.len() {
                    out[out_index] = colour;
                }
            }
        }
    }

    fn read_texture(&self, texture: TextureHandle, layer: u32) -> Result<Vec<u8>, DeviceError> {
        self.record(RenderCall::ReadTexture {
            id: texture.0,
            layer,
        });
        let state = self.state.lock();
        let tex = state
            .textures
            .get(&texture.0)
            .ok_or_else(|| DeviceError::Validation(format!("read of unknown texture {}", texture.0)))?;
        if layer >= tex.layers {
            return Err(DeviceError::Validation(format!(
                "read of layer {layer} from texture {} with {} layers",
                texture.0, tex.layers
            )));
        }
        let per_layer = tex.texels_per_layer();
        let start = per_layer * layer as usize;
        Ok(match &tex.texels {
            Texels::Color(data) => {
                let channels = tex.channels();
                data[start * channels..(start + per_layer) * channels].to_vec()
            }
            Texels::Depth(data) => bytemuck::cast_slice(&data[start..start + per_layer]).to_vec(),
        })
    }

    fn take_error(&self) -> Option<DeviceError> {
        self.state.lock().error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackside_core::palette::PALETTE_SIZE;

    fn target(mock: &MockRenderDevice, width: u32, height: u32) -> TargetBinding {
        let color = mock.create_texture(&TextureDescriptor::new_2d("color", width, height, TextureFormat::R8Uint));
        let depth = mock.create_texture(&TextureDescriptor::new_2d("depth", width, height, TextureFormat::Depth32Float));
        mock.clear_depth(depth, 1.0);
        TargetBinding {
            color,
            depth: Some(depth),
            width,
            height,
        }
    }

    fn identity_palette(mock: &MockRenderDevice) -> TextureHandle {
        let palette = mock.create_texture(&TextureDescriptor::new_2d("palette", PALETTE_SIZE as u32, 2, TextureFormat::R8Uint));
        let identity: Vec<u8> = (0..=255).collect();
        for row in 0..2 {
            mock.write_texture(
                palette,
                TextureRegion {
                    x: 0,
                    y: row,
                    width: 256,
                    height: 1,
                    layer: 0,
                },
                &identity,
            );
        }
        palette
    }

    fn upload<T: bytemuck::Pod>(mock: &MockRenderDevice, data: &[T]) -> BufferHandle {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = mock.create_buffer(&BufferDescriptor {
            label: None,
            size: bytes.len() as u64,
        });
        mock.write_buffer(buffer, 0, bytes);
        buffer
    }

    #[test]
    fn test_fill_rect_respects_clip_and_bounds() {
        let mock = MockRenderDevice::new();
        let target = target(&mock, 8, 8);
        let atlas = mock.create_texture(&TextureDescriptor::new_array("atlas", 4, 4, 1, TextureFormat::R8Uint));
        let palette = identity_palette(&mock);

        let rect = DrawRectInstance {
            clip: [0, 0, 3, 8],
            bounds: [1, 1, 5, 5],
            colour: 9,
            flags: RectFlags::NO_TEXTURE.bits(),
            ..Default::default()
        };
        let buffer = upload(&mock, &[rect]);
        mock.draw_rects(
            &RectPass {
                target,
                kind: RectPassKind::Opaque,
                atlases: atlas,
                palette,
                peel_depth: None,
            },
            buffer,
            1,
        );

        assert_eq!(mock.pixel(target.color, 1, 1), Some(9));
        assert_eq!(mock.pixel(target.color, 2, 4), Some(9));
        assert_eq!(mock.pixel(target.color, 3, 2), Some(0));
        assert_eq!(mock.pixel(target.color, 0, 0), Some(0));
        assert!(mock.take_error().is_none());
    }

    #[test]
    fn test_opaque_depth_keeps_latest_draw() {
        let mock = MockRenderDevice::new();
        let target = target(&mock, 4, 4);
        let atlas = mock.create_texture(&TextureDescriptor::new_array("atlas", 4, 4, 1, TextureFormat::R8Uint));
        let palette = identity_palette(&mock);

        let first = DrawRectInstance {
            clip: [0, 0, 4, 4],
            bounds: [0, 0, 4, 4],
            colour: 1,
            flags: RectFlags::NO_TEXTURE.bits(),
            depth: 0,
            ..Default::default()
        };
        let second = DrawRectInstance {
            colour: 2,
            depth: 1,
            ..first
        };
        // Submitted out of order, depth still decides.
        let buffer = upload(&mock, &[second, first]);
        mock.draw_rects(
            &RectPass {
                target,
                kind: RectPassKind::Opaque,
                atlases: atlas,
                palette,
                peel_depth: None,
            },
            buffer,
            2,
        );
        assert_eq!(mock.pixel(target.color, 2, 2), Some(2));
    }

    #[test]
    fn test_line_is_clipped() {
        let mock = MockRenderDevice::new();
        let target = target(&mock, 8, 8);
        let line = DrawLineInstance {
            clip: [0, 0, 4, 8],
            bounds: [0, 2, 7, 2],
            colour: 5,
            ..Default::default()
        };
        let buffer = upload(&mock, &[line]);
        mock.draw_lines(&LinePass { target }, buffer, 1);

        assert_eq!(mock.pixel(target.color, 0, 2), Some(5));
        assert_eq!(mock.pixel(target.color, 3, 2), Some(5));
        assert_eq!(mock.pixel(target.color, 4, 2), Some(0));
        assert_eq!(mock.count_line_draws(), 1);
    }

    #[test]
    fn test_errors_are_latched_and_taken_once() {
        let mock = MockRenderDevice::new();
        mock.write_buffer(BufferHandle(99), 0, &[1, 2, 3]);
        mock.destroy_texture(TextureHandle(42));

        let error = mock.take_error();
        assert!(matches!(error, Some(DeviceError::Validation(msg)) if msg.contains("99")));
        assert!(mock.take_error().is_none());
    }

    #[test]
    fn test_copy_layers_preserves_contents() {
        let mock = MockRenderDevice::new();
        let old = mock.create_texture(&TextureDescriptor::new_array("old", 2, 2, 1, TextureFormat::R8Uint));
        mock.clear_color(old, 3);
        let new = mock.create_texture(&TextureDescriptor::new_array("new", 2, 2, 2, TextureFormat::R8Uint));
        mock.copy_texture_layers(old, new, 1);

        assert_eq!(mock.layer_pixel(new, 0, 1, 1), Some(3));
        assert_eq!(mock.layer_pixel(new, 1, 1, 1), Some(0));
        assert_eq!(mock.count_layer_copies(), 1);
    }

    #[test]
    fn test_clear_color_sets_first_channel_only() {
        let mock = MockRenderDevice::new();
        let texture = mock.create_texture(&TextureDescriptor::new_2d("peel", 2, 1, TextureFormat::Rg8Uint));
        mock.clear_color(texture, 9);
        assert_eq!(mock.read_texture(texture, 0).unwrap(), vec![9, 0, 9, 0]);
        assert!(mock.take_error().is_none());
    }
}
