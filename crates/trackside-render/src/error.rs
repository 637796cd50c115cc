use thiserror::Error;
use trackside_core::gpu::DeviceError;
use trackside_core::sprite::PixelDataSizeError;

/// Fatal renderer errors.
///
/// Per-call misses (undecodable sprites, empty rects) are not errors and never
/// show up here; GPU diagnostics are logged and drained instead.
#[derive(Error, Debug)]
pub enum GraphicsError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create device: {0}")]
    DeviceRequest(String),

    #[error("atlas texture array needs {requested} layers, the limit is {limit}")]
    AtlasLayersExhausted { requested: u32, limit: u32 },

    #[error("atlas layer size {size} exceeds the device maximum of {max}")]
    AtlasTooLarge { size: u32, max: u32 },

    #[error("texture format {0:?} is not renderable and sampleable on this adapter")]
    UnsupportedFormat(wgpu::TextureFormat),

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("invalid image data: {0}")]
    PixelData(#[from] PixelDataSizeError),

    #[error("readback failed: {0}")]
    Readback(#[from] DeviceError),
}

pub type Result<T> = std::result::Result<T, GraphicsError>;
