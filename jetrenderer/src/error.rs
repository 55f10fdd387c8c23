//! Error types.
//!
//! Construction-time failures (no GPU, broken shaders, meshes without
//! geometry) surface as [`Error`]. Load failures and other conditions the
//! renderer can live with are logged where they happen and never reach the
//! caller.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("failed to request adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("surface has no supported format")]
    UnsupportedSurface,

    #[error("failed to acquire frame: {0}")]
    Frame(#[from] wgpu::SurfaceError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error("failed to schedule asset loads: {0}")]
    Spawn(#[from] futures::task::SpawnError),

    #[error("cannot build mesh: geometry `{0}` is not available")]
    MissingGeometry(String),

    #[error("scene has been destroyed")]
    Destroyed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    #[error("{stage} shader failed to compile:\n{message}")]
    Compile {
        stage: &'static str,
        message: String,
    },

    #[error("{stage} shader has no `{entry}` entry point")]
    MissingEntryPoint {
        stage: &'static str,
        entry: &'static str,
    },

    #[error("program failed to link: {0}")]
    Link(String),
}

#[derive(Error, Debug)]
pub enum TextureError {
    #[error("render target `{name}` is incomplete: {reason}")]
    IncompleteTarget { name: String, reason: String },

    #[error("texture `{0}` already exists")]
    Duplicate(String),

    #[error("no render target named `{0}`")]
    UnknownTarget(String),

    #[error("texture cache has been destroyed")]
    Destroyed,
}

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("asset `{0}` not found")]
    NotFound(String),

    #[error("failed to read `{id}`: {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("asset `{0}` is not valid UTF-8")]
    Utf8(String),

    #[error("failed to decode image `{id}`: {source}")]
    Decode {
        id: String,
        #[source]
        source: image::ImageError,
    },

    #[error("asset worker unavailable: {0}")]
    Worker(String),
}
