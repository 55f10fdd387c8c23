pub mod assets;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod geometries;
pub mod gpu;
pub mod logging;
pub mod mesh;
pub mod obj;
pub mod scene;
pub mod shader;
pub mod textures;
pub mod transform;
pub mod utils;

pub use assets::{AssetSource, FileSource, MemorySource};
pub use camera::Camera;
pub use config::{CameraConfig, MotionRig, ObjectConfig, SceneConfig};
pub use error::{Error, Result};
pub use events::{PointerEvent, PointerEventKind, PointerEvents, Subscription};
pub use frame::{DrawMode, FrameClock, FrameContext, FrameState};
pub use geometries::GeometryCache;
pub use gpu::Gpu;
pub use mesh::Mesh;
pub use obj::{GeometryData, parse_obj};
pub use scene::{DebugSink, Scene, SceneState};
pub use shader::ShaderProgram;
pub use textures::TextureCache;
pub use transform::Transform;
