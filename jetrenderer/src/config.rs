//! Scene configuration. The defaults reproduce the two-jet demo.

use crate::camera::{ProjectionParams, ViewParams};
use glam::{Vec2, Vec3};

/// Per-object response to the smoothed pointer and elapsed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionRig {
    /// `rotation.z = pointer.x * rotate_z`
    pub rotate_z: f32,
    /// `rotation.x = pointer.y * rotate_x`
    pub rotate_x: f32,
    /// Multiplies `(pointer.x, pointer.y, pointer.y)`.
    pub position_scale: Vec3,
    pub offset: Vec3,
    /// Angular speed of the vertical float, in radians per second.
    pub float_speed: f32,
    pub float_amplitude: f32,
}

impl MotionRig {
    pub const STILL: Self = Self {
        rotate_z: 0.0,
        rotate_x: 0.0,
        position_scale: Vec3::ZERO,
        offset: Vec3::ZERO,
        float_speed: 0.0,
        float_amplitude: 0.0,
    };

    /// Returns `(rotation, position)` for a pointer in `[-1, 1]` and elapsed
    /// seconds `t`. Rotation around Y is left at zero.
    pub fn apply(&self, pointer: Vec2, t: f32) -> (Vec3, Vec3) {
        let rotation = Vec3::new(pointer.y * self.rotate_x, 0.0, pointer.x * self.rotate_z);

        let float = (t * self.float_speed).sin() * self.float_amplitude;
        let position = Vec3::new(pointer.x, pointer.y, pointer.y) * self.position_scale
            + self.offset
            + Vec3::Y * float;

        (rotation, position)
    }
}

impl Default for MotionRig {
    fn default() -> Self {
        Self::STILL
    }
}

/// One drawable: a geometry id, the texture sampled as `u_image` and how it moves.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectConfig {
    pub geometry: String,
    pub texture: String,
    pub motion: MotionRig,
}

impl ObjectConfig {
    pub fn new(geometry: impl Into<String>, texture: impl Into<String>) -> Self {
        Self {
            geometry: geometry.into(),
            texture: texture.into(),
            motion: MotionRig::default(),
        }
    }

    pub fn with_motion(mut self, motion: MotionRig) -> Self {
        self.motion = motion;
        self
    }

    pub fn efa() -> Self {
        Self::new(
            "/public/assets/models/efa/efa.obj",
            "/public/assets/models/efa/efa.webp",
        )
        .with_motion(MotionRig {
            rotate_z: -0.4,
            rotate_x: 3.2,
            position_scale: Vec3::new(-0.5, -0.1, -0.25),
            offset: Vec3::new(0.0, -0.03, -0.02),
            float_speed: 1.2,
            float_amplitude: 0.035,
        })
    }

    pub fn f22() -> Self {
        Self::new(
            "/public/assets/models/f22/f22.obj",
            "/public/assets/models/f22/f22.webp",
        )
        .with_motion(MotionRig {
            rotate_z: 0.8,
            rotate_x: -1.2,
            position_scale: Vec3::new(0.5, 0.1, 0.2),
            offset: Vec3::new(0.0, 0.03, -0.05),
            float_speed: 1.6,
            float_amplitude: 0.02,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraConfig {
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Eye offset per unit of smoothed pointer movement.
    pub pointer_sway: Vec2,
}

impl CameraConfig {
    pub fn projection(&self, aspect_ratio: f32) -> ProjectionParams {
        ProjectionParams {
            fov: self.fov,
            aspect_ratio,
            near: self.near,
            far: self.far,
        }
    }

    /// Look-at parameters with the eye swayed by `pointer`.
    pub fn view(&self, pointer: Vec2) -> ViewParams {
        ViewParams {
            eye: Some(self.eye + (pointer * self.pointer_sway).extend(0.0)),
            target: Some(self.target),
            up: Some(self.up),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 45.0_f32.to_radians(),
            near: 0.1,
            far: 100.0,
            eye: Vec3::new(0.0, 0.0, 1.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            pointer_sway: Vec2::new(0.08, 0.04),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub objects: Vec<ObjectConfig>,
    pub camera: CameraConfig,
    /// Lerp rate per 60 Hz frame for the pointer.
    pub pointer_smoothing: f32,
    /// Render into an offscreen target and composite it onto the surface.
    pub post_process: bool,
    pub clear_color: wgpu::Color,
}

impl SceneConfig {
    pub fn geometry_ids(&self) -> Vec<String> {
        self.objects.iter().map(|object| object.geometry.clone()).collect()
    }

    pub fn texture_ids(&self) -> Vec<String> {
        self.objects.iter().map(|object| object.texture.clone()).collect()
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            objects: vec![ObjectConfig::efa(), ObjectConfig::f22()],
            camera: CameraConfig::default(),
            pointer_smoothing: 0.08,
            post_process: true,
            clear_color: wgpu::Color::TRANSPARENT,
        }
    }
}
