//! Per-frame shared state written by the frame driver and read by the scene.

use glam::{UVec2, Vec2};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// Frame duration the motion constants were tuned for.
pub const TARGET_FRAME_MS: f64 = 1000.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Viewport size in logical (unscaled) units.
    pub logical_size: Vec2,
    pub pixel_ratio: f32,
    /// Seconds since the driver started.
    pub elapsed: f32,
    /// Frame delta divided by [`TARGET_FRAME_MS`].
    pub slow_down_factor: f32,
    /// Latest pointer position, normalized to `[-1, 1]` with +Y up.
    pub pointer_target: Vec2,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            logical_size: Vec2::ZERO,
            pixel_ratio: 1.0,
            elapsed: 0.0,
            slow_down_factor: 1.0,
            pointer_target: Vec2::ZERO,
        }
    }
}

/// Last-writer-wins frame snapshot shared between the driver and the scene.
///
/// Every write bumps a version counter so readers can tell whether anything
/// changed since they last looked.
#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    state: Rc<RefCell<FrameState>>,
    version: Rc<Cell<u64>>,
}

impl FrameContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FrameState {
        *self.state.borrow()
    }

    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub fn update(&self, f: impl FnOnce(&mut FrameState)) {
        f(&mut self.state.borrow_mut());
        self.version.update(|v| v + 1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub elapsed: f32,
    pub slow_down_factor: f32,
}

/// Turns raw timestamps into elapsed time and a frame-rate normalization
/// factor. The first tick after a (re)start only records the timestamp.
#[derive(Debug, Default)]
pub struct FrameClock {
    last_frame_ms: Option<f64>,
    resumed: bool,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call when the loop restarts after being paused, so the pause is not
    /// reported as one enormous frame.
    pub fn resume(&mut self) {
        self.resumed = true;
    }

    pub fn tick(&mut self, now_ms: f64) -> Option<FrameTiming> {
        let last = match self.last_frame_ms {
            Some(last) if !self.resumed => last,
            _ => {
                self.last_frame_ms = Some(now_ms);
                self.resumed = false;
                return None;
            }
        };

        self.last_frame_ms = Some(now_ms);
        Some(FrameTiming {
            elapsed: (now_ms * 0.001) as f32,
            slow_down_factor: ((now_ms - last) / TARGET_FRAME_MS) as f32,
        })
    }
}

/// Maps a device-pixel pointer position to `[-1, 1]` on both axes, Y up.
pub fn normalize_pointer(position: Vec2, size: Vec2) -> Vec2 {
    if size.x <= 0.0 || size.y <= 0.0 {
        return Vec2::ZERO;
    }
    let normalized = position / size * 2.0 - Vec2::ONE;
    Vec2::new(normalized.x, -normalized.y).clamp(Vec2::NEG_ONE, Vec2::ONE)
}

/// Exponential pointer smoothing, scaled by the frame-time factor so the
/// motion speed does not depend on the frame rate.
#[derive(Debug, Clone, Copy)]
pub struct PointerSmoother {
    current: Vec2,
    rate: f32,
}

impl PointerSmoother {
    pub fn new(rate: f32) -> Self {
        Self {
            current: Vec2::ZERO,
            rate,
        }
    }

    pub fn current(&self) -> Vec2 {
        self.current
    }

    pub fn step(&mut self, target: Vec2, slow_down_factor: f32) -> Vec2 {
        let t = (self.rate * slow_down_factor).clamp(0.0, 1.0);
        self.current = self.current.lerp(target, t);
        self.current
    }
}

/// Drawing surface resolution bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    logical_size: Vec2,
    pixel_ratio: f32,
    backing_size: UVec2,
}

impl Viewport {
    pub fn new(backing_size: UVec2) -> Self {
        Self {
            logical_size: backing_size.as_vec2(),
            pixel_ratio: 1.0,
            backing_size: backing_size.max(UVec2::ONE),
        }
    }

    pub fn backing_size(&self) -> UVec2 {
        self.backing_size
    }

    pub fn logical_size(&self) -> Vec2 {
        self.logical_size
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.backing_size.x as f32 / self.backing_size.y as f32
    }

    /// Recomputes the backing store as `logical × ratio`. Returns whether it
    /// changed in either dimension.
    pub fn resize(&mut self, logical_size: Vec2, pixel_ratio: f32) -> bool {
        self.logical_size = logical_size;
        self.pixel_ratio = pixel_ratio;

        let backing = (logical_size * pixel_ratio).round().max(Vec2::ONE).as_uvec2();
        let changed = backing != self.backing_size;
        self.backing_size = backing;
        changed
    }
}

/// Primitive topology used for every mesh in a scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DrawMode {
    #[default]
    Triangles,
    Lines,
    Points,
}

impl DrawMode {
    pub fn next(self) -> Self {
        match self {
            DrawMode::Triangles => DrawMode::Lines,
            DrawMode::Lines => DrawMode::Points,
            DrawMode::Points => DrawMode::Triangles,
        }
    }

    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            DrawMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
            DrawMode::Lines => wgpu::PrimitiveTopology::LineList,
            DrawMode::Points => wgpu::PrimitiveTopology::PointList,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_versions_every_write() {
        let frame = FrameContext::new();
        let reader = frame.clone();
        assert_eq!(reader.version(), 0);

        frame.update(|state| state.pointer_target = Vec2::new(0.5, -0.5));
        frame.update(|state| state.elapsed = 2.0);

        let snapshot = reader.snapshot();
        assert_eq!(reader.version(), 2);
        assert_eq!(snapshot.pointer_target, Vec2::new(0.5, -0.5));
        assert_eq!(snapshot.elapsed, 2.0);
    }

    #[test]
    fn clock_skips_first_tick_and_after_resume() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.tick(1000.0), None);

        let timing = clock.tick(1000.0 + TARGET_FRAME_MS * 2.0).unwrap();
        assert!((timing.slow_down_factor - 2.0).abs() < 1e-4);
        assert!((timing.elapsed - 1.0333).abs() < 1e-3);

        clock.resume();
        assert_eq!(clock.tick(9000.0), None);
        let timing = clock.tick(9000.0 + TARGET_FRAME_MS).unwrap();
        assert!((timing.slow_down_factor - 1.0).abs() < 1e-4);
    }

    #[test]
    fn pointer_is_normalized_with_y_up() {
        let size = Vec2::new(800.0, 600.0);
        assert_eq!(normalize_pointer(Vec2::ZERO, size), Vec2::new(-1.0, 1.0));
        assert_eq!(normalize_pointer(size, size), Vec2::new(1.0, -1.0));
        assert_eq!(normalize_pointer(size / 2.0, size), Vec2::ZERO);
        assert_eq!(normalize_pointer(Vec2::new(5.0, 5.0), Vec2::ZERO), Vec2::ZERO);
    }

    #[test]
    fn smoothing_is_frame_rate_independent_for_first_step() {
        let mut at_60 = PointerSmoother::new(0.1);
        let mut at_30 = PointerSmoother::new(0.1);

        at_60.step(Vec2::ONE, 1.0);
        at_30.step(Vec2::ONE, 2.0);

        assert!((at_60.current().x - 0.1).abs() < 1e-6);
        assert!((at_30.current().x - 0.2).abs() < 1e-6);
    }

    #[test]
    fn smoothing_never_overshoots() {
        let mut smoother = PointerSmoother::new(0.5);
        smoother.step(Vec2::new(1.0, -1.0), 10.0);
        assert_eq!(smoother.current(), Vec2::new(1.0, -1.0));
    }

    #[test]
    fn viewport_resize_tracks_backing_store() {
        let mut viewport = Viewport::new(UVec2::new(1, 1));

        assert!(viewport.resize(Vec2::new(800.0, 600.0), 2.0));
        assert_eq!(viewport.backing_size(), UVec2::new(1600, 1200));

        assert!(viewport.resize(Vec2::new(500.0, 300.0), 2.0));
        assert_eq!(viewport.backing_size(), UVec2::new(1000, 600));
        assert!((viewport.aspect_ratio() - 1000.0 / 600.0).abs() < 1e-6);

        assert!(!viewport.resize(Vec2::new(1000.0, 600.0), 1.0));
    }

    #[test]
    fn viewport_change_in_one_dimension_counts() {
        let mut viewport = Viewport::new(UVec2::new(800, 600));
        assert!(viewport.resize(Vec2::new(800.0, 601.0), 1.0));
    }

    #[test]
    fn viewport_never_collapses_to_zero() {
        let mut viewport = Viewport::new(UVec2::new(800, 600));
        viewport.resize(Vec2::ZERO, 2.0);
        assert_eq!(viewport.backing_size(), UVec2::ONE);
    }

    #[test]
    fn draw_mode_cycles() {
        let mode = DrawMode::default();
        assert_eq!(mode, DrawMode::Triangles);
        assert_eq!(mode.next().next().next(), DrawMode::Triangles);
        assert_eq!(mode.next().to_wgpu(), wgpu::PrimitiveTopology::LineList);
    }
}
