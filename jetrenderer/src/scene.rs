//! Per-frame orchestration: owns the context, the caches, the camera and the
//! drawable objects, and renders them either straight to the surface or
//! through an offscreen target followed by a full-screen composite.

use crate::{
    assets::AssetSource,
    camera::Camera,
    config::{CameraConfig, ObjectConfig, SceneConfig},
    error::{Error, Result},
    events::{PointerEventKind, PointerEvents, Subscription},
    frame::{DrawMode, FrameContext, PointerSmoother, Viewport},
    geometries::GeometryCache,
    gpu::Gpu,
    mesh::Mesh,
    obj::GeometryData,
    shader::{ShaderProgram, TargetFormats, TextureBinding, builtin},
    textures::{DEPTH_FORMAT, DepthBuffer, TARGET_COLOR_FORMAT, TextureCache},
};
use futures::task::{LocalSpawn, LocalSpawnExt};
use glam::{UVec2, Vec2};
use std::{cell::Cell, rc::Rc};

/// Offscreen color target the objects are drawn into when post-processing.
pub const SCENE_TARGET: &str = "scene_color";

/// Receives short status strings, e.g. the backing store size.
pub trait DebugSink {
    fn update_debug(&self, text: &str);
}

impl<F: Fn(&str)> DebugSink for F {
    fn update_debug(&self, text: &str) {
        self(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    /// Waiting for the geometry batch; nothing but the clear color is drawn.
    Loading,
    Ready,
    Destroyed,
}

struct SceneObject {
    config: ObjectConfig,
    program: ShaderProgram,
    /// Built once the geometry cache is ready. Stays `None` if the geometry
    /// failed to load.
    mesh: Option<Mesh>,
}

struct Composite {
    program: ShaderProgram,
    quad: Mesh,
}

pub struct Scene {
    gpu: Gpu,
    config: SceneConfig,
    frame: FrameContext,
    viewport: Viewport,
    camera: Camera,
    pointer: PointerSmoother,
    draw_mode: Rc<Cell<DrawMode>>,
    geometries: GeometryCache,
    textures: TextureCache,
    objects: Vec<SceneObject>,
    composite: Option<Composite>,
    depth: DepthBuffer,
    subscription: Option<Subscription>,
    debug: Option<Box<dyn DebugSink>>,
    state: SceneState,
}

impl Scene {
    /// Builds the scene and schedules both asset batches on `spawner`.
    /// Construction never waits for them; meshes appear once geometry is ready.
    pub fn new(
        gpu: Gpu,
        frame: FrameContext,
        events: &PointerEvents,
        spawner: &impl LocalSpawn,
        source: Rc<dyn AssetSource>,
        config: SceneConfig,
        debug: Option<Box<dyn DebugSink>>,
    ) -> Result<Self> {
        let geometries = GeometryCache::new();
        let textures = TextureCache::new(&gpu.device, &gpu.queue);

        spawner.spawn_local(geometries.load(source.clone(), &config.geometry_ids()))?;
        spawner.spawn_local(textures.load(source, &config.texture_ids()))?;

        let objects = config
            .objects
            .iter()
            .map(|object| -> Result<SceneObject> {
                let mut program = ShaderProgram::new(
                    &gpu.device,
                    &gpu.queue,
                    builtin::DEFAULT_VERTEX,
                    builtin::DEFAULT_FRAGMENT,
                    vec![TextureBinding::new(&object.texture, "u_image")],
                )?;
                program.uniforms_mut().set("u_time", 0.0);

                Ok(SceneObject {
                    config: object.clone(),
                    program,
                    mesh: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let viewport = Viewport::new(gpu.size());
        let backing = viewport.backing_size();

        let mut camera = Camera::default();
        camera.update_projection_matrix(config.camera.projection(viewport.aspect_ratio()));
        camera.update_view_matrix(config.camera.view(Vec2::ZERO));

        let composite = if config.post_process {
            create_composite(&gpu, &textures, backing)?
        } else {
            None
        };

        let draw_mode = Rc::new(Cell::new(DrawMode::default()));
        let subscription = cycle_draw_mode_on_pointer_down(events, draw_mode.clone());

        log::debug!(
            "scene created with {} objects, post-processing {}",
            objects.len(),
            if composite.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            depth: DepthBuffer::new(&gpu.device, backing.x, backing.y),
            pointer: PointerSmoother::new(config.pointer_smoothing),
            gpu,
            config,
            frame,
            viewport,
            camera,
            draw_mode,
            geometries,
            textures,
            objects,
            composite,
            subscription: Some(subscription),
            debug,
            state: SceneState::Loading,
        })
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn draw_mode(&self) -> DrawMode {
        self.draw_mode.get()
    }

    pub fn geometries(&self) -> &GeometryCache {
        &self.geometries
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    /// Recomputes the backing store as `logical_size × pixel_ratio`. Surface,
    /// depth buffer and offscreen target are only reallocated when it changed;
    /// the camera projection is always refreshed.
    pub fn on_resize(&mut self, logical_size: Vec2, pixel_ratio: f32) {
        if self.state == SceneState::Destroyed {
            return;
        }

        let changed = resize_viewport(
            &mut self.viewport,
            &mut self.camera,
            &self.config.camera,
            &self.textures,
            self.debug.as_deref(),
            logical_size,
            pixel_ratio,
        );
        if changed {
            let backing = self.viewport.backing_size();
            self.gpu.resize(backing);

            self.depth.release();
            self.depth = DepthBuffer::new(&self.gpu.device, backing.x, backing.y);
        }
    }

    /// Advances one frame: smooths the pointer, moves the camera and objects,
    /// then renders. Surface loss is recovered from by reconfiguring; running
    /// out of memory is returned as an error.
    pub fn update(&mut self) -> Result<()> {
        if self.state == SceneState::Destroyed {
            return Err(Error::Destroyed);
        }

        let frame = self.frame.snapshot();
        let pointer = self
            .pointer
            .step(frame.pointer_target, frame.slow_down_factor);

        self.camera.update_view_matrix(self.config.camera.view(pointer));
        self.build_meshes();

        for object in &mut self.objects {
            object.program.uniforms_mut().set("u_time", frame.elapsed);
            if let Some(mesh) = &mut object.mesh {
                let (rotation, position) = object.config.motion.apply(pointer, frame.elapsed);
                mesh.transform.rotation = rotation;
                mesh.transform.position = position;
            }
        }
        if let Some(composite) = &mut self.composite {
            composite.program.uniforms_mut().set("u_time", frame.elapsed);
        }

        self.render()
    }

    fn build_meshes(&mut self) {
        if self.state != SceneState::Loading || !self.geometries.is_ready() {
            return;
        }

        for object in &mut self.objects {
            let id = &object.config.geometry;
            let geometry = self.geometries.geometry(id);
            let mesh = Mesh::new(
                &self.gpu.device,
                &self.gpu.queue,
                id,
                geometry.as_deref(),
                &object.program,
            );
            match mesh {
                Ok(mesh) => object.mesh = Some(mesh),
                Err(err) => log::error!("{err}, object will not be drawn"),
            }
        }

        self.state = SceneState::Ready;
        log::info!(
            "scene ready: {}/{} objects have meshes",
            self.objects.iter().filter(|object| object.mesh.is_some()).count(),
            self.objects.len()
        );
    }

    fn render(&mut self) -> Result<()> {
        let output = match self.gpu.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("surface lost, reconfiguring");
                self.gpu.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("timed out waiting for the surface, skipping frame");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let surface_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Scene Encoder"),
            });

        let mode = self.draw_mode.get();
        let clear_color = self.config.clear_color;
        let surface_format = self.gpu.format();

        match &mut self.composite {
            Some(composite) => {
                let target = self
                    .textures
                    .with_render_target(SCENE_TARGET, |target| {
                        (target.color.view.clone(), target.depth.view.clone())
                    });

                if let Some((color, depth)) = target {
                    let mut pass =
                        begin_pass(&mut encoder, "Scene Pass", &color, Some(&depth), clear_color);
                    let formats = TargetFormats {
                        color: TARGET_COLOR_FORMAT,
                        depth: Some(DEPTH_FORMAT),
                    };
                    draw_objects(
                        &mut pass,
                        &mut self.objects,
                        &self.textures,
                        &self.camera,
                        mode,
                        formats,
                    );
                }

                let mut pass =
                    begin_pass(&mut encoder, "Composite Pass", &surface_view, None, clear_color);
                let formats = TargetFormats {
                    color: surface_format,
                    depth: None,
                };
                composite.quad.render(
                    &mut pass,
                    &mut composite.program,
                    &self.textures,
                    &self.camera,
                    DrawMode::Triangles,
                    formats,
                );
            }
            None => {
                let mut pass = begin_pass(
                    &mut encoder,
                    "Scene Pass",
                    &surface_view,
                    Some(&self.depth.view),
                    clear_color,
                );
                let formats = TargetFormats {
                    color: surface_format,
                    depth: Some(DEPTH_FORMAT),
                };
                draw_objects(
                    &mut pass,
                    &mut self.objects,
                    &self.textures,
                    &self.camera,
                    mode,
                    formats,
                );
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    /// Releases every program, mesh and cached resource and removes the
    /// pointer listener. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.state == SceneState::Destroyed {
            return;
        }
        self.state = SceneState::Destroyed;

        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }

        for mut object in self.objects.drain(..) {
            if let Some(mesh) = &mut object.mesh {
                mesh.destroy();
            }
            object.program.destroy();
        }
        if let Some(mut composite) = self.composite.take() {
            composite.quad.destroy();
            composite.program.destroy();
        }

        self.depth.release();
        self.geometries.destroy();
        self.textures.destroy();

        log::debug!("scene destroyed");
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Allocates the offscreen target and the program that composites it. An
/// incomplete target is abandoned and the scene renders directly instead.
fn create_composite(
    gpu: &Gpu,
    textures: &TextureCache,
    size: UVec2,
) -> Result<Option<Composite>> {
    if let Err(err) = textures.create_render_target(SCENE_TARGET, size.x, size.y) {
        log::error!("{err}, rendering without post-processing");
        return Ok(None);
    }

    let program = ShaderProgram::new(
        &gpu.device,
        &gpu.queue,
        builtin::COMPOSITE_VERTEX,
        builtin::COMPOSITE_FRAGMENT,
        vec![TextureBinding::new(SCENE_TARGET, "u_scene")],
    )?;
    let quad = Mesh::new(
        &gpu.device,
        &gpu.queue,
        "fullscreen_quad",
        Some(&GeometryData::fullscreen_quad()),
        &program,
    )?;

    Ok(Some(Composite { program, quad }))
}

/// Applies a new logical size and pixel ratio to `viewport`. When the backing
/// store changed, every render target in `textures` is reallocated to match.
/// The projection and the debug text are refreshed either way.
///
/// Returns whether the backing store changed.
pub fn resize_viewport(
    viewport: &mut Viewport,
    camera: &mut Camera,
    camera_config: &CameraConfig,
    textures: &TextureCache,
    debug: Option<&dyn DebugSink>,
    logical_size: Vec2,
    pixel_ratio: f32,
) -> bool {
    let changed = viewport.resize(logical_size, pixel_ratio);
    let backing = viewport.backing_size();

    if changed {
        for name in textures.render_target_names() {
            if let Err(err) = textures.resize_render_target(&name, backing.x, backing.y) {
                log::error!("{err}");
            }
        }
    }

    camera.update_projection_matrix(camera_config.projection(viewport.aspect_ratio()));

    if let Some(debug) = debug {
        debug.update_debug(&canvas_size_text(backing));
    }
    changed
}

/// Steps `mode` to the next topology on every pointer-down.
pub fn cycle_draw_mode_on_pointer_down(
    events: &PointerEvents,
    mode: Rc<Cell<DrawMode>>,
) -> Subscription {
    events.subscribe(PointerEventKind::Down, move |_| {
        let next = mode.get().next();
        log::debug!("draw mode: {next:?}");
        mode.set(next);
    })
}

pub fn canvas_size_text(size: UVec2) -> String {
    format!("Canvas size: {}x{}", size.x, size.y)
}

fn begin_pass<'encoder>(
    encoder: &'encoder mut wgpu::CommandEncoder,
    label: &str,
    color: &wgpu::TextureView,
    depth: Option<&wgpu::TextureView>,
    clear_color: wgpu::Color,
) -> wgpu::RenderPass<'encoder> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: color,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(clear_color),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        occlusion_query_set: None,
        timestamp_writes: None,
        multiview_mask: None,
    })
}

fn draw_objects(
    pass: &mut wgpu::RenderPass<'_>,
    objects: &mut [SceneObject],
    textures: &TextureCache,
    camera: &Camera,
    mode: DrawMode,
    formats: TargetFormats,
) {
    for object in objects {
        if let Some(mesh) = &object.mesh {
            mesh.render(pass, &mut object.program, textures, camera, mode, formats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PointerEvent;
    use std::cell::RefCell;

    fn pointer_down(events: &PointerEvents) {
        events.dispatch(PointerEvent {
            kind: PointerEventKind::Down,
            position: Vec2::ZERO,
        });
    }

    #[test]
    fn pointer_down_cycles_draw_mode() {
        let events = PointerEvents::new();
        let mode = Rc::new(Cell::new(DrawMode::Triangles));
        let subscription = cycle_draw_mode_on_pointer_down(&events, mode.clone());

        pointer_down(&events);
        assert_eq!(mode.get(), DrawMode::Lines);
        pointer_down(&events);
        pointer_down(&events);
        assert_eq!(mode.get(), DrawMode::Triangles);

        subscription.release();
        pointer_down(&events);
        assert_eq!(mode.get(), DrawMode::Triangles);
        assert_eq!(events.listener_count(), 0);
    }

    #[test]
    fn closures_are_debug_sinks() {
        let seen = Rc::new(RefCell::new(String::new()));
        let sink: Box<dyn DebugSink> = Box::new({
            let seen = seen.clone();
            move |text: &str| *seen.borrow_mut() = text.to_owned()
        });

        sink.update_debug(&canvas_size_text(UVec2::new(1000, 600)));
        assert_eq!(*seen.borrow(), "Canvas size: 1000x600");
    }

    struct Resized {
        viewport: Viewport,
        camera: Camera,
        textures: TextureCache,
        seen: Rc<RefCell<Vec<String>>>,
        config: CameraConfig,
    }

    impl Resized {
        fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
            let textures = TextureCache::new(device, queue);
            textures.create_render_target(SCENE_TARGET, 1600, 1200).unwrap();
            Self {
                viewport: Viewport::new(UVec2::new(1600, 1200)),
                camera: Camera::default(),
                textures,
                seen: Rc::default(),
                config: CameraConfig::default(),
            }
        }

        fn resize(&mut self, logical_size: Vec2, pixel_ratio: f32) -> bool {
            let seen = self.seen.clone();
            let sink = move |text: &str| seen.borrow_mut().push(text.to_owned());
            resize_viewport(
                &mut self.viewport,
                &mut self.camera,
                &self.config,
                &self.textures,
                Some(&sink),
                logical_size,
                pixel_ratio,
            )
        }

        fn target_size(&self) -> Option<(u32, u32)> {
            self.textures.with_render_target(SCENE_TARGET, |target| target.size())
        }
    }

    #[test]
    fn resize_to_distinct_size_reallocates_targets_and_reports_it() {
        let (device, queue) = wgpu::Device::noop(&wgpu::DeviceDescriptor::default());
        let mut scene = Resized::new(&device, &queue);

        assert!(scene.resize(Vec2::new(500.0, 300.0), 2.0));

        assert_eq!(scene.viewport.backing_size(), UVec2::new(1000, 600));
        assert_eq!(scene.target_size(), Some((1000, 600)));
        let depth = scene.textures.with_render_target(SCENE_TARGET, |target| target.depth.size());
        assert_eq!(depth, Some((1000, 600)));
        let aspect = scene.camera.projection_params().aspect_ratio;
        assert!((aspect - 1000.0 / 600.0).abs() < 1e-6);
        assert_eq!(*scene.seen.borrow(), ["Canvas size: 1000x600"]);
    }

    #[test]
    fn resize_to_same_backing_size_keeps_targets() {
        let (device, queue) = wgpu::Device::noop(&wgpu::DeviceDescriptor::default());
        let mut scene = Resized::new(&device, &queue);
        let generation = scene.textures.texture(SCENE_TARGET).unwrap().generation;

        assert!(!scene.resize(Vec2::new(800.0, 600.0), 2.0));

        assert_eq!(scene.target_size(), Some((1600, 1200)));
        assert_eq!(scene.textures.texture(SCENE_TARGET).unwrap().generation, generation);
        assert_eq!(*scene.seen.borrow(), ["Canvas size: 1600x1200"]);
    }
}
