use anyhow::Context;
use futures::executor::LocalPool;
use glam::{UVec2, Vec2};
use glfw::{Action, Key, WindowEvent};
use jetrenderer::{
    DebugSink, FileSource, FrameClock, FrameContext, Gpu, PointerEvent, PointerEventKind,
    PointerEvents, Scene, SceneConfig,
    frame::normalize_pointer,
    logging::{LoggingConfig, init_logging},
};
use std::{cell::RefCell, rc::Rc};

const TITLE: &str = "jetrenderer";

/// Logical window size and the pixel ratio, capped at 2.
fn viewport_metrics(window: &glfw::Window) -> (Vec2, f32) {
    let (width, height) = window.get_size();
    let (scale, _) = window.get_content_scale();
    (Vec2::new(width as f32, height as f32), scale.min(2.0))
}

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());

    let asset_root = std::env::args().nth(1).unwrap_or_else(|| ".".to_owned());

    let mut glfw = glfw::init(glfw::fail_on_errors)
        .map_err(|err| anyhow::anyhow!("failed to initialize GLFW: {err:?}"))?;

    glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
    glfw.window_hint(glfw::WindowHint::Resizable(true));

    let (mut window, events) = glfw
        .create_window(1280, 720, TITLE, glfw::WindowMode::Windowed)
        .context("failed to create GLFW window")?;

    window.set_key_polling(true);
    window.set_framebuffer_size_polling(true);
    window.set_content_scale_polling(true);
    window.set_cursor_pos_polling(true);
    window.set_cursor_enter_polling(true);
    window.set_mouse_button_polling(true);
    window.set_iconify_polling(true);

    let (logical_size, pixel_ratio) = viewport_metrics(&window);
    let gpu = pollster::block_on(Gpu::new(
        window.render_context(),
        (logical_size * pixel_ratio).round().as_uvec2().max(UVec2::ONE),
    ))?;

    let frame = FrameContext::new();
    frame.update(|state| {
        state.logical_size = logical_size;
        state.pixel_ratio = pixel_ratio;
    });

    let status = Rc::new(RefCell::new(None::<String>));
    let debug: Box<dyn DebugSink> = Box::new({
        let status = status.clone();
        move |text: &str| *status.borrow_mut() = Some(text.to_owned())
    });

    let pointer_events = PointerEvents::new();
    let mut pool = LocalPool::new();
    let mut scene = Scene::new(
        gpu,
        frame.clone(),
        &pointer_events,
        &pool.spawner(),
        Rc::new(FileSource::new(&asset_root)),
        SceneConfig::default(),
        Some(debug),
    )?;
    scene.on_resize(logical_size, pixel_ratio);

    let mut clock = FrameClock::new();
    let mut iconified = false;

    while !window.should_close() {
        glfw.poll_events();
        for (_, event) in glfw::flush_messages(&events) {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) => window.set_should_close(true),
                WindowEvent::FramebufferSize(..) | WindowEvent::ContentScale(..) => {
                    let (logical_size, pixel_ratio) = viewport_metrics(&window);
                    frame.update(|state| {
                        state.logical_size = logical_size;
                        state.pixel_ratio = pixel_ratio;
                    });
                    scene.on_resize(logical_size, pixel_ratio);
                }
                WindowEvent::CursorPos(x, y) => {
                    let logical_size = frame.snapshot().logical_size;
                    let position = normalize_pointer(Vec2::new(x as f32, y as f32), logical_size);
                    frame.update(|state| state.pointer_target = position);
                    pointer_events.dispatch(PointerEvent {
                        kind: PointerEventKind::Move,
                        position,
                    });
                }
                WindowEvent::MouseButton(_, action, _) => {
                    let kind = match action {
                        Action::Press => PointerEventKind::Down,
                        Action::Release => PointerEventKind::Up,
                        Action::Repeat => continue,
                    };
                    pointer_events.dispatch(PointerEvent {
                        kind,
                        position: frame.snapshot().pointer_target,
                    });
                }
                WindowEvent::CursorEnter(false) => pointer_events.dispatch(PointerEvent {
                    kind: PointerEventKind::Leave,
                    position: frame.snapshot().pointer_target,
                }),
                WindowEvent::Iconify(minimized) => {
                    iconified = minimized;
                    if !minimized {
                        clock.resume();
                    }
                }
                _ => {}
            }
        }

        pool.run_until_stalled();

        if iconified {
            glfw.wait_events_timeout(0.1);
            continue;
        }

        let Some(timing) = clock.tick(glfw.get_time() * 1000.0) else {
            continue;
        };
        frame.update(|state| {
            state.elapsed = timing.elapsed;
            state.slow_down_factor = timing.slow_down_factor;
        });

        scene.update()?;

        if let Some(text) = status.borrow_mut().take() {
            window.set_title(&format!("{TITLE} | {text}"));
        }
    }

    scene.destroy();
    Ok(())
}
