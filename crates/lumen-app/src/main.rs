// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use lumen_core::init_tracing;
use lumen_platform::{ProxySink, WindowSurface};
use lumen_render::{
    BackendKind, ContextFactory, DeviceCapabilities, FrameOutcome, FramePacer, NullContext, Pace,
    PresentationContext, Presenter, RenderSize, ResizeRequester, SharedSurface, StateCell,
    StatusEvent, UiStatus,
};
use lumen_render_gl::{GlConfig, GlContext, GlutinFactory};
use lumen_render_vk::{AshDriver, VkConfig, VkContext};
use tracing::{debug, error, info};

use lumen_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

mod config;

use config::{load_cfg, Args, PresentCfg};

/// Builds the concrete context for each backend kind.
struct AppFactory {
    vk: VkConfig,
    gl: GlConfig,
}

impl ContextFactory for AppFactory {
    fn create(&mut self, kind: BackendKind, state: Arc<StateCell>) -> Box<dyn PresentationContext> {
        match kind {
            BackendKind::Vulkan => Box::new(VkContext::new(AshDriver::default(), self.vk, state)),
            BackendKind::OpenGl => {
                Box::new(GlContext::new(GlutinFactory::default(), self.gl, state))
            }
            BackendKind::Software => Box::new(NullContext::new(state)),
        }
    }
}

fn detect_capabilities() -> DeviceCapabilities {
    let caps = DeviceCapabilities::from_probe(lumen_render_gl::probe(), lumen_render_vk::probe());
    info!("capabilities = {caps:?}");
    caps
}

struct App {
    cfg: PresentCfg,
    caps: DeviceCapabilities,
    proxy: EventLoopProxy<StatusEvent>,

    window: Option<Arc<Window>>,
    presenter: Option<Presenter>,
    resize: Option<ResizeRequester>,
    status: UiStatus,
    pacer: FramePacer,

    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn start_presenter(&mut self, window: &Arc<Window>) {
        let surface: SharedSurface = Arc::new(WindowSurface::new(Arc::clone(window)));
        let factory = AppFactory {
            vk: self.cfg.vk_config(),
            gl: self.cfg.gl_config(),
        };
        let mut presenter = Presenter::start(
            surface,
            self.caps,
            self.cfg.preference(),
            self.cfg.recovery_policy(),
            Box::new(factory),
            Box::new(ProxySink::new(self.proxy.clone())),
        );
        presenter.set_clear_colour(self.cfg.clear_color);
        info!("backend = {}", presenter.backend());

        self.resize = Some(presenter.resize_requester());
        self.presenter = Some(presenter);
    }

    fn update_title(&self) {
        let Some(window) = &self.window else {
            return;
        };
        let backend = self.status.backend.map_or("starting", BackendKind::name);
        let title = match self.status.banner_text() {
            Some(banner) => format!("lumen [{backend}] - {banner} (F5 to retry, Esc to dismiss)"),
            None => format!("lumen [{backend}]"),
        };
        window.set_title(&title);
    }

    fn request_redraw(&self) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn on_key(&mut self, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.logical_key {
            Key::Named(NamedKey::F5) => {
                if let Some(presenter) = &mut self.presenter {
                    let gpu = presenter.retry_gpu();
                    info!("GPU retry → {} (gpu={gpu})", presenter.backend());
                }
            }
            Key::Named(NamedKey::Escape) => {
                self.status.dismiss_banner();
                self.update_title();
            }
            _ => {}
        }
    }
}

impl ApplicationHandler<StatusEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = match event_loop
                .create_window(Window::default_attributes().with_title("lumen"))
            {
                Ok(w) => Arc::new(w),
                Err(e) => {
                    error!("create_window: {e}");
                    event_loop.exit();
                    return;
                }
            };
            let size = window.inner_size();
            self.paused = size.width == 0 || size.height == 0;

            self.start_presenter(&window);
            self.window = Some(window);
            self.update_title();
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            self.request_redraw();
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: StatusEvent) {
        debug!("status: {event:?}");
        self.status.apply(event);
        self.update_title();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.resize = None;
                self.presenter = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                self.paused = size.is_empty();
                debug!("Resized → {size} (paused={})", self.paused);
                // Picked up by the next frame; never recreates here.
                if let Some(resize) = &self.resize {
                    resize.request(size);
                }
                if !self.paused {
                    self.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                let empty = self
                    .window
                    .as_ref()
                    .is_some_and(|w| w.inner_size().width == 0 || w.inner_size().height == 0);
                self.paused = occluded || empty;
                info!("Occluded={occluded} → paused={}", self.paused);
            }

            WindowEvent::Focused(true) => self.pacer.reset(),

            WindowEvent::KeyboardInput { event, .. } => self.on_key(&event),

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(presenter) = &mut self.presenter else {
                    return;
                };
                match presenter.frame() {
                    FrameOutcome::Presented => self.frames = self.frames.saturating_add(1),
                    FrameOutcome::Lost => debug!("frame abandoned, recovery runs next frame"),
                    FrameOutcome::Skipped(reason) => debug!("frame skipped: {reason:?}"),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        match self.pacer.poll(Instant::now()) {
            Pace::RenderNow { next } => {
                event_loop.set_control_flow(next.map_or(ControlFlow::Wait, ControlFlow::WaitUntil));
                self.request_redraw();
            }
            Pace::WaitUntil(deadline) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
            }
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Presentation resources go before the window they point at.
        self.presenter = None;
        self.window = None;
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config).present;
    cfg.apply_args(&args);

    let event_loop = EventLoop::<StatusEvent>::with_user_event().build()?;
    let mut app = App {
        pacer: FramePacer::new(cfg.target_fps),
        caps: detect_capabilities(),
        proxy: event_loop.create_proxy(),
        cfg,
        window: None,
        presenter: None,
        resize: None,
        status: UiStatus::default(),
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
