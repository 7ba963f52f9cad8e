// SPDX-License-Identifier: CEPL-1.0
//! OpenGL presentation backend bound to the host toolkit's context
//! lifecycle: context created, render, context closing, context lost.

use std::sync::{Arc, Weak};

use lumen_render::{
    surface_size, BackendKind, DrawCallback, FrameContext, FrameOutcome, NativeFrame,
    PresentError, PresentationContext, PresentationState, RenderSize, SharedSurface, SkipReason,
    StateCell, SurfaceHandle, DEFAULT_CLEAR,
};
use tracing::{debug, error, info, warn};

mod native;
mod session;

pub use native::GlutinFactory;
pub use session::{GlError, GlSession, GlSessionFactory};

/// Context over glutin.
pub type GlContext = GlPresentationContext<GlutinFactory>;

/// Whether this build can open GL contexts on the current platform.
pub fn probe() -> bool {
    cfg!(all(unix, not(any(target_os = "macos", target_os = "ios"))))
}

#[derive(Clone, Copy, Debug)]
pub struct GlConfig {
    pub vsync: bool,
    /// Reduced-refresh mode: every other frame is skipped.
    pub performance_mode: bool,
}

impl Default for GlConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            performance_mode: false,
        }
    }
}

pub struct GlPresentationContext<F: GlSessionFactory> {
    factory: F,
    cfg: GlConfig,
    state: Arc<StateCell>,
    surface: Option<Weak<dyn SurfaceHandle>>,
    session: Option<Box<dyn GlSession>>,
    target: RenderSize,
    surface_seen: RenderSize,
    frame_counter: u64,
    clear: [f32; 4],
    callbacks: Vec<DrawCallback>,
    last_error: Option<PresentError>,
}

impl<F: GlSessionFactory> GlPresentationContext<F> {
    pub fn new(factory: F, cfg: GlConfig, state: Arc<StateCell>) -> Self {
        Self {
            factory,
            cfg,
            state,
            surface: None,
            session: None,
            target: RenderSize::ZERO,
            surface_seen: RenderSize::ZERO,
            frame_counter: 0,
            clear: DEFAULT_CLEAR,
            callbacks: Vec::new(),
            last_error: None,
        }
    }

    pub fn set_vsync(&mut self, on: bool) {
        self.cfg.vsync = on;
        if let Some(session) = self.session.as_mut() {
            session.set_vsync(on);
        }
    }

    pub fn set_performance_mode(&mut self, on: bool) {
        self.cfg.performance_mode = on;
        self.frame_counter = 0;
    }

    /// Host "context created": opens a session and moves to `Ready`.
    pub fn on_context_created(&mut self, surface: &SharedSurface) -> bool {
        self.session = None;
        let recovering = self.state.get() == PresentationState::Recovering;
        if !recovering {
            self.state.transition(PresentationState::Uninitialized);
            self.state.transition(PresentationState::Initializing);
        }
        self.surface = Some(Arc::downgrade(surface));

        let size = surface.size();
        let opened = if size.is_empty() {
            Err(PresentError::DegenerateSurface)
        } else {
            self.factory
                .open(surface.as_ref(), size, self.cfg.vsync)
                .map_err(|err| PresentError::provisioning("create_gl_context", format!("{err:#}")))
        };

        match opened {
            Ok(session) => {
                self.session = Some(session);
                self.target = size;
                self.surface_seen = size;
                self.frame_counter = 0;
                self.last_error = None;
                info!("GL context ready ({size})");
                self.state.transition(PresentationState::Ready);
                true
            }
            Err(err) => {
                error!("GL attach failed: {err}");
                self.last_error = Some(err);
                self.state.transition(if recovering {
                    PresentationState::Lost
                } else {
                    PresentationState::Uninitialized
                });
                false
            }
        }
    }

    /// Host "context closing": drops the session.
    pub fn on_context_closing(&mut self) {
        if self.session.take().is_some() {
            info!("GL context closed");
        }
        self.state.transition(PresentationState::Uninitialized);
    }

    /// Host-reported context loss. The session is unusable and dropped.
    pub fn on_context_lost(&mut self, reason: &str) {
        warn!("GL context lost: {reason}");
        self.session = None;
        self.last_error = Some(PresentError::DeviceLost(reason.to_owned()));
        self.state.transition(PresentationState::Lost);
    }

    /// Host render callback.
    pub fn on_render(&mut self) -> FrameOutcome {
        if !self.state.is_ready() {
            return FrameOutcome::Skipped(SkipReason::NotReady);
        }
        let size = surface_size(self.surface.as_ref());
        if size.is_empty() {
            return FrameOutcome::Skipped(SkipReason::DegenerateSurface);
        }
        if size != self.surface_seen {
            self.target = size;
            if !self.recreate_swapchain() {
                debug!("GL resize to {size} failed, skipping frame");
                return FrameOutcome::Skipped(SkipReason::NotReady);
            }
        }

        let decimate = self.cfg.performance_mode && self.frame_counter % 2 == 1;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        if decimate {
            return FrameOutcome::Skipped(SkipReason::Decimated);
        }

        let Some(session) = self.session.as_mut() else {
            return FrameOutcome::Skipped(SkipReason::NotReady);
        };
        let frame = FrameContext {
            extent: self.target,
            clear: self.clear,
            slot: 0,
            image_index: 0,
            native: NativeFrame::OpenGl,
        };
        let callbacks = &mut self.callbacks;
        let presented = session.present(self.target, self.clear, &mut || {
            for cb in callbacks.iter_mut() {
                cb(&frame);
            }
        });

        match presented {
            Ok(()) => FrameOutcome::Presented,
            Err(GlError::ContextLost) => {
                self.on_context_lost("swap_buffers reported a lost context");
                FrameOutcome::Lost
            }
            Err(GlError::Other(err)) => {
                let err = PresentError::provisioning("present", format!("{err:#}"));
                error!("GL: {err}");
                self.session = None;
                self.last_error = Some(err);
                self.state.transition(PresentationState::Lost);
                FrameOutcome::Lost
            }
        }
    }
}

impl<F: GlSessionFactory> PresentationContext for GlPresentationContext<F> {
    fn backend(&self) -> BackendKind {
        BackendKind::OpenGl
    }

    fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    fn attach(&mut self, surface: &SharedSurface) -> bool {
        self.on_context_created(surface)
    }

    fn detach(&mut self) {
        self.on_context_closing();
        self.surface = None;
    }

    fn reattach(&mut self) -> bool {
        match self.surface.as_ref().and_then(Weak::upgrade) {
            Some(surface) => self.on_context_created(&surface),
            None => {
                self.session = None;
                self.last_error = Some(PresentError::provisioning(
                    "reattach",
                    "host surface no longer exists",
                ));
                self.state.transition(if self.state.get() == PresentationState::Recovering {
                    PresentationState::Lost
                } else {
                    PresentationState::Uninitialized
                });
                false
            }
        }
    }

    fn render(&mut self) -> FrameOutcome {
        self.on_render()
    }

    /// GL has no swapchain; this resizes the default framebuffer.
    fn recreate_swapchain(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let size = surface_size(self.surface.as_ref());
        if size.is_empty() {
            return false;
        }
        let want = if self.target.is_empty() {
            size
        } else {
            self.target
        };
        session.resize(want);
        self.target = want;
        self.surface_seen = size;
        debug!("GL surface resized to {want}");
        true
    }

    fn resize(&mut self, size: RenderSize) -> bool {
        if size.is_empty() {
            return false;
        }
        self.target = size;
        self.recreate_swapchain()
    }

    fn set_clear_colour(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear = [r, g, b, a];
    }

    fn clear_colour(&self) -> [f32; 4] {
        self.clear
    }

    fn add_draw_callback(&mut self, callback: DrawCallback) {
        self.callbacks.push(callback);
    }

    fn take_draw_callbacks(&mut self) -> Vec<DrawCallback> {
        std::mem::take(&mut self.callbacks)
    }

    fn last_error(&self) -> String {
        self.last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}
