// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral presentation contract.
//!
//! A [`PresentationContext`] owns every GPU object needed to put frames on a
//! host surface. The rest of the application only talks to it through
//! attach/render/detach/recreate, draw-callback registration and the
//! lock-free [`StateCell`]. Backends live in `lumen-render-gl` and
//! `lumen-render-vk`; the software fallback ([`NullContext`]) lives here.

use std::sync::{Arc, Weak};

use portable_atomic::{AtomicU64, Ordering};

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};

mod caps;
mod error;
mod null;
mod presenter;
mod recovery;
mod scheduler;
mod state;
mod status;

#[cfg(test)]
mod testing;

pub use caps::{
    select_backends, BackendKind, BackendSelection, DeviceCapabilities, UnknownBackend,
};
pub use error::{ErrorKind, PresentError};
pub use null::NullContext;
pub use presenter::Presenter;
pub use recovery::{handover, ContextFactory, RecoveryController, RecoveryOutcome, RecoveryPolicy};
pub use scheduler::{FlushOutcome, FramePacer, FrameScheduler, Pace, PendingResize, ResizeRequester};
pub use state::{PresentationState, StateCell};
pub use status::{StatusEvent, StatusSink, UiStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const ZERO: RenderSize = RenderSize::new(0, 0);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero width or height, i.e. a minimized or not yet mapped window.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Host-owned drawable. Contexts only read its size and native handles and
/// never resize or reposition it.
pub trait SurfaceHandle: HasWindowHandle + HasDisplayHandle {
    fn size(&self) -> RenderSize;
}

pub type SharedSurface = Arc<dyn SurfaceHandle>;

/// Size of a borrowed surface. A surface the host already dropped reads as
/// zero area so every caller takes the "nothing to do" path.
pub fn surface_size(surface: Option<&Weak<dyn SurfaceHandle>>) -> RenderSize {
    surface
        .and_then(Weak::upgrade)
        .map(|s| s.size())
        .unwrap_or(RenderSize::ZERO)
}

/// Surface without a native window. Backs the software path and lets the
/// presentation logic run without a display server.
///
/// Width and height share one atomic so readers never see half an update.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    packed: AtomicU64,
}

impl HeadlessSurface {
    pub fn new(size: RenderSize) -> Self {
        Self {
            packed: AtomicU64::new(Self::pack(size)),
        }
    }

    fn pack(size: RenderSize) -> u64 {
        (u64::from(size.width) << 32) | u64::from(size.height)
    }

    fn unpack(raw: u64) -> RenderSize {
        RenderSize::new((raw >> 32) as u32, raw as u32)
    }

    pub fn set_size(&self, size: RenderSize) {
        self.packed.store(Self::pack(size), Ordering::Release);
    }
}

impl HasWindowHandle for HeadlessSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasDisplayHandle for HeadlessSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl SurfaceHandle for HeadlessSurface {
    fn size(&self) -> RenderSize {
        Self::unpack(self.packed.load(Ordering::Acquire))
    }
}

/// Backend object a draw callback records into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeFrame {
    None,
    /// The GL context is current on the calling thread.
    OpenGl,
    /// Raw `VkCommandBuffer`, inside the single-subpass render pass.
    Vulkan { command_buffer: u64 },
}

#[derive(Clone, Copy, Debug)]
pub struct FrameContext {
    pub extent: RenderSize,
    pub clear: [f32; 4],
    /// Frame-in-flight slot being recorded.
    pub slot: usize,
    pub image_index: u32,
    pub native: NativeFrame,
}

/// Content supplied by the UI layer, invoked once per presented frame.
pub type DrawCallback = Box<dyn FnMut(&FrameContext)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No live context (unattached, lost or software).
    NotReady,
    /// Zero-area surface.
    DegenerateSurface,
    /// Swapchain was out of date and got rebuilt; try again next tick.
    OutOfDate,
    /// Fence wait timed out, nothing was submitted.
    Timeout,
    /// Reduced-refresh pacing dropped this frame.
    Decimated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Skipped(SkipReason),
    /// The frame was abandoned and the context moved to `Lost`.
    Lost,
}

/// The capability set every backend exposes. Callers depend on this trait
/// only, never on a concrete backend.
pub trait PresentationContext {
    fn backend(&self) -> BackendKind;

    /// Shared state cell, readable from any thread.
    fn state(&self) -> &Arc<StateCell>;

    /// Provisions everything needed to present into `surface`. On failure
    /// everything created so far is torn down and [`last_error`] is set.
    ///
    /// [`last_error`]: PresentationContext::last_error
    fn attach(&mut self, surface: &SharedSurface) -> bool;

    /// Releases every resource. Safe on an unattached context.
    fn detach(&mut self);

    /// Full teardown followed by attach against the surface of the last
    /// attach. Used by recovery, which owns the `Lost -> Recovering` edge.
    fn reattach(&mut self) -> bool;

    fn render(&mut self) -> FrameOutcome;

    /// Rebuilds size-dependent resources. Returns false without touching
    /// anything when the surface has zero area.
    fn recreate_swapchain(&mut self) -> bool;

    /// Records `size` as the next build target and recreates if attached.
    fn resize(&mut self, size: RenderSize) -> bool;

    fn set_clear_colour(&mut self, r: f32, g: f32, b: f32, a: f32);

    fn clear_colour(&self) -> [f32; 4];

    fn add_draw_callback(&mut self, callback: DrawCallback);

    fn take_draw_callbacks(&mut self) -> Vec<DrawCallback>;

    fn last_error(&self) -> String;

    fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    fn is_lost(&self) -> bool {
        self.state().is_lost()
    }
}

pub const DEFAULT_CLEAR: [f32; 4] = [0.02, 0.02, 0.04, 1.0];
