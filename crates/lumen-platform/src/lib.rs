// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! winit glue: the window as a presentation surface, and status delivery
//! back onto the event loop.

use std::sync::Arc;

use lumen_render::{RenderSize, StatusEvent, StatusSink, SurfaceHandle};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::warn;
use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoopProxy;
use winit::window::Window;

pub use winit;

/// A winit window lent to the presentation layer. Contexts only read its
/// size and handles; the application keeps ownership.
#[derive(Clone, Debug)]
pub struct WindowSurface(Arc<Window>);

impl WindowSurface {
    pub fn new(window: Arc<Window>) -> Self {
        Self(window)
    }

    pub fn window(&self) -> &Window {
        &self.0
    }
}

/// Minimized windows keep their last inner size on some platforms; report
/// them as zero area so nothing gets rebuilt for them.
fn visible_size(inner: PhysicalSize<u32>, minimized: Option<bool>) -> RenderSize {
    if minimized == Some(true) {
        return RenderSize::ZERO;
    }
    RenderSize::new(inner.width, inner.height)
}

impl HasWindowHandle for WindowSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.0.window_handle()
    }
}

impl HasDisplayHandle for WindowSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.0.display_handle()
    }
}

impl SurfaceHandle for WindowSurface {
    fn size(&self) -> RenderSize {
        visible_size(self.0.inner_size(), self.0.is_minimized())
    }
}

/// Posts status events to the UI thread as winit user events.
#[derive(Clone, Debug)]
pub struct ProxySink(EventLoopProxy<StatusEvent>);

impl ProxySink {
    pub fn new(proxy: EventLoopProxy<StatusEvent>) -> Self {
        Self(proxy)
    }
}

impl StatusSink for ProxySink {
    fn post(&self, event: StatusEvent) {
        if self.0.send_event(event).is_err() {
            warn!("event loop closed; status event discarded");
        }
    }
}
