// SPDX-License-Identifier: CEPL-1.0
use std::sync::{Arc, Weak};

use tracing::info;

use crate::{
    surface_size, BackendKind, DrawCallback, FrameOutcome, PresentationContext,
    PresentationState, RenderSize, SharedSurface, SkipReason, StateCell, SurfaceHandle,
    DEFAULT_CLEAR,
};

/// Software backend: holds no GPU context.
///
/// Attaching only remembers the surface; the shared state stays
/// `Uninitialized` because there is nothing that could become ready or be
/// lost. The host draws with its own CPU path while this is active.
pub struct NullContext {
    state: Arc<StateCell>,
    surface: Option<Weak<dyn SurfaceHandle>>,
    target: RenderSize,
    clear: [f32; 4],
    callbacks: Vec<DrawCallback>,
}

impl NullContext {
    pub fn new(state: Arc<StateCell>) -> Self {
        Self {
            state,
            surface: None,
            target: RenderSize::ZERO,
            clear: DEFAULT_CLEAR,
            callbacks: Vec::new(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn target(&self) -> RenderSize {
        self.target
    }
}

impl PresentationContext for NullContext {
    fn backend(&self) -> BackendKind {
        BackendKind::Software
    }

    fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    fn attach(&mut self, surface: &SharedSurface) -> bool {
        self.state.transition(PresentationState::Uninitialized);
        self.surface = Some(Arc::downgrade(surface));
        self.target = surface.size();
        info!("software presentation attached ({})", self.target);
        true
    }

    fn detach(&mut self) {
        self.surface = None;
        self.state.transition(PresentationState::Uninitialized);
    }

    fn reattach(&mut self) -> bool {
        self.is_attached()
    }

    fn render(&mut self) -> FrameOutcome {
        FrameOutcome::Skipped(SkipReason::NotReady)
    }

    fn recreate_swapchain(&mut self) -> bool {
        let size = surface_size(self.surface.as_ref());
        if size.is_empty() {
            return false;
        }
        self.target = size;
        true
    }

    fn resize(&mut self, size: RenderSize) -> bool {
        if size.is_empty() || !self.is_attached() {
            return false;
        }
        self.target = size;
        true
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
        String::new()
    }
}
