// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use crate::{
    BackendKind, ContextFactory, DeviceCapabilities, DrawCallback, FlushOutcome, FrameOutcome,
    FrameScheduler, PresentationContext, RecoveryController, RecoveryOutcome, RecoveryPolicy,
    ResizeRequester, SharedSurface, StateCell, StatusSink,
};

/// The one presentation instance, owned by the top-level application and
/// driven from the render thread. Holds the active backend, the resize
/// coordinator and the recovery policy.
pub struct Presenter {
    surface: SharedSurface,
    active: Box<dyn PresentationContext>,
    scheduler: FrameScheduler,
    recovery: RecoveryController,
    factory: Box<dyn ContextFactory>,
}

impl Presenter {
    pub fn start(
        surface: SharedSurface,
        caps: DeviceCapabilities,
        preference: Option<BackendKind>,
        policy: RecoveryPolicy,
        mut factory: Box<dyn ContextFactory>,
        sink: Box<dyn StatusSink>,
    ) -> Self {
        let mut recovery = RecoveryController::new(policy, caps, preference, sink);
        let active = recovery.provision(factory.as_mut(), &surface);
        Self {
            surface,
            active,
            scheduler: FrameScheduler::new(),
            recovery,
            factory,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.active.backend()
    }

    /// Shared state for status readers on other threads.
    pub fn state(&self) -> Arc<StateCell> {
        Arc::clone(self.recovery.state())
    }

    pub fn context(&self) -> &dyn PresentationContext {
        self.active.as_ref()
    }

    pub fn resize_requester(&self) -> ResizeRequester {
        self.scheduler.requester()
    }

    pub fn gpu_unavailable(&self) -> bool {
        self.recovery.gpu_unavailable()
    }

    pub fn set_clear_colour(&mut self, rgba: [f32; 4]) {
        let [r, g, b, a] = rgba;
        self.active.set_clear_colour(r, g, b, a);
    }

    pub fn add_draw_callback(&mut self, callback: DrawCallback) {
        self.active.add_draw_callback(callback);
    }

    pub fn flush_resize(&mut self) -> FlushOutcome {
        self.scheduler.flush(self.active.as_mut())
    }

    /// One display refresh: pending recovery first, then the coalesced
    /// resize, then the frame itself. A loss seen here is handled on the
    /// next call, never by retrying the same frame.
    pub fn frame(&mut self) -> FrameOutcome {
        let recovery = self.recovery.drive(
            &mut self.active,
            self.factory.as_mut(),
            &self.surface,
        );
        if matches!(recovery, RecoveryOutcome::Retrying { .. }) {
            return FrameOutcome::Lost;
        }
        let outcome = self.scheduler.tick(self.active.as_mut());
        self.recovery.observe(outcome);
        outcome
    }

    pub fn retry_gpu(&mut self) -> bool {
        self.recovery
            .retry_gpu(&mut self.active, self.factory.as_mut(), &self.surface)
    }

    pub fn detach(&mut self) {
        self.active.detach();
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.active.detach();
    }
}
