// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    select_backends, BackendKind, DeviceCapabilities, FrameOutcome, NullContext,
    PresentationContext, PresentationState, SharedSurface, StateCell, StatusEvent, StatusSink,
};

/// Builds a context for a backend kind. Every context built by one
/// controller shares the same [`StateCell`], so status readers keep working
/// across backend swaps.
pub trait ContextFactory {
    fn create(&mut self, kind: BackendKind, state: Arc<StateCell>) -> Box<dyn PresentationContext>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// In-place reattach attempts before downgrading to software.
    pub retry_budget: u32,
    /// Presented frames in a row after which the budget is restored.
    pub stable_frames: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            stable_frames: 120,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing was lost.
    Healthy,
    Recovered,
    /// Reattach failed; another attempt runs on the next frame.
    Retrying { attempt: u32 },
    /// Budget exhausted; software is active and the state is
    /// `Uninitialized`.
    Downgraded,
}

/// Moves clear colour and draw callbacks from one context to another.
pub fn handover(from: &mut dyn PresentationContext, to: &mut dyn PresentationContext) {
    let [r, g, b, a] = from.clear_colour();
    to.set_clear_colour(r, g, b, a);
    for cb in from.take_draw_callbacks() {
        to.add_draw_callback(cb);
    }
}

/// Owns backend selection, loss handling and downgrade. Nothing else
/// replaces the active context or raises the "GPU unavailable" status.
pub struct RecoveryController {
    policy: RecoveryPolicy,
    caps: DeviceCapabilities,
    preference: Option<BackendKind>,
    state: Arc<StateCell>,
    sink: Box<dyn StatusSink>,
    attempts: u32,
    stable: u32,
    loss_reported: bool,
    gpu_unavailable: bool,
}

impl RecoveryController {
    pub fn new(
        policy: RecoveryPolicy,
        caps: DeviceCapabilities,
        preference: Option<BackendKind>,
        sink: Box<dyn StatusSink>,
    ) -> Self {
        Self {
            policy,
            caps,
            preference,
            state: Arc::new(StateCell::new()),
            sink,
            attempts: 0,
            stable: 0,
            loss_reported: false,
            gpu_unavailable: false,
        }
    }

    pub fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn gpu_unavailable(&self) -> bool {
        self.gpu_unavailable
    }

    /// Tries the selected backends in order and returns the first that
    /// attaches. Software always attaches, so this never fails.
    pub fn provision(
        &mut self,
        factory: &mut dyn ContextFactory,
        surface: &SharedSurface,
    ) -> Box<dyn PresentationContext> {
        let selection = select_backends(self.caps, self.preference);
        if selection.clamped {
            warn!(
                "requested backend {:?} not available, clamping to {}",
                self.preference,
                selection.first()
            );
        }

        let mut failures = Vec::new();
        for kind in selection.order.iter().copied() {
            let mut ctx = factory.create(kind, Arc::clone(&self.state));
            if ctx.attach(surface) {
                info!("presentation backend = {kind}");
                self.attempts = 0;
                self.stable = 0;
                self.loss_reported = false;
                self.sink.post(StatusEvent::BackendActive {
                    backend: kind,
                    requested: selection.clamped.then_some(self.preference).flatten(),
                });
                if kind == BackendKind::Software {
                    self.raise_gpu_unavailable(&failures);
                } else {
                    self.gpu_unavailable = false;
                }
                return ctx;
            }
            let err = ctx.last_error();
            error!("{kind} attach failed: {err}");
            failures.push(format!("{kind}: {err}"));
            ctx.detach();
        }

        let mut software: Box<dyn PresentationContext> =
            Box::new(NullContext::new(Arc::clone(&self.state)));
        software.attach(surface);
        self.raise_gpu_unavailable(&failures);
        software
    }

    fn raise_gpu_unavailable(&mut self, failures: &[String]) {
        // Software as an explicit choice is not a failure.
        if failures.is_empty() && self.preference == Some(BackendKind::Software) {
            return;
        }
        let message = if failures.is_empty() {
            "no GPU backend available".to_owned()
        } else {
            failures.join("; ")
        };
        self.gpu_unavailable = true;
        self.sink.post(StatusEvent::GpuUnavailable { message });
    }

    /// Feeds the outcome of a rendered frame; enough presented frames in a
    /// row restore the retry budget.
    pub fn observe(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Presented => {
                self.stable = self.stable.saturating_add(1);
                if self.attempts > 0 && self.stable >= self.policy.stable_frames {
                    info!("presentation stable again, retry budget restored");
                    self.attempts = 0;
                }
            }
            FrameOutcome::Lost => self.stable = 0,
            FrameOutcome::Skipped(_) => {}
        }
    }

    /// Runs one recovery step if the active context is lost: an in-place
    /// reattach while budget remains, else a downgrade to software.
    pub fn drive(
        &mut self,
        active: &mut Box<dyn PresentationContext>,
        factory: &mut dyn ContextFactory,
        surface: &SharedSurface,
    ) -> RecoveryOutcome {
        if !active.is_lost() {
            return RecoveryOutcome::Healthy;
        }
        let backend = active.backend();

        if !self.loss_reported {
            self.loss_reported = true;
            self.sink.post(StatusEvent::DeviceLost {
                backend,
                message: active.last_error(),
            });
        }

        if self.attempts >= self.policy.retry_budget {
            self.downgrade(active, factory, surface);
            return RecoveryOutcome::Downgraded;
        }

        self.attempts += 1;
        self.stable = 0;
        let attempt = self.attempts;
        if !active.state().transition(PresentationState::Recovering) {
            return RecoveryOutcome::Retrying { attempt };
        }
        info!(
            "{backend} recovery attempt {attempt}/{}",
            self.policy.retry_budget
        );

        if active.reattach() {
            self.loss_reported = false;
            self.sink.post(StatusEvent::Recovered {
                backend,
                attempts: attempt,
            });
            RecoveryOutcome::Recovered
        } else {
            warn!("{backend} reattach failed: {}", active.last_error());
            if !active.is_lost() {
                active.state().transition(PresentationState::Lost);
            }
            RecoveryOutcome::Retrying { attempt }
        }
    }

    fn downgrade(
        &mut self,
        active: &mut Box<dyn PresentationContext>,
        factory: &mut dyn ContextFactory,
        surface: &SharedSurface,
    ) {
        let from = active.backend();
        let message = format!(
            "{from} unavailable after {} attempt(s): {}",
            self.attempts,
            active.last_error()
        );
        error!("{message}; downgrading to software");

        active.detach();
        let mut software = factory.create(BackendKind::Software, Arc::clone(&self.state));
        handover(active.as_mut(), software.as_mut());
        software.attach(surface);
        *active = software;

        self.gpu_unavailable = true;
        self.loss_reported = false;
        self.sink.post(StatusEvent::GpuUnavailable { message });
    }

    /// Explicit user retry: fresh budget, full selection again.
    pub fn retry_gpu(
        &mut self,
        active: &mut Box<dyn PresentationContext>,
        factory: &mut dyn ContextFactory,
        surface: &SharedSurface,
    ) -> bool {
        info!("user requested GPU retry");
        active.detach();
        let mut next = self.provision(factory, surface);
        handover(active.as_mut(), next.as_mut());
        *active = next;
        active.backend() != BackendKind::Software
    }
}
