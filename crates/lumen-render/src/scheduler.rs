// SPDX-License-Identifier: CEPL-1.0
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use portable_atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::{FrameOutcome, PresentationContext, RenderSize};

/// Latest requested surface bounds plus a dirty flag.
///
/// The mutex is held only for a copy of two integers. The flag is flipped
/// while holding it, so a flush never pairs a cleared flag with stale bounds.
#[derive(Debug, Default)]
pub struct PendingResize {
    bounds: Mutex<RenderSize>,
    dirty: AtomicBool,
}

impl PendingResize {
    pub fn request(&self, size: RenderSize) {
        let mut bounds = self.bounds.lock().unwrap_or_else(PoisonError::into_inner);
        *bounds = size;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Returns the most recent bounds if any request arrived since the last
    /// take, clearing the flag.
    pub fn take(&self) -> Option<RenderSize> {
        if !self.is_dirty() {
            return None;
        }
        let bounds = self.bounds.lock().unwrap_or_else(PoisonError::into_inner);
        self.dirty.store(false, Ordering::Release);
        Some(*bounds)
    }
}

/// Cloneable handle the UI/event thread uses to report new surface bounds.
/// Never triggers recreation itself.
#[derive(Clone, Debug)]
pub struct ResizeRequester {
    pending: Arc<PendingResize>,
}

impl ResizeRequester {
    pub fn request(&self, size: RenderSize) {
        self.pending.request(size);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No resize since the last flush.
    Idle,
    /// One recreate ran with these bounds.
    Recreated(RenderSize),
    /// Zero-area bounds; dropped, not queued.
    Dropped(RenderSize),
    /// The context recorded the bounds but could not rebuild now (not
    /// ready, or the rebuild failed).
    Deferred(RenderSize),
}

/// Coalesces resize requests and drives the active context once per
/// display refresh.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    pending: Arc<PendingResize>,
    recreates: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requester(&self) -> ResizeRequester {
        ResizeRequester {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Recreates performed through this scheduler.
    pub fn recreates(&self) -> u64 {
        self.recreates
    }

    pub fn flush(&mut self, ctx: &mut dyn PresentationContext) -> FlushOutcome {
        let Some(size) = self.pending.take() else {
            return FlushOutcome::Idle;
        };
        if size.is_empty() {
            debug!("resize to {size} dropped (zero area)");
            return FlushOutcome::Dropped(size);
        }
        if ctx.resize(size) {
            self.recreates += 1;
            debug!("resize flushed → {size}");
            FlushOutcome::Recreated(size)
        } else {
            FlushOutcome::Deferred(size)
        }
    }

    /// One refresh: apply the coalesced resize, then render.
    pub fn tick(&mut self, ctx: &mut dyn PresentationContext) -> FrameOutcome {
        self.flush(ctx);
        ctx.render()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pace {
    /// Render now. `next` is the following deadline when throttled.
    RenderNow { next: Option<Instant> },
    /// Not time yet; sleep until the stored deadline without redrawing.
    WaitUntil(Instant),
}

/// Optional FPS cap for when the display refresh does not pace us (vsync
/// off, unfocused window). A target of 0 means "render on every request".
#[derive(Clone, Debug, Default)]
pub struct FramePacer {
    target_fps: u32,
    next_deadline: Option<Instant>,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        Self {
            target_fps,
            next_deadline: None,
        }
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn set_target_fps(&mut self, fps: u32) {
        if self.target_fps != fps {
            self.target_fps = fps;
            self.next_deadline = None;
        }
    }

    pub fn reset(&mut self) {
        self.next_deadline = None;
    }

    pub fn poll(&mut self, now: Instant) -> Pace {
        if self.target_fps == 0 {
            return Pace::RenderNow { next: None };
        }
        match self.next_deadline {
            Some(deadline) if now < deadline => Pace::WaitUntil(deadline),
            _ => {
                let frame_dt = Duration::from_nanos(1_000_000_000u64 / u64::from(self.target_fps));
                let next = now + frame_dt;
                self.next_deadline = Some(next);
                Pace::RenderNow { next: Some(next) }
            }
        }
    }
}
