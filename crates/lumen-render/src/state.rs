// SPDX-License-Identifier: CEPL-1.0
use portable_atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentationState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Lost = 3,
    Recovering = 4,
}

impl PresentationState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::Lost,
            4 => Self::Recovering,
            _ => Self::Uninitialized,
        }
    }

    /// Defined edges of the lifecycle. Every state may fall back to
    /// `Uninitialized` (detach, failed first attach, exhausted recovery).
    pub fn can_transition_to(self, next: PresentationState) -> bool {
        use PresentationState::*;
        matches!(
            (self, next),
            (_, Uninitialized)
                | (Uninitialized, Initializing)
                | (Initializing, Ready)
                | (Ready, Lost)
                | (Lost, Recovering)
                | (Recovering, Ready)
                | (Recovering, Lost)
        )
    }
}

/// Lock-free holder of a [`PresentationState`].
///
/// One thread (the render-driving one) writes with release stores; any
/// thread may read with acquire loads.
#[derive(Debug)]
pub struct StateCell {
    raw: AtomicU8,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub const fn new() -> Self {
        Self {
            raw: AtomicU8::new(PresentationState::Uninitialized as u8),
        }
    }

    pub fn get(&self) -> PresentationState {
        PresentationState::from_raw(self.raw.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.get() == PresentationState::Ready
    }

    pub fn is_lost(&self) -> bool {
        self.get() == PresentationState::Lost
    }

    /// Moves to `next` if the edge exists. Staying in place is a no-op that
    /// reports success; an undefined edge is refused and logged.
    pub fn transition(&self, next: PresentationState) -> bool {
        let current = self.get();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!("refused presentation state edge {current:?} -> {next:?}");
            return false;
        }
        self.raw.store(next as u8, Ordering::Release);
        debug!("presentation state {current:?} -> {next:?}");
        true
    }
}
