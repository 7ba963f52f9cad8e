// SPDX-License-Identifier: CEPL-1.0
use std::sync::mpsc::Sender;

use tracing::{info, warn};

use crate::BackendKind;

/// One-shot notifications posted from the render-driving side to the UI
/// thread, which applies them to its own [`UiStatus`].
#[derive(Clone, Debug, PartialEq)]
pub enum StatusEvent {
    BackendActive {
        backend: BackendKind,
        /// Set when the user's choice was unavailable and got clamped.
        requested: Option<BackendKind>,
    },
    DeviceLost {
        backend: BackendKind,
        message: String,
    },
    Recovered {
        backend: BackendKind,
        attempts: u32,
    },
    /// No GPU backend could be kept alive; software rendering took over.
    GpuUnavailable { message: String },
}

pub trait StatusSink {
    fn post(&self, event: StatusEvent);
}

impl StatusSink for Sender<StatusEvent> {
    fn post(&self, event: StatusEvent) {
        if self.send(event).is_err() {
            warn!("status receiver dropped; event discarded");
        }
    }
}

/// UI-thread view of the presentation layer. Only mutated by applying
/// [`StatusEvent`]s, never from the render path directly.
#[derive(Clone, Debug, Default)]
pub struct UiStatus {
    pub backend: Option<BackendKind>,
    pub last_error: Option<String>,
    pub gpu_unavailable: bool,
    banner_dismissed: bool,
}

impl UiStatus {
    pub fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::BackendActive { backend, requested } => {
                if let Some(req) = requested {
                    info!("requested backend {req} unavailable, using {backend}");
                }
                self.backend = Some(backend);
                if backend != BackendKind::Software {
                    self.gpu_unavailable = false;
                    self.banner_dismissed = false;
                }
            }
            StatusEvent::DeviceLost { backend, message } => {
                warn!("{backend} device lost: {message}");
                self.last_error = Some(message);
            }
            StatusEvent::Recovered { backend, attempts } => {
                info!("{backend} recovered after {attempts} attempt(s)");
                self.backend = Some(backend);
            }
            StatusEvent::GpuUnavailable { message } => {
                warn!("GPU unavailable: {message}");
                self.backend = Some(BackendKind::Software);
                self.last_error = Some(message);
                if !self.gpu_unavailable {
                    self.banner_dismissed = false;
                }
                self.gpu_unavailable = true;
            }
        }
    }

    /// Whether the dismissible "GPU unavailable" indicator should show.
    pub fn show_banner(&self) -> bool {
        self.gpu_unavailable && !self.banner_dismissed
    }

    pub fn dismiss_banner(&mut self) {
        self.banner_dismissed = true;
    }

    pub fn banner_text(&self) -> Option<&'static str> {
        self.show_banner()
            .then_some("GPU unavailable, using software rendering")
    }
}
