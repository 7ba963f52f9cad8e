// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Legacy immediate-mode API bound to the host's GL context.
    OpenGl,
    /// Explicit API with a swapchain.
    Vulkan,
    /// No GPU context at all; the host draws on the CPU.
    Software,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::OpenGl => "gl",
            BackendKind::Vulkan => "vk",
            BackendKind::Software => "software",
        }
    }

    fn capability(self) -> DeviceCapabilities {
        match self {
            BackendKind::OpenGl => DeviceCapabilities::SIMPLE,
            BackendKind::Vulkan => DeviceCapabilities::EXPLICIT,
            BackendKind::Software => DeviceCapabilities::SOFTWARE,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown backend `{0}` (expected gl, vk or software)")]
pub struct UnknownBackend(String);

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gl" | "opengl" => Ok(BackendKind::OpenGl),
            "vk" | "vulkan" => Ok(BackendKind::Vulkan),
            "software" | "sw" | "none" => Ok(BackendKind::Software),
            _ => Err(UnknownBackend(s.to_owned())),
        }
    }
}

bitflags! {
    /// Immutable snapshot of which backends the platform offers, probed
    /// once at startup.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceCapabilities: u8 {
        const SIMPLE = 1;
        const EXPLICIT = 1 << 1;
        const SOFTWARE = 1 << 2;
    }
}

impl DeviceCapabilities {
    /// Software is always present.
    pub fn from_probe(simple: bool, explicit: bool) -> Self {
        let mut caps = DeviceCapabilities::SOFTWARE;
        caps.set(DeviceCapabilities::SIMPLE, simple);
        caps.set(DeviceCapabilities::EXPLICIT, explicit);
        caps
    }

    pub fn supports(self, kind: BackendKind) -> bool {
        self.contains(kind.capability())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSelection {
    /// Backends to try, most preferred first. Always ends in `Software`.
    pub order: Vec<BackendKind>,
    /// The user asked for a backend the platform does not have.
    pub clamped: bool,
}

impl BackendSelection {
    pub fn first(&self) -> BackendKind {
        self.order.first().copied().unwrap_or(BackendKind::Software)
    }
}

/// Orders backends: the user's choice when available, then the best
/// available GPU backend, then software. An unavailable choice is clamped,
/// never an error.
pub fn select_backends(
    caps: DeviceCapabilities,
    preference: Option<BackendKind>,
) -> BackendSelection {
    let mut order = Vec::with_capacity(3);
    let mut clamped = false;

    if let Some(kind) = preference {
        if caps.supports(kind) {
            order.push(kind);
        } else {
            clamped = true;
        }
    }

    for kind in [BackendKind::Vulkan, BackendKind::OpenGl, BackendKind::Software] {
        if caps.supports(kind) && !order.contains(&kind) {
            order.push(kind);
        }
    }
    if !order.contains(&BackendKind::Software) {
        order.push(BackendKind::Software);
    }

    BackendSelection { order, clamped }
}
