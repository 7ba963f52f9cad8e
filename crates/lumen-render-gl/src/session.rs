// SPDX-License-Identifier: CEPL-1.0
use lumen_render::{RenderSize, SurfaceHandle};

#[derive(Debug, thiserror::Error)]
pub enum GlError {
    /// The driver reset or dropped the context; it cannot be used again.
    #[error("GL context lost")]
    ContextLost,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A live GL context bound to one window surface.
pub trait GlSession {
    fn resize(&mut self, size: RenderSize);

    fn set_vsync(&mut self, on: bool);

    /// Clears to `clear`, runs `draw` with the context current, then swaps.
    fn present(
        &mut self,
        size: RenderSize,
        clear: [f32; 4],
        draw: &mut dyn FnMut(),
    ) -> Result<(), GlError>;
}

/// Opens sessions for a surface; stands in for the host toolkit's "context
/// created" step.
pub trait GlSessionFactory {
    fn open(
        &mut self,
        surface: &dyn SurfaceHandle,
        size: RenderSize,
        vsync: bool,
    ) -> anyhow::Result<Box<dyn GlSession>>;
}
