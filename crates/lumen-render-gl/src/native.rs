// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CString;
use std::num::NonZeroU32;

use anyhow::{anyhow, Context, Result};
use glow::HasContext as _;
use glutin::{
    config::ConfigTemplateBuilder,
    context::{
        ContextApi, ContextAttributesBuilder, NotCurrentContext, PossiblyCurrentContext, Version,
    },
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};
use lumen_render::{RenderSize, SurfaceHandle};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use tracing::{debug, warn};

use crate::session::{GlError, GlSession, GlSessionFactory};

fn non_zero(v: u32) -> NonZeroU32 {
    NonZeroU32::new(v).unwrap_or(NonZeroU32::MIN)
}

fn swap_interval(vsync: bool) -> SwapInterval {
    if vsync {
        SwapInterval::Wait(NonZeroU32::MIN)
    } else {
        SwapInterval::DontWait
    }
}

/// Opens GL 3.3 contexts through glutin over EGL.
#[derive(Debug, Default)]
pub struct GlutinFactory;

impl GlutinFactory {
    fn make_current(
        display: &Display,
        window_handle: RawWindowHandle,
        size: RenderSize,
    ) -> Result<(
        PossiblyCurrentContext,
        Surface<WindowSurface>,
        glow::Context,
    )> {
        let template = ConfigTemplateBuilder::new().build();
        let mut configs = unsafe { display.find_configs(template) }.context("find_configs")?;
        let config = configs.next().ok_or_else(|| anyhow!("no GL configs"))?;

        let sattrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
            window_handle,
            non_zero(size.width),
            non_zero(size.height),
        );
        let surface = unsafe { display.create_window_surface(&config, &sattrs) }
            .context("create_window_surface")?;
        let ctx_attrs = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
            .build(Some(window_handle));
        let not_current: NotCurrentContext =
            unsafe { display.create_context(&config, &ctx_attrs) }.context("create_context")?;

        let context = not_current.make_current(&surface).context("make_current")?;

        let gl = unsafe {
            glow::Context::from_loader_function(|s| match CString::new(s) {
                Ok(name) => display.get_proc_address(&name) as *const _,
                Err(_) => std::ptr::null(),
            })
        };

        Ok((context, surface, gl))
    }
}

impl GlSessionFactory for GlutinFactory {
    fn open(
        &mut self,
        surface: &dyn SurfaceHandle,
        size: RenderSize,
        vsync: bool,
    ) -> Result<Box<dyn GlSession>> {
        let wh = surface
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let dh = surface
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let display =
            unsafe { Display::new(dh, DisplayApiPreference::Egl) }.context("Display::new")?;
        let (context, window_surface, gl) = Self::make_current(&display, wh, size)?;

        unsafe {
            gl.enable(glow::FRAMEBUFFER_SRGB);
            gl.disable(glow::DEPTH_TEST);
        }

        let mut session = GlutinSession {
            context,
            surface: window_surface,
            gl,
            _display: display,
        };
        session.set_vsync(vsync);
        debug!("GL session opened ({size}, vsync {vsync})");
        Ok(Box::new(session))
    }
}

struct GlutinSession {
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    gl: glow::Context,
    _display: Display,
}

impl GlSession for GlutinSession {
    fn resize(&mut self, size: RenderSize) {
        self.surface
            .resize(&self.context, non_zero(size.width), non_zero(size.height));
    }

    fn set_vsync(&mut self, on: bool) {
        if let Err(err) = self.surface.set_swap_interval(&self.context, swap_interval(on)) {
            warn!("set_swap_interval: {err}");
        }
    }

    fn present(
        &mut self,
        size: RenderSize,
        clear: [f32; 4],
        draw: &mut dyn FnMut(),
    ) -> Result<(), GlError> {
        unsafe {
            self.gl.viewport(0, 0, size.width as i32, size.height as i32);
            self.gl.clear_color(clear[0], clear[1], clear[2], clear[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
        draw();
        if unsafe { self.gl.get_error() } == glow::CONTEXT_LOST {
            return Err(GlError::ContextLost);
        }

        match self.surface.swap_buffers(&self.context) {
            Ok(()) => Ok(()),
            Err(err) if matches!(err.error_kind(), glutin::error::ErrorKind::ContextLost) => {
                Err(GlError::ContextLost)
            }
            Err(err) => Err(anyhow::Error::new(err).context("swap_buffers").into()),
        }
    }
}
