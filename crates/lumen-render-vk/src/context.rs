// SPDX-License-Identifier: CEPL-1.0
use std::sync::{Arc, Weak};
use std::time::Duration;

use ash::vk::{self, Handle};
use lumen_render::{
    surface_size, BackendKind, DrawCallback, FrameContext, FrameOutcome, NativeFrame,
    PresentError, PresentationContext, PresentationState, RenderSize, SharedSurface, SkipReason,
    StateCell, SurfaceHandle, DEFAULT_CLEAR,
};
use tracing::{debug, error, info, warn};

use crate::driver::{extent_size, Driver, DriverError, PassBegin, SwapchainDesc};
use crate::swapchain::{
    choose_present_mode, choose_surface_format, extent_from_caps, image_count, select_adapter,
    FrameSync, SwapchainResources, VkVsyncMode,
};

#[derive(Clone, Copy, Debug)]
pub struct VkConfig {
    /// Clamped to `1..=4`.
    pub max_frames_in_flight: usize,
    pub vsync_mode: VkVsyncMode,
    pub preferred_format: vk::SurfaceFormatKHR,
    pub fence_timeout: Duration,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            vsync_mode: VkVsyncMode::Fifo,
            preferred_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            fence_timeout: Duration::from_secs(1),
        }
    }
}

impl VkConfig {
    pub fn frames_in_flight(&self) -> usize {
        self.max_frames_in_flight.clamp(1, 4)
    }

    fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_nanos()).unwrap_or(u64::MAX)
    }
}

fn at(stage: &'static str) -> impl FnOnce(DriverError) -> PresentError {
    move |err| PresentError::provisioning(stage, err)
}

/// Explicit-API backend. Owns every Vulkan object it creates; the host
/// surface is only borrowed.
pub struct VulkanPresentationContext<D: Driver> {
    driver: D,
    cfg: VkConfig,
    state: Arc<StateCell>,
    surface: Option<Weak<dyn SurfaceHandle>>,

    instance: bool,
    device: bool,
    vk_surface: vk::SurfaceKHR,
    queue_family: u32,
    adapter_name: String,
    surface_format: vk::SurfaceFormatKHR,
    render_pass: vk::RenderPass,

    chain: SwapchainResources,
    frames: Vec<FrameSync>,
    /// Fence of the frame that last rendered into each swapchain image.
    images_in_flight: Vec<vk::Fence>,
    frame_index: usize,

    /// Bounds the next swapchain build aims for.
    target: RenderSize,
    /// Surface size observed when the swapchain was last built.
    surface_seen: RenderSize,
    recreate_pending: bool,

    clear: [f32; 4],
    callbacks: Vec<DrawCallback>,
    last_error: Option<PresentError>,
}

impl<D: Driver> VulkanPresentationContext<D> {
    pub fn new(driver: D, cfg: VkConfig, state: Arc<StateCell>) -> Self {
        Self {
            driver,
            cfg,
            state,
            surface: None,
            instance: false,
            device: false,
            vk_surface: vk::SurfaceKHR::null(),
            queue_family: 0,
            adapter_name: String::new(),
            surface_format: cfg.preferred_format,
            render_pass: vk::RenderPass::null(),
            chain: SwapchainResources::default(),
            frames: Vec::new(),
            images_in_flight: Vec::new(),
            frame_index: 0,
            target: RenderSize::ZERO,
            surface_seen: RenderSize::ZERO,
            recreate_pending: false,
            clear: DEFAULT_CLEAR,
            callbacks: Vec::new(),
            last_error: None,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn extent(&self) -> RenderSize {
        extent_size(self.chain.extent)
    }

    pub fn image_count(&self) -> usize {
        self.chain.images.len()
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn is_attached(&self) -> bool {
        self.device && self.chain.is_complete()
    }

    fn provision(&mut self, surface: &dyn SurfaceHandle) -> Result<(), PresentError> {
        let size = surface.size();
        if size.is_empty() {
            return Err(PresentError::DegenerateSurface);
        }

        self.driver
            .create_instance(surface)
            .map_err(at("create_instance"))?;
        self.instance = true;
        self.vk_surface = self
            .driver
            .create_surface(surface)
            .map_err(at("create_surface"))?;

        let adapters = self
            .driver
            .enumerate_adapters(self.vk_surface)
            .map_err(at("enumerate_physical_devices"))?;
        let (idx, family) = select_adapter(&adapters).ok_or_else(|| {
            PresentError::provisioning(
                "select_physical_device",
                format!(
                    "none of {} adapter(s) has a graphics+present queue and swapchain support",
                    adapters.len()
                ),
            )
        })?;
        let adapter = &adapters[idx];
        self.driver
            .create_device(adapter.handle, family)
            .map_err(at("create_device"))?;
        self.device = true;
        self.queue_family = family;
        self.adapter_name = adapter.name.clone();

        let support = self
            .driver
            .surface_support(self.vk_surface)
            .map_err(at("get_surface_support"))?;
        self.surface_format = choose_surface_format(&support.formats, self.cfg.preferred_format)
            .ok_or_else(|| {
                PresentError::provisioning("choose_surface_format", "surface lists no formats")
            })?;

        self.target = size;
        self.build_swapchain(size)?;
        self.render_pass = self
            .driver
            .create_render_pass(self.surface_format.format)
            .map_err(at("create_render_pass"))?;
        self.build_targets()?;
        self.create_frame_sync()?;
        self.surface_seen = size;
        Ok(())
    }

    /// Swapchain, its images and one view per image.
    fn build_swapchain(&mut self, want: RenderSize) -> Result<(), PresentError> {
        let support = self
            .driver
            .surface_support(self.vk_surface)
            .map_err(at("get_surface_support"))?;
        let caps = &support.capabilities;
        let desc = SwapchainDesc {
            surface: self.vk_surface,
            format: self.surface_format,
            extent: extent_from_caps(caps, want),
            image_count: image_count(caps),
            present_mode: choose_present_mode(&support.present_modes, self.cfg.vsync_mode),
            pre_transform: caps.current_transform,
        };

        self.chain.swapchain = self
            .driver
            .create_swapchain(&desc)
            .map_err(at("create_swapchain"))?;
        self.chain.format = desc.format.format;
        self.chain.extent = desc.extent;
        self.chain.images = self
            .driver
            .swapchain_images(self.chain.swapchain)
            .map_err(at("get_swapchain_images"))?;
        for &image in &self.chain.images {
            let view = self
                .driver
                .create_image_view(image, self.chain.format)
                .map_err(at("create_image_view"))?;
            self.chain.image_views.push(view);
        }
        Ok(())
    }

    /// Framebuffers, command pool and one command buffer per image.
    fn build_targets(&mut self) -> Result<(), PresentError> {
        for &view in &self.chain.image_views {
            let fb = self
                .driver
                .create_framebuffer(self.render_pass, view, self.chain.extent)
                .map_err(at("create_framebuffer"))?;
            self.chain.framebuffers.push(fb);
        }
        self.chain.cmd_pool = self
            .driver
            .create_command_pool(self.queue_family)
            .map_err(at("create_command_pool"))?;
        self.chain.cmd_bufs = self
            .driver
            .allocate_command_buffers(self.chain.cmd_pool, self.chain.images.len() as u32)
            .map_err(at("allocate_command_buffers"))?;
        self.images_in_flight = vec![vk::Fence::null(); self.chain.images.len()];
        Ok(())
    }

    fn create_frame_sync(&mut self) -> Result<(), PresentError> {
        for _ in 0..self.cfg.frames_in_flight() {
            let mut sync = FrameSync::default();
            let built = self.fill_frame_sync(&mut sync);
            // Kept even when half built so teardown sees every handle.
            self.frames.push(sync);
            built?;
        }
        Ok(())
    }

    fn fill_frame_sync(&mut self, sync: &mut FrameSync) -> Result<(), PresentError> {
        sync.image_available = self
            .driver
            .create_semaphore()
            .map_err(at("create_semaphore"))?;
        sync.render_finished = self
            .driver
            .create_semaphore()
            .map_err(at("create_semaphore"))?;
        // Signaled so the first wait on each slot returns immediately.
        sync.in_flight = self.driver.create_fence(true).map_err(at("create_fence"))?;
        Ok(())
    }

    /// Everything that depends on the surface size, in reverse creation
    /// order. The render pass only goes on full teardown.
    fn destroy_swapchain_resources(&mut self, with_render_pass: bool) {
        let chain = std::mem::take(&mut self.chain);
        if chain.cmd_pool != vk::CommandPool::null() {
            self.driver.destroy_command_pool(chain.cmd_pool, &chain.cmd_bufs);
        }
        for fb in chain.framebuffers {
            self.driver.destroy_framebuffer(fb);
        }
        if with_render_pass && self.render_pass != vk::RenderPass::null() {
            self.driver.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        for view in chain.image_views {
            self.driver.destroy_image_view(view);
        }
        if chain.swapchain != vk::SwapchainKHR::null() {
            self.driver.destroy_swapchain(chain.swapchain);
        }
        self.images_in_flight.clear();
    }

    /// Releases every object this context created. Leaves the state cell
    /// alone; callers decide which state follows.
    fn teardown(&mut self) {
        if !self.instance {
            return;
        }
        if self.device {
            self.driver.wait_idle();
            for sync in std::mem::take(&mut self.frames) {
                if sync.in_flight != vk::Fence::null() {
                    self.driver.destroy_fence(sync.in_flight);
                }
                if sync.render_finished != vk::Semaphore::null() {
                    self.driver.destroy_semaphore(sync.render_finished);
                }
                if sync.image_available != vk::Semaphore::null() {
                    self.driver.destroy_semaphore(sync.image_available);
                }
            }
            self.destroy_swapchain_resources(true);
            self.driver.destroy_device();
            self.device = false;
        }
        if self.vk_surface != vk::SurfaceKHR::null() {
            self.driver.destroy_surface(self.vk_surface);
            self.vk_surface = vk::SurfaceKHR::null();
        }
        self.driver.destroy_instance();
        self.instance = false;

        self.frame_index = 0;
        self.surface_seen = RenderSize::ZERO;
        self.recreate_pending = false;
        debug!("vulkan resources released");
    }

    fn lose(&mut self, stage: &'static str, err: DriverError) -> FrameOutcome {
        let err = if err.is_device_lost() {
            PresentError::DeviceLost(format!("{stage}: {err}"))
        } else {
            PresentError::provisioning(stage, err)
        };
        error!("vulkan: {err}");
        self.last_error = Some(err);
        self.state.transition(PresentationState::Lost);
        FrameOutcome::Lost
    }

    fn fail_frame(&mut self, err: PresentError) -> FrameOutcome {
        error!("vulkan: {err}");
        self.last_error = Some(err);
        self.state.transition(PresentationState::Lost);
        FrameOutcome::Lost
    }
}

impl<D: Driver> PresentationContext for VulkanPresentationContext<D> {
    fn backend(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    fn attach(&mut self, surface: &SharedSurface) -> bool {
        self.teardown();
        let recovering = self.state.get() == PresentationState::Recovering;
        if !recovering {
            self.state.transition(PresentationState::Uninitialized);
            self.state.transition(PresentationState::Initializing);
        }
        self.surface = Some(Arc::downgrade(surface));

        match self.provision(surface.as_ref()) {
            Ok(()) => {
                self.last_error = None;
                info!(
                    "Vulkan swapchain ready ({}, fmt 0x{:x}, {} images) on {}",
                    self.extent(),
                    self.chain.format.as_raw(),
                    self.chain.images.len(),
                    self.adapter_name
                );
                self.state.transition(PresentationState::Ready);
                true
            }
            Err(err) => {
                error!("vulkan attach failed: {err}");
                self.teardown();
                self.last_error = Some(err);
                self.state.transition(if recovering {
                    PresentationState::Lost
                } else {
                    PresentationState::Uninitialized
                });
                false
            }
        }
    }

    fn detach(&mut self) {
        self.teardown();
        self.surface = None;
        self.state.transition(PresentationState::Uninitialized);
    }

    fn reattach(&mut self) -> bool {
        match self.surface.as_ref().and_then(Weak::upgrade) {
            Some(surface) => self.attach(&surface),
            None => {
                self.teardown();
                self.last_error = Some(PresentError::provisioning(
                    "reattach",
                    "host surface no longer exists",
                ));
                self.state.transition(if self.state.get() == PresentationState::Recovering {
                    PresentationState::Lost
                } else {
                    PresentationState::Uninitialized
                });
                false
            }
        }
    }

    fn render(&mut self) -> FrameOutcome {
        if !self.device || !self.state.is_ready() {
            return FrameOutcome::Skipped(SkipReason::NotReady);
        }
        let size = surface_size(self.surface.as_ref());
        if size.is_empty() {
            return FrameOutcome::Skipped(SkipReason::DegenerateSurface);
        }
        if size != self.surface_seen {
            self.target = size;
            if !self.recreate_swapchain() {
                return FrameOutcome::Lost;
            }
        } else if self.recreate_pending && !self.recreate_swapchain() {
            return FrameOutcome::Lost;
        }

        let slot = self.frame_index;
        let sync = self.frames[slot];
        let timeout = self.cfg.fence_timeout_ns();

        if let Err(err) = self.driver.wait_for_fence(sync.in_flight, timeout) {
            if err.is_timeout() {
                warn!("vulkan: frame slot {slot} still busy after {:?}", self.cfg.fence_timeout);
                return FrameOutcome::Skipped(SkipReason::Timeout);
            }
            return self.lose("wait_for_fences", err);
        }

        let (image_index, suboptimal) = match self.driver.acquire_next_image(
            self.chain.swapchain,
            sync.image_available,
            timeout,
        ) {
            Ok(pair) => pair,
            Err(err) if err.is_out_of_date() => {
                debug!("vulkan: swapchain out of date on acquire");
                if !self.recreate_swapchain() && self.state.is_lost() {
                    return FrameOutcome::Lost;
                }
                return FrameOutcome::Skipped(SkipReason::OutOfDate);
            }
            Err(err) if err.is_timeout() || err.vk_result() == Some(vk::Result::NOT_READY) => {
                return FrameOutcome::Skipped(SkipReason::Timeout);
            }
            Err(err) => return self.lose("acquire_next_image", err),
        };
        // Presented anyway; the rebuild happens before the next frame.
        if suboptimal {
            self.recreate_pending = true;
        }

        let image = image_index as usize;
        let (Some(&cmd), Some(&framebuffer)) = (
            self.chain.cmd_bufs.get(image),
            self.chain.framebuffers.get(image),
        ) else {
            return self.fail_frame(PresentError::provisioning(
                "acquire_next_image",
                format!("image index {image_index} outside swapchain"),
            ));
        };

        // The image is acquired and `image_available` will be signaled, so a
        // timeout here cannot be skipped like the slot wait above; the frame
        // sync has to be rebuilt.
        let previous = self.images_in_flight[image];
        if previous != vk::Fence::null() && previous != sync.in_flight {
            if let Err(err) = self.driver.wait_for_fence(previous, timeout) {
                if err.is_timeout() {
                    warn!(
                        "vulkan: image {image_index} still in flight after {:?}",
                        self.cfg.fence_timeout
                    );
                }
                return self.lose("wait_for_fences(image)", err);
            }
        }
        self.images_in_flight[image] = sync.in_flight;

        let pass = PassBegin {
            render_pass: self.render_pass,
            framebuffer,
            extent: self.chain.extent,
            clear: self.clear,
        };
        let frame = FrameContext {
            extent: extent_size(self.chain.extent),
            clear: self.clear,
            slot,
            image_index,
            native: NativeFrame::Vulkan {
                command_buffer: cmd.as_raw(),
            },
        };
        let callbacks = &mut self.callbacks;
        let recorded = self
            .driver
            .record_pass(cmd, &pass, &mut |_cmd: vk::CommandBuffer| {
                for cb in callbacks.iter_mut() {
                    cb(&frame);
                }
            });
        if let Err(err) = recorded {
            return self.lose("record_command_buffer", err);
        }

        if let Err(err) = self.driver.reset_fence(sync.in_flight) {
            return self.lose("reset_fences", err);
        }
        if let Err(err) = self.driver.submit(
            cmd,
            sync.image_available,
            sync.render_finished,
            sync.in_flight,
        ) {
            return self.lose("queue_submit", err);
        }

        let outcome = match self.driver.present(
            self.chain.swapchain,
            image_index,
            sync.render_finished,
        ) {
            Ok(suboptimal) => {
                if suboptimal {
                    self.recreate_pending = true;
                }
                FrameOutcome::Presented
            }
            Err(err) if err.is_out_of_date() => {
                self.recreate_pending = true;
                FrameOutcome::Skipped(SkipReason::OutOfDate)
            }
            Err(err) => return self.lose("queue_present", err),
        };

        self.frame_index = (self.frame_index + 1) % self.frames.len();
        outcome
    }

    fn recreate_swapchain(&mut self) -> bool {
        if !self.device {
            return false;
        }
        let size = surface_size(self.surface.as_ref());
        if size.is_empty() {
            debug!("vulkan: surface is {size}, keeping current swapchain");
            return false;
        }
        let want = if self.target.is_empty() {
            size
        } else {
            self.target
        };

        self.driver.wait_idle();
        self.destroy_swapchain_resources(false);
        let rebuilt = self.build_swapchain(want).and_then(|()| self.build_targets());
        match rebuilt {
            Ok(()) => {
                self.frame_index = 0;
                self.surface_seen = size;
                self.recreate_pending = false;
                info!("Vulkan swapchain rebuilt ({})", self.extent());
                true
            }
            Err(err) => {
                // No half-built chain survives; the render pass stays for reattach.
                self.destroy_swapchain_resources(false);
                self.fail_frame(err);
                false
            }
        }
    }

    fn resize(&mut self, size: RenderSize) -> bool {
        if size.is_empty() {
            return false;
        }
        self.target = size;
        self.recreate_swapchain()
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
        self.last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

impl<D: Driver> Drop for VulkanPresentationContext<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
