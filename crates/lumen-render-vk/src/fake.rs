// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`Driver`] with a live-handle tracker, so lifetime rules can be
//! checked the way a validation layer would, plus fault injection.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use ash::vk::{self, Handle};
use lumen_render::SurfaceHandle;

use crate::driver::{
    AdapterInfo, Driver, DriverError, DriverResult, PassBegin, QueueFamilySupport,
    SurfaceSupport, SwapchainDesc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Instance,
    Surface,
    Device,
    Swapchain,
    ImageView,
    RenderPass,
    Framebuffer,
    CommandPool,
    Semaphore,
    Fence,
}

impl Kind {
    fn device_child(self) -> bool {
        !matches!(self, Kind::Instance | Kind::Surface | Kind::Device)
    }
}

#[derive(Debug, Default)]
pub struct Tracker {
    next: u64,
    pub live: HashMap<u64, Kind>,
    fences: HashMap<u64, bool>,
    pub created: HashMap<Kind, u32>,
    pub swapchain_extents: Vec<vk::Extent2D>,
    pub fence_waits: u32,
    /// Timeout passed to every fence wait, in call order.
    pub wait_timeouts: Vec<u64>,
    pub wait_idles: u32,
    pub submits: u32,
    pub presents: u32,
    pub recorded_clears: Vec<[f32; 4]>,
    pub call_log: Vec<&'static str>,
}

impl Tracker {
    fn alloc(&mut self, kind: Kind) -> u64 {
        self.next += 1;
        self.live.insert(self.next, kind);
        *self.created.entry(kind).or_default() += 1;
        self.next
    }

    fn free(&mut self, raw: u64, kind: Kind) {
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            other => panic!("destroying {kind:?} {raw:#x} but tracker has {other:?}"),
        }
    }

    pub fn live_total(&self) -> usize {
        self.live.len()
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn created(&self, kind: Kind) -> u32 {
        self.created.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct Faults {
    pub adapters: Vec<AdapterInfo>,
    pub support: SurfaceSupport,
    /// Name of a creation step that should fail once reached.
    pub fail_step: Option<&'static str>,
    pub acquire: VecDeque<vk::Result>,
    pub submit: VecDeque<vk::Result>,
    pub present: VecDeque<vk::Result>,
    /// Fence waits return TIMEOUT while this is positive.
    pub hung_waits: u32,
    /// Submits leave their fence unsignaled while this is positive, as if
    /// the GPU stopped making progress on that batch.
    pub stalled_submits: u32,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            adapters: vec![AdapterInfo {
                handle: vk::PhysicalDevice::from_raw(0xd15c),
                name: "fake discrete".into(),
                device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
                queue_families: vec![QueueFamilySupport {
                    graphics: true,
                    present: true,
                }],
                swapchain_supported: true,
            }],
            support: SurfaceSupport {
                capabilities: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    max_image_count: 0,
                    current_extent: vk::Extent2D {
                        width: u32::MAX,
                        height: u32::MAX,
                    },
                    min_image_extent: vk::Extent2D {
                        width: 1,
                        height: 1,
                    },
                    max_image_extent: vk::Extent2D {
                        width: 4096,
                        height: 4096,
                    },
                    ..Default::default()
                },
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::R8G8B8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            },
            fail_step: None,
            acquire: VecDeque::new(),
            submit: VecDeque::new(),
            present: VecDeque::new(),
            hung_waits: 0,
            stalled_submits: 0,
        }
    }
}

/// Cheap to clone; clones share the tracker and fault script so a test can
/// keep a handle after moving the driver into a context.
#[derive(Clone, Default)]
pub struct FakeDriver {
    pub tracker: Rc<RefCell<Tracker>>,
    pub faults: Rc<RefCell<Faults>>,
    instance: Option<u64>,
    device: Option<u64>,
    images: HashMap<u64, u32>,
    next_image: u32,
}

impl FakeDriver {
    fn step(&self, name: &'static str) -> DriverResult<()> {
        self.tracker.borrow_mut().call_log.push(name);
        if self.faults.borrow().fail_step == Some(name) {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED.into());
        }
        Ok(())
    }

    fn require_device(&self) -> DriverResult<()> {
        match self.device {
            Some(_) => Ok(()),
            None => Err(DriverError::Unsupported("no logical device")),
        }
    }

    fn alloc(&self, kind: Kind) -> u64 {
        self.tracker.borrow_mut().alloc(kind)
    }

    fn free(&self, raw: u64, kind: Kind) {
        self.tracker.borrow_mut().free(raw, kind)
    }

    fn scripted(queue: &mut VecDeque<vk::Result>) -> DriverResult<()> {
        match queue.pop_front() {
            None | Some(vk::Result::SUCCESS) => Ok(()),
            Some(err) => Err(err.into()),
        }
    }
}

impl Driver for FakeDriver {
    fn create_instance(&mut self, _surface: &dyn SurfaceHandle) -> DriverResult<()> {
        self.step("create_instance")?;
        assert!(self.instance.is_none(), "instance created twice");
        self.instance = Some(self.alloc(Kind::Instance));
        Ok(())
    }

    fn destroy_instance(&mut self) {
        let t = self.tracker.borrow();
        assert_eq!(t.live(Kind::Device), 0, "instance destroyed before device");
        assert_eq!(t.live(Kind::Surface), 0, "instance destroyed before surface");
        drop(t);
        if let Some(raw) = self.instance.take() {
            self.free(raw, Kind::Instance);
        }
    }

    fn create_surface(&mut self, _surface: &dyn SurfaceHandle) -> DriverResult<vk::SurfaceKHR> {
        self.step("create_surface")?;
        Ok(vk::SurfaceKHR::from_raw(self.alloc(Kind::Surface)))
    }

    fn destroy_surface(&mut self, surface: vk::SurfaceKHR) {
        assert_eq!(
            self.tracker.borrow().live(Kind::Swapchain),
            0,
            "surface destroyed before its swapchain"
        );
        self.free(surface.as_raw(), Kind::Surface);
    }

    fn enumerate_adapters(&mut self, _surface: vk::SurfaceKHR) -> DriverResult<Vec<AdapterInfo>> {
        self.step("enumerate_adapters")?;
        Ok(self.faults.borrow().adapters.clone())
    }

    fn create_device(&mut self, _adapter: vk::PhysicalDevice, _family: u32) -> DriverResult<()> {
        self.step("create_device")?;
        self.device = Some(self.alloc(Kind::Device));
        Ok(())
    }

    fn destroy_device(&mut self) {
        let t = self.tracker.borrow();
        let children: Vec<_> = t.live.values().filter(|k| k.device_child()).collect();
        assert!(children.is_empty(), "device destroyed with live children {children:?}");
        drop(t);
        if let Some(raw) = self.device.take() {
            self.free(raw, Kind::Device);
        }
    }

    fn wait_idle(&mut self) {
        self.tracker.borrow_mut().wait_idles += 1;
    }

    fn surface_support(&mut self, _surface: vk::SurfaceKHR) -> DriverResult<SurfaceSupport> {
        self.step("surface_support")?;
        Ok(self.faults.borrow().support.clone())
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> DriverResult<vk::SwapchainKHR> {
        self.require_device()?;
        self.step("create_swapchain")?;
        let raw = self.alloc(Kind::Swapchain);
        self.images.insert(raw, desc.image_count);
        self.tracker.borrow_mut().swapchain_extents.push(desc.extent);
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&mut self, swapchain: vk::SwapchainKHR) -> DriverResult<Vec<vk::Image>> {
        let count = self.images.get(&swapchain.as_raw()).copied().unwrap_or(0);
        Ok((0..count)
            .map(|i| vk::Image::from_raw((swapchain.as_raw() << 8) | u64::from(i)))
            .collect())
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        assert_eq!(
            self.tracker.borrow().live(Kind::ImageView),
            0,
            "swapchain destroyed before its image views"
        );
        self.images.remove(&swapchain.as_raw());
        self.free(swapchain.as_raw(), Kind::Swapchain);
    }

    fn create_image_view(&mut self, _image: vk::Image, _format: vk::Format) -> DriverResult<vk::ImageView> {
        self.step("create_image_view")?;
        Ok(vk::ImageView::from_raw(self.alloc(Kind::ImageView)))
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.free(view.as_raw(), Kind::ImageView);
    }

    fn create_render_pass(&mut self, _format: vk::Format) -> DriverResult<vk::RenderPass> {
        self.step("create_render_pass")?;
        Ok(vk::RenderPass::from_raw(self.alloc(Kind::RenderPass)))
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.free(render_pass.as_raw(), Kind::RenderPass);
    }

    fn create_framebuffer(
        &mut self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> DriverResult<vk::Framebuffer> {
        self.step("create_framebuffer")?;
        Ok(vk::Framebuffer::from_raw(self.alloc(Kind::Framebuffer)))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.free(framebuffer.as_raw(), Kind::Framebuffer);
    }

    fn create_command_pool(&mut self, _family: u32) -> DriverResult<vk::CommandPool> {
        self.step("create_command_pool")?;
        Ok(vk::CommandPool::from_raw(self.alloc(Kind::CommandPool)))
    }

    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> DriverResult<Vec<vk::CommandBuffer>> {
        self.step("allocate_command_buffers")?;
        Ok((0..count)
            .map(|i| vk::CommandBuffer::from_raw((pool.as_raw() << 8) | u64::from(i)))
            .collect())
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool, _buffers: &[vk::CommandBuffer]) {
        self.free(pool.as_raw(), Kind::CommandPool);
    }

    fn create_semaphore(&mut self) -> DriverResult<vk::Semaphore> {
        self.step("create_semaphore")?;
        Ok(vk::Semaphore::from_raw(self.alloc(Kind::Semaphore)))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.free(semaphore.as_raw(), Kind::Semaphore);
    }

    fn create_fence(&mut self, signaled: bool) -> DriverResult<vk::Fence> {
        self.step("create_fence")?;
        let raw = self.alloc(Kind::Fence);
        self.tracker.borrow_mut().fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.tracker.borrow_mut().fences.remove(&fence.as_raw());
        self.free(fence.as_raw(), Kind::Fence);
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> DriverResult<()> {
        let mut faults = self.faults.borrow_mut();
        let mut t = self.tracker.borrow_mut();
        t.fence_waits += 1;
        t.wait_timeouts.push(timeout_ns);
        if faults.hung_waits > 0 {
            faults.hung_waits -= 1;
            return Err(vk::Result::TIMEOUT.into());
        }
        match t.fences.get(&fence.as_raw()) {
            Some(true) => Ok(()),
            Some(false) => {
                // Nothing will signal it; a real unbounded wait never returns.
                assert_ne!(
                    timeout_ns,
                    u64::MAX,
                    "unbounded wait on stalled fence {:#x}",
                    fence.as_raw()
                );
                Err(vk::Result::TIMEOUT.into())
            }
            None => panic!("waiting on unknown fence {:#x}", fence.as_raw()),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> DriverResult<()> {
        self.tracker.borrow_mut().fences.insert(fence.as_raw(), false);
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> DriverResult<(u32, bool)> {
        let suboptimal = match self.faults.borrow_mut().acquire.pop_front() {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(err) => return Err(err.into()),
        };
        let count = self.images.get(&swapchain.as_raw()).copied().unwrap_or(1).max(1);
        let index = self.next_image % count;
        self.next_image = self.next_image.wrapping_add(1);
        Ok((index, suboptimal))
    }

    fn record_pass(
        &mut self,
        cmd: vk::CommandBuffer,
        pass: &PassBegin,
        draw: &mut dyn FnMut(vk::CommandBuffer),
    ) -> DriverResult<()> {
        assert!(self.tracker.borrow().live.contains_key(&pass.framebuffer.as_raw()));
        self.tracker.borrow_mut().recorded_clears.push(pass.clear);
        draw(cmd);
        Ok(())
    }

    fn submit(
        &mut self,
        _cmd: vk::CommandBuffer,
        _wait: vk::Semaphore,
        _signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> DriverResult<()> {
        let mut faults = self.faults.borrow_mut();
        Self::scripted(&mut faults.submit)?;
        let stalled = faults.stalled_submits > 0;
        faults.stalled_submits = faults.stalled_submits.saturating_sub(1);
        let mut t = self.tracker.borrow_mut();
        t.submits += 1;
        // Otherwise the fake GPU finishes instantly.
        t.fences.insert(fence.as_raw(), !stalled);
        Ok(())
    }

    fn present(
        &mut self,
        _swapchain: vk::SwapchainKHR,
        _image_index: u32,
        _wait: vk::Semaphore,
    ) -> DriverResult<bool> {
        self.tracker.borrow_mut().presents += 1;
        match self.faults.borrow_mut().present.pop_front() {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            None | Some(vk::Result::SUCCESS) => Ok(false),
            Some(err) => Err(err.into()),
        }
    }
}
