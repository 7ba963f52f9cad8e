// SPDX-License-Identifier: CEPL-1.0
//! The thin seam between the presentation protocol and the Vulkan API.
//!
//! [`VulkanPresentationContext`](crate::VulkanPresentationContext) decides
//! *what* to create, in which order, and how to react to each result code;
//! a [`Driver`] only performs single API calls. The instance and logical
//! device are held by the driver, every other object travels as a raw `vk`
//! handle owned by the context.

use ash::vk;
use lumen_render::{RenderSize, SurfaceHandle};
use raw_window_handle::HandleError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Vk(#[from] vk::Result),
    #[error("window handle: {0}")]
    Handle(#[from] HandleError),
    #[error("{0}")]
    Unsupported(&'static str),
}

impl DriverError {
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            DriverError::Vk(r) => Some(*r),
            _ => None,
        }
    }

    /// The device (or the surface it presents to) is gone for good.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self.vk_result(),
            Some(vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_SURFACE_LOST_KHR)
        )
    }

    pub fn is_out_of_date(&self) -> bool {
        self.vk_result() == Some(vk::Result::ERROR_OUT_OF_DATE_KHR)
    }

    pub fn is_timeout(&self) -> bool {
        self.vk_result() == Some(vk::Result::TIMEOUT)
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

#[derive(Clone, Debug)]
pub struct AdapterInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilySupport>,
    pub swapchain_supported: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Everything needed to begin the single-subpass render pass for a frame.
#[derive(Clone, Copy, Debug)]
pub struct PassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear: [f32; 4],
}

pub fn extent_size(extent: vk::Extent2D) -> RenderSize {
    RenderSize::new(extent.width, extent.height)
}

pub trait Driver {
    fn create_instance(&mut self, surface: &dyn SurfaceHandle) -> DriverResult<()>;
    fn destroy_instance(&mut self);

    fn create_surface(&mut self, surface: &dyn SurfaceHandle) -> DriverResult<vk::SurfaceKHR>;
    fn destroy_surface(&mut self, surface: vk::SurfaceKHR);

    fn enumerate_adapters(&mut self, surface: vk::SurfaceKHR) -> DriverResult<Vec<AdapterInfo>>;

    /// Creates the logical device with the swapchain extension and one queue
    /// from `queue_family`.
    fn create_device(&mut self, adapter: vk::PhysicalDevice, queue_family: u32)
        -> DriverResult<()>;
    fn destroy_device(&mut self);
    fn wait_idle(&mut self);

    fn surface_support(&mut self, surface: vk::SurfaceKHR) -> DriverResult<SurfaceSupport>;

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> DriverResult<vk::SwapchainKHR>;
    fn swapchain_images(&mut self, swapchain: vk::SwapchainKHR) -> DriverResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format)
        -> DriverResult<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);

    fn create_render_pass(&mut self, format: vk::Format) -> DriverResult<vk::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> DriverResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    fn create_command_pool(&mut self, queue_family: u32) -> DriverResult<vk::CommandPool>;
    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> DriverResult<Vec<vk::CommandBuffer>>;
    /// Frees `buffers` and then destroys their pool.
    fn destroy_command_pool(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    fn create_semaphore(&mut self) -> DriverResult<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn create_fence(&mut self, signaled: bool) -> DriverResult<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);

    /// `Err` with `TIMEOUT` when the fence is still unsignaled after
    /// `timeout_ns`.
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> DriverResult<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> DriverResult<()>;

    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> DriverResult<(u32, bool)>;

    /// Resets `cmd` and records the render pass; `draw` runs inside it.
    fn record_pass(
        &mut self,
        cmd: vk::CommandBuffer,
        pass: &PassBegin,
        draw: &mut dyn FnMut(vk::CommandBuffer),
    ) -> DriverResult<()>;

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> DriverResult<()>;

    /// Returns whether the swapchain is suboptimal.
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> DriverResult<bool>;
}
