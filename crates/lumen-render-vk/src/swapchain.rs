// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lumen_render::RenderSize;

use crate::driver::AdapterInfo;

/// Everything that depends on the surface size. Built and destroyed as one
/// unit; never patched in place.
#[derive(Debug, Default)]
pub(crate) struct SwapchainResources {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub cmd_pool: vk::CommandPool,
    pub cmd_bufs: Vec<vk::CommandBuffer>,
}

impl SwapchainResources {
    pub fn is_complete(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
            && !self.images.is_empty()
            && self.image_views.len() == self.images.len()
            && self.framebuffers.len() == self.images.len()
            && self.cmd_bufs.len() == self.images.len()
    }
}

/// Per frame-in-flight synchronisation.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VkVsyncMode {
    #[default]
    Fifo, // Target monitor refresh rate
    Mailbox, // Smart Vsync, fps uncapped
}

/// Preferred format when present, else whatever the surface lists first.
pub(crate) fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    mode: VkVsyncMode,
) -> vk::PresentModeKHR {
    if mode == VkVsyncMode::Mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface dictates the extent when it reports one; otherwise the
/// requested bounds are clamped to what the surface allows.
pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `min + 1`, clamped to the surface's range. A `max` of 0 means unbounded.
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.clamp(caps.min_image_count, caps.max_image_count)
    }
}

fn device_rank(ty: vk::PhysicalDeviceType) -> u8 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 4,
        _ => 3,
    }
}

/// Picks an adapter with swapchain support and one queue family that does
/// both graphics and present. Discrete beats integrated; ties keep
/// enumeration order. Returns `(adapter index, queue family)`.
pub(crate) fn select_adapter(adapters: &[AdapterInfo]) -> Option<(usize, u32)> {
    adapters
        .iter()
        .enumerate()
        .filter(|(_, a)| a.swapchain_supported)
        .filter_map(|(i, a)| {
            a.queue_families
                .iter()
                .position(|q| q.graphics && q.present)
                .map(|family| (i, family as u32, device_rank(a.device_type)))
        })
        .min_by_key(|&(i, _, rank)| (rank, i))
        .map(|(i, family, _)| (i, family))
}
