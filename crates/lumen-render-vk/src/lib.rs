// SPDX-License-Identifier: CEPL-1.0
//! Vulkan presentation backend.
//!
//! [`VulkanPresentationContext`] implements the attach / render / recreate /
//! detach protocol on top of a [`Driver`]; [`AshDriver`] is the driver that
//! talks to the real loader.

mod ash_driver;
mod context;
mod driver;
mod swapchain;

#[cfg(test)]
mod fake;

pub use ash_driver::{probe, AshDriver};
pub use context::{VkConfig, VulkanPresentationContext};
pub use driver::{
    AdapterInfo, Driver, DriverError, DriverResult, PassBegin, QueueFamilySupport,
    SurfaceSupport, SwapchainDesc,
};
pub use swapchain::VkVsyncMode;

/// Context over the real Vulkan loader.
pub type VkContext = VulkanPresentationContext<AshDriver>;
