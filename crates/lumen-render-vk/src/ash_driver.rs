// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CString;

use ash::khr::{surface, swapchain}; // <-- 0.38 module paths
use ash::{vk, Entry};
use lumen_render::SurfaceHandle;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, warn};

use crate::driver::{
    AdapterInfo, Driver, DriverError, DriverResult, PassBegin, QueueFamilySupport,
    SurfaceSupport, SwapchainDesc,
};

/// Whether the Vulkan loader is present and can create presentation
/// surfaces at all. Creates no instance.
pub fn probe() -> bool {
    let entry = Entry::linked();
    match unsafe { entry.enumerate_instance_extension_properties(None) } {
        Ok(exts) => exts
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == surface::NAME)),
        Err(err) => {
            warn!("vulkan probe: {err}");
            false
        }
    }
}

/// [`Driver`] over the real Vulkan loader.
pub struct AshDriver {
    entry: Entry,
    app_name: CString,
    instance: Option<ash::Instance>,
    surface_loader: Option<surface::Instance>,
    phys: vk::PhysicalDevice,
    device: Option<ash::Device>,
    swapchain_loader: Option<swapchain::Device>,
    queue: vk::Queue,
}

impl AshDriver {
    pub fn new(app_name: &str) -> Self {
        Self {
            entry: Entry::linked(),
            app_name: CString::new(app_name).unwrap_or_default(),
            instance: None,
            surface_loader: None,
            phys: vk::PhysicalDevice::null(),
            device: None,
            swapchain_loader: None,
            queue: vk::Queue::null(),
        }
    }

    fn instance(&self) -> DriverResult<&ash::Instance> {
        self.instance
            .as_ref()
            .ok_or(DriverError::Unsupported("no Vulkan instance"))
    }

    fn surface_loader(&self) -> DriverResult<&surface::Instance> {
        self.surface_loader
            .as_ref()
            .ok_or(DriverError::Unsupported("no surface loader"))
    }

    fn device(&self) -> DriverResult<&ash::Device> {
        self.device
            .as_ref()
            .ok_or(DriverError::Unsupported("no logical device"))
    }

    fn swapchain_loader(&self) -> DriverResult<&swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or(DriverError::Unsupported("no swapchain loader"))
    }
}

impl Default for AshDriver {
    fn default() -> Self {
        Self::new("Lumen")
    }
}

impl Driver for AshDriver {
    fn create_instance(&mut self, surface: &dyn SurfaceHandle) -> DriverResult<()> {
        let display_raw: RawDisplayHandle = surface.display_handle()?.as_raw();

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: self.app_name.as_ptr(),
            application_version: 0,
            p_engine_name: self.app_name.as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let ext_slice = ash_window::enumerate_required_extensions(display_raw)?;
        let ext_vec = ext_slice.to_vec();

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: ext_vec.len() as u32,
            pp_enabled_extension_names: ext_vec.as_ptr(),
            ..Default::default()
        };

        let instance = unsafe { self.entry.create_instance(&create_info, None)? };
        self.surface_loader = Some(surface::Instance::new(&self.entry, &instance));
        self.instance = Some(instance);
        Ok(())
    }

    fn destroy_instance(&mut self) {
        self.surface_loader = None;
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
    }

    fn create_surface(&mut self, surface: &dyn SurfaceHandle) -> DriverResult<vk::SurfaceKHR> {
        let dh: RawDisplayHandle = surface.display_handle()?.as_raw();
        let wh: RawWindowHandle = surface.window_handle()?.as_raw();
        let instance = self.instance()?;
        Ok(unsafe { ash_window::create_surface(&self.entry, instance, dh, wh, None)? })
    }

    fn destroy_surface(&mut self, surface: vk::SurfaceKHR) {
        if let Ok(loader) = self.surface_loader() {
            unsafe { loader.destroy_surface(surface, None) };
        }
    }

    fn enumerate_adapters(&mut self, surface: vk::SurfaceKHR) -> DriverResult<Vec<AdapterInfo>> {
        let instance = self.instance()?;
        let surface_loader = self.surface_loader()?;
        let mut adapters = Vec::new();
        unsafe {
            for phys in instance.enumerate_physical_devices()? {
                let props = instance.get_physical_device_properties(phys);
                let name = props
                    .device_name_as_c_str()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let queue_families = instance
                    .get_physical_device_queue_family_properties(phys)
                    .iter()
                    .enumerate()
                    .map(|(i, q)| QueueFamilySupport {
                        graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                        present: surface_loader
                            .get_physical_device_surface_support(phys, i as u32, surface)
                            .unwrap_or(false),
                    })
                    .collect();

                let swapchain_supported = instance
                    .enumerate_device_extension_properties(phys)?
                    .iter()
                    .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME));

                debug!("adapter {name:?} ({:?})", props.device_type);
                adapters.push(AdapterInfo {
                    handle: phys,
                    name,
                    device_type: props.device_type,
                    queue_families,
                    swapchain_supported,
                });
            }
        }
        Ok(adapters)
    }

    fn create_device(&mut self, adapter: vk::PhysicalDevice, queue_family: u32) -> DriverResult<()> {
        let Some(instance) = self.instance.as_ref() else {
            return Err(DriverError::Unsupported("no Vulkan instance"));
        };

        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };

        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };

        let device = unsafe { instance.create_device(adapter, &dinfo, None)? };
        self.queue = unsafe { device.get_device_queue(queue_family, 0) };
        self.swapchain_loader = Some(swapchain::Device::new(instance, &device));
        self.device = Some(device);
        self.phys = adapter;
        Ok(())
    }

    fn destroy_device(&mut self) {
        self.swapchain_loader = None;
        if let Some(device) = self.device.take() {
            unsafe { device.destroy_device(None) };
        }
        self.queue = vk::Queue::null();
        self.phys = vk::PhysicalDevice::null();
    }

    fn wait_idle(&mut self) {
        if let Ok(device) = self.device() {
            if let Err(err) = unsafe { device.device_wait_idle() } {
                warn!("device_wait_idle: {err}");
            }
        }
    }

    fn surface_support(&mut self, surface: vk::SurfaceKHR) -> DriverResult<SurfaceSupport> {
        let loader = self.surface_loader()?;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader.get_physical_device_surface_capabilities(self.phys, surface)?,
                formats: loader.get_physical_device_surface_formats(self.phys, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(self.phys, surface)?,
            })
        }
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> DriverResult<vk::SwapchainKHR> {
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: desc.surface,
            min_image_count: desc.image_count,
            image_format: desc.format.format,
            image_color_space: desc.format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.create_swapchain(&swap_info, None)? })
    }

    fn swapchain_images(&mut self, swapchain: vk::SwapchainKHR) -> DriverResult<Vec<vk::Image>> {
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.get_swapchain_images(swapchain)? })
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        if let Ok(loader) = self.swapchain_loader() {
            unsafe { loader.destroy_swapchain(swapchain, None) };
        }
    }

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> DriverResult<vk::ImageView> {
        let sub = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: sub,
            ..Default::default()
        };
        let device = self.device()?;
        Ok(unsafe { device.create_image_view(&iv_info, None)? })
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    fn create_render_pass(&mut self, format: vk::Format) -> DriverResult<vk::RenderPass> {
        // Single color attachment -> present
        let color_att = vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let att_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };

        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &att_ref,
            ..Default::default()
        };

        // Layout transition waits for the acquire semaphore's stage.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };

        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_att,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let device = self.device()?;
        Ok(unsafe { device.create_render_pass(&rp_info, None)? })
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> DriverResult<vk::Framebuffer> {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        let device = self.device()?;
        Ok(unsafe { device.create_framebuffer(&fb_info, None)? })
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_command_pool(&mut self, queue_family: u32) -> DriverResult<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: queue_family,
            ..Default::default()
        };
        let device = self.device()?;
        Ok(unsafe { device.create_command_pool(&pool_info, None)? })
    }

    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> DriverResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        let device = self.device()?;
        Ok(unsafe { device.allocate_command_buffers(&alloc_info)? })
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if let Ok(device) = self.device() {
            unsafe {
                if !buffers.is_empty() {
                    device.free_command_buffers(pool, buffers);
                }
                device.destroy_command_pool(pool, None);
            }
        }
    }

    fn create_semaphore(&mut self) -> DriverResult<vk::Semaphore> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let device = self.device()?;
        Ok(unsafe { device.create_semaphore(&sem_ci, None)? })
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&mut self, signaled: bool) -> DriverResult<vk::Fence> {
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let device = self.device()?;
        Ok(unsafe { device.create_fence(&fence_ci, None)? })
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_fence(fence, None) };
        }
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> DriverResult<()> {
        let device = self.device()?;
        Ok(unsafe { device.wait_for_fences(&[fence], true, timeout_ns)? })
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> DriverResult<()> {
        let device = self.device()?;
        Ok(unsafe { device.reset_fences(&[fence])? })
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> DriverResult<(u32, bool)> {
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())? })
    }

    fn record_pass(
        &mut self,
        cmd: vk::CommandBuffer,
        pass: &PassBegin,
        draw: &mut dyn FnMut(vk::CommandBuffer),
    ) -> DriverResult<()> {
        let device = self.device()?;
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device.begin_command_buffer(cmd, &begin)?;

            let clears = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: pass.clear,
                },
            }];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: pass.render_pass,
                framebuffer: pass.framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: pass.extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };

            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            draw(cmd);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> DriverResult<()> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        let device = self.device()?;
        Ok(unsafe { device.queue_submit(self.queue, std::slice::from_ref(&submit), fence)? })
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> DriverResult<bool> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.queue_present(self.queue, &present)? })
    }
}
