use std::ffi::{c_char, c_void, CStr, CString};

use ash::vk;
use raw_window_handle::RawDisplayHandle;
use tracing::{error, info, trace, warn};

use crate::Result;
use crate::RhiError;

#[derive(Debug, Clone)]
pub struct ContextDescription {
    pub app_name: String,
    pub enable_validation: bool,
    /// Required to enumerate the platform surface extensions. `None` builds a
    /// windowless context.
    pub display_handle: Option<RawDisplayHandle>,
}

impl Default for ContextDescription {
    fn default() -> Self {
        Self {
            app_name: String::from("karst"),
            enable_validation: cfg!(debug_assertions),
            display_handle: None,
        }
    }
}

/// Vulkan instance, physical device pick and logical device with a single
/// graphics queue.
pub struct Context {
    entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils_instance: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: vk::DebugUtilsMessengerEXT,
    pub debug_utils: Option<ash::ext::debug_utils::Device>,
    pub surface_loader: ash::khr::surface::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub physical_device_properties: vk::PhysicalDeviceProperties,
    pub device: ash::Device,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub graphics_family_index: u32,
    pub graphics_queue: vk::Queue,
}

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        String::new()
    } else {
        CStr::from_ptr((*p_callback_data).p_message)
            .to_string_lossy()
            .into_owned()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("vulkan: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("vulkan: {message}");
    } else {
        trace!("vulkan: {message}");
    }
    vk::FALSE
}

impl Context {
    pub fn new(desc: &ContextDescription) -> Result<Self> {
        let entry = unsafe { ash::Entry::load().map_err(|_| RhiError::NoPhysicalDevice)? };

        let app_name = CString::new(desc.app_name.clone()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions: Vec<*const c_char> = Vec::new();
        if let Some(display_handle) = desc.display_handle {
            extensions
                .extend_from_slice(ash_window::enumerate_required_extensions(display_handle)?);
        }
        if desc.enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation").unwrap_or_default();
        let mut layers: Vec<*const c_char> = Vec::new();
        if desc.enable_validation {
            let available = unsafe { entry.enumerate_instance_layer_properties()? };
            let has_validation = available.iter().any(|layer| {
                layer
                    .layer_name_as_c_str()
                    .map_or(false, |name| name == validation_layer.as_c_str())
            });
            if has_validation {
                layers.push(validation_layer.as_ptr());
            } else {
                warn!("validation requested but VK_LAYER_KHRONOS_validation is not present");
            }
        }

        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&instance_ci, None)? };

        let (debug_utils_instance, debug_messenger) = if desc.enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let messenger =
                unsafe { loader.create_debug_utils_messenger(&messenger_ci, None)? };
            (Some(loader), messenger)
        } else {
            (None, vk::DebugUtilsMessengerEXT::null())
        };

        let (physical_device, graphics_family_index) =
            Self::pick_physical_device(&instance)?;
        let physical_device_properties =
            unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = physical_device_properties
            .device_name_as_c_str()
            .unwrap_or(c"unknown")
            .to_string_lossy()
            .into_owned();
        info!(device = %device_name, "selected physical device");

        let queue_priorities = [1.0f32];
        let queue_ci = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_family_index)
            .queue_priorities(&queue_priorities)];

        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .runtime_descriptor_array(true)
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_image_array_non_uniform_indexing(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .buffer_device_address(true);
        let mut features_1_3 =
            vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_ci)
            .enabled_extension_names(&device_extensions)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);
        let device = unsafe { instance.create_device(physical_device, &device_ci, None)? };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family_index, 0) };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let debug_utils = debug_utils_instance
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));

        Ok(Self {
            entry,
            instance,
            debug_utils_instance,
            debug_messenger,
            debug_utils,
            surface_loader,
            physical_device,
            physical_device_properties,
            device,
            swapchain_loader,
            graphics_family_index,
            graphics_queue,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
        let physical_devices = unsafe { instance.enumerate_physical_devices()? };

        let mut fallback: Option<(vk::PhysicalDevice, u32)> = None;
        for physical_device in physical_devices {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            if vk::api_version_minor(properties.api_version) < 3
                && vk::api_version_major(properties.api_version) == 1
            {
                continue;
            }

            let families = unsafe {
                instance.get_physical_device_queue_family_properties(physical_device)
            };
            let Some(family_index) = families.iter().position(|family| {
                family.queue_flags.contains(
                    vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                )
            }) else {
                continue;
            };

            let candidate = (physical_device, family_index as u32);
            if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                return Ok(candidate);
            }
            fallback.get_or_insert(candidate);
        }

        fallback.ok_or(RhiError::NoPhysicalDevice)
    }

    /// Attach a debug name to a Vulkan object, when validation is enabled.
    pub fn set_vk_name<T: vk::Handle + Copy>(&self, object_handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object_handle)
            .object_name(&name);
        let _ = unsafe { debug_utils.set_debug_utils_object_name(&name_info) };
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            if let Some(debug_utils_instance) = &self.debug_utils_instance {
                debug_utils_instance
                    .destroy_debug_utils_messenger(self.debug_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
