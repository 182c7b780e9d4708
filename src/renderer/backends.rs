use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use anyhow::{anyhow, Context};
use ash::{vk, Device, Entry, Instance};
use ash::extensions::khr::{AccelerationStructure, DeferredHostOperations};
use ash::vk::{ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo, PhysicalDevice, PhysicalDeviceAccelerationStructureFeaturesKHR, PhysicalDeviceBufferDeviceAddressFeatures, PhysicalDeviceMemoryProperties, Queue};
use log::{debug, info};
use crate::constants::APPLICATION_NAME;
use crate::renderer::commands::Commands;
use crate::renderer::queue_family_indices::QueueFamilyIndices;
use crate::renderer::validation_layer::ValidationLayer;

pub struct Backends {
    pub entry: Entry,
    pub instance: Instance,
    validation_layer: Option<ValidationLayer>,
    pub physical_device: PhysicalDevice,
    pub device_memory_properties: PhysicalDeviceMemoryProperties,
    pub graphics_family: u32,
    pub device: Device,
}

impl Backends {
    pub fn new(enable_validation_layer: bool) -> anyhow::Result<Self> {
        let entry = unsafe { Entry::load().context("loading the Vulkan library")? };

        if enable_validation_layer {
            ValidationLayer::check_validation_layer_support(&entry)?;
        }

        let instance = Self::create_instance(&entry, enable_validation_layer)?;

        let validation_layer = if enable_validation_layer {
            Some(ValidationLayer::new(&entry, &instance)?)
        } else {
            None
        };

        let (physical_device, graphics_family) = Self::pick_physical_device(&instance)?;

        let device_memory_properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        let device = Self::create_logical_device(&instance, physical_device, graphics_family)?;

        Ok(Self {
            entry,
            instance,
            validation_layer,
            physical_device,
            device_memory_properties,
            graphics_family,
            device,
        })
    }

    fn create_instance(entry: &Entry, enable_validation_layer: bool) -> anyhow::Result<Instance> {
        let application_name = CString::new(APPLICATION_NAME)?;

        let application_info = ApplicationInfo::builder()
            .application_name(&application_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&application_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            //buffer_device_addressがコアに入った1.2
            .api_version(vk::API_VERSION_1_2)
            .build();

        let mut extension_names = vec![];
        if enable_validation_layer {
            extension_names.extend(ValidationLayer::require_debug_utils_extension_names_c_char());
        }

        let layer_names = if enable_validation_layer {
            ValidationLayer::require_validation_layer_extension_names_cstring()?
        } else {
            vec![]
        };
        let layer_names_c_char: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names_c_char)
            .build();

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .context("vkCreateInstance")?
        };

        debug!("Create instance");

        Ok(instance)
    }

    pub fn require_device_extension_names() -> Vec<&'static CStr> {
        vec![AccelerationStructure::name(), DeferredHostOperations::name()]
    }

    fn pick_physical_device(instance: &Instance) -> anyhow::Result<(PhysicalDevice, u32)> {
        let physical_devices = unsafe {
            instance
                .enumerate_physical_devices()
                .context("vkEnumeratePhysicalDevices")?
        };

        for physical_device in physical_devices {
            let indices = QueueFamilyIndices::new(instance, physical_device);

            let graphics_family = match indices.graphics_family {
                Some(graphics_family) => graphics_family,
                None => continue,
            };

            if !Self::check_device_extension_support(instance, physical_device)? {
                continue;
            }

            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
            info!("Physical device: {:?}, Graphics family: {}", name, graphics_family);

            return Ok((physical_device, graphics_family));
        }

        Err(anyhow!("no physical device supports {:?}", Self::require_device_extension_names()))
    }

    fn check_device_extension_support(instance: &Instance, physical_device: PhysicalDevice) -> anyhow::Result<bool> {
        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(physical_device)
                .context("vkEnumerateDeviceExtensionProperties")?
        };

        let supported = Self::require_device_extension_names().iter().all(|required| {
            extensions.iter().any(|extension| {
                let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
                *required == name
            })
        });

        Ok(supported)
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: PhysicalDevice,
        graphics_family: u32,
    ) -> anyhow::Result<Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            DeviceQueueCreateInfo::builder()
                .queue_family_index(graphics_family)
                .queue_priorities(&queue_priorities)
                .build()
        ];

        let extension_names: Vec<*const c_char> = Self::require_device_extension_names()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let mut buffer_device_address_features = PhysicalDeviceBufferDeviceAddressFeatures::builder()
            .buffer_device_address(true)
            .build();

        let mut acceleration_structure_features = PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
            .acceleration_structure(true)
            .build();

        let create_info = DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut buffer_device_address_features)
            .push_next(&mut acceleration_structure_features)
            .build();

        let device = unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .context("vkCreateDevice")?
        };

        debug!("Create logical device");

        Ok(device)
    }

    pub fn create_graphics_queue(&self, queue_index: u32) -> Queue {
        unsafe { self.device.get_device_queue(self.graphics_family, queue_index) }
    }

    pub fn create_graphics_commands(&self) -> anyhow::Result<Commands<'_>> {
        Commands::new(&self.device, self.graphics_family)
    }
}

impl Drop for Backends {
    fn drop(&mut self) {
        debug!("Dropping backends");

        unsafe {
            self.device.destroy_device(None);
        }

        self.validation_layer = None;

        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}
