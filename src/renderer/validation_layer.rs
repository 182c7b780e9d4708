use std::ffi::{c_char, c_void, CStr, CString};
use anyhow::{bail, Context};
use ash::{Entry, Instance, vk};
use ash::extensions::ext::DebugUtils;
use ash::vk::{DebugUtilsMessageSeverityFlagsEXT, DebugUtilsMessageTypeFlagsEXT, DebugUtilsMessengerCreateInfoEXT, DebugUtilsMessengerEXT};
use log::{debug, error, info, warn};
use crate::constants::REQUIRED_LAYERS;

pub struct ValidationLayer {
    debug_utils: DebugUtils,
    debug_utils_messenger_ext: DebugUtilsMessengerEXT,
}

impl ValidationLayer {
    pub fn require_debug_utils_extension_names_c_char() -> Vec<*const c_char> {
        vec![DebugUtils::name().as_ptr()]
    }

    pub fn require_validation_layer_extension_names_cstring() -> anyhow::Result<Vec<CString>> {
        REQUIRED_LAYERS
            .iter()
            .map(|item| CString::new(*item).context("layer name contains a nul byte"))
            .collect()
    }

    pub fn new(entry: &Entry, instance: &Instance) -> anyhow::Result<Self> {
        debug!("Enable validation layer");

        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = Self::populate_debug_messenger_create_info();

        let debug_utils_messenger_ext = unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .context("vkCreateDebugUtilsMessengerEXT")?
        };

        Ok(Self {
            debug_utils,
            debug_utils_messenger_ext,
        })
    }

    pub fn check_validation_layer_support(entry: &Entry) -> anyhow::Result<()> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("vkEnumerateInstanceLayerProperties")?;

        for required in Self::require_validation_layer_extension_names_cstring()? {
            let found = layers.iter().any(|layer| {
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                required.as_c_str() == name
            });

            if !found {
                bail!("Validation layer not supported: {:?}", required);
            }
        }

        info!("Validation layer supported");

        Ok(())
    }

    pub fn populate_debug_messenger_create_info() -> DebugUtilsMessengerCreateInfoEXT {
        DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback))
            .build()
    }
}

impl Drop for ValidationLayer {
    fn drop(&mut self) {
        debug!("Dropping validation layer");

        unsafe {
            self.debug_utils.destroy_debug_utils_messenger(self.debug_utils_messenger_ext, None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: DebugUtilsMessageSeverityFlagsEXT,
    message_type: DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let types = match message_type {
        DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        _ => "???",
    };

    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("validation layer: [{}] {:?}", types, message),
        DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("validation layer: [{}] {:?}", types, message),
        _ => debug!("validation layer: [{}] {:?}", types, message),
    }

    vk::FALSE
}
