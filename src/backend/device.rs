// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation, with validation layers checked before they are enabled
// - Physical device selection (needs a compute queue, prefers discrete GPU)
// - Logical device + compute queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand in Drop, before the device it allocates from
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub compute_queue: vk::Queue,
    pub compute_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (limits are checked before any allocation)
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers; fails if the
    ///   layer or the debug utils extension is not installed
    pub fn new(app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Make sure validation can actually be turned on
        if enable_validation {
            Self::check_validation_support(&entry)?;
        }

        // Step 3: Create instance
        let instance = Self::create_instance(&entry, app_name, enable_validation)?;

        // Step 4: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { destroy_instance(&instance, None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Step 5: Pick physical device (GPU)
        // Step 6: Create logical device
        let picked = Self::pick_physical_device(&instance).and_then(|(physical_device, family)| {
            Self::create_logical_device(&instance, physical_device, family)
                .map(|(device, queue)| (physical_device, family, device, queue))
        });
        let (physical_device, compute_queue_family, device, compute_queue) = match picked {
            Ok(picked) => picked,
            Err(e) => {
                unsafe { destroy_instance(&instance, debug_utils) };
                return Err(e);
            }
        };

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!("Compute queue family: {}", compute_queue_family);

        // Step 8: Create memory allocator
        let allocator = match Self::create_allocator(&instance, physical_device, &device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    destroy_instance(&instance, debug_utils);
                }
                return Err(e);
            }
        };

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            compute_queue,
            compute_queue_family,
            debug_utils,
            properties,
        }))
    }

    fn check_validation_support(entry: &Entry) -> Result<()> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        if !has_layer(&layers, VALIDATION_LAYER) {
            anyhow::bail!(
                "Layer {} not supported",
                VALIDATION_LAYER.to_string_lossy()
            );
        }

        let extensions = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let debug_utils_name = ash::extensions::ext::DebugUtils::name();
        if !has_extension(&extensions, debug_utils_name) {
            anyhow::bail!(
                "Extension {} not supported",
                debug_utils_name.to_string_lossy()
            );
        }

        Ok(())
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("vudo")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        // Headless: the only instance extension is the debug messenger
        let (extensions, layer_names) = if enable_validation {
            (
                vec![ash::extensions::ext::DebugUtils::name().as_ptr()],
                vec![VALIDATION_LAYER.as_ptr()],
            )
        } else {
            (vec![], vec![])
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("Could not find a device with Vulkan support");
        }

        let candidates: Vec<(vk::PhysicalDeviceType, Option<u32>)> = devices
            .iter()
            .map(|&device| {
                let props = unsafe { instance.get_physical_device_properties(device) };
                let queue_families =
                    unsafe { instance.get_physical_device_queue_family_properties(device) };
                let compute_family = find_compute_queue_family(&queue_families);
                if compute_family.is_none() {
                    log::debug!(
                        "Skipping {}: no compute queue",
                        unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy()
                    );
                }
                (props.device_type, compute_family)
            })
            .collect();

        pick_best(&candidates)
            .map(|(index, family)| (devices[index], family))
            .ok_or_else(|| anyhow::anyhow!("Could not find a queue family that supports compute"))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        compute_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(compute_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        // Storage buffers and compute need no optional features
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        // The only queue we asked for
        let compute_queue = unsafe { device.get_device_queue(compute_queue_family, 0) };

        Ok((device, compute_queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(allocator)
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Tear down an instance that never made it into a `VulkanDevice`
unsafe fn destroy_instance(
    instance: &ash::Instance,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
) {
    if let Some((debug_utils, messenger)) = debug_utils {
        debug_utils.destroy_debug_utils_messenger(messenger, None);
    }
    instance.destroy_instance(None);
}

/// Index and compute family of the best candidate.
///
/// Candidates without a compute family are skipped; the highest
/// `device_type_score` wins and the first one wins ties.
pub fn pick_best(candidates: &[(vk::PhysicalDeviceType, Option<u32>)]) -> Option<(usize, u32)> {
    let mut best = None;
    let mut best_score = 0;

    for (index, &(device_type, compute_family)) in candidates.iter().enumerate() {
        let Some(family) = compute_family else {
            continue;
        };
        let score = device_type_score(device_type);
        if score > best_score {
            best_score = score;
            best = Some((index, family));
        }
    }

    best
}

/// First queue family that can run compute work
pub fn find_compute_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|props| {
            props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map(|i| i as u32)
}

/// Prefer discrete GPUs, then integrated, then anything else
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

fn name_matches(raw: &[c_char], wanted: &CStr) -> bool {
    // Names are NUL-terminated inside fixed-size arrays
    raw.iter()
        .position(|&c| c == 0)
        .map(|len| {
            let bytes: Vec<u8> = raw[..len].iter().map(|&c| c as u8).collect();
            bytes == wanted.to_bytes()
        })
        .unwrap_or(false)
}

pub fn has_layer(layers: &[vk::LayerProperties], wanted: &CStr) -> bool {
    layers.iter().any(|layer| name_matches(&layer.layer_name, wanted))
}

pub fn has_extension(extensions: &[vk::ExtensionProperties], wanted: &CStr) -> bool {
    extensions
        .iter()
        .any(|ext| name_matches(&ext.extension_name, wanted))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_name(dst: &mut [c_char], name: &str) {
        for (d, b) in dst.iter_mut().zip(name.bytes()) {
            *d = b as c_char;
        }
    }

    fn layer(name: &str) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        fill_name(&mut props.layer_name, name);
        props
    }

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn finds_validation_layer() {
        let layers = [layer("VK_LAYER_MESA_device_select"), layer("VK_LAYER_KHRONOS_validation")];
        assert!(has_layer(&layers, VALIDATION_LAYER));
        assert!(!has_layer(&layers[..1], VALIDATION_LAYER));
    }

    #[test]
    fn name_prefix_is_not_a_match() {
        let layers = [layer("VK_LAYER_KHRONOS_validation_extra")];
        assert!(!has_layer(&layers, VALIDATION_LAYER));
    }

    #[test]
    fn finds_debug_utils_extension() {
        let mut ext = vk::ExtensionProperties::default();
        fill_name(&mut ext.extension_name, "VK_EXT_debug_utils");
        assert!(has_extension(&[ext], ash::extensions::ext::DebugUtils::name()));
    }

    #[test]
    fn picks_first_compute_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::COMPUTE, 4),
        ];
        assert_eq!(find_compute_queue_family(&families), Some(2));
    }

    #[test]
    fn no_compute_family() {
        let families = [family(vk::QueueFlags::TRANSFER, 1)];
        assert_eq!(find_compute_queue_family(&families), None);
    }

    #[test]
    fn prefers_discrete_listed_after_integrated() {
        let candidates = [
            (vk::PhysicalDeviceType::INTEGRATED_GPU, Some(0)),
            (vk::PhysicalDeviceType::DISCRETE_GPU, Some(2)),
        ];
        assert_eq!(pick_best(&candidates), Some((1, 2)));
    }

    #[test]
    fn first_discrete_wins_tie() {
        let candidates = [
            (vk::PhysicalDeviceType::CPU, Some(0)),
            (vk::PhysicalDeviceType::DISCRETE_GPU, Some(1)),
            (vk::PhysicalDeviceType::DISCRETE_GPU, Some(0)),
        ];
        assert_eq!(pick_best(&candidates), Some((1, 1)));
    }

    #[test]
    fn skips_devices_without_compute() {
        let candidates = [
            (vk::PhysicalDeviceType::DISCRETE_GPU, None),
            (vk::PhysicalDeviceType::VIRTUAL_GPU, Some(3)),
        ];
        assert_eq!(pick_best(&candidates), Some((1, 3)));
        assert_eq!(pick_best(&candidates[..1]), None);
    }

    #[test]
    fn discrete_beats_integrated() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(device_type_score(vk::PhysicalDeviceType::CPU) > 0);
    }
}
