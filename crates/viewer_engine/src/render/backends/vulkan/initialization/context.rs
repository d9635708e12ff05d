//! Vulkan context management
//!
//! Instance creation with the validation messenger, the presentation surface
//! and physical device selection. Objects are reference counted so that every
//! child keeps its parent alive: surfaces and devices hold the instance.

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::{Arc, Mutex};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Entry, Instance};
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Validation layer reported an error
    #[error("Validation error: {0}")]
    Validation(String),

    /// GPU memory allocation failed
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// Descriptor pool could not satisfy an allocation even after growing
    #[error("Descriptor pool exhausted after growth")]
    DescriptorPoolExhausted,

    /// Descriptor sets requested from a layout without bindings
    #[error("Descriptor set {set} has no bindings")]
    EmptyDescriptorLayout {
        /// Set number of the empty layout
        set: u32,
    },

    /// Shader id not registered
    #[error("Shader not found: {0}")]
    ShaderNotFound(String),

    /// Shader byte code rejected
    #[error("Invalid shader: {0}")]
    InvalidShader(String),

    /// API contract violated by the caller
    #[error("Invalid usage: {reason}")]
    InvalidUsage {
        /// Description of the violation
        reason: String,
    },

    /// Driver failed to build a graphics pipeline
    #[error("Pipeline creation failed: {0:?}")]
    PipelineCreation(vk::Result),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(String),
}

impl VulkanError {
    /// Shorthand for [`VulkanError::InvalidUsage`]
    pub fn usage(reason: impl Into<String>) -> Self {
        Self::InvalidUsage { reason: reason.into() }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Collects validation errors raised by the debug messenger
///
/// The callback runs inside the driver, so it only records; engine entry
/// points drain the sink and turn recorded messages into
/// [`VulkanError::Validation`].
#[derive(Debug, Default)]
pub struct ValidationSink {
    errors: Mutex<Vec<String>>,
}

impl ValidationSink {
    /// Record an error-severity message
    pub fn record(&self, message: String) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message);
        }
    }

    /// Fail with the recorded messages, if any
    pub fn check(&self) -> VulkanResult<()> {
        let mut errors = self.errors.lock().map_err(|_| VulkanError::Validation("sink poisoned".into()))?;
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors.join("\n");
        errors.clear();
        Err(VulkanError::Validation(joined))
    }
}

/// Vulkan instance wrapper with RAII cleanup
pub struct InstanceCore {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Surface extension loader
    pub surface_loader: Surface,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    validation: Arc<ValidationSink>,
}

impl InstanceCore {
    /// Create a new Vulkan instance, optionally with validation layers
    pub fn new(app_name: &str, required_extensions: &[String], enable_validation: bool) -> VulkanResult<Arc<Self>> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("Application name contains NUL".into()))?;
        let engine_name_cstr = CString::new("ViewerEngine")
            .map_err(|_| VulkanError::InitializationFailed("Engine name contains NUL".into()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VulkanError::InitializationFailed("Extension name contains NUL".into()))?;

        let mut extensions = name_pointers(&cstr_extensions);

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation")
            .map_err(|_| VulkanError::InitializationFailed("Layer name contains NUL".into()))?;
        let mut layer_names: Vec<*const c_char> = Vec::new();

        if enable_validation {
            let available = entry
                .enumerate_instance_layer_properties()
                .map_err(VulkanError::Api)?;
            let found = available.iter().any(|layer| {
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name == validation_layer.as_c_str()
            });
            if !found {
                return Err(VulkanError::InitializationFailed(
                    "Validation requested but VK_LAYER_KHRONOS_validation is not installed".to_string(),
                ));
            }
            layer_names.push(validation_layer.as_ptr());
            extensions.push(DebugUtils::name().as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let validation = Arc::new(ValidationSink::default());

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils, &validation) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);

        log::info!("Vulkan instance created (validation: {enable_validation})");

        Ok(Arc::new(Self {
            entry,
            instance,
            surface_loader,
            debug,
            validation,
        }))
    }

    fn setup_debug_messenger(
        debug_utils: &DebugUtils,
        sink: &Arc<ValidationSink>,
    ) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
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
            .pfn_user_callback(Some(debug_callback))
            // the sink outlives the messenger: both are owned by InstanceCore
            .user_data(Arc::as_ptr(sink) as *mut c_void);

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Sink receiving validation errors
    pub fn validation(&self) -> &Arc<ValidationSink> {
        &self.validation
    }
}

impl Drop for InstanceCore {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
        if let Some(sink) = (user_data as *const ValidationSink).as_ref() {
            sink.record(message.into_owned());
        }
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Presentation surface, destroyed after every swapchain built on it
pub struct SurfaceCore {
    instance: Arc<InstanceCore>,
    surface: vk::SurfaceKHR,
}

impl SurfaceCore {
    /// Take ownership of a surface created by the window system
    pub fn new(instance: Arc<InstanceCore>, surface: vk::SurfaceKHR) -> Arc<Self> {
        Arc::new(Self { instance, surface })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Owning instance
    pub fn instance(&self) -> &Arc<InstanceCore> {
        &self.instance
    }

    /// Current surface capabilities
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.instance.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported surface formats
    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.instance.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported present modes
    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.instance.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for SurfaceCore {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Queue family used for graphics and presentation
    pub queue_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the best device able to draw to and present on `surface`
    ///
    /// Discrete GPUs win over integrated ones, which win over anything else.
    pub fn select_suitable_device(instance: &InstanceCore, surface: &SurfaceCore) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        let best = devices
            .into_iter()
            .filter_map(|device| match Self::evaluate_device(instance, device, surface) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::debug!("Skipping physical device: {e}");
                    None
                }
            })
            .max_by_key(|info| device_type_score(info.properties.device_type));

        let info = best.ok_or_else(|| VulkanError::InitializationFailed("No suitable GPU found".to_string()))?;
        log::info!("Selected GPU: {}", info.name());
        Ok(info)
    }

    fn evaluate_device(
        instance: &InstanceCore,
        device: vk::PhysicalDevice,
        surface: &SurfaceCore,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.instance.get_physical_device_properties(device) };
        let features = unsafe { instance.instance.get_physical_device_features(device) };
        let queue_families = unsafe {
            instance.instance.get_physical_device_queue_family_properties(device)
        };

        let mut queue_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let present_support = unsafe {
                instance.surface_loader
                    .get_physical_device_surface_support(device, index, surface.handle())
                    .map_err(VulkanError::Api)?
            };
            if present_support {
                queue_family = Some(index);
                break;
            }
        }

        let queue_family = queue_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No queue family supports both graphics and present".to_string())
        })?;

        let extensions = unsafe {
            instance.instance.enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        });

        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        Ok(Self {
            device,
            properties,
            features,
            queue_family,
        })
    }

    /// Device name as reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

/// Raw pointers for a Vulkan name list; valid while `names` lives
fn name_pointers(names: &[CString]) -> Vec<*const c_char> {
    names.iter().map(|name| name.as_ptr()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_sink_drains() {
        let sink = ValidationSink::default();
        assert!(sink.check().is_ok());

        sink.record("first".into());
        sink.record("second".into());
        match sink.check() {
            Err(VulkanError::Validation(msg)) => {
                assert!(msg.contains("first"));
                assert!(msg.contains("second"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        assert!(sink.check().is_ok());
    }

    #[test]
    fn test_device_type_preference() {
        assert!(device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
            > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU));
        assert!(device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
            > device_type_score(vk::PhysicalDeviceType::CPU));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            VulkanError::EmptyDescriptorLayout { set: 2 }.to_string(),
            "Descriptor set 2 has no bindings"
        );
        assert_eq!(
            VulkanError::usage("set 4 out of range").to_string(),
            "Invalid usage: set 4 out of range"
        );
    }

    #[test]
    fn test_name_pointers_read_back() {
        let names = vec![
            CString::new("VK_KHR_surface").unwrap(),
            CString::new("VK_EXT_debug_utils").unwrap(),
        ];
        let pointers = name_pointers(&names);
        assert_eq!(pointers.len(), 2);
        for (pointer, name) in pointers.iter().zip(&names) {
            assert_eq!(unsafe { CStr::from_ptr(*pointer) }, name.as_c_str());
        }
    }
}
