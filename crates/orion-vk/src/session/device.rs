use std::{
    ffi::{CStr, CString},
    fmt,
};

use ash::vk::{self, Handle};

use super::{FeatureKind, ObjectKind, ObjectMetadata, Session};
use crate::{OrionError, diagnostics::codes, runtime::Runtime, util};

///One queue family the device is created with.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueRequest {
    ///The family's index.
    pub family_index: u32,
    ///One entry per queue created from this family, holding that queue's priority in `0.0..=1.0`.
    pub priorities: Vec<f32>,
}

impl QueueRequest {
    pub fn new(family_index: u32, priorities: Vec<f32>) -> Self {
        QueueRequest {
            family_index,
            priorities,
        }
    }

    ///Same as [new](Self::new), but only the first `properties.queue_count` priorities are respected.
    pub fn for_family(
        family_index: u32,
        properties: &vk::QueueFamilyProperties,
        mut priorities: Vec<f32>,
    ) -> Self {
        priorities.truncate(properties.queue_count as usize);
        QueueRequest {
            family_index,
            priorities,
        }
    }

    pub fn as_create_info(&self) -> vk::DeviceQueueCreateInfo<'_> {
        vk::DeviceQueueCreateInfo::default()
            .queue_family_index(self.family_index)
            .queue_priorities(&self.priorities)
    }
}

///Everything needed to create a logical device. Usually created via
/// [PhysicalDeviceCandidate::into_device_request](super::PhysicalDeviceCandidate::into_device_request) and then
/// extended builder style.
#[derive(Default)]
pub struct DeviceRequest {
    ///Physical devices the device is created from. The first one is the primary device, if there is more than one a
    /// device group is created.
    pub physical_devices: Vec<vk::PhysicalDevice>,
    pub queues: Vec<QueueRequest>,
    ///Device extensions to enable. They are checked for support, but passed on even if unsupported.
    pub extensions: Vec<CString>,
    pub features: vk::PhysicalDeviceFeatures,
    ///Additional structures chained onto the device's create info, in insertion order.
    pub p_next: Vec<Box<dyn vk::ExtendsDeviceCreateInfo>>,
}

impl fmt::Debug for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRequest")
            .field("physical_devices", &self.physical_devices)
            .field("queues", &self.queues)
            .field("extensions", &self.extensions)
            .field("features", &self.features)
            .field("p_next", &self.p_next.len())
            .finish()
    }
}

impl DeviceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_physical_device(mut self, physical_device: vk::PhysicalDevice) -> Self {
        if !self.physical_devices.contains(&physical_device) {
            self.physical_devices.push(physical_device);
        }
        self
    }

    pub fn with_queue(mut self, queue: QueueRequest) -> Self {
        self.queues.push(queue);
        self
    }

    ///Adds the extension, if it was not added yet. The name is usually obtained from the extension's definition like
    /// this:
    ///```ignore
    ///  request.with_extension(ash::khr::swapchain::NAME);
    ///```
    pub fn with_extension(mut self, name: &CStr) -> Self {
        if self.extensions.iter().any(|e| e.as_c_str() == name) {
            #[cfg(feature = "logging")]
            log::warn!("Tried to enable device extension twice: {:?}", name);
            return self;
        }
        self.extensions.push(name.to_owned());
        self
    }

    pub fn with_features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.features = features;
        self
    }

    ///Pushes a feature structure (or any other device create info extension) onto the creation chain. Can be used
    /// to enable Vulkan 1.1 - 1.3 features, for instance [PhysicalDeviceVulkan12Features](vk::PhysicalDeviceVulkan12Features).
    ///
    /// The structure's own `p_next` is replaced when the device is created.
    pub fn with_additional_feature<T>(mut self, feature: T) -> Self
    where
        T: vk::ExtendsDeviceCreateInfo + 'static,
    {
        self.p_next.push(Box::new(feature));
        self
    }

    ///Allows changing `self` builder style
    pub fn with(mut self, mut mapping: impl FnMut(&mut DeviceRequest)) -> Self {
        mapping(&mut self);
        self
    }
}

impl<R: Runtime> Session<R> {
    ///Returns true if device extension `name` is provided for `physical_device`, either by the implementation
    /// (`layer == None`) or by the given layer.
    pub fn is_device_extension_available(
        &self,
        physical_device: vk::PhysicalDevice,
        name: &str,
        layer: Option<&str>,
    ) -> Result<bool, OrionError> {
        let name = util::to_cstring(name)?;
        let layer = layer.map(util::to_cstring).transpose()?;
        self.is_device_extension_available_cstr(physical_device, &name, layer.as_deref())
    }

    pub fn is_device_extension_available_cstr(
        &self,
        physical_device: vk::PhysicalDevice,
        name: &CStr,
        layer: Option<&CStr>,
    ) -> Result<bool, OrionError> {
        let instance = self.realized_instance("is_device_extension_available")?;
        let extensions = self
            .runtime
            .enumerate_device_extensions(instance, physical_device, layer)
            .map_err(|e| self.vulkan_error("vkEnumerateDeviceExtensionProperties", e))?;

        #[cfg(feature = "logging")]
        {
            log::trace!("Device extensions of {:?} (layer {:?})", physical_device, layer);
            for ext in extensions.iter() {
                log::trace!("  {:?}", ext);
            }
        }
        Ok(extensions.iter().any(|e| e.as_c_str() == name))
    }

    ///Warns about every extension in `extensions` that neither the implementation nor one of the instance's layers
    /// provides for `physical_device`.
    fn check_device_extensions(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        extensions: &[CString],
    ) -> Result<(), OrionError> {
        if extensions.is_empty() {
            return Ok(());
        }

        let layers = self
            .registry
            .enumerate_enabled(ObjectKind::Instance, instance.as_raw(), FeatureKind::Layer)?
            .iter()
            .map(|l| util::to_cstring(l))
            .collect::<Result<Vec<_>, _>>()?;

        for extension in extensions {
            if self.is_device_extension_available_cstr(physical_device, extension, None)? {
                continue;
            }
            //a layer that fails to enumerate does not provide anything
            let by_layer = layers.iter().any(|layer| {
                self.runtime
                    .enumerate_device_extensions(instance, physical_device, Some(layer.as_c_str()))
                    .map(|provided| provided.contains(extension))
                    .unwrap_or(false)
            });
            if !by_layer {
                self.diagnostics.warn(format!(
                    "Device extension {} is not supported by physical device {:?}, enabling it anyways",
                    extension.to_string_lossy(),
                    physical_device
                ));
            }
        }
        Ok(())
    }

    ///Creates a logical device on the session's instance.
    ///
    /// The extensions of `request` are checked against the first physical device and the instance's layers.
    /// Unsupported extensions only cause a warning, they are still passed to Vulkan. If `request` contains more
    /// than one physical device a device group containing all of them is created. The group is chained in front of
    /// the request's [additional features](DeviceRequest::with_additional_feature).
    pub fn realize_device(&mut self, mut request: DeviceRequest) -> Result<vk::Device, OrionError> {
        let instance = self.realized_instance("realize_device")?;
        let Some(primary) = request.physical_devices.first().copied() else {
            self.diagnostics.error(
                "ERR_NULL_ARGUMENT",
                codes::NULL_ARGUMENT,
                "realize_device needs at least one physical device",
            );
            return Err(OrionError::NullArgument("physical_devices"));
        };

        self.check_device_extensions(instance, primary, &request.extensions)?;

        let queue_create_infos = request
            .queues
            .iter()
            .map(|q| q.as_create_info())
            .collect::<Vec<_>>();
        let enabled_extensions = request
            .extensions
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        let mut device_group =
            vk::DeviceGroupDeviceCreateInfo::default().physical_devices(&request.physical_devices);
        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extensions)
            .enabled_features(&request.features);
        //pushing prepends, so walk backwards to keep the insertion order
        for next in request.p_next.iter_mut().rev() {
            unsafe { util::detach(next.as_mut()) };
            create_info = create_info.push_next(next.as_mut());
        }
        if request.physical_devices.len() > 1 {
            create_info = create_info.push_next(&mut device_group);
        }

        let device = match unsafe { self.runtime.create_device(instance, primary, &create_info) }
        {
            Ok(device) => device,
            Err(e) => return Err(self.vulkan_error("vkCreateDevice", e)),
        };

        let metadata = ObjectMetadata {
            parent: Some(instance.as_raw()),
            enabled_extensions: request.extensions.iter().map(|e| util::lossy(e)).collect(),
            enabled_layers: Vec::new(),
        };
        if let Err(e) = self.track(ObjectKind::Device, device.as_raw(), metadata) {
            unsafe { self.runtime.destroy_device(device) };
            return Err(e);
        }

        #[cfg(feature = "logging")]
        log::info!(
            "Created device {:?} on {} physical device(s)",
            device,
            request.physical_devices.len()
        );
        Ok(device)
    }
}
