use ash::vk;

use super::{DeviceRequest, QueueRequest, Session};
use crate::{OrionError, runtime::Runtime, util};

///Collection of all properties of a physical device. Can be used to easily create a [DeviceRequest].
/// Is usually acquired from [Session::list_suitable_physical_devices].
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    ///Properties of every queue family, indexed by family index.
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

impl PhysicalDeviceCandidate {
    ///The device's name as reported by the driver.
    pub fn name(&self) -> String {
        util::name_from_array(&self.properties.device_name)
            .map(util::lossy)
            .unwrap_or_default()
    }

    pub fn is_type(&self, device_type: vk::PhysicalDeviceType) -> bool {
        self.properties.device_type == device_type
    }

    ///True if at least one queue family supports all of `flags`.
    pub fn supports_queue_flags(&self, flags: vk::QueueFlags) -> bool {
        self.queue_family_with(flags).is_some()
    }

    ///Index of the first queue family that supports all of `flags`.
    pub fn queue_family_with(&self, flags: vk::QueueFlags) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|f| {
                #[cfg(feature = "logging")]
                log::trace!("Checking {:?} for {:?}", f.queue_flags, flags);
                f.queue_flags.contains(flags)
            })
            .map(|idx| idx as u32)
    }

    ///Creates a device request for this physical device that creates one queue of every family.
    pub fn into_device_request(self) -> DeviceRequest {
        let queues = self
            .queue_families
            .iter()
            .enumerate()
            .filter(|(_, f)| f.queue_count > 0)
            //per default create one queue
            .map(|(idx, _)| QueueRequest::new(idx as u32, vec![1.0]))
            .collect::<Vec<_>>();
        DeviceRequest {
            physical_devices: vec![self.handle],
            queues,
            ..Default::default()
        }
    }
}

impl<R: Runtime> Session<R> {
    ///Lists every physical device of the instance for which `predicate` returns true. Without a predicate all
    /// devices are returned.
    ///
    /// Finding no device is not an error, but reported as a notification.
    pub fn list_suitable_physical_devices(
        &self,
        predicate: Option<&mut dyn FnMut(&PhysicalDeviceCandidate) -> bool>,
    ) -> Result<Vec<PhysicalDeviceCandidate>, OrionError> {
        let instance = self.realized_instance("list_suitable_physical_devices")?;
        let handles = self
            .runtime
            .enumerate_physical_devices(instance)
            .map_err(|e| self.vulkan_error("vkEnumeratePhysicalDevices", e))?;

        let mut candidates = Vec::with_capacity(handles.len());
        for handle in handles {
            let properties = self
                .runtime
                .physical_device_properties(instance, handle)
                .map_err(|e| self.vulkan_error("vkGetPhysicalDeviceProperties", e))?;
            let queue_families = self
                .runtime
                .queue_family_properties(instance, handle)
                .map_err(|e| self.vulkan_error("vkGetPhysicalDeviceQueueFamilyProperties", e))?;
            candidates.push(PhysicalDeviceCandidate {
                handle,
                properties,
                queue_families,
            });
        }

        if let Some(predicate) = predicate {
            candidates.retain(|c| predicate(c));
        }

        if candidates.is_empty() {
            self.diagnostics
                .notify("no suitable physical device was found");
        }
        #[cfg(feature = "logging")]
        for c in &candidates {
            log::info!("Suitable physical device: {} ({:?})", c.name(), c.handle);
        }
        Ok(candidates)
    }

    ///The queue family properties of `physical_device`, as reported by Vulkan.
    pub fn list_queue_families(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::QueueFamilyProperties>, OrionError> {
        let instance = self.realized_instance("list_queue_families")?;
        self.runtime
            .queue_family_properties(instance, physical_device)
            .map_err(|e| self.vulkan_error("vkGetPhysicalDeviceQueueFamilyProperties", e))
    }
}
