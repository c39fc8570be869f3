//! ## Runtime
//!
//! The [Session](crate::Session) never calls into Vulkan directly. Every native call goes through the [Runtime] trait,
//! which mirrors the handful of loader, instance and device functions the library needs.
//!
//! [AshRuntime] is the default implementation. It loads the Vulkan loader via [Entry::load](ash::Entry::load) and keeps
//! the dispatch tables of every instance and device it created, keyed by their raw handle.

use std::{
    ffi::{CStr, CString},
    ptr,
};

use ahash::AHashMap;
use ash::{prelude::VkResult, vk};

use crate::{OrionError, util::owned_name_from_array};

#[cfg(test)]
pub(crate) mod mock;

///Native Vulkan interface used by a [Session](crate::Session).
///
/// All handles passed in are handles previously returned by the same runtime.
pub trait Runtime {
    ///Names of all instance layers the loader advertises.
    fn enumerate_layers(&self) -> VkResult<Vec<CString>>;

    ///Names of all instance extensions. If `layer` is `None` only the implementation's (and implicit layers')
    /// extensions are returned, otherwise the extensions provided by that layer.
    fn enumerate_instance_extensions(&self, layer: Option<&CStr>) -> VkResult<Vec<CString>>;

    ///# Safety
    /// `create_info` and its whole `p_next` chain must be valid for the duration of the call.
    unsafe fn create_instance(
        &mut self,
        create_info: &vk::InstanceCreateInfo<'_>,
    ) -> VkResult<vk::Instance>;

    ///# Safety
    /// No object created from `instance` may still be alive.
    unsafe fn destroy_instance(&mut self, instance: vk::Instance);

    ///True if `vkDestroyDebugUtilsMessengerEXT` can be resolved for `instance`.
    fn debug_utils_available(&self, instance: vk::Instance) -> bool;

    ///# Safety
    /// The callback's user data must outlive the messenger.
    unsafe fn create_debug_messenger(
        &mut self,
        instance: vk::Instance,
        create_info: &vk::DebugUtilsMessengerCreateInfoEXT<'_>,
    ) -> VkResult<vk::DebugUtilsMessengerEXT>;

    ///# Safety
    /// `messenger` must have been created on `instance`.
    unsafe fn destroy_debug_messenger(
        &mut self,
        instance: vk::Instance,
        messenger: vk::DebugUtilsMessengerEXT,
    );

    fn enumerate_physical_devices(&self, instance: vk::Instance)
    -> VkResult<Vec<vk::PhysicalDevice>>;

    fn physical_device_properties(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::PhysicalDeviceProperties>;

    fn queue_family_properties(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::QueueFamilyProperties>>;

    ///Device extensions of `physical_device`, either of the implementation (`layer == None`) or of the given layer.
    fn enumerate_device_extensions(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
    ) -> VkResult<Vec<CString>>;

    ///# Safety
    /// `create_info` and its whole `p_next` chain must be valid for the duration of the call.
    unsafe fn create_device(
        &mut self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> VkResult<vk::Device>;

    ///# Safety
    /// All work on `device` must have finished.
    unsafe fn destroy_device(&mut self, device: vk::Device);
}

struct LoadedInstance {
    inner: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
}

///[Runtime] backed by ash.
///
/// # Safety
///
/// Dropping the runtime destroys every device and instance that is still alive. Usually the owning session
/// already destroyed them in the correct order at that point.
pub struct AshRuntime {
    pub entry: ash::Entry,
    instances: AHashMap<vk::Instance, LoadedInstance>,
    devices: AHashMap<vk::Device, ash::Device>,
}

impl AshRuntime {
    ///Creates the runtime by loading the Vulkan loader at run time.
    pub fn load() -> Result<Self, OrionError> {
        let entry = unsafe { ash::Entry::load()? };
        Ok(Self::from_entry(entry))
    }

    ///Creates the runtime from an already loaded entry point.
    pub fn from_entry(entry: ash::Entry) -> Self {
        AshRuntime {
            entry,
            instances: AHashMap::new(),
            devices: AHashMap::new(),
        }
    }

    ///The ash instance behind `instance`, if it was created by this runtime.
    pub fn instance(&self, instance: vk::Instance) -> Option<&ash::Instance> {
        self.instances.get(&instance).map(|i| &i.inner)
    }

    ///The ash device behind `device`, if it was created by this runtime.
    pub fn device(&self, device: vk::Device) -> Option<&ash::Device> {
        self.devices.get(&device)
    }

    fn loaded(&self, instance: vk::Instance) -> VkResult<&ash::Instance> {
        self.instance(instance)
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }
}

fn extension_names(properties: Vec<vk::ExtensionProperties>) -> Vec<CString> {
    properties
        .iter()
        .filter_map(|p| owned_name_from_array(&p.extension_name))
        .collect()
}

impl Runtime for AshRuntime {
    fn enumerate_layers(&self) -> VkResult<Vec<CString>> {
        let layers = unsafe { self.entry.enumerate_instance_layer_properties()? };
        Ok(layers
            .iter()
            .filter_map(|l| owned_name_from_array(&l.layer_name))
            .collect())
    }

    fn enumerate_instance_extensions(&self, layer: Option<&CStr>) -> VkResult<Vec<CString>> {
        let properties = unsafe { self.entry.enumerate_instance_extension_properties(layer)? };
        Ok(extension_names(properties))
    }

    unsafe fn create_instance(
        &mut self,
        create_info: &vk::InstanceCreateInfo<'_>,
    ) -> VkResult<vk::Instance> {
        let inner = unsafe { self.entry.create_instance(create_info, None)? };
        let handle = inner.handle();

        //only load the debug utils if the destroy function can actually be found
        let destroy_fn = unsafe {
            self.entry
                .get_instance_proc_addr(handle, c"vkDestroyDebugUtilsMessengerEXT".as_ptr())
        };
        let debug_utils = destroy_fn
            .map(|_| ash::ext::debug_utils::Instance::new(&self.entry, &inner));

        self.instances
            .insert(handle, LoadedInstance { inner, debug_utils });
        Ok(handle)
    }

    unsafe fn destroy_instance(&mut self, instance: vk::Instance) {
        if let Some(loaded) = self.instances.remove(&instance) {
            unsafe { loaded.inner.destroy_instance(None) };
        } else {
            #[cfg(feature = "logging")]
            log::warn!("Instance {:?} is unknown to this runtime, not destroying", instance);
        }
    }

    fn debug_utils_available(&self, instance: vk::Instance) -> bool {
        self.instances
            .get(&instance)
            .map(|i| i.debug_utils.is_some())
            .unwrap_or(false)
    }

    unsafe fn create_debug_messenger(
        &mut self,
        instance: vk::Instance,
        create_info: &vk::DebugUtilsMessengerCreateInfoEXT<'_>,
    ) -> VkResult<vk::DebugUtilsMessengerEXT> {
        let debug_utils = self
            .instances
            .get(&instance)
            .and_then(|i| i.debug_utils.as_ref())
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        unsafe { debug_utils.create_debug_utils_messenger(create_info, None) }
    }

    unsafe fn destroy_debug_messenger(
        &mut self,
        instance: vk::Instance,
        messenger: vk::DebugUtilsMessengerEXT,
    ) {
        if let Some(debug_utils) = self
            .instances
            .get(&instance)
            .and_then(|i| i.debug_utils.as_ref())
        {
            unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) };
        }
    }

    fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.loaded(instance)?.enumerate_physical_devices() }
    }

    fn physical_device_properties(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::PhysicalDeviceProperties> {
        Ok(unsafe {
            self.loaded(instance)?
                .get_physical_device_properties(physical_device)
        })
    }

    fn queue_family_properties(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::QueueFamilyProperties>> {
        Ok(unsafe {
            self.loaded(instance)?
                .get_physical_device_queue_family_properties(physical_device)
        })
    }

    fn enumerate_device_extensions(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
    ) -> VkResult<Vec<CString>> {
        let inner = self.loaded(instance)?;
        let Some(layer) = layer else {
            let properties =
                unsafe { inner.enumerate_device_extension_properties(physical_device)? };
            return Ok(extension_names(properties));
        };

        //ash only exposes the implementation's extensions, so query the layer through the raw function.
        let enumerate = inner.fp_v1_0().enumerate_device_extension_properties;
        loop {
            let mut count = 0u32;
            unsafe { enumerate(physical_device, layer.as_ptr(), &mut count, ptr::null_mut()) }
                .result()?;
            let mut properties = Vec::with_capacity(count as usize);
            let result = unsafe {
                enumerate(
                    physical_device,
                    layer.as_ptr(),
                    &mut count,
                    properties.as_mut_ptr(),
                )
            };
            if result != vk::Result::INCOMPLETE {
                result.result()?;
                unsafe { properties.set_len(count as usize) };
                return Ok(extension_names(properties));
            }
        }
    }

    unsafe fn create_device(
        &mut self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> VkResult<vk::Device> {
        let device = unsafe {
            self.loaded(instance)?
                .create_device(physical_device, create_info, None)?
        };
        let handle = device.handle();
        self.devices.insert(handle, device);
        Ok(handle)
    }

    unsafe fn destroy_device(&mut self, device: vk::Device) {
        if let Some(device) = self.devices.remove(&device) {
            unsafe { device.destroy_device(None) };
        } else {
            #[cfg(feature = "logging")]
            log::warn!("Device {:?} is unknown to this runtime, not destroying", device);
        }
    }
}

impl Drop for AshRuntime {
    fn drop(&mut self) {
        for (_handle, device) in self.devices.drain() {
            #[cfg(feature = "logging")]
            log::warn!("Device {:?} outlived its session", _handle);
            unsafe { device.destroy_device(None) };
        }
        for (_handle, instance) in self.instances.drain() {
            #[cfg(feature = "logging")]
            log::warn!("Instance {:?} outlived its session", _handle);
            unsafe { instance.inner.destroy_instance(None) };
        }
    }
}
