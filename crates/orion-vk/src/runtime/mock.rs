//! In-process [Runtime] used by the unit tests. Records every native call and decodes the create infos it receives.

use std::{
    cell::RefCell,
    ffi::{CStr, CString, c_char, c_void},
    rc::Rc,
};

use ahash::AHashMap;
use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};

use super::Runtime;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateInstance {
        application_name: Option<String>,
        layers: Vec<String>,
        extensions: Vec<String>,
        chained_messenger: bool,
        chain: Vec<vk::StructureType>,
    },
    DestroyInstance(vk::Instance),
    CreateDebugMessenger(vk::Instance),
    DestroyDebugMessenger(vk::DebugUtilsMessengerEXT),
    CreateDevice {
        physical_device: vk::PhysicalDevice,
        extensions: Vec<String>,
        queue_families: Vec<u32>,
        device_group: Option<Vec<vk::PhysicalDevice>>,
        ///Structure type of every entry of the create info's `p_next` chain, in chain order.
        chain: Vec<vk::StructureType>,
    },
    DestroyDevice(vk::Device),
}

#[derive(Clone)]
pub struct MockPhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<CString>,
    pub layer_extensions: AHashMap<CString, Vec<CString>>,
}

impl MockPhysicalDevice {
    pub fn new(raw: u64, device_type: vk::PhysicalDeviceType) -> Self {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.device_type = device_type;
        MockPhysicalDevice {
            handle: vk::PhysicalDevice::from_raw(raw),
            properties,
            queue_families: vec![
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                    queue_count: 4,
                    ..Default::default()
                },
                vk::QueueFamilyProperties {
                    queue_flags: vk::QueueFlags::TRANSFER,
                    queue_count: 1,
                    ..Default::default()
                },
            ],
            extensions: vec![c"VK_KHR_swapchain".to_owned()],
            layer_extensions: AHashMap::new(),
        }
    }
}

pub struct MockRuntime {
    pub layers: Vec<CString>,
    pub core_extensions: Vec<CString>,
    pub layer_extensions: AHashMap<CString, Vec<CString>>,
    pub physical_devices: Vec<MockPhysicalDevice>,
    pub fail_instance: bool,
    pub fail_device: bool,
    ///Shared so the log survives the session owning this runtime.
    pub calls: Rc<RefCell<Vec<Call>>>,
    instances: AHashMap<vk::Instance, Vec<String>>,
    next_handle: u64,
}

impl Default for MockRuntime {
    fn default() -> Self {
        let mut layer_extensions = AHashMap::new();
        layer_extensions.insert(
            c"VK_LAYER_KHRONOS_validation".to_owned(),
            vec![
                c"VK_EXT_debug_report".to_owned(),
                c"VK_EXT_validation_features".to_owned(),
            ],
        );
        MockRuntime {
            layers: vec![c"VK_LAYER_KHRONOS_validation".to_owned()],
            core_extensions: vec![
                c"VK_KHR_surface".to_owned(),
                c"VK_EXT_debug_utils".to_owned(),
            ],
            layer_extensions,
            physical_devices: vec![MockPhysicalDevice::new(
                0x100,
                vk::PhysicalDeviceType::DISCRETE_GPU,
            )],
            fail_instance: false,
            fail_device: false,
            calls: Rc::new(RefCell::new(Vec::new())),
            instances: AHashMap::new(),
            next_handle: 0x1000,
        }
    }
}

unsafe fn names(ptrs: *const *const c_char, count: u32) -> Vec<String> {
    if ptrs.is_null() || count == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptrs, count as usize) }
        .iter()
        .map(|p| unsafe { CStr::from_ptr(*p) }.to_string_lossy().into_owned())
        .collect()
}

///Walks a `p_next` chain and returns the first structure of type `ty`.
unsafe fn find_in_chain(next: *const c_void, ty: vk::StructureType) -> *const c_void {
    let mut current = next as *const vk::BaseInStructure<'static>;
    while !current.is_null() {
        let base = unsafe { &*current };
        if base.s_type == ty {
            return current as *const c_void;
        }
        current = base.p_next;
    }
    std::ptr::null()
}

unsafe fn chain_types(next: *const c_void) -> Vec<vk::StructureType> {
    let mut types = Vec::new();
    let mut current = next as *const vk::BaseInStructure<'static>;
    while let Some(base) = unsafe { current.as_ref() } {
        types.push(base.s_type);
        current = base.p_next;
    }
    types
}

impl MockRuntime {
    pub fn calls(&self) -> Rc<RefCell<Vec<Call>>> {
        self.calls.clone()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn device(&self, physical_device: vk::PhysicalDevice) -> VkResult<&MockPhysicalDevice> {
        self.physical_devices
            .iter()
            .find(|d| d.handle == physical_device)
            .ok_or(vk::Result::ERROR_DEVICE_LOST)
    }
}

impl Runtime for MockRuntime {
    fn enumerate_layers(&self) -> VkResult<Vec<CString>> {
        Ok(self.layers.clone())
    }

    fn enumerate_instance_extensions(&self, layer: Option<&CStr>) -> VkResult<Vec<CString>> {
        match layer {
            None => Ok(self.core_extensions.clone()),
            Some(layer) => self
                .layer_extensions
                .get(layer)
                .cloned()
                .ok_or(vk::Result::ERROR_LAYER_NOT_PRESENT),
        }
    }

    unsafe fn create_instance(
        &mut self,
        create_info: &vk::InstanceCreateInfo<'_>,
    ) -> VkResult<vk::Instance> {
        let application_name = unsafe {
            create_info
                .p_application_info
                .as_ref()
                .filter(|a| !a.p_application_name.is_null())
                .map(|a| {
                    CStr::from_ptr(a.p_application_name)
                        .to_string_lossy()
                        .into_owned()
                })
        };
        let extensions = unsafe {
            names(
                create_info.pp_enabled_extension_names,
                create_info.enabled_extension_count,
            )
        };
        let chained_messenger = unsafe {
            !find_in_chain(
                create_info.p_next,
                vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            )
            .is_null()
        };
        self.calls.borrow_mut().push(Call::CreateInstance {
            application_name,
            layers: unsafe {
                names(
                    create_info.pp_enabled_layer_names,
                    create_info.enabled_layer_count,
                )
            },
            extensions: extensions.clone(),
            chained_messenger,
            chain: unsafe { chain_types(create_info.p_next) },
        });

        if self.fail_instance {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let handle = vk::Instance::from_raw(self.next());
        self.instances.insert(handle, extensions);
        Ok(handle)
    }

    unsafe fn destroy_instance(&mut self, instance: vk::Instance) {
        self.instances.remove(&instance);
        self.calls
            .borrow_mut()
            .push(Call::DestroyInstance(instance));
    }

    fn debug_utils_available(&self, instance: vk::Instance) -> bool {
        self.instances
            .get(&instance)
            .map(|e| e.iter().any(|e| e == "VK_EXT_debug_utils"))
            .unwrap_or(false)
    }

    unsafe fn create_debug_messenger(
        &mut self,
        instance: vk::Instance,
        _create_info: &vk::DebugUtilsMessengerCreateInfoEXT<'_>,
    ) -> VkResult<vk::DebugUtilsMessengerEXT> {
        self.calls
            .borrow_mut()
            .push(Call::CreateDebugMessenger(instance));
        if !self.debug_utils_available(instance) {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        Ok(vk::DebugUtilsMessengerEXT::from_raw(self.next()))
    }

    unsafe fn destroy_debug_messenger(
        &mut self,
        _instance: vk::Instance,
        messenger: vk::DebugUtilsMessengerEXT,
    ) {
        self.calls
            .borrow_mut()
            .push(Call::DestroyDebugMessenger(messenger));
    }

    fn enumerate_physical_devices(
        &self,
        _instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        Ok(self.physical_devices.iter().map(|d| d.handle).collect())
    }

    fn physical_device_properties(
        &self,
        _instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::PhysicalDeviceProperties> {
        Ok(self.device(physical_device)?.properties)
    }

    fn queue_family_properties(
        &self,
        _instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::QueueFamilyProperties>> {
        Ok(self.device(physical_device)?.queue_families.clone())
    }

    fn enumerate_device_extensions(
        &self,
        _instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        layer: Option<&CStr>,
    ) -> VkResult<Vec<CString>> {
        let device = self.device(physical_device)?;
        match layer {
            None => Ok(device.extensions.clone()),
            Some(layer) => Ok(device
                .layer_extensions
                .get(layer)
                .cloned()
                .unwrap_or_default()),
        }
    }

    unsafe fn create_device(
        &mut self,
        _instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> VkResult<vk::Device> {
        let group = unsafe {
            find_in_chain(
                create_info.p_next,
                vk::StructureType::DEVICE_GROUP_DEVICE_CREATE_INFO,
            ) as *const vk::DeviceGroupDeviceCreateInfo<'static>
        };
        let device_group = unsafe { group.as_ref() }.map(|g| {
            unsafe {
                std::slice::from_raw_parts(g.p_physical_devices, g.physical_device_count as usize)
            }
            .to_vec()
        });
        let queue_families = if create_info.p_queue_create_infos.is_null() {
            Vec::new()
        } else {
            unsafe {
                std::slice::from_raw_parts(
                    create_info.p_queue_create_infos,
                    create_info.queue_create_info_count as usize,
                )
            }
            .iter()
            .map(|q| q.queue_family_index)
            .collect()
        };

        self.calls.borrow_mut().push(Call::CreateDevice {
            physical_device,
            extensions: unsafe {
                names(
                    create_info.pp_enabled_extension_names,
                    create_info.enabled_extension_count,
                )
            },
            queue_families,
            device_group,
            chain: unsafe { chain_types(create_info.p_next) },
        });

        if self.fail_device {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(vk::Device::from_raw(self.next()))
    }

    unsafe fn destroy_device(&mut self, device: vk::Device) {
        self.calls.borrow_mut().push(Call::DestroyDevice(device));
    }
}
