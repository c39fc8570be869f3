//! ## Session
//!
//! A [Session] is the root object of the library. It owns
//!
//! - the application info used when creating the instance,
//! - the pending [FeatureRequest] (requested layers and instance extensions),
//! - the [ObjectRegistry] of every instance, device and debug messenger created through it,
//! - the [Diagnostics] emitter all messages are routed through,
//! - the [Runtime] that actually talks to Vulkan.
//!
//! A session moves through the states `Configured → Pruned → InstanceRealized → TornDown`. Layers and extensions
//! can only be requested while `Configured`. [Session::realize_instance] consumes the request, after which devices
//! and debug messengers can be created any number of times. [Session::teardown] destroys everything in the order
//! debug messengers, devices, instances. Dropping a session that was not torn down tears it down implicitly.
//!
//! A session is neither `Send` nor `Sync`. Vulkan requires external synchronisation for object creation and
//! destruction, and a session is expected to be driven by a single thread.

use std::{collections::TryReserveError, fmt, rc::Rc};

use ash::vk::{self, Handle};

use crate::{
    OrionError,
    diagnostics::{Diagnostics, Severity, codes},
    runtime::{AshRuntime, Runtime},
    util,
};

mod features;
pub use features::{FeatureKind, FeatureRequest};

mod registry;
pub use registry::{ObjectKind, ObjectMetadata, ObjectRegistry, TrackStatus, TrackedObject};

mod instance;

mod device;
pub use device::{DeviceRequest, QueueRequest};

mod physical_device;
pub use physical_device::PhysicalDeviceCandidate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    ///Layers and extensions can be requested.
    Configured,
    ///Extensions were pruned explicitly, the request is locked.
    Pruned,
    ///The instance exists. Devices and debug messengers can be created.
    InstanceRealized,
    ///Everything was destroyed. Terminal.
    TornDown,
}

///Library wide switches. Can be set by value via [Session::set_flag], or by raw id via [Session::set_flag_raw].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LibraryFlag {
    ///If set, and `VK_EXT_debug_utils` survives pruning, a debug messenger create info is chained onto the
    /// instance create info. This lets the validation layers report problems of instance creation and destruction.
    AutoCreateDebugMessengers = 1,
}

impl TryFrom<u32> for LibraryFlag {
    type Error = OrionError;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(LibraryFlag::AutoCreateDebugMessengers),
            other => Err(OrionError::InvalidEnum(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LibraryFlags {
    pub auto_create_debug_messengers: bool,
}

///Application description passed to Vulkan on instance creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppInfo {
    pub application_name: std::ffi::CString,
    pub application_version: u32,
    pub engine_name: std::ffi::CString,
    pub engine_version: u32,
    pub api_version: u32,
}

impl AppInfo {
    ///The major version of Vulkan requested by default.
    pub const API_VERSION_MAJOR: u32 = 1;
    ///The minor version of Vulkan requested by default.
    pub const API_VERSION_MINOR: u32 = 3;
    ///The patch version of Vulkan requested by default.
    pub const API_VERSION_PATCH: u32 = 0;

    pub fn new(application_name: &str) -> Result<Self, OrionError> {
        Ok(AppInfo {
            application_name: util::to_cstring(application_name)?,
            ..Default::default()
        })
    }

    pub fn with_application_version(mut self, version: u32) -> Self {
        self.application_version = version;
        self
    }

    pub fn with_engine(mut self, name: &str, version: u32) -> Result<Self, OrionError> {
        self.engine_name = util::to_cstring(name)?;
        self.engine_version = version;
        Ok(self)
    }

    pub fn with_api_version(mut self, api_version: u32) -> Self {
        self.api_version = api_version;
        self
    }
}

impl Default for AppInfo {
    fn default() -> Self {
        AppInfo {
            application_name: c"orion application".to_owned(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            engine_name: c"No Engine".to_owned(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::make_api_version(
                0,
                Self::API_VERSION_MAJOR,
                Self::API_VERSION_MINOR,
                Self::API_VERSION_PATCH,
            ),
        }
    }
}

///What [Session::teardown] destroyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub debug_messengers: usize,
    ///Messengers whose destroy function could not be resolved from their instance.
    pub skipped_debug_messengers: usize,
    pub devices: usize,
    pub instances: usize,
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} debug messenger(s) ({} skipped), {} device(s), {} instance(s)",
            self.debug_messengers, self.skipped_debug_messengers, self.devices, self.instances
        )
    }
}

///Root handle of the library. See the [module documentation](self).
pub struct Session<R: Runtime = AshRuntime> {
    runtime: R,
    diagnostics: Rc<Diagnostics>,
    app_info: AppInfo,
    flags: LibraryFlags,
    features: FeatureRequest,
    messenger_severities: vk::DebugUtilsMessageSeverityFlagsEXT,
    messenger_types: vk::DebugUtilsMessageTypeFlagsEXT,
    instance_next: Vec<Box<dyn vk::ExtendsInstanceCreateInfo>>,
    registry: ObjectRegistry,
    instance: Option<vk::Instance>,
    state: SessionState,
}

impl Session<AshRuntime> {
    ///Creates a session on the system's Vulkan loader.
    pub fn load() -> Result<Self, OrionError> {
        Ok(Session::new(AshRuntime::load()?))
    }
}

impl<R: Runtime> Session<R> {
    pub fn new(runtime: R) -> Self {
        Session {
            runtime,
            diagnostics: Rc::new(Diagnostics::new()),
            app_info: AppInfo::default(),
            flags: LibraryFlags::default(),
            features: FeatureRequest::default(),
            messenger_severities: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            messenger_types: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            instance_next: Vec::new(),
            registry: ObjectRegistry::new(),
            instance: None,
            state: SessionState::Configured,
        }
    }

    ///The emitter all of this session's messages go through. Use it to configure the displayed severities and
    /// the callback.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    ///The requested, not yet realized layers and extensions.
    pub fn feature_request(&self) -> &FeatureRequest {
        &self.features
    }

    ///The instance created by [realize_instance](Self::realize_instance), if any.
    pub fn instance(&self) -> Option<vk::Instance> {
        self.instance
    }

    pub fn app_info(&self) -> &AppInfo {
        &self.app_info
    }

    ///Sets the application info used when the instance is realized.
    pub fn set_application_info(&mut self, app_info: AppInfo) {
        self.app_info = app_info;
    }

    pub fn set_flag(&mut self, flag: LibraryFlag, value: bool) {
        match flag {
            LibraryFlag::AutoCreateDebugMessengers => {
                self.flags.auto_create_debug_messengers = value
            }
        }
    }

    ///Same as [set_flag](Self::set_flag), but with the flag's numeric id. Unknown ids yield [OrionError::InvalidEnum].
    pub fn set_flag_raw(&mut self, flag: u32, value: u32) -> Result<(), OrionError> {
        let flag = LibraryFlag::try_from(flag).inspect_err(|e| {
            self.diagnostics.warn(format!("{}", e));
        })?;
        self.set_flag(flag, value != 0);
        Ok(())
    }

    pub fn flag(&self, flag: LibraryFlag) -> bool {
        match flag {
            LibraryFlag::AutoCreateDebugMessengers => self.flags.auto_create_debug_messengers,
        }
    }

    ///Returns the extensions (or layers) that were enabled when `handle` was created.
    pub fn enumerate_enabled<H: Handle>(
        &self,
        handle: H,
        feature: FeatureKind,
    ) -> Result<&[String], OrionError> {
        let kind = ObjectKind::of::<H>().ok_or(OrionError::UnsupportedObjectType(H::TYPE))?;
        self.registry
            .enumerate_enabled(kind, handle.as_raw(), feature)
    }

    ///Fails with [OrionError::InvalidState] unless the session is in one of `allowed`.
    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), OrionError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        self.diagnostics.error(
            "ERR_INVALID_STATE",
            codes::INVALID_STATE,
            format!("{} called while the session is {:?}", operation, self.state),
        );
        Err(OrionError::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn realized_instance(&self, operation: &'static str) -> Result<vk::Instance, OrionError> {
        self.expect_state(operation, &[SessionState::InstanceRealized])?;
        self.instance.ok_or(OrionError::InvalidState {
            operation,
            state: self.state,
        })
    }

    ///Reports a failed native call and converts it.
    fn vulkan_error(&self, operation: &str, error: vk::Result) -> OrionError {
        self.diagnostics.error(
            "ERR_VULKAN_RETURN_ERROR",
            codes::VULKAN_RETURN_ERROR,
            format!("{} returned {}", operation, error),
        );
        OrionError::VkError(error)
    }

    ///Records a newly created object. Running out of memory while doing so is fatal.
    fn track(
        &mut self,
        kind: ObjectKind,
        handle: u64,
        metadata: ObjectMetadata,
    ) -> Result<TrackStatus, OrionError> {
        match self.registry.track(kind, handle, metadata) {
            Ok(TrackStatus::AlreadyTracked) => {
                self.diagnostics.warn(format!(
                    "{:?} {:#x} is already managed by this session",
                    kind, handle
                ));
                Ok(TrackStatus::AlreadyTracked)
            }
            Ok(status) => Ok(status),
            Err(OrionError::Memory(e)) => Err(self.out_of_memory("object registry", e)),
            Err(e) => Err(e),
        }
    }

    ///Raises the fatal diagnostic for a failed allocation while growing `what`.
    fn out_of_memory(&self, what: &str, error: TryReserveError) -> OrionError {
        match self.diagnostics.emit(
            "ERR_MEMORY_ERROR",
            codes::MEMORY_ERROR,
            format!("Could not grow the {}: {}", what, error),
            Severity::FATAL,
        ) {
            Err(fatal) => OrionError::Fatal(fatal),
            Ok(()) => OrionError::Memory(error),
        }
    }

    ///Destroys every tracked object. Debug messengers first, then devices, then instances. Within one kind the
    /// newest object is destroyed first.
    ///
    /// Debug messengers are only destroyed if `vkDestroyDebugUtilsMessengerEXT` can be resolved from their
    /// instance. Otherwise the messenger can't exist in the first place and is skipped.
    ///
    /// The session ends up in [SessionState::TornDown]. Calling this again fails with [OrionError::InvalidState].
    pub fn teardown(&mut self) -> Result<TeardownReport, OrionError> {
        if self.state == SessionState::TornDown {
            return Err(OrionError::InvalidState {
                operation: "teardown",
                state: self.state,
            });
        }

        let mut report = TeardownReport::default();
        for object in self.registry.drain_for_teardown() {
            match object.kind {
                ObjectKind::DebugMessenger => {
                    let instance = object
                        .metadata
                        .parent
                        .map(vk::Instance::from_raw)
                        .filter(|i| self.runtime.debug_utils_available(*i));
                    if let Some(instance) = instance {
                        unsafe {
                            self.runtime.destroy_debug_messenger(
                                instance,
                                vk::DebugUtilsMessengerEXT::from_raw(object.handle),
                            )
                        };
                        report.debug_messengers += 1;
                    } else {
                        self.diagnostics.warn(format!(
                            "vkDestroyDebugUtilsMessengerEXT could not be resolved, debug messenger {:#x} is not destroyed",
                            object.handle
                        ));
                        report.skipped_debug_messengers += 1;
                    }
                }
                ObjectKind::Device => {
                    unsafe { self.runtime.destroy_device(vk::Device::from_raw(object.handle)) };
                    report.devices += 1;
                }
                ObjectKind::Instance => {
                    unsafe {
                        self.runtime
                            .destroy_instance(vk::Instance::from_raw(object.handle))
                    };
                    report.instances += 1;
                }
            }
        }

        self.features.clear();
        self.instance = None;
        self.state = SessionState::TornDown;

        #[cfg(feature = "logging")]
        log::info!("Session torn down: {}", report);
        self.diagnostics
            .notify(format!("session torn down, destroyed {}", report));
        Ok(report)
    }
}

impl<R: Runtime> Drop for Session<R> {
    fn drop(&mut self) {
        if self.state != SessionState::TornDown {
            if let Err(_e) = self.teardown() {
                #[cfg(feature = "logging")]
                log::error!("Implicit session teardown failed: {}", _e);
            }
        }
    }
}
