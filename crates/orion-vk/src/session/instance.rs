use ash::vk::{self, Handle};

use super::{FeatureKind, LibraryFlag, ObjectKind, ObjectMetadata, Session, SessionState};
use crate::{
    OrionError,
    diagnostics::{self, codes},
    runtime::Runtime,
    util,
};

impl<R: Runtime> Session<R> {
    ///Chains `info` onto the instance's create info, for instance [ValidationFeaturesEXT](vk::ValidationFeaturesEXT).
    /// Structures are chained in the order they are added, behind the debug messenger if one is chained.
    ///
    /// The structure's own `p_next` is replaced when the instance is created.
    pub fn add_instance_create_info<T>(&mut self, info: T) -> Result<(), OrionError>
    where
        T: vk::ExtendsInstanceCreateInfo + 'static,
    {
        self.expect_state(
            "add_instance_create_info",
            &[SessionState::Configured, SessionState::Pruned],
        )?;
        self.instance_next
            .try_reserve(1)
            .map_err(|e| self.out_of_memory("instance create info", e))?;
        self.instance_next.push(Box::new(info));
        Ok(())
    }

    ///Creates the instance from the requested layers and extensions.
    ///
    /// Runs [prune_extensions](Self::prune_extensions) first, so only extensions that are actually provided end up on
    /// the instance. If `VK_EXT_debug_utils` survives and [LibraryFlag::AutoCreateDebugMessengers] is set, a debug
    /// messenger is chained onto the create info, which reports problems during instance creation and destruction
    /// through the session's [Diagnostics](crate::diagnostics::Diagnostics).
    ///
    /// On success the request is cleared and the instance is tracked. Devices and debug messengers can be created from
    /// here on.
    pub fn realize_instance(&mut self) -> Result<vk::Instance, OrionError> {
        self.expect_state(
            "realize_instance",
            &[SessionState::Configured, SessionState::Pruned],
        )?;
        self.prune_extensions()?;

        let debug_utils_enabled = self
            .features
            .contains(FeatureKind::Extension, ash::ext::debug_utils::NAME);
        let chain_messenger =
            self.flag(LibraryFlag::AutoCreateDebugMessengers) && debug_utils_enabled;
        if self.flag(LibraryFlag::AutoCreateDebugMessengers) && !debug_utils_enabled {
            self.diagnostics.warn(
                "AutoCreateDebugMessengers is set, but VK_EXT_debug_utils is not enabled. No debug messenger is created for the instance",
            );
        }

        let app_desc = vk::ApplicationInfo::default()
            .application_name(&self.app_info.application_name)
            .application_version(self.app_info.application_version)
            .engine_name(&self.app_info.engine_name)
            .engine_version(self.app_info.engine_version)
            .api_version(self.app_info.api_version);

        //at this point, if we are logging, write out instance creation data
        #[cfg(feature = "logging")]
        {
            log::info!("Instance creation:");
            let apiversion = app_desc.api_version;
            log::info!(
                "  Vulkan version: {}.{}.{}",
                vk::api_version_major(apiversion),
                vk::api_version_minor(apiversion),
                vk::api_version_patch(apiversion),
            );
            log::info!("  Layers:");
            for l in self.features.layers() {
                log::info!("    {:?}", l);
            }
            log::info!("  Extensions:");
            for e in self.features.extensions() {
                log::info!("    {:?}", e);
            }
        }

        let enabled_layers = self
            .features
            .layers()
            .iter()
            .map(|l| l.as_ptr())
            .collect::<Vec<_>>();
        let enabled_extensions = self
            .features
            .extensions()
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        let mut messenger_info = diagnostics::messenger_create_info(
            &self.diagnostics,
            self.messenger_severities,
            self.messenger_types,
        );
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_desc)
            .enabled_layer_names(&enabled_layers)
            .enabled_extension_names(&enabled_extensions);
        for next in self.instance_next.iter_mut().rev() {
            unsafe { util::detach(next.as_mut()) };
            create_info = create_info.push_next(next.as_mut());
        }
        if chain_messenger {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = match unsafe { self.runtime.create_instance(&create_info) } {
            Ok(instance) => instance,
            Err(e) => return Err(self.vulkan_error("vkCreateInstance", e)),
        };

        let metadata = ObjectMetadata {
            parent: None,
            enabled_extensions: self.features.extensions().iter().map(|e| util::lossy(e)).collect(),
            enabled_layers: self.features.layers().iter().map(|l| util::lossy(l)).collect(),
        };
        if let Err(e) = self.track(ObjectKind::Instance, instance.as_raw(), metadata) {
            unsafe { self.runtime.destroy_instance(instance) };
            return Err(e);
        }

        self.features.clear();
        self.instance_next.clear();
        self.instance = Some(instance);
        self.state = SessionState::InstanceRealized;
        Ok(instance)
    }

    ///Creates a debug messenger on the session's instance that routes every message matching `severities` and `types`
    /// into the session's [Diagnostics](crate::diagnostics::Diagnostics).
    ///
    /// The instance must have been created with `VK_EXT_debug_utils`, otherwise [OrionError::ExtensionNotEnabled] is
    /// returned.
    pub fn create_debug_messenger(
        &mut self,
        severities: vk::DebugUtilsMessageSeverityFlagsEXT,
        types: vk::DebugUtilsMessageTypeFlagsEXT,
    ) -> Result<vk::DebugUtilsMessengerEXT, OrionError> {
        let instance = self.realized_instance("create_debug_messenger")?;

        let debug_utils = util::lossy(ash::ext::debug_utils::NAME);
        let enabled = self
            .registry
            .enumerate_enabled(ObjectKind::Instance, instance.as_raw(), FeatureKind::Extension)?
            .contains(&debug_utils);
        if !enabled {
            self.diagnostics.error(
                "ERR_EXTENSION_NOT_ENABLED",
                codes::EXTENSION_NOT_ENABLED,
                format!(
                    "{} must be enabled on the instance to create a debug messenger",
                    debug_utils
                ),
            );
            return Err(OrionError::ExtensionNotEnabled(debug_utils));
        }

        let create_info = diagnostics::messenger_create_info(&self.diagnostics, severities, types);
        let messenger = match unsafe { self.runtime.create_debug_messenger(instance, &create_info) }
        {
            Ok(messenger) => messenger,
            Err(e) => return Err(self.vulkan_error("vkCreateDebugUtilsMessengerEXT", e)),
        };

        let metadata = ObjectMetadata {
            parent: Some(instance.as_raw()),
            ..Default::default()
        };
        if let Err(e) = self.track(ObjectKind::DebugMessenger, messenger.as_raw(), metadata) {
            unsafe { self.runtime.destroy_debug_messenger(instance, messenger) };
            return Err(e);
        }

        #[cfg(feature = "logging")]
        log::info!("Created debug messenger {:?}", messenger);
        Ok(messenger)
    }
}
