use std::{
    ffi::{CStr, CString},
    fmt,
};

use ash::vk;
use raw_window_handle::HasDisplayHandle;

use super::{LibraryFlag, Session, SessionState};
use crate::{OrionError, runtime::Runtime, util};

///Which kind of capability a name refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Layer,
    Extension,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Layer => write!(f, "Layer"),
            FeatureKind::Extension => write!(f, "Extension"),
        }
    }
}

///Ordered set of requested layers and instance extensions. Each name is stored at most once per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureRequest {
    layers: Vec<CString>,
    extensions: Vec<CString>,
}

impl FeatureRequest {
    fn list(&self, kind: FeatureKind) -> &Vec<CString> {
        match kind {
            FeatureKind::Layer => &self.layers,
            FeatureKind::Extension => &self.extensions,
        }
    }

    fn list_mut(&mut self, kind: FeatureKind) -> &mut Vec<CString> {
        match kind {
            FeatureKind::Layer => &mut self.layers,
            FeatureKind::Extension => &mut self.extensions,
        }
    }

    ///Appends `name`. Returns `false` if it was already present.
    pub fn insert(&mut self, kind: FeatureKind, name: CString) -> Result<bool, OrionError> {
        let list = self.list_mut(kind);
        if list.contains(&name) {
            return Ok(false);
        }
        list.try_reserve(1)?;
        list.push(name);
        Ok(true)
    }

    pub fn contains(&self, kind: FeatureKind, name: &CStr) -> bool {
        self.list(kind).iter().any(|n| n.as_c_str() == name)
    }

    pub fn layers(&self) -> &[CString] {
        &self.layers
    }

    pub fn extensions(&self) -> &[CString] {
        &self.extensions
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.extensions.is_empty()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
        self.extensions.clear();
    }
}

impl<R: Runtime> Session<R> {
    ///Returns true if the loader advertises a layer called `name`.
    pub fn is_layer_available(&self, name: &str) -> Result<bool, OrionError> {
        let name = util::to_cstring(name)?;
        self.is_layer_available_cstr(&name)
    }

    pub fn is_layer_available_cstr(&self, name: &CStr) -> Result<bool, OrionError> {
        let layers = self
            .runtime
            .enumerate_layers()
            .map_err(|e| self.vulkan_error("vkEnumerateInstanceLayerProperties", e))?;
        Ok(layers.iter().any(|l| l.as_c_str() == name))
    }

    ///Returns true if instance extension `name` is provided, either by the implementation (`layer == None`) or by the
    /// given layer.
    pub fn is_instance_extension_available(
        &self,
        name: &str,
        layer: Option<&str>,
    ) -> Result<bool, OrionError> {
        let name = util::to_cstring(name)?;
        let layer = layer.map(util::to_cstring).transpose()?;
        self.is_instance_extension_available_cstr(&name, layer.as_deref())
    }

    pub fn is_instance_extension_available_cstr(
        &self,
        name: &CStr,
        layer: Option<&CStr>,
    ) -> Result<bool, OrionError> {
        let extensions = self
            .runtime
            .enumerate_instance_extensions(layer)
            .map_err(|e| self.vulkan_error("vkEnumerateInstanceExtensionProperties", e))?;
        Ok(extensions.iter().any(|e| e.as_c_str() == name))
    }

    pub fn is_layer_requested(&self, name: &str) -> Result<bool, OrionError> {
        Ok(self
            .features
            .contains(FeatureKind::Layer, &util::to_cstring(name)?))
    }

    pub fn is_extension_requested(&self, name: &str) -> Result<bool, OrionError> {
        Ok(self
            .features
            .contains(FeatureKind::Extension, &util::to_cstring(name)?))
    }

    ///Requests the layer `name` for the instance.
    ///
    /// Fails with [OrionError::NotFound] if the loader does not know that layer, in which case the request is left
    /// untouched.
    pub fn request_layer(&mut self, name: &str) -> Result<(), OrionError> {
        let name = util::to_cstring(name)?;
        self.request_layer_cstr(&name)
    }

    pub fn request_layer_cstr(&mut self, name: &CStr) -> Result<(), OrionError> {
        self.expect_state("request_layer", &[SessionState::Configured])?;
        if name.is_empty() {
            return Err(OrionError::NullArgument("name"));
        }
        if !self.is_layer_available_cstr(name)? {
            self.diagnostics
                .warn(format!("Layer {} was not found", name.to_string_lossy()));
            return Err(OrionError::NotFound {
                kind: FeatureKind::Layer,
                name: util::lossy(name),
            });
        }
        self.request(FeatureKind::Layer, name)
    }

    ///Requests the instance extension `name`.
    ///
    /// Availability is not checked here. Extensions that are neither provided by the implementation nor by one of
    /// the requested layers are removed by [prune_extensions](Self::prune_extensions), which runs at the latest
    /// when the instance is realized.
    pub fn request_extension(&mut self, name: &str) -> Result<(), OrionError> {
        let name = util::to_cstring(name)?;
        self.request_extension_cstr(&name)
    }

    pub fn request_extension_cstr(&mut self, name: &CStr) -> Result<(), OrionError> {
        self.expect_state("request_extension", &[SessionState::Configured])?;
        if name.is_empty() {
            return Err(OrionError::NullArgument("name"));
        }
        self.request(FeatureKind::Extension, name)
    }

    fn request(&mut self, kind: FeatureKind, name: &CStr) -> Result<(), OrionError> {
        match self.features.insert(kind, name.to_owned()) {
            Ok(true) => {
                #[cfg(feature = "logging")]
                log::info!("Requesting {}: {:?}", kind, name);
                Ok(())
            }
            Ok(false) => {
                self.diagnostics.warn(format!(
                    "Tried to request {} twice: {}",
                    kind,
                    name.to_string_lossy()
                ));
                Ok(())
            }
            Err(OrionError::Memory(e)) => Err(self.out_of_memory("feature request", e)),
            Err(e) => Err(e),
        }
    }

    ///Requests every instance extension needed to create a surface for `display`.
    pub fn request_surface_extensions(
        &mut self,
        display: &dyn HasDisplayHandle,
    ) -> Result<(), OrionError> {
        self.expect_state("request_surface_extensions", &[SessionState::Configured])?;
        let required = ash_window::enumerate_required_extensions(display.display_handle()?.as_raw())
            .map_err(|e| self.vulkan_error("ash_window::enumerate_required_extensions", e))?;
        for name in required {
            let name = unsafe { CStr::from_ptr(*name) };
            self.request_extension_cstr(name)?;
        }
        Ok(())
    }

    ///Removes every requested extension that is provided neither by the implementation nor by any of the requested
    /// layers. Returns how many were removed.
    ///
    /// Locks the request, layers requested afterwards can't rescue an extension that was pruned.
    pub fn prune_extensions(&mut self) -> Result<usize, OrionError> {
        self.expect_state(
            "prune_extensions",
            &[SessionState::Configured, SessionState::Pruned],
        )?;

        let core = self
            .runtime
            .enumerate_instance_extensions(None)
            .map_err(|e| self.vulkan_error("vkEnumerateInstanceExtensionProperties", e))?;
        let mut by_layer = Vec::with_capacity(self.features.layers.len());
        for layer in &self.features.layers {
            let provided = self
                .runtime
                .enumerate_instance_extensions(Some(layer.as_c_str()))
                .map_err(|e| self.vulkan_error("vkEnumerateInstanceExtensionProperties", e))?;
            by_layer.push(provided);
        }

        let requested = std::mem::take(&mut self.features.extensions);
        let mut removed = 0;
        for extension in requested {
            let provided = core.contains(&extension)
                || by_layer.iter().any(|provided| provided.contains(&extension));
            if provided {
                self.features.extensions.push(extension);
            } else {
                self.diagnostics.warn(format!(
                    "Extension {} is not available and was removed from the request",
                    extension.to_string_lossy()
                ));
                removed += 1;
            }
        }

        self.state = SessionState::Pruned;
        Ok(removed)
    }

    ///Sets which messages the debug messenger chained onto instance creation reports. Only has an effect if
    /// [AutoCreateDebugMessengers](LibraryFlag::AutoCreateDebugMessengers) is set and `VK_EXT_debug_utils` is requested.
    pub fn specify_instance_debug_messages(
        &mut self,
        severities: vk::DebugUtilsMessageSeverityFlagsEXT,
        types: vk::DebugUtilsMessageTypeFlagsEXT,
    ) -> Result<(), OrionError> {
        self.expect_state(
            "specify_instance_debug_messages",
            &[SessionState::Configured, SessionState::Pruned],
        )?;
        if !self.flag(LibraryFlag::AutoCreateDebugMessengers) {
            self.diagnostics.warn(
                "Instance debug messages specified, but AutoCreateDebugMessengers is not set",
            );
        }
        if !self
            .features
            .contains(FeatureKind::Extension, ash::ext::debug_utils::NAME)
        {
            self.diagnostics.warn(
                "Instance debug messages specified, but VK_EXT_debug_utils is not requested",
            );
        }
        self.messenger_severities = severities;
        self.messenger_types = types;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use raw_window_handle::{DisplayHandle, HandleError, RawDisplayHandle, XlibDisplayHandle};

    use super::*;
    use crate::{
        runtime::mock::{Call, MockRuntime},
        session::tests::{session, session_on, warnings},
    };

    ///Display without a connection, only used to pick the platform's surface extensions.
    struct XlibDisplay;

    impl HasDisplayHandle for XlibDisplay {
        fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
            let raw = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
            Ok(unsafe { DisplayHandle::borrow_raw(raw) })
        }
    }

    #[test]
    fn missing_layer_is_not_found() {
        let (mut session, seen) = session();
        let err = session.request_layer("VK_LAYER_does_not_exist").unwrap_err();
        assert!(matches!(
            err,
            OrionError::NotFound {
                kind: FeatureKind::Layer,
                ref name
            } if name == "VK_LAYER_does_not_exist"
        ));
        assert!(session.feature_request().layers().is_empty());
        assert!(
            warnings(&seen)
                .iter()
                .any(|w| w.contains("VK_LAYER_does_not_exist"))
        );
    }

    #[test]
    fn available_layer_is_requested() {
        let (mut session, _seen) = session();
        session.request_layer("VK_LAYER_KHRONOS_validation").unwrap();
        assert!(session.is_layer_requested("VK_LAYER_KHRONOS_validation").unwrap());
        assert!(!session.is_layer_requested("VK_LAYER_other").unwrap());
    }

    #[test]
    fn empty_names_are_rejected() {
        let (mut session, _seen) = session();
        assert!(matches!(
            session.request_extension(""),
            Err(OrionError::NullArgument("name"))
        ));
        assert!(matches!(
            session.request_layer_cstr(c""),
            Err(OrionError::NullArgument("name"))
        ));
        assert!(matches!(
            session.request_extension("VK_KHR\0surface"),
            Err(OrionError::InvalidName(_))
        ));
    }

    #[test]
    fn duplicates_collapse() {
        let (mut session, seen) = session();
        session.request_extension("VK_KHR_surface").unwrap();
        session.request_extension("VK_KHR_surface").unwrap();
        assert_eq!(
            session.feature_request().extensions(),
            [c"VK_KHR_surface".to_owned()]
        );
        assert!(
            warnings(&seen)
                .iter()
                .any(|w| w.contains("twice") && w.contains("VK_KHR_surface"))
        );

        let instance = session.realize_instance().unwrap();
        assert_eq!(
            session
                .enumerate_enabled(instance, FeatureKind::Extension)
                .unwrap(),
            ["VK_KHR_surface".to_owned()]
        );
    }

    #[test]
    fn prune_removes_unprovided_extension() {
        let (mut session, seen) = session();
        session.request_extension("VK_KHR_nonexistent").unwrap();
        assert_eq!(session.prune_extensions().unwrap(), 1);
        assert!(session.feature_request().extensions().is_empty());
        assert_eq!(session.state(), SessionState::Pruned);
        assert!(
            warnings(&seen)
                .iter()
                .any(|w| w.contains("VK_KHR_nonexistent"))
        );
    }

    #[test]
    fn prune_keeps_core_and_layer_extensions() {
        let (mut session, _seen) = session();
        session.request_layer("VK_LAYER_KHRONOS_validation").unwrap();
        session.request_extension("VK_EXT_debug_utils").unwrap();
        session.request_extension("VK_EXT_validation_features").unwrap();
        session.request_extension("VK_KHR_nonexistent").unwrap();
        assert_eq!(session.prune_extensions().unwrap(), 1);
        assert_eq!(
            session.feature_request().extensions(),
            [
                c"VK_EXT_debug_utils".to_owned(),
                c"VK_EXT_validation_features".to_owned()
            ]
        );
    }

    #[test]
    fn layer_after_prune_does_not_rescue() {
        let (mut session, _seen) = session();
        session.request_extension("VK_EXT_validation_features").unwrap();
        assert_eq!(session.prune_extensions().unwrap(), 1);
        assert!(matches!(
            session.request_layer("VK_LAYER_KHRONOS_validation"),
            Err(OrionError::InvalidState {
                operation: "request_layer",
                state: SessionState::Pruned
            })
        ));
        //pruning again is allowed and finds nothing new
        assert_eq!(session.prune_extensions().unwrap(), 0);
        assert!(
            !session
                .is_extension_requested("VK_EXT_validation_features")
                .unwrap()
        );
    }

    #[test]
    fn prune_fails_on_enumeration_error() {
        let mut runtime = MockRuntime::default();
        runtime.layers.push(c"VK_LAYER_broken".to_owned());
        let (mut session, _seen) = session_on(runtime);
        session.request_layer("VK_LAYER_broken").unwrap();
        session.request_extension("VK_KHR_surface").unwrap();
        assert!(matches!(
            session.prune_extensions(),
            Err(OrionError::VkError(vk::Result::ERROR_LAYER_NOT_PRESENT))
        ));
        assert_eq!(session.state(), SessionState::Configured);
    }

    #[test]
    fn availability_queries() {
        let (session, _seen) = session();
        assert!(session.is_layer_available("VK_LAYER_KHRONOS_validation").unwrap());
        assert!(!session.is_layer_available("VK_LAYER_missing").unwrap());
        assert!(
            session
                .is_instance_extension_available("VK_KHR_surface", None)
                .unwrap()
        );
        assert!(
            session
                .is_instance_extension_available(
                    "VK_EXT_validation_features",
                    Some("VK_LAYER_KHRONOS_validation")
                )
                .unwrap()
        );
        assert!(
            !session
                .is_instance_extension_available("VK_EXT_validation_features", None)
                .unwrap()
        );
    }

    #[test]
    fn debug_message_configuration_warns() {
        let (mut session, seen) = session();
        session
            .specify_instance_debug_messages(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .unwrap();
        let w = warnings(&seen);
        assert!(w.iter().any(|w| w.contains("AutoCreateDebugMessengers")));
        assert!(w.iter().any(|w| w.contains("VK_EXT_debug_utils")));

        seen.borrow_mut().clear();
        session.set_flag(LibraryFlag::AutoCreateDebugMessengers, true);
        session.request_extension("VK_EXT_debug_utils").unwrap();
        session
            .specify_instance_debug_messages(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .unwrap();
        assert!(warnings(&seen).is_empty());
        assert_eq!(
            session.messenger_severities,
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        );
    }

    #[test]
    fn requests_are_locked_after_realization() {
        let (mut session, _seen) = session();
        let calls = session.runtime().calls();
        session.realize_instance().unwrap();
        assert!(matches!(
            session.request_extension("VK_KHR_surface"),
            Err(OrionError::InvalidState {
                operation: "request_extension",
                state: SessionState::InstanceRealized
            })
        ));
        assert_eq!(calls.borrow().len(), 1);
        assert!(matches!(calls.borrow()[0], Call::CreateInstance { .. }));
    }

    #[test]
    fn surface_extensions_for_xlib() {
        let (mut session, _seen) = session();
        session.request_surface_extensions(&XlibDisplay).unwrap();
        assert!(session.is_extension_requested("VK_KHR_surface").unwrap());
        assert!(session.is_extension_requested("VK_KHR_xlib_surface").unwrap());
        assert_eq!(session.feature_request().extensions().len(), 2);

        //not provided by the implementation
        assert_eq!(session.prune_extensions().unwrap(), 1);
        assert!(matches!(
            session.request_surface_extensions(&XlibDisplay),
            Err(OrionError::InvalidState {
                operation: "request_surface_extensions",
                state: SessionState::Pruned
            })
        ));
        assert_eq!(
            session.feature_request().extensions(),
            [c"VK_KHR_surface".to_owned()]
        );
    }
}
