//! # orion-vk
//!
//! Small helper around [ash] that keeps track of the Vulkan objects it creates and validates
//! the layers and extensions an application asks for.
//!
//! # Usage
//!
//! Everything starts with a [Session]. A session collects the requested layers and instance extensions,
//! realizes the [Instance](ash::vk::Instance) from them and can afterwards create any number of
//! [Devices](ash::vk::Device) and debug messengers on that instance. Every object created that way is recorded in the
//! session's [ObjectRegistry](session::ObjectRegistry) and destroyed in a safe order once the session is torn down
//! (or dropped).
//!
//! ```no_run
//! use orion_vk::{Session, diagnostics::Severity, session::LibraryFlag};
//!
//! # fn main() -> Result<(), orion_vk::OrionError> {
//! let mut session = Session::load()?;
//! session.diagnostics().configure_severity_mask(Severity::WARNING | Severity::ERROR);
//! session.set_flag(LibraryFlag::AutoCreateDebugMessengers, true);
//! session.request_layer("VK_LAYER_KHRONOS_validation")?;
//! session.request_extension("VK_EXT_debug_utils")?;
//! let _instance = session.realize_instance()?;
//! session.teardown()?;
//! # Ok(())
//! # }
//! ```
//!
//! Structures that are not sensitive to lifetime requirements (like create infos) are not wrapped.

pub use ash;

///Severity tagged library messages, their default sink and the bridge that routes Vulkan's debug messenger into them.
pub mod diagnostics;

///The native Vulkan interface the [Session] talks to. Includes the default [AshRuntime](runtime::AshRuntime).
pub mod runtime;

///[Session] type, including layer/extension requests, the object registry and instance/device realization.
pub mod session;
pub use session::Session;

mod error;
pub use error::{FatalError, OrionError};

///Helpers for the fixed size name arrays Vulkan returns.
pub mod util;
