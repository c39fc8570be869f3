use std::{collections::TryReserveError, ffi::NulError};

use ash::{LoadingError, vk};
use raw_window_handle::HandleError;
use thiserror::Error;

use crate::session::{FeatureKind, ObjectKind, SessionState};

///Raised whenever a diagnostic with [FATAL](crate::diagnostics::Severity::FATAL) severity was emitted.
///
/// The library never terminates the process on its own. Whoever receives this error is expected to abort.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Fatal error {code:#04x} reported by {origin}")]
pub struct FatalError {
    pub origin: String,
    pub code: u32,
}

#[derive(Error, Debug)]
pub enum OrionError {
    #[error("Required argument {0} was empty")]
    NullArgument(&'static str),
    #[error("Name contains a nul byte: {0}")]
    InvalidName(#[from] NulError),
    #[error("{kind} {name} is not available")]
    NotFound { kind: FeatureKind, name: String },
    #[error("{kind:?} {handle:#x} is not tracked by this session")]
    InvalidObject { kind: ObjectKind, handle: u64 },
    #[error("Object type {0:?} can not be tracked")]
    UnsupportedObjectType(vk::ObjectType),
    #[error("Extension {0} was not enabled on the instance")]
    ExtensionNotEnabled(String),
    #[error("Unknown library flag {0}")]
    InvalidEnum(u32),
    #[error("{operation} is not allowed while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("Vulkan error: {0}")]
    VkError(#[from] vk::Result),
    #[error("Failed to load Vulkan entry point: {0}")]
    EntryLoading(#[from] LoadingError),
    #[error("Window handle error: {0}")]
    WindowHandle(#[from] HandleError),
    #[error("Memory error: {0}")]
    Memory(#[from] TryReserveError),
    #[error("{0}")]
    Fatal(#[from] FatalError),
}

impl OrionError {
    ///True if the error must end the process. See [FatalError].
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrionError::Fatal(_))
    }
}
