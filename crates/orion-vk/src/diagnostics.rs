//! ## Diagnostics
//!
//! Every message the library produces (warnings about pruned extensions, failed Vulkan calls, forwarded validation
//! layer output, ...) is a [Diagnostic]. Diagnostics are emitted through the [Diagnostics] emitter of a session,
//! which filters them by the currently displayed [Severity] mask and hands the survivors to a user callback.
//!
//! If no callback is registered, [default_callback] is used. It writes through the `log` crate if the `logging`
//! feature is enabled, otherwise to stdout.

use std::{
    borrow::Cow,
    cell::{Cell, RefCell},
    ffi::{CStr, c_char, c_void},
    fmt::Write,
    rc::Rc,
};

use ash::vk;
use bitflags::bitflags;

use crate::FatalError;

bitflags! {
    ///Severity of a [Diagnostic]. Masks are built by or-ing single bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Severity: u8 {
        ///The process can not continue. Emitting this always yields a [FatalError].
        const FATAL = 0x01;
        const ERROR = 0x02;
        const WARNING = 0x04;
        const NOTIFICATION = 0x08;
        const VERBOSE = 0x10;
    }
}

///Numeric codes attached to diagnostics.
pub mod codes {
    pub const GENERAL: u32 = 0x00;
    pub const VULKAN_RETURN_ERROR: u32 = 0x01;
    pub const MEMORY_ERROR: u32 = 0x02;
    pub const VULKAN_DEBUG_MESSENGER: u32 = 0x03;
    pub const NULL_ARGUMENT: u32 = 0x04;
    pub const EXTENSION_NOT_ENABLED: u32 = 0x05;
    pub const INVALID_STATE: u32 = 0x06;
}

///Source name used for messages forwarded from a Vulkan debug messenger.
pub const VULKAN_DEBUG_MESSENGER: &str = "VULKAN_DEBUG_MESSENGER";
///Source name of plain warnings and notifications.
pub const LIBRARY: &str = "orion";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    ///Who raised the message, for errors usually the error's name, like `ERR_VULKAN_RETURN_ERROR`.
    pub source: Cow<'static, str>,
    pub code: u32,
    pub message: String,
    pub severity: Severity,
}

///Formats `diagnostic` the way the [default_callback] prints it.
pub fn format_diagnostic(diagnostic: &Diagnostic) -> String {
    if diagnostic.source == VULKAN_DEBUG_MESSENGER {
        return format!("[orion] ({}) {}", VULKAN_DEBUG_MESSENGER, diagnostic.message);
    }

    let severity = diagnostic.severity;
    if severity == Severity::VERBOSE || severity == Severity::NOTIFICATION {
        format!("[orion] {}", diagnostic.message)
    } else if severity == Severity::WARNING {
        format!("[orion] (WARNING) {}", diagnostic.message)
    } else {
        let label = if severity.contains(Severity::FATAL) {
            "FATAL!"
        } else {
            "ERROR"
        };
        format!(
            "[orion] ({}) {} (code 0x{:02X}): \"{}\"",
            label, diagnostic.source, diagnostic.code, diagnostic.message
        )
    }
}

///Callback used when no user callback is registered.
pub fn default_callback(diagnostic: &Diagnostic) {
    let line = format_diagnostic(diagnostic);

    #[cfg(feature = "logging")]
    {
        let severity = diagnostic.severity;
        if severity.intersects(Severity::FATAL | Severity::ERROR) {
            log::error!("{}", line);
        } else if severity.contains(Severity::WARNING) {
            log::warn!("{}", line);
        } else if severity.contains(Severity::NOTIFICATION) {
            log::info!("{}", line);
        } else {
            log::trace!("{}", line);
        }
    }

    #[cfg(not(feature = "logging"))]
    println!("{}", line);
}

pub type DiagnosticCallback = Box<dyn FnMut(&Diagnostic)>;

///Per session message emitter.
///
/// Uses interior mutability, since the Vulkan debug messenger bridge only ever sees a shared pointer to it.
pub struct Diagnostics {
    displayed: Cell<Severity>,
    callback: RefCell<Option<DiagnosticCallback>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    ///Creates an emitter that displays nothing until [configure_severity_mask](Self::configure_severity_mask) is called.
    pub fn new() -> Self {
        Diagnostics {
            displayed: Cell::new(Severity::empty()),
            callback: RefCell::new(None),
        }
    }

    ///Currently displayed severities.
    pub fn displayed(&self) -> Severity {
        self.displayed.get()
    }

    ///Adds `mask` to the displayed severities. Severities can only be added, never removed again.
    pub fn configure_severity_mask(&self, mask: Severity) {
        self.displayed.set(self.displayed.get() | mask);
    }

    ///Registers the callback that receives all displayed diagnostics. Any user data the callback needs should be
    /// captured by the closure.
    pub fn set_callback(&self, callback: impl FnMut(&Diagnostic) + 'static) {
        *self.callback.borrow_mut() = Some(Box::new(callback));
    }

    ///Falls back to the [default_callback].
    pub fn reset_callback(&self) {
        *self.callback.borrow_mut() = None;
    }

    ///True if a diagnostic of `severity` would reach the callback.
    pub fn is_displayed(&self, severity: Severity) -> bool {
        self.displayed.get().contains(severity)
    }

    ///Emits a diagnostic. Nothing is dispatched unless every bit of `severity` is displayed.
    ///
    /// A [FATAL](Severity::FATAL) diagnostic returns [FatalError] after dispatch, whether it was displayed or not.
    pub fn emit(
        &self,
        source: impl Into<Cow<'static, str>>,
        code: u32,
        message: impl Into<String>,
        severity: Severity,
    ) -> Result<(), FatalError> {
        let diagnostic = Diagnostic {
            source: source.into(),
            code,
            message: message.into(),
            severity,
        };
        self.dispatch(&diagnostic);

        if severity.contains(Severity::FATAL) {
            return Err(FatalError {
                origin: diagnostic.source.into_owned(),
                code,
            });
        }
        Ok(())
    }

    ///Emits a [Severity::WARNING] from the library itself.
    pub fn warn(&self, message: impl Into<String>) {
        self.plain(message, Severity::WARNING);
    }

    ///Emits a [Severity::NOTIFICATION] from the library itself.
    pub fn notify(&self, message: impl Into<String>) {
        self.plain(message, Severity::NOTIFICATION);
    }

    ///Emits a [Severity::ERROR] with a named source and code.
    pub fn error(&self, source: &'static str, code: u32, message: impl Into<String>) {
        //ERROR is never fatal
        let _ = self.emit(source, code, message, Severity::ERROR);
    }

    fn plain(&self, message: impl Into<String>, severity: Severity) {
        if !self.is_displayed(severity) {
            return;
        }
        let _ = self.emit(LIBRARY, codes::GENERAL, message, severity);
    }

    fn dispatch(&self, diagnostic: &Diagnostic) {
        if !self.is_displayed(diagnostic.severity) {
            return;
        }

        match self.callback.try_borrow_mut() {
            Ok(mut callback) => match callback.as_mut() {
                Some(callback) => callback(diagnostic),
                None => default_callback(diagnostic),
            },
            //emitted from within the callback itself
            Err(_) => default_callback(diagnostic),
        }
    }
}

///Builds the create info of a debug messenger that routes into `diagnostics`.
///
/// The messenger keeps a raw pointer to `diagnostics`. The caller has to make sure the messenger is destroyed before
/// the last reference to `diagnostics` is dropped.
pub fn messenger_create_info<'a>(
    diagnostics: &Rc<Diagnostics>,
    severities: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severities)
        .message_type(types)
        .pfn_user_callback(Some(vulkan_debug_callback))
        .user_data(Rc::as_ptr(diagnostics) as *mut c_void)
}

unsafe fn cstr_or<'a>(ptr: *const c_char, fallback: &'a CStr) -> &'a CStr {
    if ptr.is_null() {
        fallback
    } else {
        unsafe { CStr::from_ptr(ptr) }
    }
}

fn severity_name(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &'static str {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        "ERROR"
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        "WARNING"
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        "NOTIFICATION"
    } else {
        "VERBOSE"
    }
}

fn type_name(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "VALIDATION"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "PERFORMANCE"
    } else {
        "GENERAL"
    }
}

///Maps Vulkan's message severity onto the library's.
pub fn severity_from_vulkan(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Severity {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Severity::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Severity::WARNING
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Severity::NOTIFICATION
    } else {
        Severity::VERBOSE
    }
}

///Appends `count` names found via `name_of` to `msg`.
unsafe fn append_labels<T>(
    msg: &mut String,
    heading: &str,
    items: *const T,
    count: u32,
    name_of: impl Fn(&T) -> *const c_char,
) {
    let _ = write!(msg, "\n\t{}: {}", heading, count);
    if items.is_null() {
        return;
    }
    for item in unsafe { std::slice::from_raw_parts(items, count as usize) } {
        let name = name_of(item);
        if !name.is_null() {
            let _ = write!(msg, "\n\t\tlabel: {}", unsafe { CStr::from_ptr(name) }.to_string_lossy());
        }
    }
}

///The external callback of every debug messenger created by the library.
///
/// `p_user_data` must point to the session's [Diagnostics], see [messenger_create_info].
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || p_user_data.is_null() {
        #[cfg(feature = "logging")]
        log::error!("OrionDebugMsg: Got Msg, but no data!");
        return vk::FALSE;
    }

    let data = unsafe { &*p_callback_data };
    let diagnostics = unsafe { &*(p_user_data as *const Diagnostics) };
    let severity = severity_from_vulkan(message_severity);
    let text = unsafe { cstr_or(data.p_message, c"no message") }.to_string_lossy();

    let msg = if severity == Severity::VERBOSE || severity == Severity::NOTIFICATION {
        format!("{} >> {}", severity_name(message_severity), text)
    } else {
        let id_name = unsafe { cstr_or(data.p_message_id_name, c"unknown id") };
        let mut msg = format!(
            "vulkan reported debug message, details are described below:\n\tseverity {}, type {}, id {} ({})\n\t\tMESSAGE BEGIN\n\t\t\t{}\n\t\tMESSAGE END",
            severity_name(message_severity),
            type_name(message_types),
            data.message_id_number,
            id_name.to_string_lossy(),
            text
        );
        unsafe {
            append_labels(
                &mut msg,
                "amount of active items in current VkQueue",
                data.p_queue_labels,
                data.queue_label_count,
                |l| l.p_label_name,
            );
            append_labels(
                &mut msg,
                "amount of active items in current VkCommandBuffer",
                data.p_cmd_buf_labels,
                data.cmd_buf_label_count,
                |l| l.p_label_name,
            );
            append_labels(
                &mut msg,
                "amount of related objects",
                data.p_objects,
                data.object_count,
                |o| o.p_object_name,
            );
        }
        msg
    };

    let _ = diagnostics.emit(
        VULKAN_DEBUG_MESSENGER,
        codes::VULKAN_DEBUG_MESSENGER,
        msg,
        severity,
    );
    vk::FALSE
}
