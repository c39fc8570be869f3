use std::ffi::{CStr, CString, c_char};

use ash::vk;

use crate::OrionError;

///Reads the nul terminated name stored in one of Vulkan's fixed size name arrays, like
/// [LayerProperties::layer_name](ash::vk::LayerProperties) or [ExtensionProperties::extension_name](ash::vk::ExtensionProperties).
///
/// Returns `None` if the array contains no nul byte.
pub fn name_from_array(raw: &[c_char]) -> Option<&CStr> {
    CStr::from_bytes_until_nul(bytemuck::cast_slice(raw)).ok()
}

///Same as [name_from_array], but copies the name out.
pub fn owned_name_from_array(raw: &[c_char]) -> Option<CString> {
    let name = name_from_array(raw);
    #[cfg(feature = "logging")]
    if name.is_none() {
        log::error!(
            "Could not parse name: {}",
            String::from_utf8_lossy(bytemuck::cast_slice(raw))
        );
    }
    name.map(CStr::to_owned)
}

///Turns a user supplied layer/extension name into a [CString]. Empty names are rejected.
pub fn to_cstring(name: &str) -> Result<CString, OrionError> {
    if name.is_empty() {
        return Err(OrionError::NullArgument("name"));
    }
    Ok(CString::new(name)?)
}

///Lossy conversion used for metadata and messages.
pub fn lossy(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

///Cuts `structure` loose from the `p_next` chain it was linked into before.
///
/// # Safety
///
/// `structure` must be a Vulkan structure, starting with `s_type` and `p_next`.
pub(crate) unsafe fn detach<T: ?Sized>(structure: &mut T) {
    let base = <*mut T>::cast::<vk::BaseOutStructure<'static>>(structure);
    unsafe { (*base).p_next = std::ptr::null_mut() };
}
