//! Instance and system entry-point logic.

use std::ffi::CStr;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::abi::{
    api_version_major, read_fixed_string, write_fixed_string, XrFormFactor, XrInstance,
    XrInstanceCreateInfo, XrInstanceProperties, XrResult, XrStructureType, XrSystemGetInfo,
    XrSystemGraphicsProperties, XrSystemId, XrSystemProperties, XrSystemTrackingProperties,
    EXT_COMPOSITION_LAYER_DEPTH, EXT_GRAPHICS_BINDING, XR_CURRENT_API_VERSION, XR_FALSE,
};
use crate::events::EventQueue;
use crate::runtime::{
    allocate_handle, lookup_instance, InstanceData, INSTANCES, SESSIONS, SPACES, SWAPCHAINS,
};

/// Name reported by `get_instance_properties`.
pub const RUNTIME_NAME: &str = "Kinect XR Runtime";
/// USB vendor id of the device this runtime drives.
pub const VENDOR_ID: u32 = 0x045E;
/// Name reported by `get_system_properties`.
pub const SYSTEM_NAME: &str = "Kinect Depth Camera";

/// Extensions this runtime will accept at instance creation.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = [EXT_COMPOSITION_LAYER_DEPTH, EXT_GRAPHICS_BINDING];

/// Validate the create-info and register a fresh instance.
///
/// # Safety
/// `info.enabled_extension_names` must point at `enabled_extension_count`
/// valid NUL-terminated strings.
pub(crate) unsafe fn create_instance(
    info: &XrInstanceCreateInfo,
    out: &mut XrInstance,
) -> XrResult {
    if info.ty != XrStructureType::InstanceCreateInfo {
        return XrResult::ErrorValidationFailure;
    }
    if api_version_major(info.application_info.api_version)
        != api_version_major(XR_CURRENT_API_VERSION)
    {
        return XrResult::ErrorApiVersionUnsupported;
    }

    let mut enabled = Vec::with_capacity(info.enabled_extension_count as usize);
    if info.enabled_extension_count > 0 {
        if info.enabled_extension_names.is_null() {
            return XrResult::ErrorValidationFailure;
        }
        let names = std::slice::from_raw_parts(
            info.enabled_extension_names,
            info.enabled_extension_count as usize,
        );
        for &name in names {
            if name.is_null() {
                return XrResult::ErrorValidationFailure;
            }
            let Ok(name) = CStr::from_ptr(name).to_str() else {
                return XrResult::ErrorValidationFailure;
            };
            if !SUPPORTED_EXTENSIONS.contains(&name) {
                debug!(extension = name, "rejecting unknown extension");
                return XrResult::ErrorExtensionNotPresent;
            }
            enabled.push(name.to_string());
        }
    }

    let application_name = read_fixed_string(&info.application_info.application_name).to_string();
    let handle = allocate_handle();
    INSTANCES.lock().unwrap().insert(
        handle,
        Arc::new(InstanceData {
            application_name: application_name.clone(),
            enabled_extensions: enabled,
            system: Mutex::new(None),
            session: Mutex::new(None),
            events: EventQueue::new(),
        }),
    );

    info!(application = application_name, handle, "instance created");
    *out = handle;
    XrResult::Success
}

/// Remove the instance and any objects still hanging off it. The loader
/// contract says the application destroys children first; stragglers are
/// dropped rather than leaked.
pub(crate) fn destroy_instance(instance: XrInstance) -> XrResult {
    let Some(_data) = INSTANCES.lock().unwrap().remove(&instance) else {
        return XrResult::ErrorHandleInvalid;
    };

    let orphan_sessions: Vec<u64> = {
        let sessions = SESSIONS.lock().unwrap();
        sessions
            .iter()
            .filter(|(_, s)| s.instance == instance)
            .map(|(&h, _)| h)
            .collect()
    };
    for session in &orphan_sessions {
        SPACES
            .lock()
            .unwrap()
            .retain(|_, space| space.session != *session);
        SWAPCHAINS
            .lock()
            .unwrap()
            .retain(|_, swapchain| swapchain.session != *session);
    }
    SESSIONS
        .lock()
        .unwrap()
        .retain(|h, _| !orphan_sessions.contains(h));

    info!(handle = instance, "instance destroyed");
    XrResult::Success
}

pub(crate) fn get_instance_properties(
    instance: XrInstance,
    properties: &mut XrInstanceProperties,
) -> XrResult {
    if lookup_instance(instance).is_none() {
        return XrResult::ErrorHandleInvalid;
    }
    properties.ty = XrStructureType::InstanceProperties;
    properties.runtime_version = XR_CURRENT_API_VERSION;
    write_fixed_string(&mut properties.runtime_name, RUNTIME_NAME);
    XrResult::Success
}

/// Get (lazily creating) the per-instance system singleton. Only the
/// head-mounted form factor exists; the camera presents as a stationary
/// head-mounted display.
pub(crate) fn get_system(
    instance: XrInstance,
    info: &XrSystemGetInfo,
    out: &mut XrSystemId,
) -> XrResult {
    if info.ty != XrStructureType::SystemGetInfo {
        return XrResult::ErrorValidationFailure;
    }
    let Some(data) = lookup_instance(instance) else {
        return XrResult::ErrorHandleInvalid;
    };
    if info.form_factor != XrFormFactor::HeadMountedDisplay {
        return XrResult::ErrorFormFactorUnsupported;
    }

    let mut system = data.system.lock().unwrap();
    let id = *system.get_or_insert_with(allocate_handle);
    *out = id;
    XrResult::Success
}

pub(crate) fn get_system_properties(
    instance: XrInstance,
    system_id: XrSystemId,
    properties: &mut XrSystemProperties,
) -> XrResult {
    let Some(data) = lookup_instance(instance) else {
        return XrResult::ErrorHandleInvalid;
    };
    if *data.system.lock().unwrap() != Some(system_id) {
        return XrResult::ErrorSystemInvalid;
    }

    properties.ty = XrStructureType::SystemProperties;
    properties.system_id = system_id;
    properties.vendor_id = VENDOR_ID;
    write_fixed_string(&mut properties.system_name, SYSTEM_NAME);
    properties.graphics_properties = XrSystemGraphicsProperties {
        max_swapchain_image_width: 640,
        max_swapchain_image_height: 480,
        max_layer_count: 1,
    };
    properties.tracking_properties = XrSystemTrackingProperties {
        orientation_tracking: XR_FALSE,
        position_tracking: XR_FALSE,
    };
    XrResult::Success
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::abi::XrApplicationInfo;

    /// Build a valid create-info with no extensions.
    pub fn basic_create_info() -> XrInstanceCreateInfo {
        let mut application_info = XrApplicationInfo {
            application_name: [0; crate::abi::MAX_APPLICATION_NAME_SIZE],
            application_version: 1,
            engine_name: [0; crate::abi::MAX_ENGINE_NAME_SIZE],
            engine_version: 0,
            api_version: XR_CURRENT_API_VERSION,
        };
        write_fixed_string(&mut application_info.application_name, "test-app");
        XrInstanceCreateInfo {
            ty: XrStructureType::InstanceCreateInfo,
            next: std::ptr::null(),
            application_info,
            enabled_extension_count: 0,
            enabled_extension_names: std::ptr::null(),
        }
    }

    /// Create an instance and return its handle, panicking on failure.
    pub fn create_test_instance() -> XrInstance {
        let mut handle = 0;
        let result = unsafe { create_instance(&basic_create_info(), &mut handle) };
        assert_eq!(result, XrResult::Success);
        handle
    }

    /// Create an instance + system pair.
    pub fn create_test_system(instance: XrInstance) -> XrSystemId {
        let info = XrSystemGetInfo {
            ty: XrStructureType::SystemGetInfo,
            next: std::ptr::null(),
            form_factor: XrFormFactor::HeadMountedDisplay,
        };
        let mut system = 0;
        assert_eq!(get_system(instance, &info, &mut system), XrResult::Success);
        system
    }
}
