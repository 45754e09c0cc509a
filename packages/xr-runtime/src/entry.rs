//! Exported C entry points.
//!
//! The loader resolves everything through `xr_get_instance_proc_addr`;
//! the enumeration entry points follow the usual two-call idiom (pass
//! capacity 0 to learn the count, then call again with storage). All
//! pointer validation happens here, at the boundary; the domain modules
//! operate on references.

use std::ffi::CStr;
use std::os::raw::c_char;

use crate::abi::{
    write_fixed_string, XrApiLayerProperties, XrEventDataBuffer,
    XrEventDataSessionStateChanged, XrExtensionProperties, XrFrameBeginInfo, XrFrameEndInfo,
    XrFrameState, XrFrameWaitInfo, XrInstance, XrInstanceCreateInfo, XrInstanceProperties,
    XrReferenceSpaceCreateInfo, XrReferenceSpaceType, XrResult, XrSession, XrSessionBeginInfo,
    XrSessionCreateInfo, XrSpace, XrStructureType, XrSwapchain, XrSwapchainCreateInfo,
    XrSystemGetInfo, XrSystemId, XrSystemProperties, XrView, XrViewLocateInfo, XrViewState,
    XrVoidFunction,
};
use crate::{frame, instance, runtime, session, space, swapchain};

/// Resolve an entry point by name. Unknown names report
/// `ErrorFeatureUnsupported` and a null pointer, matching the loader
/// contract for optional functionality.
///
/// # Safety
/// `name` must be a valid NUL-terminated string; `function` must be a
/// valid output pointer.
#[no_mangle]
pub unsafe extern "C" fn xr_get_instance_proc_addr(
    _instance: XrInstance,
    name: *const c_char,
    function: *mut XrVoidFunction,
) -> XrResult {
    if name.is_null() || function.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    let Ok(name) = CStr::from_ptr(name).to_str() else {
        *function = None;
        return XrResult::ErrorValidationFailure;
    };

    macro_rules! entry {
        ($f:expr) => {
            Some(std::mem::transmute::<usize, unsafe extern "C" fn()>($f as usize))
        };
    }

    *function = match name {
        "xr_get_instance_proc_addr" => entry!(xr_get_instance_proc_addr),
        "xr_enumerate_api_layer_properties" => entry!(xr_enumerate_api_layer_properties),
        "xr_enumerate_instance_extension_properties" => {
            entry!(xr_enumerate_instance_extension_properties)
        }
        "xr_create_instance" => entry!(xr_create_instance),
        "xr_destroy_instance" => entry!(xr_destroy_instance),
        "xr_get_instance_properties" => entry!(xr_get_instance_properties),
        "xr_get_system" => entry!(xr_get_system),
        "xr_get_system_properties" => entry!(xr_get_system_properties),
        "xr_poll_event" => entry!(xr_poll_event),
        "xr_create_session" => entry!(xr_create_session),
        "xr_begin_session" => entry!(xr_begin_session),
        "xr_end_session" => entry!(xr_end_session),
        "xr_destroy_session" => entry!(xr_destroy_session),
        "xr_enumerate_reference_spaces" => entry!(xr_enumerate_reference_spaces),
        "xr_create_reference_space" => entry!(xr_create_reference_space),
        "xr_destroy_space" => entry!(xr_destroy_space),
        "xr_enumerate_swapchain_formats" => entry!(xr_enumerate_swapchain_formats),
        "xr_create_swapchain" => entry!(xr_create_swapchain),
        "xr_destroy_swapchain" => entry!(xr_destroy_swapchain),
        "xr_acquire_swapchain_image" => entry!(xr_acquire_swapchain_image),
        "xr_wait_swapchain_image" => entry!(xr_wait_swapchain_image),
        "xr_release_swapchain_image" => entry!(xr_release_swapchain_image),
        "xr_wait_frame" => entry!(xr_wait_frame),
        "xr_begin_frame" => entry!(xr_begin_frame),
        "xr_end_frame" => entry!(xr_end_frame),
        "xr_locate_views" => entry!(xr_locate_views),
        _ => {
            *function = None;
            return XrResult::ErrorFeatureUnsupported;
        }
    };
    XrResult::Success
}

/// # Safety
/// Output pointers must be valid when non-null per the two-call idiom.
#[no_mangle]
pub unsafe extern "C" fn xr_enumerate_api_layer_properties(
    _capacity: u32,
    count_out: *mut u32,
    _properties: *mut XrApiLayerProperties,
) -> XrResult {
    if count_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    // This runtime ships no API layers.
    *count_out = 0;
    XrResult::Success
}

/// # Safety
/// Output pointers must be valid when non-null per the two-call idiom.
#[no_mangle]
pub unsafe extern "C" fn xr_enumerate_instance_extension_properties(
    _layer_name: *const c_char,
    capacity: u32,
    count_out: *mut u32,
    properties: *mut XrExtensionProperties,
) -> XrResult {
    if count_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    let supported = instance::SUPPORTED_EXTENSIONS;
    *count_out = supported.len() as u32;
    if capacity == 0 {
        return XrResult::Success;
    }
    if (capacity as usize) < supported.len() {
        return XrResult::ErrorSizeInsufficient;
    }
    if properties.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    let out = std::slice::from_raw_parts_mut(properties, supported.len());
    for (slot, name) in out.iter_mut().zip(supported) {
        slot.ty = XrStructureType::ExtensionProperties;
        write_fixed_string(&mut slot.extension_name, name);
        slot.extension_version = 1;
    }
    XrResult::Success
}

/// # Safety
/// `create_info` and `instance_out` must be valid; see
/// [`instance::create_instance`] for chain requirements.
#[no_mangle]
pub unsafe extern "C" fn xr_create_instance(
    create_info: *const XrInstanceCreateInfo,
    instance_out: *mut XrInstance,
) -> XrResult {
    if create_info.is_null() || instance_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    instance::create_instance(&*create_info, &mut *instance_out)
}

#[no_mangle]
pub extern "C" fn xr_destroy_instance(instance: XrInstance) -> XrResult {
    instance::destroy_instance(instance)
}

/// # Safety
/// `properties` must be a valid output pointer.
#[no_mangle]
pub unsafe extern "C" fn xr_get_instance_properties(
    instance: XrInstance,
    properties: *mut XrInstanceProperties,
) -> XrResult {
    if properties.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    instance::get_instance_properties(instance, &mut *properties)
}

/// # Safety
/// `get_info` and `system_id_out` must be valid pointers.
#[no_mangle]
pub unsafe extern "C" fn xr_get_system(
    instance: XrInstance,
    get_info: *const XrSystemGetInfo,
    system_id_out: *mut XrSystemId,
) -> XrResult {
    if get_info.is_null() || system_id_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    instance::get_system(instance, &*get_info, &mut *system_id_out)
}

/// # Safety
/// `properties` must be a valid output pointer.
#[no_mangle]
pub unsafe extern "C" fn xr_get_system_properties(
    instance: XrInstance,
    system_id: XrSystemId,
    properties: *mut XrSystemProperties,
) -> XrResult {
    if properties.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    instance::get_system_properties(instance, system_id, &mut *properties)
}

/// Pop one pending event into the caller's buffer.
///
/// # Safety
/// `event_data` must be a valid [`XrEventDataBuffer`].
#[no_mangle]
pub unsafe extern "C" fn xr_poll_event(
    instance: XrInstance,
    event_data: *mut XrEventDataBuffer,
) -> XrResult {
    if event_data.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    let Some(data) = runtime::lookup_instance(instance) else {
        return XrResult::ErrorHandleInvalid;
    };
    match data.events.poll() {
        Some(event) => {
            *(event_data as *mut XrEventDataSessionStateChanged) = event;
            XrResult::Success
        }
        None => XrResult::EventUnavailable,
    }
}

/// # Safety
/// `create_info` must be valid with a well-formed `next` chain;
/// `session_out` must be a valid output pointer.
#[no_mangle]
pub unsafe extern "C" fn xr_create_session(
    instance: XrInstance,
    create_info: *const XrSessionCreateInfo,
    session_out: *mut XrSession,
) -> XrResult {
    if create_info.is_null() || session_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    session::create_session(instance, &*create_info, &mut *session_out)
}

/// # Safety
/// `begin_info` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn xr_begin_session(
    session: XrSession,
    begin_info: *const XrSessionBeginInfo,
) -> XrResult {
    if begin_info.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    session::begin_session(session, &*begin_info)
}

#[no_mangle]
pub extern "C" fn xr_end_session(session: XrSession) -> XrResult {
    session::end_session(session)
}

#[no_mangle]
pub extern "C" fn xr_destroy_session(session: XrSession) -> XrResult {
    session::destroy_session(session)
}

/// # Safety
/// Output pointers must be valid when non-null per the two-call idiom.
#[no_mangle]
pub unsafe extern "C" fn xr_enumerate_reference_spaces(
    session: XrSession,
    capacity: u32,
    count_out: *mut u32,
    spaces: *mut XrReferenceSpaceType,
) -> XrResult {
    if count_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    if runtime::lookup_session(session).is_none() {
        return XrResult::ErrorHandleInvalid;
    }
    let supported = space::SUPPORTED_SPACES;
    *count_out = supported.len() as u32;
    if capacity == 0 {
        return XrResult::Success;
    }
    if (capacity as usize) < supported.len() {
        return XrResult::ErrorSizeInsufficient;
    }
    if spaces.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    std::slice::from_raw_parts_mut(spaces, supported.len()).copy_from_slice(&supported);
    XrResult::Success
}

/// # Safety
/// `create_info` and `space_out` must be valid pointers.
#[no_mangle]
pub unsafe extern "C" fn xr_create_reference_space(
    session: XrSession,
    create_info: *const XrReferenceSpaceCreateInfo,
    space_out: *mut XrSpace,
) -> XrResult {
    if create_info.is_null() || space_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    space::create_reference_space(session, &*create_info, &mut *space_out)
}

#[no_mangle]
pub extern "C" fn xr_destroy_space(space: XrSpace) -> XrResult {
    space::destroy_space(space)
}

/// # Safety
/// Output pointers must be valid when non-null per the two-call idiom.
#[no_mangle]
pub unsafe extern "C" fn xr_enumerate_swapchain_formats(
    session: XrSession,
    capacity: u32,
    count_out: *mut u32,
    formats: *mut i64,
) -> XrResult {
    if count_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    if runtime::lookup_session(session).is_none() {
        return XrResult::ErrorHandleInvalid;
    }
    let supported = swapchain::SUPPORTED_FORMATS;
    *count_out = supported.len() as u32;
    if capacity == 0 {
        return XrResult::Success;
    }
    if (capacity as usize) < supported.len() {
        return XrResult::ErrorSizeInsufficient;
    }
    if formats.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    let out = std::slice::from_raw_parts_mut(formats, supported.len());
    for (slot, format) in out.iter_mut().zip(supported) {
        *slot = format.token();
    }
    XrResult::Success
}

/// # Safety
/// `create_info` and `swapchain_out` must be valid pointers.
#[no_mangle]
pub unsafe extern "C" fn xr_create_swapchain(
    session: XrSession,
    create_info: *const XrSwapchainCreateInfo,
    swapchain_out: *mut XrSwapchain,
) -> XrResult {
    if create_info.is_null() || swapchain_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    swapchain::create_swapchain(session, &*create_info, &mut *swapchain_out)
}

#[no_mangle]
pub extern "C" fn xr_destroy_swapchain(swapchain: XrSwapchain) -> XrResult {
    swapchain::destroy_swapchain(swapchain)
}

/// # Safety
/// `index_out` must be a valid output pointer.
#[no_mangle]
pub unsafe extern "C" fn xr_acquire_swapchain_image(
    swapchain: XrSwapchain,
    index_out: *mut u32,
) -> XrResult {
    if index_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    swapchain::acquire_image(swapchain, &mut *index_out)
}

#[no_mangle]
pub extern "C" fn xr_wait_swapchain_image(swapchain: XrSwapchain) -> XrResult {
    swapchain::wait_image(swapchain)
}

#[no_mangle]
pub extern "C" fn xr_release_swapchain_image(swapchain: XrSwapchain) -> XrResult {
    swapchain::release_image(swapchain)
}

/// # Safety
/// `frame_state` must be a valid output pointer; `wait_info` is optional.
#[no_mangle]
pub unsafe extern "C" fn xr_wait_frame(
    session: XrSession,
    _wait_info: *const XrFrameWaitInfo,
    frame_state: *mut XrFrameState,
) -> XrResult {
    if frame_state.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    frame::wait_frame(session, &mut *frame_state)
}

/// # Safety
/// `begin_info` is optional and unread.
#[no_mangle]
pub unsafe extern "C" fn xr_begin_frame(
    session: XrSession,
    _begin_info: *const XrFrameBeginInfo,
) -> XrResult {
    frame::begin_frame(session)
}

/// # Safety
/// `end_info` must be valid with well-formed layer pointers and chains.
#[no_mangle]
pub unsafe extern "C" fn xr_end_frame(
    session: XrSession,
    end_info: *const XrFrameEndInfo,
) -> XrResult {
    if end_info.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    frame::end_frame(session, &*end_info)
}

/// # Safety
/// All output pointers must be valid for the requested capacity.
#[no_mangle]
pub unsafe extern "C" fn xr_locate_views(
    session: XrSession,
    locate_info: *const XrViewLocateInfo,
    view_state: *mut XrViewState,
    view_capacity: u32,
    view_count_out: *mut u32,
    views: *mut XrView,
) -> XrResult {
    if locate_info.is_null() || view_state.is_null() || view_count_out.is_null() {
        return XrResult::ErrorValidationFailure;
    }
    frame::locate_views(
        session,
        &*locate_info,
        &mut *view_state,
        view_capacity,
        &mut *view_count_out,
        views,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{read_fixed_string, XrSessionState, EXT_COMPOSITION_LAYER_DEPTH};
    use crate::graphics::GraphicsDevice;
    use crate::instance::test_support::basic_create_info;
    use std::ffi::CString;
    use std::os::raw::c_void;

    #[test]
    fn test_proc_addr_resolves_known_names() {
        for name in [
            "xr_create_instance",
            "xr_poll_event",
            "xr_end_frame",
            "xr_enumerate_instance_extension_properties",
        ] {
            let cname = CString::new(name).unwrap();
            let mut function: XrVoidFunction = None;
            let result =
                unsafe { xr_get_instance_proc_addr(0, cname.as_ptr(), &mut function) };
            assert_eq!(result, XrResult::Success, "{name} should resolve");
            assert!(function.is_some(), "{name} should yield a pointer");
        }
    }

    #[test]
    fn test_proc_addr_unknown_name() {
        let cname = CString::new("xr_perform_miracles").unwrap();
        let mut function: XrVoidFunction = None;
        let result = unsafe { xr_get_instance_proc_addr(0, cname.as_ptr(), &mut function) };
        assert_eq!(result, XrResult::ErrorFeatureUnsupported);
        assert!(function.is_none());
    }

    #[test]
    fn test_extension_enumeration_two_call() {
        let mut count = 0;
        let result = unsafe {
            xr_enumerate_instance_extension_properties(
                std::ptr::null(),
                0,
                &mut count,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, XrResult::Success);
        assert_eq!(count, 2);

        let mut props: [XrExtensionProperties; 2] = unsafe { std::mem::zeroed() };
        // Too little capacity is an explicit error.
        let result = unsafe {
            xr_enumerate_instance_extension_properties(
                std::ptr::null(),
                1,
                &mut count,
                props.as_mut_ptr(),
            )
        };
        assert_eq!(result, XrResult::ErrorSizeInsufficient);

        let result = unsafe {
            xr_enumerate_instance_extension_properties(
                std::ptr::null(),
                2,
                &mut count,
                props.as_mut_ptr(),
            )
        };
        assert_eq!(result, XrResult::Success);
        assert_eq!(
            read_fixed_string(&props[0].extension_name),
            EXT_COMPOSITION_LAYER_DEPTH
        );
    }

    #[test]
    fn test_api_layers_are_empty() {
        let mut count = 99;
        let result = unsafe {
            xr_enumerate_api_layer_properties(0, &mut count, std::ptr::null_mut())
        };
        assert_eq!(result, XrResult::Success);
        assert_eq!(count, 0);
    }

    /// The full application lifecycle through the C surface alone:
    /// instance, system, session, events, spaces, swapchain formats,
    /// teardown.
    #[test]
    fn test_lifecycle_through_entry_points() {
        let mut instance = 0;
        let info = basic_create_info();
        assert_eq!(
            unsafe { xr_create_instance(&info, &mut instance) },
            XrResult::Success
        );

        let get_info = crate::abi::XrSystemGetInfo {
            ty: XrStructureType::SystemGetInfo,
            next: std::ptr::null(),
            form_factor: crate::abi::XrFormFactor::HeadMountedDisplay,
        };
        let mut system = 0;
        assert_eq!(
            unsafe { xr_get_system(instance, &get_info, &mut system) },
            XrResult::Success
        );

        let device = GraphicsDevice::Headless;
        let binding = crate::abi::XrGraphicsBindingKinect {
            ty: XrStructureType::GraphicsBindingKinect,
            next: std::ptr::null(),
            device: &device as *const _ as *const c_void,
        };
        let create_info = crate::abi::XrSessionCreateInfo {
            ty: XrStructureType::SessionCreateInfo,
            next: &binding as *const _ as *const c_void,
            create_flags: 0,
            system_id: system,
        };
        let mut session = 0;
        assert_eq!(
            unsafe { xr_create_session(instance, &create_info, &mut session) },
            XrResult::Success
        );

        // READY is already queued.
        let mut buffer: XrEventDataBuffer = unsafe { std::mem::zeroed() };
        assert_eq!(
            unsafe { xr_poll_event(instance, &mut buffer) },
            XrResult::Success
        );
        let event =
            unsafe { *(&buffer as *const _ as *const XrEventDataSessionStateChanged) };
        assert_eq!(event.state, XrSessionState::Ready);
        assert_eq!(event.session, session);

        let begin = crate::abi::XrSessionBeginInfo {
            ty: XrStructureType::SessionBeginInfo,
            next: std::ptr::null(),
            primary_view_configuration_type: crate::abi::XrViewConfigurationType::PrimaryMono,
        };
        assert_eq!(
            unsafe { xr_begin_session(session, &begin) },
            XrResult::Success
        );
        for expected in [
            XrSessionState::Synchronized,
            XrSessionState::Visible,
            XrSessionState::Focused,
        ] {
            assert_eq!(
                unsafe { xr_poll_event(instance, &mut buffer) },
                XrResult::Success
            );
            let event =
                unsafe { *(&buffer as *const _ as *const XrEventDataSessionStateChanged) };
            assert_eq!(event.state, expected);
        }
        assert_eq!(
            unsafe { xr_poll_event(instance, &mut buffer) },
            XrResult::EventUnavailable
        );

        // Enumerations against the live session.
        let mut count = 0;
        assert_eq!(
            unsafe {
                xr_enumerate_reference_spaces(session, 0, &mut count, std::ptr::null_mut())
            },
            XrResult::Success
        );
        assert_eq!(count, 3);
        let mut formats = [0i64; 2];
        assert_eq!(
            unsafe {
                xr_enumerate_swapchain_formats(session, 2, &mut count, formats.as_mut_ptr())
            },
            XrResult::Success
        );
        assert_eq!(count, 2);
        assert_eq!(formats[0], crate::abi::SWAPCHAIN_FORMAT_BGRA8_UNORM);
        assert_eq!(formats[1], crate::abi::SWAPCHAIN_FORMAT_D16_UNORM);

        assert_eq!(xr_end_session(session), XrResult::Success);
        for expected in [XrSessionState::Stopping, XrSessionState::Idle] {
            assert_eq!(
                unsafe { xr_poll_event(instance, &mut buffer) },
                XrResult::Success
            );
            let event =
                unsafe { *(&buffer as *const _ as *const XrEventDataSessionStateChanged) };
            assert_eq!(event.state, expected);
        }

        assert_eq!(xr_destroy_session(session), XrResult::Success);
        assert_eq!(xr_destroy_instance(instance), XrResult::Success);
    }
}
