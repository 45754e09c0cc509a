//! Frame timing loop, views, and end-frame layer validation.
//!
//! `wait_frame` paces the application to the camera's native 30 Hz by
//! sleeping off whatever remains of the frame interval since the previous
//! call. Pacing counts from the last call time, not the previous predicted
//! display time, so a slow application drifts rather than bursts.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::abi::{
    XrCompositionLayerBaseHeader, XrCompositionLayerDepthInfo, XrEnvironmentBlendMode, XrFovf,
    XrFrameEndInfo, XrFrameState, XrPosef, XrResult, XrSession, XrStructureType, XrView,
    XrViewLocateInfo, XrViewState, XrViewConfigurationType, VIEW_STATE_ORIENTATION_TRACKED,
    VIEW_STATE_ORIENTATION_VALID, VIEW_STATE_POSITION_TRACKED, VIEW_STATE_POSITION_VALID,
};
use crate::runtime::{lookup_session, lookup_space, lookup_swapchain, now_ns};
use crate::session::is_running;

/// Native frame period: one 30 Hz camera frame.
pub(crate) const FRAME_PERIOD_NS: i64 = 33_333_333;

/// Half-angle of the sensor's ~57 degree horizontal field of view.
const FOV_HALF_HORIZONTAL: f32 = 0.497_418_84;
/// Half-angle of the sensor's ~43 degree vertical field of view.
const FOV_HALF_VERTICAL: f32 = 0.375_245_79;

/// The one mono view: identity pose, fixed symmetric field of view.
pub(crate) fn mono_view() -> XrView {
    XrView {
        ty: XrStructureType::View,
        next: std::ptr::null_mut(),
        pose: XrPosef::IDENTITY,
        fov: XrFovf {
            angle_left: -FOV_HALF_HORIZONTAL,
            angle_right: FOV_HALF_HORIZONTAL,
            angle_up: FOV_HALF_VERTICAL,
            angle_down: -FOV_HALF_VERTICAL,
        },
    }
}

/// Pace the caller to 30 Hz and report the next predicted display time.
pub(crate) fn wait_frame(session: XrSession, state_out: &mut XrFrameState) -> XrResult {
    let Some(data) = lookup_session(session) else {
        return XrResult::ErrorHandleInvalid;
    };
    if !is_running(*data.state.lock().unwrap()) {
        return XrResult::ErrorSessionNotRunning;
    }

    let mut timing = data.timing.lock().unwrap();
    let interval = Duration::from_nanos(FRAME_PERIOD_NS as u64);
    if let Some(last) = timing.last_wait {
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
    timing.last_wait = Some(Instant::now());
    timing.frame_count += 1;
    timing.last_display_time = now_ns() + FRAME_PERIOD_NS;

    state_out.ty = XrStructureType::FrameState;
    state_out.predicted_display_time = timing.last_display_time;
    state_out.predicted_display_period = FRAME_PERIOD_NS;
    state_out.should_render = crate::abi::XR_TRUE;
    XrResult::Success
}

pub(crate) fn begin_frame(session: XrSession) -> XrResult {
    let Some(data) = lookup_session(session) else {
        return XrResult::ErrorHandleInvalid;
    };
    if !is_running(*data.state.lock().unwrap()) {
        return XrResult::ErrorSessionNotRunning;
    }
    let mut timing = data.timing.lock().unwrap();
    if timing.frame_in_progress {
        return XrResult::ErrorCallOrderInvalid;
    }
    timing.frame_in_progress = true;
    XrResult::Success
}

/// Validate the depth-info extension hanging off a projection layer.
fn validate_depth_info(depth: &XrCompositionLayerDepthInfo) -> XrResult {
    let Some(chain) = lookup_swapchain(depth.swapchain) else {
        return XrResult::ErrorHandleInvalid;
    };
    if !chain.format.is_depth() {
        return XrResult::ErrorSwapchainFormatUnsupported;
    }
    if chain.width != 640 || chain.height != 480 {
        return XrResult::ErrorValidationFailure;
    }
    // Depth ranges are recorded as submitted; normalization stays with the
    // application's projection.
    debug!(
        near_z = depth.near_z,
        far_z = depth.far_z,
        min_depth = depth.min_depth,
        max_depth = depth.max_depth,
        "depth layer accepted"
    );
    XrResult::Success
}

/// Finish the frame: blend-mode check, then walk the submitted layers and
/// their extension chains.
///
/// # Safety
/// `info.layers` must point at `layer_count` valid layer pointers, and
/// every `next` chain must be a well-formed tagged chain.
pub(crate) unsafe fn end_frame(session: XrSession, info: &XrFrameEndInfo) -> XrResult {
    if info.ty != XrStructureType::FrameEndInfo {
        return XrResult::ErrorValidationFailure;
    }
    let Some(data) = lookup_session(session) else {
        return XrResult::ErrorHandleInvalid;
    };
    if !is_running(*data.state.lock().unwrap()) {
        return XrResult::ErrorSessionNotRunning;
    }
    {
        let timing = data.timing.lock().unwrap();
        if !timing.frame_in_progress {
            return XrResult::ErrorCallOrderInvalid;
        }
    }
    if info.environment_blend_mode != XrEnvironmentBlendMode::Opaque {
        return XrResult::ErrorEnvironmentBlendModeUnsupported;
    }

    if info.layer_count > 0 {
        if info.layers.is_null() {
            return XrResult::ErrorValidationFailure;
        }
        let layers = std::slice::from_raw_parts(info.layers, info.layer_count as usize);
        for &layer in layers {
            if layer.is_null() {
                return XrResult::ErrorValidationFailure;
            }
            let header = &*layer;
            if header.ty != XrStructureType::CompositionLayerProjection {
                continue;
            }
            let mut cursor = header.next;
            while !cursor.is_null() {
                let ext = &*(cursor as *const XrCompositionLayerBaseHeader);
                if ext.ty == XrStructureType::CompositionLayerDepthInfo {
                    let depth = &*(cursor as *const XrCompositionLayerDepthInfo);
                    let result = validate_depth_info(depth);
                    if result != XrResult::Success {
                        return result;
                    }
                }
                cursor = ext.next;
            }
        }
    }

    data.timing.lock().unwrap().frame_in_progress = false;
    XrResult::Success
}

/// Report the single mono view at identity, flagged valid and tracked.
pub(crate) fn locate_views(
    session: XrSession,
    info: &XrViewLocateInfo,
    view_state: &mut XrViewState,
    view_capacity: u32,
    view_count_out: &mut u32,
    views: *mut XrView,
) -> XrResult {
    if info.ty != XrStructureType::ViewLocateInfo {
        return XrResult::ErrorValidationFailure;
    }
    if lookup_session(session).is_none() {
        return XrResult::ErrorHandleInvalid;
    }
    if info.view_configuration_type != XrViewConfigurationType::PrimaryMono {
        return XrResult::ErrorViewConfigurationTypeUnsupported;
    }
    if lookup_space(info.space).is_none() {
        return XrResult::ErrorHandleInvalid;
    }

    *view_count_out = 1;
    if view_capacity == 0 {
        return XrResult::Success;
    }
    if views.is_null() {
        return XrResult::ErrorValidationFailure;
    }

    view_state.ty = XrStructureType::ViewState;
    view_state.view_state_flags = VIEW_STATE_ORIENTATION_VALID
        | VIEW_STATE_POSITION_VALID
        | VIEW_STATE_ORIENTATION_TRACKED
        | VIEW_STATE_POSITION_TRACKED;
    unsafe {
        *views = mono_view();
    }
    XrResult::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{XrQuaternionf, XrReferenceSpaceCreateInfo, XrReferenceSpaceType, XrVector3f};
    use crate::session::test_support::{cleanup, create_running_session, create_test_session};
    use crate::space::create_reference_space;
    use crate::swapchain::test_support::{color_create_info, depth_create_info};
    use crate::swapchain::{acquire_image, create_swapchain, release_image, wait_image};
    use std::os::raw::c_void;

    fn frame_state() -> XrFrameState {
        XrFrameState {
            ty: XrStructureType::FrameState,
            next: std::ptr::null_mut(),
            predicted_display_time: 0,
            predicted_display_period: 0,
            should_render: 0,
        }
    }

    fn end_info(
        blend: XrEnvironmentBlendMode,
        layers: &[*const XrCompositionLayerBaseHeader],
    ) -> XrFrameEndInfo {
        XrFrameEndInfo {
            ty: XrStructureType::FrameEndInfo,
            next: std::ptr::null(),
            display_time: 0,
            environment_blend_mode: blend,
            layer_count: layers.len() as u32,
            layers: if layers.is_empty() {
                std::ptr::null()
            } else {
                layers.as_ptr()
            },
        }
    }

    #[test]
    fn test_wait_frame_paces_and_predicts() {
        let (instance, session, _device) = create_running_session();
        let mut state = frame_state();

        assert_eq!(wait_frame(session, &mut state), XrResult::Success);
        assert_eq!(state.predicted_display_period, FRAME_PERIOD_NS);
        assert_eq!(state.should_render, crate::abi::XR_TRUE);
        let first = state.predicted_display_time;

        let before = Instant::now();
        assert_eq!(wait_frame(session, &mut state), XrResult::Success);
        let elapsed = before.elapsed();
        // The second call slept off the remainder of the interval.
        assert!(elapsed >= Duration::from_millis(25), "paced only {elapsed:?}");
        assert!(state.predicted_display_time > first);

        cleanup(instance, session);
    }

    #[test]
    fn test_wait_frame_requires_running_session() {
        let (instance, session, _device) = create_test_session();
        let mut state = frame_state();
        assert_eq!(
            wait_frame(session, &mut state),
            XrResult::ErrorSessionNotRunning
        );
        cleanup(instance, session);
    }

    #[test]
    fn test_begin_end_frame_discipline() {
        let (instance, session, _device) = create_running_session();

        assert_eq!(begin_frame(session), XrResult::Success);
        assert_eq!(begin_frame(session), XrResult::ErrorCallOrderInvalid);

        let info = end_info(XrEnvironmentBlendMode::Opaque, &[]);
        assert_eq!(unsafe { end_frame(session, &info) }, XrResult::Success);
        // Frame is no longer in progress.
        assert_eq!(
            unsafe { end_frame(session, &info) },
            XrResult::ErrorCallOrderInvalid
        );

        cleanup(instance, session);
    }

    #[test]
    fn test_end_frame_rejects_non_opaque_blend() {
        let (instance, session, _device) = create_running_session();
        assert_eq!(begin_frame(session), XrResult::Success);
        for blend in [
            XrEnvironmentBlendMode::Additive,
            XrEnvironmentBlendMode::AlphaBlend,
        ] {
            let info = end_info(blend, &[]);
            assert_eq!(
                unsafe { end_frame(session, &info) },
                XrResult::ErrorEnvironmentBlendModeUnsupported
            );
        }
        cleanup(instance, session);
    }

    #[test]
    fn test_depth_layer_acceptance_and_rejection() {
        let (instance, session, _device) = create_running_session();

        let mut color = 0;
        let mut depth = 0;
        assert_eq!(
            create_swapchain(session, &color_create_info(640, 480), &mut color),
            XrResult::Success
        );
        assert_eq!(
            create_swapchain(session, &depth_create_info(640, 480), &mut depth),
            XrResult::Success
        );

        // Acquire-wait-release one image on each, as an application would.
        for chain in [color, depth] {
            let mut index = 0;
            assert_eq!(acquire_image(chain, &mut index), XrResult::Success);
            assert_eq!(wait_image(chain), XrResult::Success);
            assert_eq!(release_image(chain), XrResult::Success);
        }

        let depth_info = |swapchain| XrCompositionLayerDepthInfo {
            ty: XrStructureType::CompositionLayerDepthInfo,
            next: std::ptr::null(),
            swapchain,
            min_depth: 0.0,
            max_depth: 1.0,
            near_z: 0.1,
            far_z: 10.0,
        };
        let projection = |depth_ptr: *const c_void| crate::abi::XrCompositionLayerProjection {
            ty: XrStructureType::CompositionLayerProjection,
            next: depth_ptr,
            layer_flags: 0,
            space: 0,
            view_count: 1,
            views: std::ptr::null(),
        };

        // Depth info referencing the depth swapchain: accepted.
        let good_depth = depth_info(depth);
        let layer = projection(&good_depth as *const _ as *const c_void);
        let layers = [&layer as *const _ as *const XrCompositionLayerBaseHeader];
        assert_eq!(begin_frame(session), XrResult::Success);
        let info = end_info(XrEnvironmentBlendMode::Opaque, &layers);
        assert_eq!(unsafe { end_frame(session, &info) }, XrResult::Success);

        // Referencing the color swapchain: wrong format.
        let bad_depth = depth_info(color);
        let layer = projection(&bad_depth as *const _ as *const c_void);
        let layers = [&layer as *const _ as *const XrCompositionLayerBaseHeader];
        assert_eq!(begin_frame(session), XrResult::Success);
        let info = end_info(XrEnvironmentBlendMode::Opaque, &layers);
        assert_eq!(
            unsafe { end_frame(session, &info) },
            XrResult::ErrorSwapchainFormatUnsupported
        );

        // Referencing a dead handle.
        let dead_depth = depth_info(0xDEAD);
        let layer = projection(&dead_depth as *const _ as *const c_void);
        let layers = [&layer as *const _ as *const XrCompositionLayerBaseHeader];
        let info = end_info(XrEnvironmentBlendMode::Opaque, &layers);
        assert_eq!(
            unsafe { end_frame(session, &info) },
            XrResult::ErrorHandleInvalid
        );

        // An undersized depth swapchain fails validation.
        let mut small = 0;
        assert_eq!(
            create_swapchain(session, &depth_create_info(320, 240), &mut small),
            XrResult::Success
        );
        let small_depth = depth_info(small);
        let layer = projection(&small_depth as *const _ as *const c_void);
        let layers = [&layer as *const _ as *const XrCompositionLayerBaseHeader];
        let info = end_info(XrEnvironmentBlendMode::Opaque, &layers);
        assert_eq!(
            unsafe { end_frame(session, &info) },
            XrResult::ErrorValidationFailure
        );

        cleanup(instance, session);
    }

    #[test]
    fn test_locate_views_identity_pose() {
        let (instance, session, _device) = create_running_session();

        let mut space = 0;
        let space_info = XrReferenceSpaceCreateInfo {
            ty: XrStructureType::ReferenceSpaceCreateInfo,
            next: std::ptr::null(),
            reference_space_type: XrReferenceSpaceType::View,
            pose_in_reference_space: XrPosef::IDENTITY,
        };
        assert_eq!(
            create_reference_space(session, &space_info, &mut space),
            XrResult::Success
        );

        let locate_info = XrViewLocateInfo {
            ty: XrStructureType::ViewLocateInfo,
            next: std::ptr::null(),
            view_configuration_type: XrViewConfigurationType::PrimaryMono,
            display_time: now_ns(),
            space,
        };
        let mut view_state = XrViewState {
            ty: XrStructureType::ViewState,
            next: std::ptr::null_mut(),
            view_state_flags: 0,
        };

        // Two-call idiom: capacity 0 reports the count.
        let mut count = 0;
        assert_eq!(
            locate_views(
                session,
                &locate_info,
                &mut view_state,
                0,
                &mut count,
                std::ptr::null_mut()
            ),
            XrResult::Success
        );
        assert_eq!(count, 1);

        let mut view = mono_view();
        view.pose.position = XrVector3f { x: 9.0, y: 9.0, z: 9.0 };
        assert_eq!(
            locate_views(
                session,
                &locate_info,
                &mut view_state,
                1,
                &mut count,
                &mut view
            ),
            XrResult::Success
        );
        assert_eq!(count, 1);
        assert_eq!(
            view.pose.orientation,
            XrQuaternionf { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
        );
        assert_eq!(view.pose.position, XrVector3f { x: 0.0, y: 0.0, z: 0.0 });
        assert!(view.fov.angle_right > 0.49 && view.fov.angle_right < 0.51);
        assert!(view.fov.angle_up > 0.37 && view.fov.angle_up < 0.38);
        assert_eq!(view.fov.angle_left, -view.fov.angle_right);
        assert_eq!(view.fov.angle_down, -view.fov.angle_up);
        assert_eq!(view_state.view_state_flags, 0x0F);

        cleanup(instance, session);
    }

    #[test]
    fn test_locate_views_rejects_stereo() {
        let (instance, session, _device) = create_running_session();
        let locate_info = XrViewLocateInfo {
            ty: XrStructureType::ViewLocateInfo,
            next: std::ptr::null(),
            view_configuration_type: XrViewConfigurationType::PrimaryStereo,
            display_time: 0,
            space: 0,
        };
        let mut view_state = XrViewState {
            ty: XrStructureType::ViewState,
            next: std::ptr::null_mut(),
            view_state_flags: 0,
        };
        let mut count = 0;
        assert_eq!(
            locate_views(
                session,
                &locate_info,
                &mut view_state,
                0,
                &mut count,
                std::ptr::null_mut()
            ),
            XrResult::ErrorViewConfigurationTypeUnsupported
        );
        cleanup(instance, session);
    }
}
