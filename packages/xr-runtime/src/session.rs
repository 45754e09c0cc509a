//! Session lifecycle.
//!
//! One session per instance. Creation validates the host-graphics binding
//! and parks the session in READY; begin starts the camera (or the mock
//! stream) and walks the state machine SYNCHRONIZED -> VISIBLE -> FOCUSED,
//! queuing one event per hop; end reverses through STOPPING back to IDLE.
//! The frame stream is guaranteed started before the FOCUSED event is
//! queued.

use std::sync::{Arc, Mutex};

use kinect_bridge::frame_cache::FrameCache;
use kinect_bridge::mock::MockStream;
use tracing::info;

use crate::abi::{
    XrInstance, XrResult, XrSession, XrSessionBeginInfo, XrSessionCreateInfo, XrSessionState,
    XrStructureType, XrViewConfigurationType,
};
use crate::graphics::{GraphicsContext, GraphicsDevice};
use crate::runtime::{
    allocate_handle, lookup_instance, lookup_session, FrameTiming, SessionData, SESSIONS,
    SPACES, SWAPCHAINS,
};

/// What feeds the session's frame cache while it is running.
pub(crate) enum FrameSource {
    Mock(MockStream),
    #[cfg(feature = "freenect")]
    Device(Arc<kinect_bridge::kinect::KinectSession>),
}

impl FrameSource {
    /// Open the real camera when it is compiled in and attached, otherwise
    /// fall back to the deterministic mock stream.
    fn start(cache: Arc<FrameCache>) -> Self {
        #[cfg(feature = "freenect")]
        {
            use kinect_bridge::device::DeviceConfig;
            use kinect_bridge::kinect::{device_count, KinectSession};

            if device_count() > 0 {
                let session = Arc::new(KinectSession::new());
                let opened = session
                    .initialize(DeviceConfig::default())
                    .and_then(|()| {
                        let color_cache = cache.clone();
                        session.set_color_callback(Box::new(move |data, ts| {
                            color_cache.write_color(data, ts)
                        }));
                        let depth_cache = cache.clone();
                        session.set_depth_callback(Box::new(move |data, ts| {
                            depth_cache.write_depth(data, ts)
                        }));
                        session.start_streams()
                    });
                match opened {
                    Ok(()) => return FrameSource::Device(session),
                    Err(e) => {
                        tracing::warn!("kinect unavailable, falling back to mock frames: {e}")
                    }
                }
            }
        }
        FrameSource::Mock(MockStream::start(cache))
    }

    fn stop(self) {
        match self {
            FrameSource::Mock(mut stream) => stream.stop(),
            #[cfg(feature = "freenect")]
            FrameSource::Device(session) => {
                if let Err(e) = session.stop_streams() {
                    tracing::warn!("failed to stop kinect streams: {e}");
                }
            }
        }
    }
}

pub(crate) fn is_running(state: XrSessionState) -> bool {
    matches!(
        state,
        XrSessionState::Synchronized | XrSessionState::Visible | XrSessionState::Focused
    )
}

/// Find the graphics binding in the create-info chain.
///
/// # Safety
/// Every `next` pointer in the chain must reference a struct that leads
/// with `(XrStructureType, *const c_void)`.
unsafe fn find_graphics_binding(
    info: &XrSessionCreateInfo,
) -> Option<&'static GraphicsDevice> {
    let mut cursor = info.next;
    while !cursor.is_null() {
        let header = &*(cursor as *const crate::abi::XrCompositionLayerBaseHeader);
        if header.ty == XrStructureType::GraphicsBindingKinect {
            let binding = &*(cursor as *const crate::abi::XrGraphicsBindingKinect);
            if binding.device.is_null() {
                return None;
            }
            return Some(&*(binding.device as *const GraphicsDevice));
        }
        cursor = header.next;
    }
    None
}

/// Create the per-instance session singleton in READY state.
///
/// # Safety
/// See [`find_graphics_binding`].
pub(crate) unsafe fn create_session(
    instance: XrInstance,
    info: &XrSessionCreateInfo,
    out: &mut XrSession,
) -> XrResult {
    if info.ty != XrStructureType::SessionCreateInfo {
        return XrResult::ErrorValidationFailure;
    }
    let Some(instance_data) = lookup_instance(instance) else {
        return XrResult::ErrorHandleInvalid;
    };
    if *instance_data.system.lock().unwrap() != Some(info.system_id) {
        return XrResult::ErrorSystemInvalid;
    }

    let Some(binding) = find_graphics_binding(info) else {
        return XrResult::ErrorGraphicsDeviceInvalid;
    };

    let mut session_slot = instance_data.session.lock().unwrap();
    if session_slot.is_some() {
        return XrResult::ErrorLimitReached;
    }

    let handle = allocate_handle();
    SESSIONS.lock().unwrap().insert(
        handle,
        Arc::new(SessionData {
            instance,
            state: Mutex::new(XrSessionState::Ready),
            graphics: GraphicsContext::from_binding(binding),
            cache: Arc::new(FrameCache::new()),
            source: Mutex::new(None),
            timing: Mutex::new(FrameTiming {
                frame_in_progress: false,
                last_wait: None,
                last_display_time: 0,
                frame_count: 0,
            }),
            scratch: Mutex::new(Default::default()),
        }),
    );
    *session_slot = Some(handle);
    instance_data
        .events
        .push_state_change(handle, XrSessionState::Ready);

    info!(handle, "session created");
    *out = handle;
    XrResult::Success
}

/// READY -> SYNCHRONIZED -> VISIBLE -> FOCUSED, with the frame stream
/// started before any of the three events is queued.
pub(crate) fn begin_session(session: XrSession, info: &XrSessionBeginInfo) -> XrResult {
    if info.ty != XrStructureType::SessionBeginInfo {
        return XrResult::ErrorValidationFailure;
    }
    let Some(data) = lookup_session(session) else {
        return XrResult::ErrorHandleInvalid;
    };
    if info.primary_view_configuration_type != XrViewConfigurationType::PrimaryMono {
        return XrResult::ErrorViewConfigurationTypeUnsupported;
    }
    let Some(instance_data) = lookup_instance(data.instance) else {
        return XrResult::ErrorHandleInvalid;
    };

    let mut state = data.state.lock().unwrap();
    if *state != XrSessionState::Ready {
        return XrResult::ErrorSessionNotReady;
    }

    *data.source.lock().unwrap() = Some(FrameSource::start(data.cache.clone()));

    for next in [
        XrSessionState::Synchronized,
        XrSessionState::Visible,
        XrSessionState::Focused,
    ] {
        *state = next;
        instance_data.events.push_state_change(session, next);
    }
    info!(handle = session, "session running");
    XrResult::Success
}

/// Running -> STOPPING -> IDLE; stops the frame stream.
pub(crate) fn end_session(session: XrSession) -> XrResult {
    let Some(data) = lookup_session(session) else {
        return XrResult::ErrorHandleInvalid;
    };
    let Some(instance_data) = lookup_instance(data.instance) else {
        return XrResult::ErrorHandleInvalid;
    };

    let mut state = data.state.lock().unwrap();
    if !is_running(*state) {
        return XrResult::ErrorSessionNotRunning;
    }

    if let Some(source) = data.source.lock().unwrap().take() {
        source.stop();
    }

    for next in [XrSessionState::Stopping, XrSessionState::Idle] {
        *state = next;
        instance_data.events.push_state_change(session, next);
    }
    info!(handle = session, "session stopped");
    XrResult::Success
}

/// Remove the session handle. Fails while the session is running; ending
/// it first is the application's job.
pub(crate) fn destroy_session(session: XrSession) -> XrResult {
    let Some(data) = lookup_session(session) else {
        return XrResult::ErrorHandleInvalid;
    };
    if is_running(*data.state.lock().unwrap()) {
        return XrResult::ErrorSessionRunning;
    }

    if let Some(source) = data.source.lock().unwrap().take() {
        source.stop();
    }
    SPACES
        .lock()
        .unwrap()
        .retain(|_, space| space.session != session);
    SWAPCHAINS
        .lock()
        .unwrap()
        .retain(|_, swapchain| swapchain.session != session);
    SESSIONS.lock().unwrap().remove(&session);

    if let Some(instance_data) = lookup_instance(data.instance) {
        let mut slot = instance_data.session.lock().unwrap();
        if *slot == Some(session) {
            *slot = None;
        }
    }
    info!(handle = session, "session destroyed");
    XrResult::Success
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::abi::{XrGraphicsBindingKinect, XrSystemId};
    use crate::instance::test_support::{create_test_instance, create_test_system};
    use std::os::raw::c_void;

    /// A headless binding with a stable address for the session chain.
    pub fn headless_binding() -> Box<GraphicsDevice> {
        Box::new(GraphicsDevice::Headless)
    }

    pub fn create_info_with_binding(
        system_id: XrSystemId,
        binding: &XrGraphicsBindingKinect,
    ) -> XrSessionCreateInfo {
        XrSessionCreateInfo {
            ty: XrStructureType::SessionCreateInfo,
            next: binding as *const _ as *const c_void,
            create_flags: 0,
            system_id,
        }
    }

    pub fn graphics_binding(device: &GraphicsDevice) -> XrGraphicsBindingKinect {
        XrGraphicsBindingKinect {
            ty: XrStructureType::GraphicsBindingKinect,
            next: std::ptr::null(),
            device: device as *const _ as *const c_void,
        }
    }

    /// Instance + system + READY session against a headless device.
    pub fn create_test_session() -> (XrInstance, XrSession, Box<GraphicsDevice>) {
        let instance = create_test_instance();
        let system = create_test_system(instance);
        let device = headless_binding();
        let binding = graphics_binding(&device);
        let info = create_info_with_binding(system, &binding);
        let mut session = 0;
        assert_eq!(
            unsafe { create_session(instance, &info, &mut session) },
            XrResult::Success
        );
        (instance, session, device)
    }

    pub fn begin_info() -> XrSessionBeginInfo {
        XrSessionBeginInfo {
            ty: XrStructureType::SessionBeginInfo,
            next: std::ptr::null(),
            primary_view_configuration_type: XrViewConfigurationType::PrimaryMono,
        }
    }

    /// Drive a fresh session all the way to FOCUSED.
    pub fn create_running_session() -> (XrInstance, XrSession, Box<GraphicsDevice>) {
        let (instance, session, device) = create_test_session();
        assert_eq!(begin_session(session, &begin_info()), XrResult::Success);
        (instance, session, device)
    }

    /// Tear a session and its instance down, regardless of state.
    pub fn cleanup(instance: XrInstance, session: XrSession) {
        let _ = end_session(session);
        // Drain any queued events so the next test starts clean.
        if let Some(data) = lookup_instance(instance) {
            while data.events.poll().is_some() {}
        }
        let _ = destroy_session(session);
        let _ = crate::instance::destroy_instance(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::instance::destroy_instance;
    use crate::instance::test_support::{create_test_instance, create_test_system};

    #[test]
    fn test_create_session_requires_graphics_binding() {
        let instance = create_test_instance();
        let system = create_test_system(instance);
        let info = XrSessionCreateInfo {
            ty: XrStructureType::SessionCreateInfo,
            next: std::ptr::null(),
            create_flags: 0,
            system_id: system,
        };
        let mut session = 0;
        assert_eq!(
            unsafe { create_session(instance, &info, &mut session) },
            XrResult::ErrorGraphicsDeviceInvalid
        );
        destroy_instance(instance);
    }

    #[test]
    fn test_create_session_rejects_wrong_system() {
        let instance = create_test_instance();
        let _system = create_test_system(instance);
        let device = headless_binding();
        let binding = graphics_binding(&device);
        let info = create_info_with_binding(0xDEAD, &binding);
        let mut session = 0;
        assert_eq!(
            unsafe { create_session(instance, &info, &mut session) },
            XrResult::ErrorSystemInvalid
        );
        destroy_instance(instance);
    }

    #[test]
    fn test_session_is_a_singleton() {
        let (instance, session, device) = create_test_session();
        let system = *lookup_instance(instance)
            .unwrap()
            .system
            .lock()
            .unwrap();
        let binding = graphics_binding(&device);
        let info = create_info_with_binding(system.unwrap(), &binding);
        let mut second = 0;
        assert_eq!(
            unsafe { create_session(instance, &info, &mut second) },
            XrResult::ErrorLimitReached
        );
        cleanup(instance, session);
    }

    #[test]
    fn test_full_lifecycle_event_choreography() {
        let (instance, session, _device) = create_test_session();
        let instance_data = lookup_instance(instance).unwrap();

        // Creation queued READY.
        assert_eq!(
            instance_data.events.poll().unwrap().state,
            XrSessionState::Ready
        );
        assert!(instance_data.events.poll().is_none());

        assert_eq!(begin_session(session, &begin_info()), XrResult::Success);
        for expected in [
            XrSessionState::Synchronized,
            XrSessionState::Visible,
            XrSessionState::Focused,
        ] {
            assert_eq!(instance_data.events.poll().unwrap().state, expected);
        }

        assert_eq!(end_session(session), XrResult::Success);
        for expected in [XrSessionState::Stopping, XrSessionState::Idle] {
            assert_eq!(instance_data.events.poll().unwrap().state, expected);
        }

        assert_eq!(destroy_session(session), XrResult::Success);
        assert_eq!(destroy_instance(instance), XrResult::Success);
    }

    #[test]
    fn test_begin_requires_mono_view_configuration() {
        let (instance, session, _device) = create_test_session();
        let info = XrSessionBeginInfo {
            ty: XrStructureType::SessionBeginInfo,
            next: std::ptr::null(),
            primary_view_configuration_type: XrViewConfigurationType::PrimaryStereo,
        };
        assert_eq!(
            begin_session(session, &info),
            XrResult::ErrorViewConfigurationTypeUnsupported
        );
        cleanup(instance, session);
    }

    #[test]
    fn test_begin_twice_fails() {
        let (instance, session, _device) = create_running_session();
        assert_eq!(
            begin_session(session, &begin_info()),
            XrResult::ErrorSessionNotReady
        );
        cleanup(instance, session);
    }

    #[test]
    fn test_end_session_when_not_running() {
        let (instance, session, _device) = create_test_session();
        assert_eq!(end_session(session), XrResult::ErrorSessionNotRunning);
        cleanup(instance, session);
    }

    #[test]
    fn test_destroy_running_session_fails() {
        let (instance, session, _device) = create_running_session();
        assert_eq!(destroy_session(session), XrResult::ErrorSessionRunning);
        cleanup(instance, session);
    }

    #[test]
    fn test_running_session_feeds_the_cache() {
        let (instance, session, _device) = create_running_session();
        let data = lookup_session(session).unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while data.cache.frame_id() < 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(data.cache.depth_valid(), "mock stream should feed the session cache");
        cleanup(instance, session);
    }
}
