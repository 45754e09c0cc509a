//! Kinect device session over libfreenect.
//!
//! This is the one unsafe boundary in the crate. The driver passes borrowed
//! pointers into short-lived callbacks on its own I/O thread; the rule here
//! is copy-and-return: callbacks hand owned bytes to the registered
//! handlers and never block. Teardown is ordered on every path: stop
//! streams, close the device, shut down the context.

use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::device::{
    Accelerometer, DeviceConfig, DeviceError, MotorReading, TiltStatus, COLOR_FRAME_BYTES,
    DEPTH_FRAME_BYTES,
};
use crate::protocol::LedState;

/// Raw libfreenect surface. Mirrors the subset of the C API this session
/// uses; struct layouts match libfreenect.h.
#[allow(non_camel_case_types, dead_code)]
mod ffi {
    use std::os::raw::{c_double, c_int, c_void};

    pub enum freenect_context {}
    pub enum freenect_device {}
    pub enum freenect_usb_context {}

    pub const FREENECT_DEVICE_MOTOR: c_int = 0x01;
    pub const FREENECT_DEVICE_CAMERA: c_int = 0x02;

    pub const FREENECT_RESOLUTION_MEDIUM: c_int = 1;
    pub const FREENECT_VIDEO_RGB: c_int = 0;
    pub const FREENECT_DEPTH_MM: c_int = 5;

    pub const LED_OFF: c_int = 0;
    pub const LED_GREEN: c_int = 1;
    pub const LED_RED: c_int = 2;
    pub const LED_YELLOW: c_int = 3;
    pub const LED_BLINK_GREEN: c_int = 4;
    pub const LED_BLINK_RED_YELLOW: c_int = 6;

    pub const TILT_STATUS_STOPPED: i8 = 0x00;
    pub const TILT_STATUS_LIMIT: i8 = 0x01;
    pub const TILT_STATUS_MOVING: i8 = 0x04;

    /// One video/depth mode descriptor, passed and returned by value.
    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct freenect_frame_mode {
        pub reserved: u32,
        pub resolution: c_int,
        pub format: i32,
        pub bytes: i32,
        pub width: i16,
        pub height: i16,
        pub data_bits_per_pixel: i8,
        pub padding_bits_per_pixel: i8,
        pub framerate: i8,
        pub is_valid: i8,
    }

    #[repr(C)]
    pub struct freenect_raw_tilt_state {
        pub accelerometer_x: i16,
        pub accelerometer_y: i16,
        pub accelerometer_z: i16,
        pub tilt_angle: i8,
        pub tilt_status: i8,
    }

    pub type freenect_depth_cb =
        extern "C" fn(dev: *mut freenect_device, depth: *mut c_void, timestamp: u32);
    pub type freenect_video_cb =
        extern "C" fn(dev: *mut freenect_device, video: *mut c_void, timestamp: u32);

    #[link(name = "freenect")]
    extern "C" {
        pub fn freenect_init(
            ctx: *mut *mut freenect_context,
            usb_ctx: *mut freenect_usb_context,
        ) -> c_int;
        pub fn freenect_shutdown(ctx: *mut freenect_context) -> c_int;
        pub fn freenect_num_devices(ctx: *mut freenect_context) -> c_int;
        pub fn freenect_select_subdevices(ctx: *mut freenect_context, subdevs: c_int);
        pub fn freenect_open_device(
            ctx: *mut freenect_context,
            dev: *mut *mut freenect_device,
            index: c_int,
        ) -> c_int;
        pub fn freenect_close_device(dev: *mut freenect_device) -> c_int;
        pub fn freenect_set_user(dev: *mut freenect_device, user: *mut c_void);
        pub fn freenect_get_user(dev: *mut freenect_device) -> *mut c_void;
        pub fn freenect_set_depth_callback(dev: *mut freenect_device, cb: freenect_depth_cb);
        pub fn freenect_set_video_callback(dev: *mut freenect_device, cb: freenect_video_cb);
        pub fn freenect_find_video_mode(res: c_int, fmt: c_int) -> freenect_frame_mode;
        pub fn freenect_find_depth_mode(res: c_int, fmt: c_int) -> freenect_frame_mode;
        pub fn freenect_set_video_mode(
            dev: *mut freenect_device,
            mode: freenect_frame_mode,
        ) -> c_int;
        pub fn freenect_set_depth_mode(
            dev: *mut freenect_device,
            mode: freenect_frame_mode,
        ) -> c_int;
        pub fn freenect_start_depth(dev: *mut freenect_device) -> c_int;
        pub fn freenect_start_video(dev: *mut freenect_device) -> c_int;
        pub fn freenect_stop_depth(dev: *mut freenect_device) -> c_int;
        pub fn freenect_stop_video(dev: *mut freenect_device) -> c_int;
        pub fn freenect_process_events_timeout(
            ctx: *mut freenect_context,
            timeout: *mut libc::timeval,
        ) -> c_int;
        pub fn freenect_set_tilt_degs(dev: *mut freenect_device, angle: c_double) -> c_int;
        pub fn freenect_set_led(dev: *mut freenect_device, option: c_int) -> c_int;
        pub fn freenect_update_tilt_state(dev: *mut freenect_device) -> c_int;
        pub fn freenect_get_tilt_state(
            dev: *mut freenect_device,
        ) -> *mut freenect_raw_tilt_state;
        pub fn freenect_get_tilt_degs(state: *mut freenect_raw_tilt_state) -> c_double;
    }
}

/// Per-frame delivery handler. Receives an owned-for-the-call slice copied
/// out of driver memory plus the 32-bit device timestamp; must not block.
pub type FrameHandler = Box<dyn Fn(&[u8], u32) + Send + Sync>;

/// Handler slots shared with the driver callbacks through the device's
/// user-data pointer. Kept alive for as long as the device is open.
struct CallbackShared {
    color: Mutex<Option<FrameHandler>>,
    depth: Mutex<Option<FrameHandler>>,
}

extern "C" fn depth_cb(dev: *mut ffi::freenect_device, depth: *mut c_void, timestamp: u32) {
    // Driver-owned buffer, reused after return: borrow, dispatch, done.
    unsafe {
        let shared = ffi::freenect_get_user(dev) as *const CallbackShared;
        if shared.is_null() || depth.is_null() {
            return;
        }
        let data = std::slice::from_raw_parts(depth as *const u8, DEPTH_FRAME_BYTES);
        if let Some(handler) = (*shared).depth.lock().unwrap().as_ref() {
            handler(data, timestamp);
        }
    }
}

extern "C" fn video_cb(dev: *mut ffi::freenect_device, video: *mut c_void, timestamp: u32) {
    unsafe {
        let shared = ffi::freenect_get_user(dev) as *const CallbackShared;
        if shared.is_null() || video.is_null() {
            return;
        }
        let data = std::slice::from_raw_parts(video as *const u8, COLOR_FRAME_BYTES);
        if let Some(handler) = (*shared).color.lock().unwrap().as_ref() {
            handler(data, timestamp);
        }
    }
}

/// Number of attached devices. Creates and tears down a transient context;
/// reports zero (never an error) when enumeration is impossible.
pub fn device_count() -> usize {
    unsafe {
        let mut ctx: *mut ffi::freenect_context = std::ptr::null_mut();
        if ffi::freenect_init(&mut ctx, std::ptr::null_mut()) < 0 || ctx.is_null() {
            return 0;
        }
        let count = ffi::freenect_num_devices(ctx);
        ffi::freenect_shutdown(ctx);
        count.max(0) as usize
    }
}

struct Inner {
    ctx: *mut ffi::freenect_context,
    dev: *mut ffi::freenect_device,
    config: DeviceConfig,
    event_thread: Option<JoinHandle<()>>,
}

// The raw pointers are only dereferenced under the inner mutex or on the
// event thread, which the same mutex's owner starts and joins.
unsafe impl Send for Inner {}

/// Owns one camera exclusively: context, device handle, callbacks, and the
/// USB event-loop thread. Closed exactly once, at drop or explicit stop.
pub struct KinectSession {
    inner: Mutex<Option<Inner>>,
    callbacks: Arc<CallbackShared>,
    streaming: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
}

impl KinectSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            callbacks: Arc::new(CallbackShared {
                color: Mutex::new(None),
                depth: Mutex::new(None),
            }),
            streaming: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the device named by `config`. Re-initialization is a no-op.
    pub fn initialize(&self, config: DeviceConfig) -> Result<(), DeviceError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        unsafe {
            let mut ctx: *mut ffi::freenect_context = std::ptr::null_mut();
            if ffi::freenect_init(&mut ctx, std::ptr::null_mut()) < 0 || ctx.is_null() {
                return Err(DeviceError::InitializationFailed(
                    "freenect_init failed".to_string(),
                ));
            }

            let count = ffi::freenect_num_devices(ctx);
            if count <= 0 || config.device_index as c_int >= count {
                ffi::freenect_shutdown(ctx);
                return Err(DeviceError::DeviceNotFound);
            }

            let mut subdevs = 0;
            if config.enable_color || config.enable_depth {
                subdevs |= ffi::FREENECT_DEVICE_CAMERA;
            }
            if config.enable_motor {
                subdevs |= ffi::FREENECT_DEVICE_MOTOR;
            }
            ffi::freenect_select_subdevices(ctx, subdevs);

            let mut dev: *mut ffi::freenect_device = std::ptr::null_mut();
            if ffi::freenect_open_device(ctx, &mut dev, config.device_index as c_int) < 0
                || dev.is_null()
            {
                ffi::freenect_shutdown(ctx);
                return Err(DeviceError::InitializationFailed(format!(
                    "failed to open device {}",
                    config.device_index
                )));
            }

            ffi::freenect_set_user(dev, Arc::as_ptr(&self.callbacks) as *mut c_void);

            info!(device_index = config.device_index, "kinect device opened");
            *guard = Some(Inner {
                ctx,
                dev,
                config,
                event_thread: None,
            });
        }
        Ok(())
    }

    /// Install callbacks and start every enabled subdevice stream, then
    /// spin up the USB event loop. If one stream fails to start after
    /// another succeeded, the started one is stopped before returning.
    pub fn start_streams(&self) -> Result<(), DeviceError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = guard.as_mut().ok_or(DeviceError::NotInitialized)?;
        if self.streaming.load(Ordering::Acquire) {
            return Err(DeviceError::AlreadyStreaming);
        }

        unsafe {
            if inner.config.enable_depth {
                ffi::freenect_set_depth_callback(inner.dev, depth_cb);
                let mode = ffi::freenect_find_depth_mode(
                    ffi::FREENECT_RESOLUTION_MEDIUM,
                    ffi::FREENECT_DEPTH_MM,
                );
                if ffi::freenect_set_depth_mode(inner.dev, mode) < 0 {
                    return Err(DeviceError::InitializationFailed(
                        "failed to set depth mode".to_string(),
                    ));
                }
            }
            if inner.config.enable_color {
                ffi::freenect_set_video_callback(inner.dev, video_cb);
                let mode = ffi::freenect_find_video_mode(
                    ffi::FREENECT_RESOLUTION_MEDIUM,
                    ffi::FREENECT_VIDEO_RGB,
                );
                if ffi::freenect_set_video_mode(inner.dev, mode) < 0 {
                    return Err(DeviceError::InitializationFailed(
                        "failed to set video mode".to_string(),
                    ));
                }
            }

            let mut depth_started = false;
            if inner.config.enable_depth {
                if ffi::freenect_start_depth(inner.dev) < 0 {
                    return Err(DeviceError::InitializationFailed(
                        "failed to start depth stream".to_string(),
                    ));
                }
                depth_started = true;
            }
            if inner.config.enable_color {
                if ffi::freenect_start_video(inner.dev) < 0 {
                    if depth_started {
                        ffi::freenect_stop_depth(inner.dev);
                    }
                    return Err(DeviceError::InitializationFailed(
                        "failed to start video stream".to_string(),
                    ));
                }
            }
        }

        self.stop_flag.store(false, Ordering::Release);
        let ctx = inner.ctx as usize;
        let stop = self.stop_flag.clone();
        let streaming = self.streaming.clone();
        inner.event_thread = Some(std::thread::spawn(move || {
            debug!("usb event loop started");
            let ctx = ctx as *mut ffi::freenect_context;
            while !stop.load(Ordering::Acquire) {
                let mut timeout = libc::timeval {
                    tv_sec: 0,
                    tv_usec: 100_000,
                };
                let rc = unsafe { ffi::freenect_process_events_timeout(ctx, &mut timeout) };
                if rc < 0 {
                    // Transient USB hiccups surface as negative returns;
                    // consumers only ever see timestamp gaps.
                    warn!(rc, "freenect event processing returned an error");
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            streaming.store(false, Ordering::Release);
            debug!("usb event loop stopped");
        }));

        self.streaming.store(true, Ordering::Release);
        info!("device streams started");
        Ok(())
    }

    /// Stop streams and join the event loop.
    pub fn stop_streams(&self) -> Result<(), DeviceError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = guard.as_mut().ok_or(DeviceError::NotInitialized)?;
        if !self.streaming.load(Ordering::Acquire) {
            return Err(DeviceError::NotStreaming);
        }

        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = inner.event_thread.take() {
            let _ = handle.join();
        }
        unsafe {
            if inner.config.enable_depth {
                ffi::freenect_stop_depth(inner.dev);
            }
            if inner.config.enable_color {
                ffi::freenect_stop_video(inner.dev);
            }
        }
        self.streaming.store(false, Ordering::Release);
        info!("device streams stopped");
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Register the color frame handler. May be swapped while streaming.
    pub fn set_color_callback(&self, handler: FrameHandler) {
        *self.callbacks.color.lock().unwrap() = Some(handler);
    }

    /// Register the depth frame handler. May be swapped while streaming.
    pub fn set_depth_callback(&self, handler: FrameHandler) {
        *self.callbacks.depth.lock().unwrap() = Some(handler);
    }

    /// Command the tilt motor; the device clamps to its mechanical range.
    pub fn set_tilt(&self, angle: f64) -> Result<(), DeviceError> {
        let guard = self.inner.lock().unwrap();
        let inner = guard.as_ref().ok_or(DeviceError::NotInitialized)?;
        let rc = unsafe { ffi::freenect_set_tilt_degs(inner.dev, angle) };
        if rc < 0 {
            return Err(DeviceError::MotorFailed(format!(
                "set_tilt({angle}) returned {rc}"
            )));
        }
        Ok(())
    }

    pub fn set_led(&self, led: LedState) -> Result<(), DeviceError> {
        let option = match led {
            LedState::Off => ffi::LED_OFF,
            LedState::Green => ffi::LED_GREEN,
            LedState::Red => ffi::LED_RED,
            LedState::Yellow => ffi::LED_YELLOW,
            LedState::BlinkGreen => ffi::LED_BLINK_GREEN,
            LedState::BlinkRedYellow => ffi::LED_BLINK_RED_YELLOW,
        };
        let guard = self.inner.lock().unwrap();
        let inner = guard.as_ref().ok_or(DeviceError::NotInitialized)?;
        let rc = unsafe { ffi::freenect_set_led(inner.dev, option) };
        if rc < 0 {
            return Err(DeviceError::MotorFailed(format!("set_led returned {rc}")));
        }
        Ok(())
    }

    /// Read tilt angle, movement status, and the raw accelerometer.
    pub fn motor_status(&self) -> Result<MotorReading, DeviceError> {
        let guard = self.inner.lock().unwrap();
        let inner = guard.as_ref().ok_or(DeviceError::NotInitialized)?;
        unsafe {
            if ffi::freenect_update_tilt_state(inner.dev) < 0 {
                return Err(DeviceError::MotorFailed(
                    "failed to read tilt state".to_string(),
                ));
            }
            let state = ffi::freenect_get_tilt_state(inner.dev);
            if state.is_null() {
                return Err(DeviceError::MotorFailed("tilt state is null".to_string()));
            }
            let angle = ffi::freenect_get_tilt_degs(state);
            let status = match (*state).tilt_status {
                ffi::TILT_STATUS_STOPPED => TiltStatus::Stopped,
                ffi::TILT_STATUS_LIMIT => TiltStatus::AtLimit,
                ffi::TILT_STATUS_MOVING => TiltStatus::Moving,
                _ => TiltStatus::Unknown,
            };
            Ok(MotorReading {
                angle,
                status,
                accelerometer: Accelerometer {
                    x: (*state).accelerometer_x as i32,
                    y: (*state).accelerometer_y as i32,
                    z: (*state).accelerometer_z as i32,
                },
            })
        }
    }

    /// Stop streams, close the device, shut down the context, in that
    /// order, exactly once.
    fn teardown(&self) {
        let mut guard = self.inner.lock().unwrap();
        let Some(mut inner) = guard.take() else {
            return;
        };
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = inner.event_thread.take() {
            let _ = handle.join();
        }
        unsafe {
            if self.streaming.swap(false, Ordering::AcqRel) {
                if inner.config.enable_depth {
                    ffi::freenect_stop_depth(inner.dev);
                }
                if inner.config.enable_color {
                    ffi::freenect_stop_video(inner.dev);
                }
            }
            if ffi::freenect_close_device(inner.dev) < 0 {
                error!("failed to close kinect device");
            }
            ffi::freenect_shutdown(inner.ctx);
        }
        info!("kinect device closed");
    }
}

impl Drop for KinectSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Default for KinectSession {
    fn default() -> Self {
        Self::new()
    }
}
