//! Device-facing types shared across the bridge and the XR runtime.
//!
//! These are platform-independent: the actual libfreenect boundary lives in
//! [`crate::kinect`] behind the `freenect` feature, while everything here
//! compiles on any host (including mock-only builds).

use serde::Serialize;
use thiserror::Error;

/// Frame width in pixels for both streams.
pub const FRAME_WIDTH: usize = 640;
/// Frame height in pixels for both streams.
pub const FRAME_HEIGHT: usize = 480;
/// Color payload size: packed 8-bit R,G,B per pixel.
pub const COLOR_FRAME_BYTES: usize = FRAME_WIDTH * FRAME_HEIGHT * 3;
/// Depth payload size: little-endian u16 millimeters per pixel.
pub const DEPTH_FRAME_BYTES: usize = FRAME_WIDTH * FRAME_HEIGHT * 2;

/// Native camera rate in frames per second.
pub const FRAME_RATE: u32 = 30;
/// Broadcast/pacing interval at the native rate.
pub const FRAME_INTERVAL_MS: u64 = 33;

/// Tilt motor range in degrees; the device clamps harder commands itself.
pub const TILT_MIN_DEGREES: f64 = -27.0;
/// Upper tilt bound in degrees.
pub const TILT_MAX_DEGREES: f64 = 27.0;
/// Minimum interval between two state-changing motor commands, server-wide.
pub const MOTOR_RATE_LIMIT_MS: u64 = 500;

/// Depth values outside this range mean "no return" (0) or are unreliable.
pub const DEPTH_MIN_MM: u16 = 1;
/// Farthest depth reading the sensor reports, in millimeters.
pub const DEPTH_MAX_MM: u16 = 10_000;

/// Which subdevices to configure when opening the camera.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    pub enable_color: bool,
    pub enable_depth: bool,
    pub enable_motor: bool,
    /// Index into the driver's enumeration order.
    pub device_index: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enable_color: true,
            enable_depth: true,
            enable_motor: true,
            device_index: 0,
        }
    }
}

/// Device session error taxonomy. Values, never unwinding.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no device detected")]
    DeviceNotFound,
    #[error("device initialization failed: {0}")]
    InitializationFailed(String),
    #[error("device session is not initialized")]
    NotInitialized,
    #[error("streams are already active")]
    AlreadyStreaming,
    #[error("streams are not active")]
    NotStreaming,
    #[error("motor command failed: {0}")]
    MotorFailed(String),
}

/// Tilt motor movement state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiltStatus {
    Stopped,
    Moving,
    AtLimit,
    Unknown,
}

impl TiltStatus {
    /// Wire spelling used by `motor.status` messages.
    pub fn as_wire(&self) -> &'static str {
        match self {
            TiltStatus::Stopped => "STOPPED",
            TiltStatus::Moving => "MOVING",
            TiltStatus::AtLimit => "LIMIT",
            TiltStatus::Unknown => "UNKNOWN",
        }
    }
}

/// 3-axis accelerometer sample in raw device counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Accelerometer {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Snapshot of the motor subdevice returned by status reads.
#[derive(Debug, Clone, Copy)]
pub struct MotorReading {
    /// Current tilt angle in degrees.
    pub angle: f64,
    pub status: TiltStatus,
    pub accelerometer: Accelerometer,
}

impl Default for MotorReading {
    fn default() -> Self {
        Self {
            angle: 0.0,
            status: TiltStatus::Stopped,
            accelerometer: Accelerometer::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        assert_eq!(COLOR_FRAME_BYTES, 921_600);
        assert_eq!(DEPTH_FRAME_BYTES, 614_400);
    }

    #[test]
    fn test_tilt_status_wire_spellings() {
        assert_eq!(TiltStatus::Stopped.as_wire(), "STOPPED");
        assert_eq!(TiltStatus::Moving.as_wire(), "MOVING");
        assert_eq!(TiltStatus::AtLimit.as_wire(), "LIMIT");
        assert_eq!(TiltStatus::Unknown.as_wire(), "UNKNOWN");
    }

    #[test]
    fn test_default_config_enables_all_subdevices() {
        let config = DeviceConfig::default();
        assert!(config.enable_color);
        assert!(config.enable_depth);
        assert!(config.enable_motor);
        assert_eq!(config.device_index, 0);
    }
}
