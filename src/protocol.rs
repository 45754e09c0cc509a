//! Wire protocol for the WebSocket bridge.
//!
//! Two planes share one socket: JSON text messages for control (subscribe,
//! motor, status) and binary messages for frames. This module owns parse
//! and emit for both; the bridge server never touches serde or byte
//! layouts directly.
//!
//! Binary frame layout, little-endian:
//!
//! | offset | size | field |
//! |--------|------|-------------------------------|
//! | 0      | 4    | frame_id (u32)                |
//! | 4      | 2    | stream_type (u16): 1=color, 2=depth |
//! | 6      | 2    | reserved, zero                |
//! | 8      | N    | payload                       |

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::device::{
    Accelerometer, COLOR_FRAME_BYTES, DEPTH_FRAME_BYTES, FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH,
    MOTOR_RATE_LIMIT_MS, TILT_MAX_DEGREES, TILT_MIN_DEGREES,
};

/// Protocol version advertised in `hello`.
pub const PROTOCOL_VERSION: u32 = 1;
/// Server name advertised in `hello`.
pub const SERVER_NAME: &str = "kinect-bridge";
/// Size of the binary frame header in bytes.
pub const FRAME_HEADER_BYTES: usize = 8;

/// Error codes carried by `error` and `motor.error` messages.
pub mod error_code {
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const INVALID_LED_STATE: &str = "INVALID_LED_STATE";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const DEVICE_NOT_CONNECTED: &str = "DEVICE_NOT_CONNECTED";
    pub const MOTOR_FAILED: &str = "MOTOR_FAILED";
}

/// Binary stream discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StreamType {
    Color = 0x0001,
    Depth = 0x0002,
}

impl StreamType {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x0001 => Some(StreamType::Color),
            0x0002 => Some(StreamType::Depth),
            _ => None,
        }
    }

    /// Stream name as used in `subscribe` requests.
    pub fn name(self) -> &'static str {
        match self {
            StreamType::Color => "color",
            StreamType::Depth => "depth",
        }
    }
}

/// LED states accepted by `motor.setLed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Off,
    Green,
    Red,
    Yellow,
    BlinkGreen,
    BlinkRedYellow,
}

impl LedState {
    pub const ALL: [LedState; 6] = [
        LedState::Off,
        LedState::Green,
        LedState::Red,
        LedState::Yellow,
        LedState::BlinkGreen,
        LedState::BlinkRedYellow,
    ];

    pub fn as_wire(self) -> &'static str {
        match self {
            LedState::Off => "off",
            LedState::Green => "green",
            LedState::Red => "red",
            LedState::Yellow => "yellow",
            LedState::BlinkGreen => "blink_green",
            LedState::BlinkRedYellow => "blink_red_yellow",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|led| led.as_wire() == name)
    }
}

/// Messages a client may send. Unknown `type` values fail the tagged-enum
/// parse, which callers surface as a recoverable `PROTOCOL_ERROR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { streams: Vec<String> },
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
    #[serde(rename = "motor.setTilt")]
    MotorSetTilt { angle: f64 },
    #[serde(rename = "motor.setLed")]
    MotorSetLed { state: String },
    #[serde(rename = "motor.reset")]
    MotorReset,
    #[serde(rename = "motor.getStatus")]
    MotorGetStatus,
}

/// Messages the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "hello")]
    Hello {
        protocol_version: u32,
        server: String,
        capabilities: Capabilities,
    },
    #[serde(rename = "status")]
    Status {
        connected: bool,
        frame_id: u32,
        dropped_frames: u64,
        clients: u32,
    },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    #[serde(rename = "motor.status")]
    MotorStatus {
        angle: f64,
        status: String,
        accelerometer: AccelerometerWire,
    },
    #[serde(rename = "motor.error")]
    MotorError { code: String, message: String },
}

/// Accelerometer integers as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelerometerWire {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl From<Accelerometer> for AccelerometerWire {
    fn from(a: Accelerometer) -> Self {
        Self { x: a.x, y: a.y, z: a.z }
    }
}

/// Capabilities block inside `hello`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub streams: Vec<String>,
    pub color: StreamCapabilities,
    pub depth: StreamCapabilities,
    pub frame_rate: u32,
    pub motor: MotorCapabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCapabilities {
    pub width: u32,
    pub height: u32,
    pub bytes_per_frame: u32,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorCapabilities {
    pub tilt_min: f64,
    pub tilt_max: f64,
    pub rate_limit_ms: u64,
    pub led_states: Vec<String>,
}

impl Capabilities {
    /// The fixed capability set of this bridge; geometry and rates are
    /// compile-time properties of the device class.
    pub fn current() -> Self {
        Self {
            streams: vec!["color".to_string(), "depth".to_string()],
            color: StreamCapabilities {
                width: FRAME_WIDTH as u32,
                height: FRAME_HEIGHT as u32,
                bytes_per_frame: COLOR_FRAME_BYTES as u32,
                format: "rgb8".to_string(),
            },
            depth: StreamCapabilities {
                width: FRAME_WIDTH as u32,
                height: FRAME_HEIGHT as u32,
                bytes_per_frame: DEPTH_FRAME_BYTES as u32,
                format: "u16le_mm".to_string(),
            },
            frame_rate: FRAME_RATE,
            motor: MotorCapabilities {
                tilt_min: TILT_MIN_DEGREES,
                tilt_max: TILT_MAX_DEGREES,
                rate_limit_ms: MOTOR_RATE_LIMIT_MS,
                led_states: LedState::ALL.iter().map(|l| l.as_wire().to_string()).collect(),
            },
        }
    }
}

/// Parse failure for a client message; always recoverable.
#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
}

/// Parse one client text message. Malformed JSON and unknown `type` both
/// land in the same recoverable error.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError {
        message: e.to_string(),
    })
}

/// Emit one server message. Serialization of these closed types cannot
/// fail, so emit is all-or-nothing by construction.
pub fn emit_server_message(msg: &ServerMessage) -> String {
    serde_json::to_string(msg).expect("server message serialization is infallible")
}

/// Parsed binary frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_id: u32,
    pub stream_type: StreamType,
    pub payload_len: usize,
}

/// Pack a frame into one contiguous buffer: 8-byte header + payload.
pub fn pack_frame(frame_id: u32, stream_type: StreamType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_BYTES + payload.len());
    buf.put_u32_le(frame_id);
    buf.put_u16_le(stream_type.as_u16());
    buf.put_u16_le(0); // reserved
    buf.put_slice(payload);
    buf.freeze()
}

/// Parse the header of a packed frame. Returns `None` for short buffers,
/// unknown stream types, or nonzero reserved bytes.
pub fn parse_frame_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < FRAME_HEADER_BYTES {
        return None;
    }
    let frame_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let stream_type = StreamType::from_u16(u16::from_le_bytes([buf[4], buf[5]]))?;
    if buf[6] != 0 || buf[7] != 0 {
        return None;
    }
    Some(FrameHeader {
        frame_id,
        stream_type,
        payload_len: buf.len() - FRAME_HEADER_BYTES,
    })
}
