//! Loader-facing C ABI for the runtime.
//!
//! Everything the loader and the application touch crosses this boundary:
//! opaque handles, result codes, and `#[repr(C)]` input/output structs.
//! Every chained struct leads with a structure-type tag and a `next`
//! pointer so extension structs can be discovered by walking the chain.
//!
//! Handles are process-unique non-null integers cast to opaque pointers on
//! the C side; they are never reused within a process lifetime.

use std::os::raw::c_void;

/// Opaque instance handle.
pub type XrInstance = u64;
/// Opaque system identifier.
pub type XrSystemId = u64;
/// Opaque session handle.
pub type XrSession = u64;
/// Opaque space handle.
pub type XrSpace = u64;
/// Opaque swapchain handle.
pub type XrSwapchain = u64;

/// 32-bit boolean as used across the ABI.
pub type XrBool32 = u32;
/// Nanosecond timestamp on the runtime's monotonic clock.
pub type XrTime = i64;
/// Nanosecond duration.
pub type XrDuration = i64;

pub const XR_TRUE: XrBool32 = 1;
pub const XR_FALSE: XrBool32 = 0;
pub const XR_NULL_HANDLE: u64 = 0;

/// Runtime API version: major in the top 16 bits, minor in the next 16,
/// patch in the low 32.
pub const fn make_api_version(major: u16, minor: u16, patch: u32) -> u64 {
    ((major as u64) << 48) | ((minor as u64) << 32) | patch as u64
}

pub const fn api_version_major(version: u64) -> u16 {
    (version >> 48) as u16
}

/// The API version this runtime implements.
pub const XR_CURRENT_API_VERSION: u64 = make_api_version(1, 0, 0);

pub const MAX_APPLICATION_NAME_SIZE: usize = 128;
pub const MAX_ENGINE_NAME_SIZE: usize = 128;
pub const MAX_RUNTIME_NAME_SIZE: usize = 128;
pub const MAX_SYSTEM_NAME_SIZE: usize = 256;
pub const MAX_EXTENSION_NAME_SIZE: usize = 128;
pub const MAX_API_LAYER_NAME_SIZE: usize = 256;
pub const MAX_API_LAYER_DESCRIPTION_SIZE: usize = 256;

/// Depth-layer composition extension name.
pub const EXT_COMPOSITION_LAYER_DEPTH: &str = "XR_KHR_composition_layer_depth";
/// Host-graphics enablement extension name.
pub const EXT_GRAPHICS_BINDING: &str = "XR_KINECT_graphics_binding";

/// Entry-point result codes. Zero is success, negative values are errors,
/// positive values are informational.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrResult {
    Success = 0,
    /// No event was available to poll. Informational, not an error.
    EventUnavailable = 1,
    ErrorValidationFailure = -1,
    ErrorRuntimeFailure = -2,
    ErrorHandleInvalid = -3,
    ErrorApiVersionUnsupported = -4,
    ErrorExtensionNotPresent = -5,
    ErrorFormFactorUnsupported = -6,
    ErrorSystemInvalid = -7,
    ErrorGraphicsDeviceInvalid = -8,
    ErrorLimitReached = -9,
    ErrorSessionNotReady = -10,
    ErrorSessionRunning = -11,
    ErrorSessionNotRunning = -12,
    ErrorViewConfigurationTypeUnsupported = -13,
    ErrorReferenceSpaceUnsupported = -14,
    ErrorSwapchainFormatUnsupported = -15,
    ErrorFeatureUnsupported = -16,
    ErrorSizeInsufficient = -17,
    ErrorCallOrderInvalid = -18,
    ErrorEnvironmentBlendModeUnsupported = -19,
}

impl XrResult {
    pub fn is_success(self) -> bool {
        self as i32 >= 0
    }
}

/// Structure-type tags carried in the leading `ty` field of every struct.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrStructureType {
    Unknown = 0,
    InstanceCreateInfo = 1,
    InstanceProperties = 2,
    SystemGetInfo = 3,
    SystemProperties = 4,
    SessionCreateInfo = 5,
    GraphicsBindingKinect = 6,
    SessionBeginInfo = 7,
    EventDataBuffer = 8,
    EventDataSessionStateChanged = 9,
    ReferenceSpaceCreateInfo = 10,
    SwapchainCreateInfo = 11,
    FrameWaitInfo = 12,
    FrameState = 13,
    FrameBeginInfo = 14,
    FrameEndInfo = 15,
    ViewLocateInfo = 16,
    ViewState = 17,
    View = 18,
    CompositionLayerProjection = 19,
    CompositionLayerDepthInfo = 20,
    ExtensionProperties = 21,
    ApiLayerProperties = 22,
}

/// Device form factors an application can ask for.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrFormFactor {
    HeadMountedDisplay = 1,
    HandheldDisplay = 2,
}

/// View configurations; only mono is implemented.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrViewConfigurationType {
    PrimaryMono = 1,
    PrimaryStereo = 2,
}

/// Reference space flavors; all are identity for a stationary camera.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XrReferenceSpaceType {
    View = 1,
    Local = 2,
    Stage = 3,
    LocalFloor = 4,
}

/// Environment blend modes; the camera composites opaquely.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrEnvironmentBlendMode {
    Opaque = 1,
    Additive = 2,
    AlphaBlend = 3,
}

/// Session lifecycle states, in the order the machine traverses them.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrSessionState {
    Unknown = 0,
    Idle = 1,
    Ready = 2,
    Synchronized = 3,
    Visible = 4,
    Focused = 5,
    Stopping = 6,
}

/// Swapchain format tokens. The runtime enumerates exactly these two.
pub const SWAPCHAIN_FORMAT_BGRA8_UNORM: i64 = 1;
pub const SWAPCHAIN_FORMAT_D16_UNORM: i64 = 2;

/// Swapchain usage flag bits.
pub const SWAPCHAIN_USAGE_COLOR_ATTACHMENT: u64 = 0x01;
pub const SWAPCHAIN_USAGE_DEPTH_STENCIL_ATTACHMENT: u64 = 0x02;
pub const SWAPCHAIN_USAGE_TRANSFER_DST: u64 = 0x04;
pub const SWAPCHAIN_USAGE_SAMPLED: u64 = 0x08;

/// View state flag bits returned by `locate_views`.
pub const VIEW_STATE_ORIENTATION_VALID: u64 = 0x01;
pub const VIEW_STATE_POSITION_VALID: u64 = 0x02;
pub const VIEW_STATE_ORIENTATION_TRACKED: u64 = 0x04;
pub const VIEW_STATE_POSITION_TRACKED: u64 = 0x08;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrQuaternionf {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrVector3f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrPosef {
    pub orientation: XrQuaternionf,
    pub position: XrVector3f,
}

impl XrPosef {
    pub const IDENTITY: XrPosef = XrPosef {
        orientation: XrQuaternionf {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        },
        position: XrVector3f {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        },
    };
}

/// Field of view half-angles in radians; left and down are negative.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XrFovf {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct XrApplicationInfo {
    pub application_name: [u8; MAX_APPLICATION_NAME_SIZE],
    pub application_version: u32,
    pub engine_name: [u8; MAX_ENGINE_NAME_SIZE],
    pub engine_version: u32,
    pub api_version: u64,
}

#[repr(C)]
pub struct XrInstanceCreateInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub application_info: XrApplicationInfo,
    pub enabled_extension_count: u32,
    pub enabled_extension_names: *const *const std::os::raw::c_char,
}

#[repr(C)]
pub struct XrInstanceProperties {
    pub ty: XrStructureType,
    pub next: *mut c_void,
    pub runtime_version: u64,
    pub runtime_name: [u8; MAX_RUNTIME_NAME_SIZE],
}

#[repr(C)]
pub struct XrSystemGetInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub form_factor: XrFormFactor,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XrSystemGraphicsProperties {
    pub max_swapchain_image_width: u32,
    pub max_swapchain_image_height: u32,
    pub max_layer_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XrSystemTrackingProperties {
    pub orientation_tracking: XrBool32,
    pub position_tracking: XrBool32,
}

#[repr(C)]
pub struct XrSystemProperties {
    pub ty: XrStructureType,
    pub next: *mut c_void,
    pub system_id: XrSystemId,
    pub vendor_id: u32,
    pub system_name: [u8; MAX_SYSTEM_NAME_SIZE],
    pub graphics_properties: XrSystemGraphicsProperties,
    pub tracking_properties: XrSystemTrackingProperties,
}

#[repr(C)]
pub struct XrSessionCreateInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub create_flags: u64,
    pub system_id: XrSystemId,
}

/// Host-graphics binding, chained from [`XrSessionCreateInfo::next`].
/// `device` points at a [`crate::graphics::GraphicsDevice`] owned by the
/// application; the runtime copies what it needs during session creation.
#[repr(C)]
pub struct XrGraphicsBindingKinect {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub device: *const c_void,
}

#[repr(C)]
pub struct XrSessionBeginInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub primary_view_configuration_type: XrViewConfigurationType,
}

/// Event output buffer; the runtime overwrites it with the concrete event
/// struct, tag included.
#[repr(C)]
pub struct XrEventDataBuffer {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub varying: [u8; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XrEventDataSessionStateChanged {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub session: XrSession,
    pub state: XrSessionState,
    pub time: XrTime,
}

#[repr(C)]
pub struct XrReferenceSpaceCreateInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub reference_space_type: XrReferenceSpaceType,
    pub pose_in_reference_space: XrPosef,
}

#[repr(C)]
pub struct XrSwapchainCreateInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub create_flags: u64,
    pub usage_flags: u64,
    pub format: i64,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

#[repr(C)]
pub struct XrFrameWaitInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
}

#[repr(C)]
pub struct XrFrameState {
    pub ty: XrStructureType,
    pub next: *mut c_void,
    pub predicted_display_time: XrTime,
    pub predicted_display_period: XrDuration,
    pub should_render: XrBool32,
}

#[repr(C)]
pub struct XrFrameBeginInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
}

/// Common prefix of every composition layer struct.
#[repr(C)]
pub struct XrCompositionLayerBaseHeader {
    pub ty: XrStructureType,
    pub next: *const c_void,
}

#[repr(C)]
pub struct XrCompositionLayerProjection {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub layer_flags: u64,
    pub space: XrSpace,
    pub view_count: u32,
    pub views: *const c_void,
}

/// Depth-layer extension struct, chained from a projection layer. Depth
/// range fields are recorded, not transformed; normalization stays with
/// the application's projection.
#[repr(C)]
pub struct XrCompositionLayerDepthInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub swapchain: XrSwapchain,
    pub min_depth: f32,
    pub max_depth: f32,
    pub near_z: f32,
    pub far_z: f32,
}

#[repr(C)]
pub struct XrFrameEndInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub display_time: XrTime,
    pub environment_blend_mode: XrEnvironmentBlendMode,
    pub layer_count: u32,
    pub layers: *const *const XrCompositionLayerBaseHeader,
}

#[repr(C)]
pub struct XrViewLocateInfo {
    pub ty: XrStructureType,
    pub next: *const c_void,
    pub view_configuration_type: XrViewConfigurationType,
    pub display_time: XrTime,
    pub space: XrSpace,
}

#[repr(C)]
pub struct XrViewState {
    pub ty: XrStructureType,
    pub next: *mut c_void,
    pub view_state_flags: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XrView {
    pub ty: XrStructureType,
    pub next: *mut c_void,
    pub pose: XrPosef,
    pub fov: XrFovf,
}

#[repr(C)]
pub struct XrExtensionProperties {
    pub ty: XrStructureType,
    pub next: *mut c_void,
    pub extension_name: [u8; MAX_EXTENSION_NAME_SIZE],
    pub extension_version: u32,
}

#[repr(C)]
pub struct XrApiLayerProperties {
    pub ty: XrStructureType,
    pub next: *mut c_void,
    pub layer_name: [u8; MAX_API_LAYER_NAME_SIZE],
    pub spec_version: u64,
    pub layer_version: u32,
    pub description: [u8; MAX_API_LAYER_DESCRIPTION_SIZE],
}

/// Generic entry-point pointer handed back by `get_instance_proc_addr`.
pub type XrVoidFunction = Option<unsafe extern "C" fn()>;

/// Copy a `&str` into a fixed-size NUL-terminated char array.
pub fn write_fixed_string(dst: &mut [u8], src: &str) {
    let len = src.len().min(dst.len() - 1);
    dst[..len].copy_from_slice(&src.as_bytes()[..len]);
    dst[len..].iter_mut().for_each(|b| *b = 0);
}

/// Read a NUL-terminated fixed-size char array back into a `&str`.
pub fn read_fixed_string(src: &[u8]) -> &str {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    std::str::from_utf8(&src[..end]).unwrap_or("")
}
