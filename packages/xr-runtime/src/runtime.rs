//! Process-wide runtime state.
//!
//! The loader contract is global function pointers, so the object tables
//! live in process scope: one table per handle kind, each behind its own
//! mutex, plus a single allocator shared by every kind so no handle value
//! is ever returned twice. Lock order, when nesting is unavoidable, is
//! instance -> session -> space -> swapchain; tables are never acquired in
//! a cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;

use kinect_bridge::frame_cache::FrameCache;

use crate::abi::{
    XrInstance, XrReferenceSpaceType, XrSession, XrSessionState, XrSpace, XrSwapchain,
    XrSystemId, XrTime,
};
use crate::events::EventQueue;
use crate::graphics::{GraphicsContext, SwapchainFormat, SwapchainImage};
use crate::session::FrameSource;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique handle. Shared across every handle kind;
/// never reused.
pub(crate) fn allocate_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Monotonic clock origin for every `XrTime` this runtime reports.
static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Current runtime time in nanoseconds.
pub(crate) fn now_ns() -> XrTime {
    EPOCH.elapsed().as_nanos() as XrTime
}

pub(crate) static INSTANCES: LazyLock<Mutex<HashMap<XrInstance, Arc<InstanceData>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
pub(crate) static SESSIONS: LazyLock<Mutex<HashMap<XrSession, Arc<SessionData>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
pub(crate) static SPACES: LazyLock<Mutex<HashMap<XrSpace, Arc<SpaceData>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
pub(crate) static SWAPCHAINS: LazyLock<Mutex<HashMap<XrSwapchain, Arc<SwapchainData>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Per-instance record: application info, the lazy system singleton, the
/// session singleton slot, and the event queue.
pub(crate) struct InstanceData {
    pub application_name: String,
    pub enabled_extensions: Vec<String>,
    pub system: Mutex<Option<XrSystemId>>,
    pub session: Mutex<Option<XrSession>>,
    pub events: EventQueue,
}

/// Pacing record for one session's frame loop. `frame_in_progress` is true
/// strictly between begin-frame and end-frame.
pub(crate) struct FrameTiming {
    pub frame_in_progress: bool,
    pub last_wait: Option<Instant>,
    pub last_display_time: XrTime,
    pub frame_count: u64,
}

/// Reusable conversion buffers for texture upload, one set per session:
/// `source` receives the cache copy, `staging` the converted/cropped rows.
#[derive(Default)]
pub(crate) struct UploadScratch {
    pub source: Vec<u8>,
    pub staging: Vec<u8>,
}

pub(crate) struct SessionData {
    pub instance: XrInstance,
    pub state: Mutex<XrSessionState>,
    pub graphics: GraphicsContext,
    pub cache: Arc<FrameCache>,
    pub source: Mutex<Option<FrameSource>>,
    pub timing: Mutex<FrameTiming>,
    pub scratch: Mutex<UploadScratch>,
}

pub(crate) struct SpaceData {
    pub session: XrSession,
    pub space_type: XrReferenceSpaceType,
}

pub(crate) struct AcquireState {
    pub next_index: u32,
    pub acquired: bool,
    pub current: u32,
}

pub(crate) struct SwapchainData {
    pub session: XrSession,
    pub format: SwapchainFormat,
    pub width: u32,
    pub height: u32,
    pub images: Vec<SwapchainImage>,
    pub acquire: Mutex<AcquireState>,
}

pub(crate) fn lookup_instance(handle: XrInstance) -> Option<Arc<InstanceData>> {
    INSTANCES.lock().unwrap().get(&handle).cloned()
}

pub(crate) fn lookup_session(handle: XrSession) -> Option<Arc<SessionData>> {
    SESSIONS.lock().unwrap().get(&handle).cloned()
}

pub(crate) fn lookup_space(handle: XrSpace) -> Option<Arc<SpaceData>> {
    SPACES.lock().unwrap().get(&handle).cloned()
}

pub(crate) fn lookup_swapchain(handle: XrSwapchain) -> Option<Arc<SwapchainData>> {
    SWAPCHAINS.lock().unwrap().get(&handle).cloned()
}
