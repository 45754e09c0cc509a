//! Latest-value frame cache shared between the driver callbacks and every
//! consumer (broadcaster, XR texture upload).
//!
//! One mutex covers both frames. Writers overwrite in place; there is no
//! queueing, since a 30 Hz real-time feed is better served by latest-value
//! than by a queue a slow consumer can never drain. Depth is the
//! authoritative clock: `frame_id` advances only when depth is refreshed.

use std::sync::Mutex;

use crate::device::{COLOR_FRAME_BYTES, DEPTH_FRAME_BYTES};

struct CacheInner {
    color: Box<[u8]>,
    color_timestamp: u32,
    color_valid: bool,
    depth: Box<[u8]>,
    depth_timestamp: u32,
    depth_valid: bool,
    frame_id: u32,
}

/// Single-writer-per-stream, multi-reader store of the most recent color
/// and depth frames. Critical sections are bounded by a fixed-size copy
/// plus a few scalar writes; consumers must copy out and release before
/// doing any I/O, which [`FrameCache::snapshot`] enforces by construction.
pub struct FrameCache {
    inner: Mutex<CacheInner>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                color: vec![0u8; COLOR_FRAME_BYTES].into_boxed_slice(),
                color_timestamp: 0,
                color_valid: false,
                depth: vec![0u8; DEPTH_FRAME_BYTES].into_boxed_slice(),
                depth_timestamp: 0,
                depth_valid: false,
                frame_id: 0,
            }),
        }
    }

    /// Overwrite the cached color frame. `data` must be exactly one packed
    /// RGB frame; anything else is a driver desync and is dropped.
    pub fn write_color(&self, data: &[u8], timestamp: u32) {
        if data.len() != COLOR_FRAME_BYTES {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.color.copy_from_slice(data);
        inner.color_timestamp = timestamp;
        inner.color_valid = true;
    }

    /// Overwrite the cached depth frame and advance `frame_id`. `data` is
    /// the raw little-endian u16 millimeter buffer.
    pub fn write_depth(&self, data: &[u8], timestamp: u32) {
        if data.len() != DEPTH_FRAME_BYTES {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.depth.copy_from_slice(data);
        inner.depth_timestamp = timestamp;
        inner.depth_valid = true;
        inner.frame_id = inner.frame_id.wrapping_add(1);
    }

    /// Copy the whole cache out under the lock. The returned snapshot owns
    /// its buffers, so callers never hold the mutex across I/O.
    pub fn snapshot(&self) -> CacheSnapshot {
        let inner = self.inner.lock().unwrap();
        CacheSnapshot {
            color: inner.color_valid.then(|| CachedFrame {
                data: inner.color.to_vec(),
                timestamp: inner.color_timestamp,
            }),
            depth: inner.depth_valid.then(|| CachedFrame {
                data: inner.depth.to_vec(),
                timestamp: inner.depth_timestamp,
            }),
            frame_id: inner.frame_id,
        }
    }

    /// Copy the latest color frame into `out` if valid. Returns the device
    /// timestamp on success.
    pub fn copy_color_into(&self, out: &mut [u8]) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        if !inner.color_valid || out.len() != COLOR_FRAME_BYTES {
            return None;
        }
        out.copy_from_slice(&inner.color);
        Some(inner.color_timestamp)
    }

    /// Copy the latest depth frame into `out` if valid. Returns the device
    /// timestamp on success.
    pub fn copy_depth_into(&self, out: &mut [u8]) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        if !inner.depth_valid || out.len() != DEPTH_FRAME_BYTES {
            return None;
        }
        out.copy_from_slice(&inner.depth);
        Some(inner.depth_timestamp)
    }

    /// Current frame id without copying any pixels.
    pub fn frame_id(&self) -> u32 {
        self.inner.lock().unwrap().frame_id
    }

    /// Whether a valid depth frame has ever been written.
    pub fn depth_valid(&self) -> bool {
        self.inner.lock().unwrap().depth_valid
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

/// One frame copied out of the cache.
pub struct CachedFrame {
    pub data: Vec<u8>,
    pub timestamp: u32,
}

/// Owned copy of the cache contents at one instant.
pub struct CacheSnapshot {
    pub color: Option<CachedFrame>,
    pub depth: Option<CachedFrame>,
    pub frame_id: u32,
}
