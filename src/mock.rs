//! Synthetic frame generation for running without hardware.
//!
//! Frames are pure functions of the frame id, so a disconnected test run
//! and a CI run observe byte-identical streams. The bridge broadcaster
//! calls the synth functions directly each tick; XR sessions without a
//! device run a [`MockStream`] thread that feeds a frame cache at the
//! camera's native rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::device::{
    COLOR_FRAME_BYTES, DEPTH_FRAME_BYTES, FRAME_HEIGHT, FRAME_INTERVAL_MS, FRAME_WIDTH,
};
use crate::frame_cache::FrameCache;

/// Device timestamp for a synthetic frame: milliseconds at 30 Hz.
pub fn synth_timestamp(frame_id: u32) -> u32 {
    frame_id.wrapping_mul(FRAME_INTERVAL_MS as u32)
}

/// Synthesize a packed RGB color frame: horizontal and vertical gradients
/// with a phase that advances per frame, so motion is visible.
pub fn synth_color(frame_id: u32) -> Vec<u8> {
    let mut data = vec![0u8; COLOR_FRAME_BYTES];
    let phase = (frame_id % 256) as u32;
    for y in 0..FRAME_HEIGHT {
        let g = (y * 255 / (FRAME_HEIGHT - 1)) as u8;
        for x in 0..FRAME_WIDTH {
            let i = (y * FRAME_WIDTH + x) * 3;
            data[i] = ((x as u32 * 255 / (FRAME_WIDTH as u32 - 1) + phase) % 256) as u8;
            data[i + 1] = g;
            data[i + 2] = phase as u8;
        }
    }
    data
}

/// Synthesize a little-endian u16 depth frame: a sweeping ramp in valid
/// millimeter range, with a "no return" hole in the corner to exercise
/// zero handling.
pub fn synth_depth(frame_id: u32) -> Vec<u8> {
    let mut data = vec![0u8; DEPTH_FRAME_BYTES];
    let phase = (frame_id as usize) * 8;
    for y in 0..FRAME_HEIGHT {
        for x in 0..FRAME_WIDTH {
            let mm: u16 = if x < 32 && y < 32 {
                0
            } else {
                (500 + (x + y + phase) % 2000) as u16
            };
            let i = (y * FRAME_WIDTH + x) * 2;
            data[i..i + 2].copy_from_slice(&mm.to_le_bytes());
        }
    }
    data
}

/// Background producer that writes synthetic frames into a cache at 30 Hz.
/// Stands in for the device session when no hardware is attached.
pub struct MockStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockStream {
    /// Spawn the producer thread. Frames begin arriving immediately.
    pub fn start(cache: Arc<FrameCache>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::spawn(move || {
            debug!("mock stream started");
            let interval = Duration::from_millis(FRAME_INTERVAL_MS);
            let mut next = Instant::now() + interval;
            let mut frame_id = cache.frame_id();
            while flag.load(Ordering::Relaxed) {
                frame_id = frame_id.wrapping_add(1);
                let ts = synth_timestamp(frame_id);
                cache.write_color(&synth_color(frame_id), ts);
                cache.write_depth(&synth_depth(frame_id), ts);
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                    next += interval;
                } else {
                    next = now + interval;
                }
            }
            debug!("mock stream stopped");
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Stop the producer and join its thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stop();
    }
}
