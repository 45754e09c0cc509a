//! Real-time bridge from a Kinect-class structured-light depth camera to
//! WebSocket clients, plus the shared plumbing (device session, frame
//! cache, protocol codec) the embedded XR runtime builds on.
//!
//! The library is usable without hardware: mock mode synthesizes
//! deterministic frames, and the `freenect` feature gates everything that
//! needs libfreenect on the host.
//!
//! # Example
//!
//! ```rust,no_run
//! use kinect_bridge::bridge_server::BridgeServer;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut server = BridgeServer::new_mock();
//! server.start(8765).await?;
//! // ... serve until shutdown ...
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge_server;
pub mod device;
pub mod frame_cache;
pub mod mock;
pub mod protocol;

#[cfg(feature = "freenect")]
pub mod kinect;

pub use bridge_server::BridgeServer;
pub use frame_cache::FrameCache;
