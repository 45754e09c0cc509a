//! XR runtime backed by a Kinect-class depth camera.
//!
//! Built as a `cdylib` the loader discovers through the manifest in
//! [`manifest`] (or the `XR_RUNTIME_JSON` override) and drives through
//! [`entry::xr_get_instance_proc_addr`]. The camera presents as a
//! stationary head-mounted system with one 640x480 mono view; sessions
//! pull frames from the shared cache in `kinect-bridge` and hand them to
//! the application through swapchain textures.
//!
//! Object state is process-wide (the loader contract is global function
//! pointers): handle tables live in [`runtime`], one mutex per kind,
//! with handles never reused within a process lifetime.

pub mod abi;
pub mod entry;
pub mod graphics;
pub mod manifest;

mod events;
mod frame;
mod instance;
mod runtime;
mod session;
mod space;
mod swapchain;
mod upload;

pub use instance::{RUNTIME_NAME, SYSTEM_NAME};
