//! Swapchains.
//!
//! Fixed triple buffering over externally owned textures. At most one
//! image may be acquired per swapchain at a time; `wait_image` is where
//! the latest cached camera frame lands in the acquired texture. There is
//! no GPU fence to wait on (the camera produces pixels asynchronously and
//! the host graphics API owns flush semantics), so the wait returns as
//! soon as the upload is issued.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::abi::{
    XrResult, XrSession, XrStructureType, XrSwapchain, XrSwapchainCreateInfo,
    SWAPCHAIN_USAGE_COLOR_ATTACHMENT, SWAPCHAIN_USAGE_DEPTH_STENCIL_ATTACHMENT,
};
use crate::graphics::{allocate_images, SwapchainFormat};
use crate::runtime::{
    allocate_handle, lookup_session, lookup_swapchain, AcquireState, SwapchainData, SWAPCHAINS,
};
use crate::upload::upload_latest;

/// Formats reported by the enumerate entry point, preference order.
pub(crate) const SUPPORTED_FORMATS: [SwapchainFormat; 2] =
    [SwapchainFormat::Bgra8Unorm, SwapchainFormat::Depth16Unorm];

pub(crate) fn create_swapchain(
    session: XrSession,
    info: &XrSwapchainCreateInfo,
    out: &mut XrSwapchain,
) -> XrResult {
    if info.ty != XrStructureType::SwapchainCreateInfo {
        return XrResult::ErrorValidationFailure;
    }
    let Some(session_data) = lookup_session(session) else {
        return XrResult::ErrorHandleInvalid;
    };
    let Some(format) = SwapchainFormat::from_token(info.format) else {
        return XrResult::ErrorSwapchainFormatUnsupported;
    };

    if info.width == 0 || info.width > 640 || info.height == 0 || info.height > 480 {
        return XrResult::ErrorValidationFailure;
    }
    if info.sample_count != 1
        || info.array_size != 1
        || info.face_count != 1
        || info.mip_count != 1
    {
        return XrResult::ErrorValidationFailure;
    }
    // Usage must match the format: render targets for color, depth
    // attachment for depth.
    let required = if format.is_depth() {
        SWAPCHAIN_USAGE_DEPTH_STENCIL_ATTACHMENT
    } else {
        SWAPCHAIN_USAGE_COLOR_ATTACHMENT
    };
    if info.usage_flags & required == 0 {
        return XrResult::ErrorValidationFailure;
    }

    let images = allocate_images(&session_data.graphics, format, info.width, info.height);
    let handle = allocate_handle();
    SWAPCHAINS.lock().unwrap().insert(
        handle,
        Arc::new(SwapchainData {
            session,
            format,
            width: info.width,
            height: info.height,
            images,
            acquire: Mutex::new(AcquireState {
                next_index: 0,
                acquired: false,
                current: 0,
            }),
        }),
    );
    debug!(
        handle,
        ?format,
        width = info.width,
        height = info.height,
        "swapchain created"
    );
    *out = handle;
    XrResult::Success
}

pub(crate) fn destroy_swapchain(swapchain: XrSwapchain) -> XrResult {
    if SWAPCHAINS.lock().unwrap().remove(&swapchain).is_none() {
        return XrResult::ErrorHandleInvalid;
    }
    XrResult::Success
}

/// Hand out the current image index and advance cyclically. At most one
/// image may be in flight per swapchain.
pub(crate) fn acquire_image(swapchain: XrSwapchain, out: &mut u32) -> XrResult {
    let Some(data) = lookup_swapchain(swapchain) else {
        return XrResult::ErrorHandleInvalid;
    };
    let mut acquire = data.acquire.lock().unwrap();
    if acquire.acquired {
        return XrResult::ErrorCallOrderInvalid;
    }
    acquire.current = acquire.next_index;
    acquire.next_index = (acquire.next_index + 1) % data.images.len() as u32;
    acquire.acquired = true;
    *out = acquire.current;
    XrResult::Success
}

/// Upload the latest cached frame into the acquired image. Returns
/// immediately once the upload is issued.
pub(crate) fn wait_image(swapchain: XrSwapchain) -> XrResult {
    let Some(data) = lookup_swapchain(swapchain) else {
        return XrResult::ErrorHandleInvalid;
    };
    let Some(session_data) = lookup_session(data.session) else {
        return XrResult::ErrorHandleInvalid;
    };
    let current = {
        let acquire = data.acquire.lock().unwrap();
        if !acquire.acquired {
            return XrResult::ErrorCallOrderInvalid;
        }
        acquire.current as usize
    };

    let mut scratch = session_data.scratch.lock().unwrap();
    upload_latest(
        &session_data.cache,
        &session_data.graphics,
        &mut scratch,
        data.format,
        data.width,
        data.height,
        &data.images[current],
    );
    XrResult::Success
}

pub(crate) fn release_image(swapchain: XrSwapchain) -> XrResult {
    let Some(data) = lookup_swapchain(swapchain) else {
        return XrResult::ErrorHandleInvalid;
    };
    let mut acquire = data.acquire.lock().unwrap();
    if !acquire.acquired {
        return XrResult::ErrorCallOrderInvalid;
    }
    acquire.acquired = false;
    XrResult::Success
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::abi::{
        SWAPCHAIN_FORMAT_BGRA8_UNORM, SWAPCHAIN_FORMAT_D16_UNORM,
        SWAPCHAIN_USAGE_TRANSFER_DST,
    };

    pub fn color_create_info(width: u32, height: u32) -> XrSwapchainCreateInfo {
        XrSwapchainCreateInfo {
            ty: XrStructureType::SwapchainCreateInfo,
            next: std::ptr::null(),
            create_flags: 0,
            usage_flags: SWAPCHAIN_USAGE_COLOR_ATTACHMENT | SWAPCHAIN_USAGE_TRANSFER_DST,
            format: SWAPCHAIN_FORMAT_BGRA8_UNORM,
            sample_count: 1,
            width,
            height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        }
    }

    pub fn depth_create_info(width: u32, height: u32) -> XrSwapchainCreateInfo {
        XrSwapchainCreateInfo {
            usage_flags: SWAPCHAIN_USAGE_DEPTH_STENCIL_ATTACHMENT,
            format: SWAPCHAIN_FORMAT_D16_UNORM,
            ..color_create_info(width, height)
        }
    }
}
