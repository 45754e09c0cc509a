//! Cache-to-texture upload.
//!
//! Runs on whichever application thread calls `wait_image`. The frame
//! cache mutex is held only for the copy-out; conversion and the graphics
//! write happen on the caller's time. Conversion buffers are per-session
//! scratch, reused across frames.
//!
//! Color: cached R,G,B bytes become B,G,R,A with alpha forced opaque.
//! Depth: source and destination share the 16-bit layout; rows copy
//! straight through. Swapchains smaller than the sensor crop the top-left
//! region.

use kinect_bridge::device::{COLOR_FRAME_BYTES, DEPTH_FRAME_BYTES, FRAME_WIDTH};
use kinect_bridge::frame_cache::FrameCache;

use crate::graphics::{self, GraphicsContext, SwapchainFormat, SwapchainImage};
use crate::runtime::UploadScratch;

/// Copy the latest cached frame matching `format` into `image`. A cache
/// that has not produced a frame yet leaves the texture untouched.
pub(crate) fn upload_latest(
    cache: &FrameCache,
    graphics: &GraphicsContext,
    scratch: &mut UploadScratch,
    format: SwapchainFormat,
    width: u32,
    height: u32,
    image: &SwapchainImage,
) {
    let width = width as usize;
    let height = height as usize;

    match format {
        SwapchainFormat::Bgra8Unorm => {
            scratch.source.resize(COLOR_FRAME_BYTES, 0);
            if cache.copy_color_into(&mut scratch.source).is_none() {
                return;
            }
            scratch.staging.resize(width * height * 4, 0);
            for y in 0..height {
                for x in 0..width {
                    let s = (y * FRAME_WIDTH + x) * 3;
                    let d = (y * width + x) * 4;
                    scratch.staging[d] = scratch.source[s + 2];
                    scratch.staging[d + 1] = scratch.source[s + 1];
                    scratch.staging[d + 2] = scratch.source[s];
                    scratch.staging[d + 3] = 255;
                }
            }
            graphics::write_image(
                graphics,
                image,
                format,
                width as u32,
                height as u32,
                &scratch.staging,
            );
        }
        SwapchainFormat::Depth16Unorm => {
            scratch.source.resize(DEPTH_FRAME_BYTES, 0);
            if cache.copy_depth_into(&mut scratch.source).is_none() {
                return;
            }
            if width == FRAME_WIDTH {
                graphics::write_image(
                    graphics,
                    image,
                    format,
                    width as u32,
                    height as u32,
                    &scratch.source[..width * height * 2],
                );
            } else {
                scratch.staging.resize(width * height * 2, 0);
                for y in 0..height {
                    let s = y * FRAME_WIDTH * 2;
                    let d = y * width * 2;
                    scratch.staging[d..d + width * 2]
                        .copy_from_slice(&scratch.source[s..s + width * 2]);
                }
                graphics::write_image(
                    graphics,
                    image,
                    format,
                    width as u32,
                    height as u32,
                    &scratch.staging,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless_image(format: SwapchainFormat, width: u32, height: u32) -> SwapchainImage {
        let ctx = GraphicsContext::Headless;
        graphics::allocate_images(&ctx, format, width, height)
            .into_iter()
            .next()
            .unwrap()
    }

    fn image_bytes(image: &SwapchainImage) -> Vec<u8> {
        match image {
            SwapchainImage::Headless(buf) => buf.lock().unwrap().clone(),
            SwapchainImage::Wgpu(_) => unreachable!(),
        }
    }

    #[test]
    fn test_color_conversion_swaps_channels_and_sets_alpha() {
        let cache = FrameCache::new();
        let mut color = vec![0u8; COLOR_FRAME_BYTES];
        // First pixel: R=10, G=20, B=30.
        color[0] = 10;
        color[1] = 20;
        color[2] = 30;
        cache.write_color(&color, 1);

        let ctx = GraphicsContext::Headless;
        let image = headless_image(SwapchainFormat::Bgra8Unorm, 640, 480);
        let mut scratch = UploadScratch::default();
        upload_latest(
            &cache,
            &ctx,
            &mut scratch,
            SwapchainFormat::Bgra8Unorm,
            640,
            480,
            &image,
        );

        let out = image_bytes(&image);
        assert_eq!(&out[..4], &[30, 20, 10, 255]);
        assert_eq!(out.len(), 640 * 480 * 4);
        // Every alpha byte is opaque.
        assert!(out.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_depth_full_frame_passthrough() {
        let cache = FrameCache::new();
        let mut depth = vec![0u8; DEPTH_FRAME_BYTES];
        depth[0] = 0x34;
        depth[1] = 0x12;
        cache.write_depth(&depth, 1);

        let ctx = GraphicsContext::Headless;
        let image = headless_image(SwapchainFormat::Depth16Unorm, 640, 480);
        let mut scratch = UploadScratch::default();
        upload_latest(
            &cache,
            &ctx,
            &mut scratch,
            SwapchainFormat::Depth16Unorm,
            640,
            480,
            &image,
        );

        let out = image_bytes(&image);
        assert_eq!(out[0], 0x34);
        assert_eq!(out[1], 0x12);
        assert_eq!(out.len(), DEPTH_FRAME_BYTES);
    }

    #[test]
    fn test_depth_crop_takes_top_left_rows() {
        let cache = FrameCache::new();
        let mut depth = vec![0u8; DEPTH_FRAME_BYTES];
        // Mark the first pixel of the second sensor row.
        let row1 = FRAME_WIDTH * 2;
        depth[row1] = 0xAB;
        cache.write_depth(&depth, 1);

        let ctx = GraphicsContext::Headless;
        let image = headless_image(SwapchainFormat::Depth16Unorm, 320, 240);
        let mut scratch = UploadScratch::default();
        upload_latest(
            &cache,
            &ctx,
            &mut scratch,
            SwapchainFormat::Depth16Unorm,
            320,
            240,
            &image,
        );

        let out = image_bytes(&image);
        assert_eq!(out.len(), 320 * 240 * 2);
        // Second output row starts at the second sensor row's first pixel.
        assert_eq!(out[320 * 2], 0xAB);
    }

    #[test]
    fn test_empty_cache_leaves_texture_untouched() {
        let cache = FrameCache::new();
        let ctx = GraphicsContext::Headless;
        let image = headless_image(SwapchainFormat::Bgra8Unorm, 640, 480);
        let mut scratch = UploadScratch::default();
        upload_latest(
            &cache,
            &ctx,
            &mut scratch,
            SwapchainFormat::Bgra8Unorm,
            640,
            480,
            &image,
        );
        assert!(image_bytes(&image).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scratch_buffers_are_reused() {
        let cache = FrameCache::new();
        cache.write_depth(&vec![1u8; DEPTH_FRAME_BYTES], 1);
        let ctx = GraphicsContext::Headless;
        let image = headless_image(SwapchainFormat::Depth16Unorm, 640, 480);
        let mut scratch = UploadScratch::default();
        for _ in 0..3 {
            upload_latest(
                &cache,
                &ctx,
                &mut scratch,
                SwapchainFormat::Depth16Unorm,
                640,
                480,
                &image,
            );
        }
        assert_eq!(scratch.source.len(), DEPTH_FRAME_BYTES);
    }
}
