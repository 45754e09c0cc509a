//! Host-graphics seam.
//!
//! The runtime does not own a GPU; the application hands one in through
//! the graphics binding at session creation. Swapchain images are either
//! wgpu textures on that device or plain CPU buffers (`Headless`), which
//! back tests and GPU-less hosts with identical semantics.

use std::sync::Mutex;

use crate::abi::{SWAPCHAIN_FORMAT_BGRA8_UNORM, SWAPCHAIN_FORMAT_D16_UNORM};

/// Application-owned graphics device passed through the session binding.
pub enum GraphicsDevice {
    Wgpu {
        device: wgpu::Device,
        queue: wgpu::Queue,
    },
    /// CPU-backed textures; uploads become buffer copies.
    Headless,
}

/// Session-owned copy of what the runtime needs from the binding.
pub(crate) enum GraphicsContext {
    Wgpu {
        device: wgpu::Device,
        queue: wgpu::Queue,
    },
    Headless,
}

impl GraphicsContext {
    pub(crate) fn from_binding(binding: &GraphicsDevice) -> Self {
        match binding {
            GraphicsDevice::Wgpu { device, queue } => GraphicsContext::Wgpu {
                device: device.clone(),
                queue: queue.clone(),
            },
            GraphicsDevice::Headless => GraphicsContext::Headless,
        }
    }
}

/// Swapchain pixel formats the runtime supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainFormat {
    Bgra8Unorm,
    Depth16Unorm,
}

impl SwapchainFormat {
    pub fn from_token(token: i64) -> Option<Self> {
        match token {
            SWAPCHAIN_FORMAT_BGRA8_UNORM => Some(SwapchainFormat::Bgra8Unorm),
            SWAPCHAIN_FORMAT_D16_UNORM => Some(SwapchainFormat::Depth16Unorm),
            _ => None,
        }
    }

    pub fn token(self) -> i64 {
        match self {
            SwapchainFormat::Bgra8Unorm => SWAPCHAIN_FORMAT_BGRA8_UNORM,
            SwapchainFormat::Depth16Unorm => SWAPCHAIN_FORMAT_D16_UNORM,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            SwapchainFormat::Bgra8Unorm => 4,
            SwapchainFormat::Depth16Unorm => 2,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, SwapchainFormat::Depth16Unorm)
    }

    fn wgpu_format(self) -> wgpu::TextureFormat {
        match self {
            SwapchainFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            SwapchainFormat::Depth16Unorm => wgpu::TextureFormat::Depth16Unorm,
        }
    }
}

/// One swapchain image: an external texture owned by the host graphics
/// API, or its CPU stand-in.
pub enum SwapchainImage {
    Wgpu(wgpu::Texture),
    Headless(Mutex<Vec<u8>>),
}

/// Allocate the fixed triple-buffered image set for one swapchain.
pub(crate) fn allocate_images(
    ctx: &GraphicsContext,
    format: SwapchainFormat,
    width: u32,
    height: u32,
) -> Vec<SwapchainImage> {
    (0..3)
        .map(|index| match ctx {
            GraphicsContext::Wgpu { device, .. } => {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("kinect-swapchain-{index}")),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: format.wgpu_format(),
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                SwapchainImage::Wgpu(texture)
            }
            GraphicsContext::Headless => SwapchainImage::Headless(Mutex::new(vec![
                0u8;
                width as usize * height as usize * format.bytes_per_pixel()
            ])),
        })
        .collect()
}

/// Write one full image worth of pixels into a swapchain texture. `data`
/// is tightly packed rows in the image's format.
pub(crate) fn write_image(
    ctx: &GraphicsContext,
    image: &SwapchainImage,
    format: SwapchainFormat,
    width: u32,
    height: u32,
    data: &[u8],
) {
    match (ctx, image) {
        (GraphicsContext::Wgpu { queue, .. }, SwapchainImage::Wgpu(texture)) => {
            queue.write_texture(
                texture.as_image_copy(),
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * format.bytes_per_pixel() as u32),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
        (GraphicsContext::Headless, SwapchainImage::Headless(buffer)) => {
            let mut buffer = buffer.lock().unwrap();
            buffer.copy_from_slice(data);
        }
        // A swapchain's images always come from its session's context, so
        // the variants cannot disagree.
        _ => unreachable!("swapchain image does not match its graphics context"),
    }
}
