use image::{ColorType, GenericImageView};
use std::path::Path;

use crate::transient::PixelBuffer;

/// 解码结果，像素总是 4 通道且行紧密排列
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// 为 true 时像素是 `PixelBuffer::Float32`
    pub is_hdr: bool,
    pub pixels: PixelBuffer,
}

/// 图片解码接口，运行在 disk worker 上
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedImage>;
}

/// 基于 `image` crate 的默认解码器
///
/// 浮点源 (hdr / exr 等) 解码为 RGBA32F，其余统一转为 RGBA8
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;
impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedImage> {
        let _span = tracy_client::span!("ImageCrateDecoder::decode");

        let img = image::open(path)?;
        let (width, height) = img.dimensions();
        let is_hdr = matches!(img.color(), ColorType::Rgb32F | ColorType::Rgba32F);

        let pixels = if is_hdr {
            PixelBuffer::Float32(img.into_rgba32f().into_raw())
        } else {
            PixelBuffer::Unorm8(img.into_rgba8().into_raw())
        };

        Ok(DecodedImage {
            width,
            height,
            is_hdr,
            pixels,
        })
    }
}
