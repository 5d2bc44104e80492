//! mip 生成阶段 (mip worker)
//!
//! 每一级由上一级 2x2 降采样得到，奇数边缘 clamp 采样坐标：
//! - 8-bit RGBA/BGRA: 每通道取平均 (四舍五入)
//! - RGBA32F: 每通道取最小值，HDR 纹理因此会整体偏暗，这是有意保留的策略

use ash::vk;
use std::sync::Arc;
use truvis_gfx::resources::image::{GfxTextureDesc, VulkanFormatUtils};

use crate::error::StreamError;
use crate::handle::TextureId;
use crate::service::{StreamingShared, advance_and_dispatch};
use crate::transient::{MipImage, PixelBuffer, TransientData};

pub(crate) fn run(shared: &Arc<StreamingShared>, id: TextureId) {
    let _span = tracy_client::span!("mip_gen_stage");

    let Some(desc) = shared.metadata.request(id).map(|request| request.desc) else {
        shared.fail_task(id, StreamError::UnknownTexture(id));
        return;
    };
    let Some(mut data) = shared.transient.take(id) else {
        shared.fail_task(id, StreamError::UploadDataMissing(format!("{} has no pixels to build mips from", id)));
        return;
    };

    match generate_mip_chain(&desc, &mut data) {
        Ok(generated) => {
            shared.transient.insert(id, data);
            if generated {
                shared.stats.record_mip_chain();
                log::debug!("generated {} mips for {}", desc.mip_levels, id);
            }
            advance_and_dispatch(shared, id);
        }
        Err(e) => shared.fail_task(id, e),
    }
}

/// 补全每个 layer 的 mip chain 到 `desc.mip_levels` 级
///
/// 已经完整时什么都不做并返回 false
pub(crate) fn generate_mip_chain(desc: &GfxTextureDesc, data: &mut TransientData) -> Result<bool, StreamError> {
    let target = desc.mip_levels as usize;
    if data.slices.iter().all(|mips| mips.len() >= target) {
        return Ok(false);
    }

    let downsample: fn(&MipImage) -> MipImage = if VulkanFormatUtils::is_rgba8(desc.format) {
        downsample_average_rgba8
    } else if VulkanFormatUtils::is_rgba32f(desc.format) {
        downsample_min_rgba32f
    } else {
        return Err(StreamError::DecodeFailure(format!(
            "mip generation does not support {:?}",
            desc.format
        )));
    };

    for mips in &mut data.slices {
        if mips.is_empty() {
            return Err(StreamError::UploadDataMissing("layer without base level".to_string()));
        }
        while mips.len() < target {
            let next = downsample(&mips[mips.len() - 1]);
            mips.push(next);
        }
    }
    Ok(true)
}

#[inline]
fn half_extent(src: &MipImage) -> (u32, u32) {
    GfxTextureDesc::mip_extent_of(src.width, src.height, 1)
}

/// 目标像素 (x, y) 对应的 4 个源像素下标，越界时 clamp 到最后一行/列
#[inline]
fn source_texels(src: &MipImage, x: u32, y: u32) -> [usize; 4] {
    let x0 = (2 * x).min(src.width - 1);
    let x1 = (2 * x + 1).min(src.width - 1);
    let y0 = (2 * y).min(src.height - 1);
    let y1 = (2 * y + 1).min(src.height - 1);
    let index = |x: u32, y: u32| (y * src.width + x) as usize;
    [index(x0, y0), index(x1, y0), index(x0, y1), index(x1, y1)]
}

fn downsample_average_rgba8(src: &MipImage) -> MipImage {
    let _span = tracy_client::span!("downsample_average_rgba8");

    let (width, height) = half_extent(src);
    let bytes = src.pixels.as_bytes();
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let texels = source_texels(src, x, y);
            for channel in 0..4 {
                let sum: u32 = texels.iter().map(|&texel| bytes[texel * 4 + channel] as u32).sum();
                pixels.push(((sum + 2) >> 2) as u8);
            }
        }
    }

    MipImage {
        width,
        height,
        pixels: PixelBuffer::Unorm8(pixels),
    }
}

fn downsample_min_rgba32f(src: &MipImage) -> MipImage {
    let _span = tracy_client::span!("downsample_min_rgba32f");

    let (width, height) = half_extent(src);
    let bytes = src.pixels.as_bytes();
    // raw buffer 不保证 4 字节对齐
    let read = |texel: usize, channel: usize| -> f32 {
        let offset = (texel * 4 + channel) * 4;
        bytemuck::pod_read_unaligned(&bytes[offset..offset + 4])
    };

    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let texels = source_texels(src, x, y);
            for channel in 0..4 {
                let min = texels.iter().map(|&texel| read(texel, channel)).fold(f32::INFINITY, f32::min);
                pixels.push(min);
            }
        }
    }

    MipImage {
        width,
        height,
        pixels: PixelBuffer::Float32(pixels),
    }
}
