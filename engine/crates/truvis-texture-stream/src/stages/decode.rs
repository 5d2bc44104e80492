//! 读取阶段 (disk worker)
//!
//! 文件路径: 解码 -> 回写尺寸/格式/mip 数量 -> 像素放入 transient store
//! raw buffer: 校验数量和大小后直接接管引用，不做拷贝

use ash::vk;
use std::sync::Arc;
use truvis_gfx::resources::image::{GfxTextureDesc, VulkanFormatUtils};

use crate::decoder::DecodedImage;
use crate::error::StreamError;
use crate::handle::TextureId;
use crate::request::{TextureCreationRequest, TextureSource};
use crate::service::{StreamingShared, advance_and_dispatch};
use crate::transient::{MipImage, PixelBuffer, TransientData};

const CUBE_FACES: u32 = 6;

pub(crate) fn run(shared: &Arc<StreamingShared>, id: TextureId) {
    let _span = tracy_client::span!("decode_stage");

    let Some(request) = shared.metadata.request(id) else {
        shared.fail_task(id, StreamError::UnknownTexture(id));
        return;
    };

    let result = match &request.source {
        TextureSource::File(path) => {
            log::debug!("decode {} from {:?}", id, path);
            shared
                .decoder
                .decode(path)
                .map_err(|e| StreamError::DecodeFailure(format!("{:?}: {:#}", path, e)))
                .and_then(|decoded| adopt_decoded(decoded, &request))
        }
        TextureSource::Raw(buffers) => adopt_raw(buffers, &request),
        TextureSource::None => Err(StreamError::DecodeFailure(format!("{} has no source data", request.name))),
    };

    match result {
        Ok((data, desc)) => {
            shared.metadata.update_request(id, |request| request.desc = desc);
            shared.transient.insert(id, data);
            shared.stats.record_decode();
            log::debug!(
                "decoded {} ({}): {}x{} {:?}, {} layers, {} mips",
                id,
                request.name,
                desc.width(),
                desc.height(),
                desc.format,
                desc.array_layers,
                desc.mip_levels
            );
            advance_and_dispatch(shared, id);
        }
        Err(e) => shared.fail_task(id, e),
    }
}

/// 解码结果转换为 transient data，返回修正后的 desc
///
/// cubemap 文件是 6 个正方形面竖直排列的长条 (`height == 6 * width`)
pub(crate) fn adopt_decoded(
    decoded: DecodedImage,
    request: &TextureCreationRequest,
) -> Result<(TransientData, GfxTextureDesc), StreamError> {
    let format = if decoded.is_hdr {
        vk::Format::R32G32B32A32_SFLOAT
    } else {
        vk::Format::R8G8B8A8_UNORM
    };
    let texel_size = VulkanFormatUtils::pixel_size_in_bytes(format).unwrap_or(4) as usize;

    let (width, height) = (decoded.width, decoded.height);
    if width == 0 || height == 0 {
        return Err(StreamError::DecodeFailure(format!("{}: empty image", request.name)));
    }
    let expected = width as usize * height as usize * texel_size;
    if decoded.pixels.byte_len() != expected {
        return Err(StreamError::DecodeFailure(format!(
            "{}: decoder returned {} bytes, expected {}",
            request.name,
            decoded.pixels.byte_len(),
            expected
        )));
    }

    let (face_height, layers) = if request.is_cubemap {
        if height != width * CUBE_FACES {
            return Err(StreamError::DecodeFailure(format!(
                "{}: cubemap strip must be {}x{}, got {}x{}",
                request.name,
                width,
                width * CUBE_FACES,
                width,
                height
            )));
        }
        (width, CUBE_FACES)
    } else {
        (height, 1)
    };

    let slices = split_layers(decoded.pixels, layers as usize)
        .into_iter()
        .map(|pixels| {
            vec![MipImage {
                width,
                height: face_height,
                pixels,
            }]
        })
        .collect();

    let mut desc = request.desc;
    desc.extent = vk::Extent3D {
        width,
        height: face_height,
        depth: 1,
    };
    desc.format = format;
    desc.array_layers = layers;
    desc.mip_levels = if request.generate_mips {
        GfxTextureDesc::full_mip_count(width, face_height)
    } else {
        1
    };
    if request.is_cubemap {
        desc.flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
    }

    Ok((TransientData { slices }, desc))
}

/// 接管调用方提供的 buffer
///
/// 数量为 `layers` 时只有 base level；数量为 `layers * mip_levels` 时是完整的 mip chain
pub(crate) fn adopt_raw(
    buffers: &[Arc<[u8]>],
    request: &TextureCreationRequest,
) -> Result<(TransientData, GfxTextureDesc), StreamError> {
    let fail = |message: String| StreamError::DecodeFailure(format!("{}: {}", request.name, message));

    if buffers.is_empty() {
        return Err(fail("no raw buffers".to_string()));
    }

    let mut desc = request.desc;
    let texel_size = VulkanFormatUtils::pixel_size_in_bytes(desc.format)
        .ok_or_else(|| fail(format!("unsupported raw format {:?}", desc.format)))? as usize;
    if desc.width() == 0 || desc.height() == 0 {
        return Err(fail("zero sized texture".to_string()));
    }
    desc.array_layers = desc.array_layers.max(1);
    desc.mip_levels = desc.mip_levels.max(1);
    if request.is_cubemap {
        if desc.array_layers % CUBE_FACES != 0 {
            return Err(fail(format!("cubemap needs a multiple of 6 layers, got {}", desc.array_layers)));
        }
        desc.flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
    }

    let layers = desc.array_layers as usize;
    let supplied_mips = if buffers.len() == layers {
        desc.mip_levels = if request.generate_mips {
            GfxTextureDesc::full_mip_count(desc.width(), desc.height())
        } else {
            1
        };
        1
    } else if buffers.len() == layers * desc.mip_levels as usize {
        desc.mip_levels as usize
    } else {
        return Err(fail(format!(
            "got {} buffers for {} layers x {} mips",
            buffers.len(),
            layers,
            desc.mip_levels
        )));
    };

    let mut slices = Vec::with_capacity(layers);
    for (layer, chain) in buffers.chunks(supplied_mips).enumerate() {
        let mut mips = Vec::with_capacity(supplied_mips);
        for (mip, buffer) in chain.iter().enumerate() {
            let (width, height) = desc.mip_extent(mip as u32);
            let required = width as usize * height as usize * texel_size;
            if buffer.len() < required {
                return Err(fail(format!(
                    "layer {} mip {} holds {} bytes, needs {}",
                    layer,
                    mip,
                    buffer.len(),
                    required
                )));
            }
            mips.push(MipImage {
                width,
                height,
                pixels: PixelBuffer::Raw(buffer.clone()),
            });
        }
        slices.push(mips);
    }

    Ok((TransientData { slices }, desc))
}

/// 把紧密排列的像素按行等分为 `layers` 份
fn split_layers(pixels: PixelBuffer, layers: usize) -> Vec<PixelBuffer> {
    if layers == 1 {
        return vec![pixels];
    }
    match pixels {
        PixelBuffer::Unorm8(bytes) => {
            let face = bytes.len() / layers;
            bytes.chunks_exact(face).map(|chunk| PixelBuffer::Unorm8(chunk.to_vec())).collect()
        }
        PixelBuffer::Float32(floats) => {
            let face = floats.len() / layers;
            floats.chunks_exact(face).map(|chunk| PixelBuffer::Float32(chunk.to_vec())).collect()
        }
        PixelBuffer::Raw(bytes) => {
            let face = bytes.len() / layers;
            bytes.chunks_exact(face).map(|chunk| PixelBuffer::Raw(Arc::from(chunk))).collect()
        }
    }
}
