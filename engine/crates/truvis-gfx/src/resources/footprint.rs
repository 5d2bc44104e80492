use crate::resources::image::{GfxTextureDesc, VulkanFormatUtils};
use ash::vk;

#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// 一个 subresource (mip level + array layer) 在 staging buffer 中的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxSubresourceFootprint {
    pub mip_level: u32,
    pub array_layer: u32,
    /// 相对 staging 分配起点的偏移
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    /// 目标行距，按 row pitch alignment 对齐
    pub row_pitch: u64,
    /// 紧密排列时一行的字节数
    pub row_size: u64,
    pub row_count: u32,
    pub texel_size: u32,
}
impl GfxSubresourceFootprint {
    #[inline]
    pub fn size_in_bytes(&self) -> u64 {
        self.row_pitch * self.row_count as u64
    }

    /// 紧密排列时源数据的大小
    #[inline]
    pub fn packed_size(&self) -> u64 {
        self.row_size * self.row_count as u64
    }

    /// 生成从 staging buffer 到该 subresource 的拷贝区域
    ///
    /// * `base_offset` - staging 分配在整个 upload heap 中的偏移
    pub fn buffer_image_copy(&self, base_offset: u64, aspect_mask: vk::ImageAspectFlags) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset: base_offset + self.offset,
            // 以 texel 为单位
            buffer_row_length: (self.row_pitch / self.texel_size as u64) as u32,
            buffer_image_height: self.row_count,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask,
                mip_level: self.mip_level,
                base_array_layer: self.array_layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            },
        }
    }
}

/// 整个纹理所有 subresource 的拷贝布局
///
/// subresource 的顺序为 layer 优先：`index = layer * mip_levels + mip`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GfxCopyFootprints {
    pub subresources: Vec<GfxSubresourceFootprint>,
    pub total_size: u64,
}
impl GfxCopyFootprints {
    /// * `row_pitch_alignment` - 每一行起点的对齐
    /// * `placement_alignment` - 每个 subresource 起点的对齐
    pub fn compute(desc: &GfxTextureDesc, row_pitch_alignment: u64, placement_alignment: u64) -> anyhow::Result<Self> {
        let texel_size = VulkanFormatUtils::pixel_size_in_bytes(desc.format)
            .ok_or_else(|| anyhow::anyhow!("no copy footprint for format {:?}", desc.format))?;
        // row pitch 必须是 texel 大小的整数倍，否则无法表示为 buffer_row_length
        let row_pitch_alignment = lcm(row_pitch_alignment.max(1), texel_size as u64);

        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        let mut cursor = 0;
        for array_layer in 0..desc.array_layers {
            for mip_level in 0..desc.mip_levels {
                let (width, height) = desc.mip_extent(mip_level);
                let row_size = width as u64 * texel_size as u64;
                let row_pitch = align_up(row_size, row_pitch_alignment);
                let offset = align_up(cursor, placement_alignment);

                let footprint = GfxSubresourceFootprint {
                    mip_level,
                    array_layer,
                    offset,
                    width,
                    height,
                    row_pitch,
                    row_size,
                    row_count: height,
                    texel_size,
                };
                cursor = offset + footprint.size_in_bytes();
                subresources.push(footprint);
            }
        }

        Ok(Self {
            subresources,
            total_size: cursor,
        })
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}
