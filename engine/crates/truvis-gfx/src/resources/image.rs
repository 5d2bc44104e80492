use ash::vk;

/// Vulkan 格式相关的工具类
pub struct VulkanFormatUtils;
impl VulkanFormatUtils {
    /// 计算指定 Vulkan 格式下每个像素需要的字节数
    ///
    /// 只覆盖纹理流式加载会遇到的非压缩格式，其余格式返回 `None`
    pub fn pixel_size_in_bytes(format: vk::Format) -> Option<u32> {
        let size = match format {
            vk::Format::R8_UNORM | vk::Format::R8_SRGB => 1,
            vk::Format::R8G8_UNORM | vk::Format::D16_UNORM | vk::Format::R16_SFLOAT => 2,
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::A2B10G10R10_UNORM_PACK32
            | vk::Format::R16G16_SFLOAT
            | vk::Format::R32_SFLOAT
            | vk::Format::R32_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::X8_D24_UNORM_PACK32 => 4,
            vk::Format::R16G16B16A16_UNORM
            | vk::Format::R16G16B16A16_SFLOAT
            | vk::Format::R32G32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT => 8,
            vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,
            _ => return None,
        };
        Some(size)
    }

    #[inline]
    pub fn is_depth_format(format: vk::Format) -> bool {
        matches!(
            format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
                | vk::Format::X8_D24_UNORM_PACK32
        )
    }

    #[inline]
    pub fn has_stencil(format: vk::Format) -> bool {
        matches!(format, vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT)
    }

    /// 每通道 8bit 的四通道格式
    #[inline]
    pub fn is_rgba8(format: vk::Format) -> bool {
        matches!(
            format,
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB
        )
    }

    /// 每通道 32bit float 的四通道格式，HDR 内容解码后统一使用它
    #[inline]
    pub fn is_rgba32f(format: vk::Format) -> bool {
        format == vk::Format::R32G32B32A32_SFLOAT
    }

    pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
        if Self::is_depth_format(format) {
            if Self::has_stencil(format) {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            } else {
                vk::ImageAspectFlags::DEPTH
            }
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// 纹理的设备端描述
///
/// 对应 `vk::ImageCreateInfo` 中与资源形状相关的部分。
/// 解码阶段会把实际的尺寸、格式、mip 数量回写到这里。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GfxTextureDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}
impl Default for GfxTextureDesc {
    fn default() -> Self {
        Self {
            extent: vk::Extent3D {
                width: 0,
                height: 0,
                depth: 1,
            },
            format: vk::Format::UNDEFINED,
            array_layers: 1,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::SAMPLED,
            flags: vk::ImageCreateFlags::empty(),
        }
    }
}
// new & builder
impl GfxTextureDesc {
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent: vk::Extent3D { width, height, depth: 1 },
            format,
            usage,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }
}
// getters
impl GfxTextureDesc {
    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    #[inline]
    pub fn subresource_count(&self) -> u32 {
        self.array_layers * self.mip_levels
    }

    #[inline]
    pub fn is_cube_compatible(&self) -> bool {
        self.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
    }

    /// 第 `mip` 级的尺寸，每级向下取整减半，最小为 1
    #[inline]
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        Self::mip_extent_of(self.extent.width, self.extent.height, mip)
    }

    #[inline]
    pub fn mip_extent_of(width: u32, height: u32, mip: u32) -> (u32, u32) {
        ((width >> mip).max(1), (height >> mip).max(1))
    }

    /// 完整 mip chain 的级数：`floor(log2(max(w, h))) + 1`
    #[inline]
    pub fn full_mip_count(width: u32, height: u32) -> u32 {
        let largest = width.max(height).max(1);
        u32::BITS - largest.leading_zeros()
    }

    /// 转换为 `vk::ImageCreateInfo`，layout 只能是 UNDEFINED 或者 PREINITIALIZED，这里固定为 UNDEFINED
    pub fn as_image_create_info(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo {
            flags: self.flags,
            image_type: vk::ImageType::TYPE_2D,
            format: self.format,
            extent: self.extent,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            samples: self.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: self.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        }
    }
}

/// 资源所在的内存位置，对应 VMA 的 MemoryUsage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxMemoryLocation {
    GpuOnly,
    /// CPU 回读 (readback)
    GpuToCpu,
}

/// 创建 render target / depth target 时的 optimized clear value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// 交给 [`crate::foundation::device::GfxDevice::create_texture`] 的完整创建信息
#[derive(Debug, Clone)]
pub struct GfxTextureCreateInfo {
    pub desc: GfxTextureDesc,
    /// 创建完成后资源所处的 layout
    pub initial_layout: vk::ImageLayout,
    pub clear_value: Option<GfxClearValue>,
    pub memory: GfxMemoryLocation,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mip_count() {
        assert_eq!(GfxTextureDesc::full_mip_count(1, 1), 1);
        assert_eq!(GfxTextureDesc::full_mip_count(256, 256), 9);
        assert_eq!(GfxTextureDesc::full_mip_count(256, 100), 9);
        assert_eq!(GfxTextureDesc::full_mip_count(300, 17), 9);
        assert_eq!(GfxTextureDesc::full_mip_count(0, 0), 1);
    }

    #[test]
    fn test_mip_extent_floor_and_clamp() {
        let desc = GfxTextureDesc::new_2d(300, 17, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(desc.mip_extent(0), (300, 17));
        assert_eq!(desc.mip_extent(1), (150, 8));
        assert_eq!(desc.mip_extent(4), (18, 1));
        assert_eq!(desc.mip_extent(8), (1, 1));
    }

    #[test]
    fn test_image_create_info() {
        let desc = GfxTextureDesc::new_2d(64, 32, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED)
            .with_mip_levels(7)
            .with_array_layers(2);
        let info = desc.as_image_create_info();
        assert_eq!(info.extent, desc.extent);
        assert_eq!((info.mip_levels, info.array_layers), (7, 2));
        assert_eq!(info.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_pixel_size() {
        assert_eq!(VulkanFormatUtils::pixel_size_in_bytes(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(VulkanFormatUtils::pixel_size_in_bytes(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(VulkanFormatUtils::pixel_size_in_bytes(vk::Format::BC7_UNORM_BLOCK), None);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(VulkanFormatUtils::aspect_flags(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            VulkanFormatUtils::aspect_flags(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(VulkanFormatUtils::aspect_flags(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
