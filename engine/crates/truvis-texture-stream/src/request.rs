use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;
use truvis_gfx::resources::image::GfxTextureDesc;

use crate::handle::TaskRoute;

/// 纹理的数据来源，文件路径与 raw buffer 互斥
#[derive(Debug, Clone, Default)]
pub enum TextureSource {
    /// 没有初始内容，例如 render target / depth target
    #[default]
    None,
    /// 从磁盘读取并解码
    File(PathBuf),
    /// 调用方提供的、已经是 `desc.format` 布局的像素
    ///
    /// 数量为 `array_layers` 时每个 buffer 是一层的 mip 0；
    /// 数量为 `array_layers * mip_levels` 时按 `layer * mip_levels + mip` 给出完整 mip chain。
    Raw(Vec<Arc<[u8]>>),
}
impl TextureSource {
    #[inline]
    pub fn has_data(&self) -> bool {
        !matches!(self, TextureSource::None)
    }

    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            TextureSource::File(path) => Some(path),
            _ => None,
        }
    }
}

/// 创建纹理的请求
#[derive(Debug, Clone)]
pub struct TextureCreationRequest {
    pub name: String,
    pub source: TextureSource,
    /// 文件来源时，尺寸/格式/mip 数量由解码阶段回写
    pub desc: GfxTextureDesc,
    /// 上传完成后 (或者无数据时创建时) 资源所处的 layout
    pub desired_layout: vk::ImageLayout,
    pub generate_mips: bool,
    pub is_cubemap: bool,
    pub is_cpu_readback: bool,
}
// new & init
impl TextureCreationRequest {
    pub fn from_file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: TextureSource::File(path.into()),
            desc: GfxTextureDesc::default(),
            desired_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            generate_mips: false,
            is_cubemap: false,
            is_cpu_readback: false,
        }
    }

    pub fn from_raw(name: impl Into<String>, desc: GfxTextureDesc, buffers: Vec<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            source: TextureSource::Raw(buffers),
            desc,
            desired_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            generate_mips: false,
            is_cubemap: false,
            is_cpu_readback: false,
        }
    }

    /// 没有初始数据的资源，直接以 `desired_layout` 创建
    pub fn uninitialized(name: impl Into<String>, desc: GfxTextureDesc, desired_layout: vk::ImageLayout) -> Self {
        Self {
            name: name.into(),
            source: TextureSource::None,
            desc,
            desired_layout,
            generate_mips: false,
            is_cubemap: false,
            is_cpu_readback: false,
        }
    }
}
// builder
impl TextureCreationRequest {
    #[inline]
    pub fn with_mips(mut self, generate_mips: bool) -> Self {
        self.generate_mips = generate_mips;
        self
    }

    #[inline]
    pub fn cubemap(mut self) -> Self {
        self.is_cubemap = true;
        self
    }

    #[inline]
    pub fn cpu_readback(mut self) -> Self {
        self.is_cpu_readback = true;
        self
    }

    #[inline]
    pub fn with_desired_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.desired_layout = layout;
        self
    }
}
// getters
impl TextureCreationRequest {
    #[inline]
    pub fn route(&self) -> TaskRoute {
        TaskRoute {
            has_source: self.source.has_data(),
            generate_mips: self.generate_mips,
        }
    }
}
