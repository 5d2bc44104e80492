use ash::vk;

use crate::resources::{
    footprint::GfxCopyFootprints,
    handles::{GfxResourceHandle, GfxTexture},
    image::{GfxTextureCreateInfo, GfxTextureDesc},
};

/// 纹理流式加载所需要的 device 能力
///
/// 实现者负责底层 allocator 的线程安全；调用方 (分配阶段) 本身已经是单线程的，
/// 但销毁和 layout 转换可能来自其他线程。
pub trait GfxDevice: Send + Sync {
    /// 创建纹理资源及其 allocation，创建后资源处于 `info.initial_layout`
    fn create_texture(&self, info: &GfxTextureCreateInfo) -> anyhow::Result<GfxTexture>;

    /// 立即销毁纹理
    ///
    /// 注意：调用者需要确保该资源不再被 GPU 使用
    fn destroy_texture(&self, texture: GfxTexture);

    /// 在 upload 完成之后把资源从 `old_layout` 转换到 `new_layout`
    fn transition_texture(
        &self,
        resource: GfxResourceHandle,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> anyhow::Result<()>;

    /// 纹理所有 subresource 在 staging buffer 中的布局 (对应 D3D12 的 GetCopyableFootprints)
    fn copy_footprints(&self, desc: &GfxTextureDesc) -> anyhow::Result<GfxCopyFootprints>;
}
