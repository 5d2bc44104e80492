use ash::vk;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use truvis_gfx::resources::handles::{GfxResourceHandle, GfxTexture};

use crate::handle::TextureId;
use crate::request::TextureCreationRequest;

/// 由外部的 descriptor 系统分配的 view 句柄
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureViews {
    pub srv: Option<u32>,
    pub dsv: Option<u32>,
    pub uav: Option<u32>,
}

/// 每个纹理的元数据
#[derive(Debug)]
pub struct TextureMetadata {
    /// 解码阶段会回写其中的 desc
    pub request: TextureCreationRequest,
    /// 只有经过 Allocating 之后才是 Some
    pub texture: Option<GfxTexture>,
    /// 由 base level 的 alpha 内容决定
    pub uses_alpha: bool,
    pub views: TextureViews,
}
impl TextureMetadata {
    fn new(request: TextureCreationRequest) -> Self {
        Self {
            request,
            texture: None,
            uses_alpha: false,
            views: TextureViews::default(),
        }
    }

    fn info(&self) -> TextureInfo {
        let desc = &self.request.desc;
        TextureInfo {
            resource: self.texture.as_ref().map(GfxTexture::resource),
            format: desc.format,
            width: desc.width(),
            height: desc.height(),
            array_layers: desc.array_layers,
            mip_levels: desc.mip_levels,
            uses_alpha: self.uses_alpha,
            is_cubemap: self.request.is_cubemap,
            views: self.views,
        }
    }
}

/// 给调用方的纹理信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub resource: Option<GfxResourceHandle>,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub uses_alpha: bool,
    pub is_cubemap: bool,
    pub views: TextureViews,
}

/// 元数据的完整快照
#[derive(Debug, Clone)]
pub struct TextureMetadataSnapshot {
    pub request: TextureCreationRequest,
    pub info: TextureInfo,
}

#[derive(Default)]
struct MetadataInner {
    entries: HashMap<TextureId, TextureMetadata>,
    /// 路径到 id 的映射，去重的唯一依据
    path_cache: HashMap<PathBuf, TextureId>,
}

/// 请求缓存 + 元数据
///
/// 读操作取共享锁；创建、stage 回写、销毁取独占锁。
#[derive(Default)]
pub struct MetadataStore {
    inner: RwLock<MetadataInner>,
}
// new & init
impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}
// create & destroy
impl MetadataStore {
    /// 登记请求，返回 `(id, 是否新建)`
    ///
    /// 文件路径命中缓存时直接返回已有 id，`reserve` 不会被调用。
    /// 查找、`reserve` 和插入在同一次独占锁内完成，同一路径的并发请求只会得到一个 id。
    pub fn register(
        &self,
        request: TextureCreationRequest,
        reserve: impl FnOnce(&TextureCreationRequest) -> TextureId,
    ) -> (TextureId, bool) {
        let mut inner = self.write();
        if let Some(path) = request.source.file_path() {
            if let Some(&id) = inner.path_cache.get(path) {
                return (id, false);
            }
        }

        let id = reserve(&request);
        if let Some(path) = request.source.file_path() {
            inner.path_cache.insert(path.clone(), id);
        }
        inner.entries.insert(id, TextureMetadata::new(request));
        (id, true)
    }

    /// 移除元数据以及对应的路径缓存
    pub fn remove(&self, id: TextureId) -> Option<TextureMetadata> {
        let mut inner = self.write();
        let metadata = inner.entries.remove(&id)?;
        if let Some(path) = metadata.request.source.file_path() {
            if inner.path_cache.get(path) == Some(&id) {
                inner.path_cache.remove(path);
            }
        }
        Some(metadata)
    }

    /// 取出全部元数据，关闭服务时使用
    pub fn drain(&self) -> Vec<(TextureId, TextureMetadata)> {
        let mut inner = self.write();
        inner.path_cache.clear();
        inner.entries.drain().collect()
    }
}
// stage write-back
impl MetadataStore {
    /// 修改请求，解码阶段回写尺寸/格式/mip 数量
    pub fn update_request(&self, id: TextureId, f: impl FnOnce(&mut TextureCreationRequest)) -> bool {
        match self.write().entries.get_mut(&id) {
            Some(metadata) => {
                f(&mut metadata.request);
                true
            }
            None => false,
        }
    }

    /// 记录分配好的资源；id 已不存在时把资源交还给调用方处理
    pub fn set_allocated(&self, id: TextureId, texture: GfxTexture, uses_alpha: bool) -> Result<(), GfxTexture> {
        let mut inner = self.write();
        let Some(metadata) = inner.entries.get_mut(&id) else {
            return Err(texture);
        };
        debug_assert!(metadata.texture.is_none(), "texture {:?} allocated twice", id);
        metadata.texture = Some(texture);
        metadata.uses_alpha = uses_alpha;
        Ok(())
    }

    pub fn set_views(&self, id: TextureId, views: TextureViews) -> bool {
        match self.write().entries.get_mut(&id) {
            Some(metadata) => {
                metadata.views = views;
                true
            }
            None => false,
        }
    }
}
// getters
impl MetadataStore {
    pub fn request(&self, id: TextureId) -> Option<TextureCreationRequest> {
        self.read().entries.get(&id).map(|metadata| metadata.request.clone())
    }

    pub fn resource(&self, id: TextureId) -> Option<GfxResourceHandle> {
        self.read().entries.get(&id)?.texture.as_ref().map(GfxTexture::resource)
    }

    pub fn info(&self, id: TextureId) -> Option<TextureInfo> {
        self.read().entries.get(&id).map(TextureMetadata::info)
    }

    pub fn snapshot(&self, id: TextureId) -> Option<TextureMetadataSnapshot> {
        self.read().entries.get(&id).map(|metadata| TextureMetadataSnapshot {
            request: metadata.request.clone(),
            info: metadata.info(),
        })
    }

    pub fn find(&self, path: &Path) -> Option<TextureId> {
        self.read().path_cache.get(path).copied()
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.read().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
// tools
impl MetadataStore {
    fn read(&self) -> RwLockReadGuard<'_, MetadataInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MetadataInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
