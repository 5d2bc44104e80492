use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::handle::TextureId;

/// 一块像素数据
///
/// 解码得到的数据由 stage 自己持有；调用方提供的 raw buffer 只增加引用计数，不做拷贝。
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    /// 8-bit 的 RGBA/BGRA
    Unorm8(Vec<u8>),
    /// RGBA32F
    Float32(Vec<f32>),
    /// 调用方提供的、已经是目标格式的数据
    Raw(Arc<[u8]>),
}
impl PixelBuffer {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelBuffer::Unorm8(pixels) => pixels,
            PixelBuffer::Float32(pixels) => bytemuck::cast_slice(pixels),
            PixelBuffer::Raw(bytes) => bytes,
        }
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.as_bytes().len()
    }
}

/// 单个 mip level 的像素，行紧密排列
#[derive(Debug, Clone)]
pub struct MipImage {
    pub width: u32,
    pub height: u32,
    pub pixels: PixelBuffer,
}

/// 一个任务在 CPU 阶段之间传递的像素数据
///
/// `slices[layer][mip]`，每层的 mip 0 在最前
#[derive(Debug, Clone, Default)]
pub struct TransientData {
    pub slices: Vec<Vec<MipImage>>,
}
impl TransientData {
    #[inline]
    pub fn layer_count(&self) -> usize {
        self.slices.len()
    }

    /// 所有 layer 的 mip 数量，layer 之间不一致时返回 None
    pub fn mip_count(&self) -> Option<usize> {
        let first = self.slices.first()?.len();
        self.slices.iter().all(|mips| mips.len() == first).then_some(first)
    }

    pub fn total_bytes(&self) -> usize {
        self.slices.iter().flatten().map(|mip| mip.pixels.byte_len()).sum()
    }
}

/// 所有尚未进入 upload 阶段的任务的像素数据
///
/// 独立的一把锁，stage 之间只在交接时短暂持有
#[derive(Default)]
pub struct TransientStore {
    entries: Mutex<HashMap<TextureId, TransientData>>,
}
impl TransientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TextureId, data: TransientData) {
        self.lock().insert(id, data);
    }

    /// 取走数据；进入 Uploading 时调用，之后 store 中不再有该 id
    pub fn take(&self, id: TextureId) -> Option<TransientData> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TextureId, TransientData>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
