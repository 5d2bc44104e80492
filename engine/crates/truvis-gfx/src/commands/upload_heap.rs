use ash::vk;

use crate::resources::{footprint::align_up, handles::GfxResourceHandle};

/// upload heap 中的一段子分配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxStagingAllocation {
    pub offset: u64,
    pub size: u64,
}

/// CPU 可写、GPU 可读的 staging heap
///
/// 只支持线性子分配，没有 free list：分配出去的内存只有在
/// [`GfxUploadHeap::upload_to_gpu_and_wait`] 确认 GPU 消费完之后才整体回收。
/// 因此同一时刻只能有一个线程在使用它。
pub trait GfxUploadHeap: Send {
    fn capacity(&self) -> u64;

    /// 当前已经分配出去的字节数
    fn used(&self) -> u64;

    /// 空间不足时返回 `None`
    fn suballocate(&mut self, size: u64, alignment: u64) -> Option<GfxStagingAllocation>;

    /// 子分配对应的 mapped 内存
    fn mapped_mut(&mut self, allocation: &GfxStagingAllocation) -> &mut [u8];

    /// 录制一次 buffer -> image 拷贝，`region.buffer_offset` 是相对整个 heap 的偏移
    fn cmd_copy_buffer_to_image(&mut self, dst: GfxResourceHandle, dst_layout: vk::ImageLayout, region: vk::BufferImageCopy);

    /// 提交录制的所有拷贝并阻塞等待 GPU 完成，然后重置 heap
    fn upload_to_gpu_and_wait(&mut self) -> anyhow::Result<()>;
}

/// 线性子分配器，只记录游标
#[derive(Debug, Clone)]
pub struct GfxLinearAllocator {
    capacity: u64,
    cursor: u64,
}
// new & init
impl GfxLinearAllocator {
    pub fn new(capacity: u64) -> Self {
        Self { capacity, cursor: 0 }
    }
}
// getters
impl GfxLinearAllocator {
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn used(&self) -> u64 {
        self.cursor
    }
}
// tools
impl GfxLinearAllocator {
    pub fn suballocate(&mut self, size: u64, alignment: u64) -> Option<GfxStagingAllocation> {
        let offset = align_up(self.cursor, alignment);
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.cursor = end;
        Some(GfxStagingAllocation { offset, size })
    }

    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
