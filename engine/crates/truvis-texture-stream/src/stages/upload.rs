//! 上传阶段 (专用 upload 线程)
//!
//! 整个流水线中唯一提交 GPU 工作的地方。每次被唤醒时取走队列中的全部任务作为一个 batch：
//! 1. 为每个纹理计算 footprint，在 upload heap 上做一次子分配，逐行拷贝所有 subresource
//! 2. 每个 subresource 录制一次 buffer -> image 拷贝
//! 3. 整个 batch 提交并等待，然后把资源转换到期望的 layout，在一次加锁内把所有任务标记为 Ready

use ash::vk;
use crossbeam_utils::sync::{Parker, Unparker};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use truvis_gfx::commands::upload_heap::{GfxStagingAllocation, GfxUploadHeap};
use truvis_gfx::resources::footprint::GfxCopyFootprints;
use truvis_gfx::resources::handles::GfxResourceHandle;
use truvis_gfx::resources::image::{GfxTextureDesc, VulkanFormatUtils};

use crate::error::StreamError;
use crate::handle::TextureId;
use crate::service::StreamingShared;
use crate::transient::TransientData;

/// 交给 upload 线程的一个纹理，只会被消费一次
pub(crate) struct UploadTask {
    pub id: TextureId,
    pub resource: GfxResourceHandle,
    pub desc: GfxTextureDesc,
    pub desired_layout: vk::ImageLayout,
    pub data: TransientData,
}

#[derive(Default)]
struct UploadQueueInner {
    tasks: VecDeque<UploadTask>,
    closed: bool,
}

/// upload 线程的输入队列，push 时唤醒 upload 线程
pub(crate) struct UploadQueue {
    inner: Mutex<UploadQueueInner>,
    unparker: Unparker,
}
impl UploadQueue {
    pub fn new(unparker: Unparker) -> Self {
        Self {
            inner: Mutex::new(UploadQueueInner::default()),
            unparker,
        }
    }

    /// 队列已关闭时把任务原样返回
    pub fn push(&self, task: UploadTask) -> Result<(), UploadTask> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(task);
            }
            inner.tasks.push_back(task);
        }
        self.unparker.unpark();
        Ok(())
    }

    pub fn drain(&self) -> Vec<UploadTask> {
        self.lock().tasks.drain(..).collect()
    }

    /// 关闭队列并唤醒 upload 线程，之后的 push 都会失败
    pub fn close(&self) {
        self.lock().closed = true;
        self.unparker.unpark();
    }

    /// 移除某个 id 还没有被取走的上传任务
    pub fn purge(&self, id: TextureId) -> bool {
        let mut inner = self.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|task| task.id != id);
        inner.tasks.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    fn lock(&self) -> MutexGuard<'_, UploadQueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// upload 线程主循环
pub(crate) fn run(shared: Arc<StreamingShared>, parker: Parker) {
    tracy_client::set_thread_name!("TextureUploadThread");
    log::info!("texture upload thread started");

    loop {
        let batch = shared.upload_queue.drain();
        if shared.is_shutting_down() {
            for task in batch {
                shared.fail_task(task.id, StreamError::ShutDown);
            }
            break;
        }
        if batch.is_empty() {
            // push/close 会先 unpark，这里不会丢失唤醒
            parker.park();
            continue;
        }

        let mut heap = shared.lock_upload_heap();
        BatchUploader::new(&shared, heap.as_mut()).upload(batch);
    }

    log::info!("texture upload thread exited");
}

/// 已经拷贝进 staging，等待本次提交完成的纹理
struct StagedTexture {
    id: TextureId,
    resource: GfxResourceHandle,
    desired_layout: vk::ImageLayout,
    bytes: u64,
}

struct BatchUploader<'a> {
    shared: &'a StreamingShared,
    heap: &'a mut dyn GfxUploadHeap,
    staged: Vec<StagedTexture>,
}
impl<'a> BatchUploader<'a> {
    fn new(shared: &'a StreamingShared, heap: &'a mut dyn GfxUploadHeap) -> Self {
        Self {
            shared,
            heap,
            staged: Vec::new(),
        }
    }

    fn upload(mut self, batch: Vec<UploadTask>) {
        let _span = tracy_client::span!("upload_batch");
        log::debug!("uploading batch of {} textures", batch.len());

        for task in batch {
            let id = task.id;
            if let Err(e) = self.stage(task) {
                self.shared.fail_task(id, e);
            }
        }
        self.flush();
        self.shared.stats.record_batch();
    }

    /// 把一个纹理的所有 subresource 拷贝进 staging 并录制拷贝命令
    fn stage(&mut self, task: UploadTask) -> Result<(), StreamError> {
        let _span = tracy_client::span!("stage_texture");

        let footprints = self
            .shared
            .device
            .copy_footprints(&task.desc)
            .map_err(|e| StreamError::UploadSubmission(format!("{}: {:#}", task.id, e)))?;
        check_upload_data(&task, &footprints)?;

        let allocation = self.suballocate(footprints.total_size)?;
        let staging = self.heap.mapped_mut(&allocation);
        for footprint in &footprints.subresources {
            let mip = &task.data.slices[footprint.array_layer as usize][footprint.mip_level as usize];
            let src = mip.pixels.as_bytes();
            let row_size = footprint.row_size as usize;
            for row in 0..footprint.row_count as usize {
                let dst_begin = footprint.offset as usize + row * footprint.row_pitch as usize;
                let src_begin = row * row_size;
                staging[dst_begin..dst_begin + row_size].copy_from_slice(&src[src_begin..src_begin + row_size]);
            }
        }

        let aspect = VulkanFormatUtils::aspect_flags(task.desc.format);
        for footprint in &footprints.subresources {
            self.heap.cmd_copy_buffer_to_image(
                task.resource,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                footprint.buffer_image_copy(allocation.offset, aspect),
            );
        }

        self.staged.push(StagedTexture {
            id: task.id,
            resource: task.resource,
            desired_layout: task.desired_layout,
            bytes: footprints.total_size,
        });
        // task.data 在这里释放
        Ok(())
    }

    /// 空间不足时先提交已经录制的部分，再重试一次
    fn suballocate(&mut self, size: u64) -> Result<GfxStagingAllocation, StreamError> {
        let capacity = self.heap.capacity();
        let alignment = self.shared.config.staging_alignment;
        if size > capacity {
            return Err(StreamError::StagingExhausted {
                required: size,
                capacity,
            });
        }

        if let Some(allocation) = self.heap.suballocate(size, alignment) {
            return Ok(allocation);
        }

        log::debug!(
            "upload heap full ({} / {} bytes), flushing {} staged textures",
            self.heap.used(),
            capacity,
            self.staged.len()
        );
        self.shared.stats.record_staging_flush();
        self.flush();
        self.heap.suballocate(size, alignment).ok_or(StreamError::StagingExhausted {
            required: size,
            capacity,
        })
    }

    /// 提交并等待，转换 layout，然后整体标记 Ready
    fn flush(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        let _span = tracy_client::span!("upload_flush");
        let staged = std::mem::take(&mut self.staged);

        if let Err(e) = self.heap.upload_to_gpu_and_wait() {
            let message = format!("{:#}", e);
            for texture in staged {
                self.shared.fail_task(texture.id, StreamError::UploadSubmission(message.clone()));
            }
            return;
        }

        let mut ready = Vec::with_capacity(staged.len());
        for texture in &staged {
            if texture.desired_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
                if let Err(e) = self.shared.device.transition_texture(
                    texture.resource,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    texture.desired_layout,
                ) {
                    self.shared.fail_task(texture.id, StreamError::UploadSubmission(format!("{:#}", e)));
                    continue;
                }
            }
            ready.push(texture.id);
        }

        for (id, result) in self.shared.registry.advance_all(&ready) {
            match result {
                Ok(_) => {
                    if let Some(texture) = staged.iter().find(|texture| texture.id == id) {
                        self.shared.stats.record_upload(texture.bytes);
                    }
                    log::debug!("texture {} ready", id);
                }
                // 只可能是关闭时已经被标记为失败
                Err(e) => log::warn!("texture {} uploaded but not marked ready: {}", id, e),
            }
        }
    }
}

/// transient data 必须覆盖每个 subresource 且每块都足够大
fn check_upload_data(task: &UploadTask, footprints: &GfxCopyFootprints) -> Result<(), StreamError> {
    let layers = task.desc.array_layers as usize;
    let mips = task.desc.mip_levels as usize;
    if task.data.layer_count() != layers || task.data.slices.iter().any(|chain| chain.len() < mips) {
        return Err(StreamError::UploadDataMissing(format!(
            "{}: expected {} layers x {} mips",
            task.id, layers, mips
        )));
    }

    for footprint in &footprints.subresources {
        let mip = &task.data.slices[footprint.array_layer as usize][footprint.mip_level as usize];
        if (mip.width, mip.height) != (footprint.width, footprint.height)
            || (mip.pixels.byte_len() as u64) < footprint.packed_size()
        {
            return Err(StreamError::UploadDataMissing(format!(
                "{}: layer {} mip {} does not match {}x{}",
                task.id, footprint.array_layer, footprint.mip_level, footprint.width, footprint.height
            )));
        }
    }
    Ok(())
}
