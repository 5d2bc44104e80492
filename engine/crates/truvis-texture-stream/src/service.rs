use anyhow::Context;
use crossbeam_channel::Receiver;
use crossbeam_utils::sync::{Parker, WaitGroup};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use truvis_gfx::commands::upload_heap::GfxUploadHeap;
use truvis_gfx::foundation::device::GfxDevice;

use crate::completion::TaskOutcome;
use crate::config::TextureStreamingConfig;
use crate::decoder::ImageDecoder;
use crate::error::StreamError;
use crate::handle::{TaskState, TextureId};
use crate::metadata::{MetadataStore, TextureInfo, TextureMetadataSnapshot, TextureViews};
use crate::request::TextureCreationRequest;
use crate::stages::upload::{UploadQueue, UploadTask};
use crate::stages::{allocate, decode, mip_gen, upload};
use crate::stats::{StreamingStats, StreamingStatsSnapshot};
use crate::task_registry::{TaskRegistry, TextureEvent};
use crate::transient::TransientStore;

/// 各个 worker 之间共享的状态
pub(crate) struct StreamingShared {
    pub config: TextureStreamingConfig,

    pub registry: TaskRegistry,
    pub metadata: MetadataStore,
    pub transient: TransientStore,
    pub upload_queue: UploadQueue,
    upload_heap: Mutex<Box<dyn GfxUploadHeap>>,

    pub device: Arc<dyn GfxDevice>,
    pub decoder: Arc<dyn ImageDecoder>,

    /// IO 密集：文件读取 + 解码
    disk_pool: rayon::ThreadPool,
    /// CPU 密集：mip 生成
    mip_pool: rayon::ThreadPool,
    /// 资源创建，单线程
    gpu_pool: rayon::ThreadPool,
    /// 每个派发出去的 stage 持有一份，关闭时等待它们全部结束
    stage_jobs: Mutex<Option<WaitGroup>>,

    pub stats: StreamingStats,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
}
impl StreamingShared {
    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// 所有流水线错误的统一出口：记录日志，任务进入 Failed，唤醒等待者
    pub fn fail_task(&self, id: TextureId, error: StreamError) {
        log::error!("texture {} failed: {}", id, error);
        if self.registry.fail(id, error) {
            self.stats.record_failure();
        }
    }

    pub fn lock_upload_heap(&self) -> MutexGuard<'_, Box<dyn GfxUploadHeap>> {
        self.upload_heap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_stage(self: &Arc<Self>, pool: &rayon::ThreadPool, id: TextureId, stage: fn(&Arc<StreamingShared>, TextureId)) {
        let job = self.stage_jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        let Some(job) = job else {
            self.fail_task(id, StreamError::ShutDown);
            return;
        };

        let shared = self.clone();
        pool.spawn(move || {
            stage(&shared, id);
            drop(job);
        });
    }
}

/// 状态机驱动：推进一步，并把任务派发到新状态对应的 worker
///
/// 每个 stage 完成后都调用它，是状态到线程池映射的唯一位置
pub(crate) fn advance_and_dispatch(shared: &Arc<StreamingShared>, id: TextureId) {
    if shared.is_shutting_down() {
        shared.fail_task(id, StreamError::ShutDown);
        return;
    }

    let state = match shared.registry.advance(id) {
        Ok(state) => state,
        Err(e) => {
            shared.fail_task(id, e);
            return;
        }
    };
    log::debug!("texture {} -> {:?}", id, state);

    match state {
        TaskState::Reading => shared.spawn_stage(&shared.disk_pool, id, decode::run),
        TaskState::MipGenerating => shared.spawn_stage(&shared.mip_pool, id, mip_gen::run),
        TaskState::Allocating => shared.spawn_stage(&shared.gpu_pool, id, allocate::run),
        TaskState::Uploading => enqueue_upload(shared, id),
        TaskState::Ready => log::debug!("texture {} ready without upload", id),
        TaskState::Pending | TaskState::Failed => {
            log::error!("texture {} advanced into unexpected state {:?}", id, state);
        }
    }
}

/// 进入 Uploading：把 transient data 移交给 upload 线程；没有源数据的资源直接 Ready
fn enqueue_upload(shared: &Arc<StreamingShared>, id: TextureId) {
    let Some(request) = shared.metadata.request(id) else {
        shared.fail_task(id, StreamError::UnknownTexture(id));
        return;
    };

    if !request.source.has_data() {
        advance_and_dispatch(shared, id);
        return;
    }

    let Some(data) = shared.transient.take(id) else {
        shared.fail_task(id, StreamError::UploadDataMissing(format!("{} ({})", id, request.name)));
        return;
    };
    let Some(resource) = shared.metadata.resource(id) else {
        shared.fail_task(id, StreamError::UploadDataMissing(format!("{} has no device resource", id)));
        return;
    };

    let task = UploadTask {
        id,
        resource,
        desc: request.desc,
        desired_layout: request.desired_layout,
        data,
    };
    if let Err(task) = shared.upload_queue.push(task) {
        shared.fail_task(task.id, StreamError::ShutDown);
    }
}

/// 纹理流式加载服务
///
/// 流水线：
/// ```text
/// create_texture -> Pending -> Reading (disk pool) -> MipGenerating (mip pool)
///                -> Allocating (gpu pool, 单线程) -> Uploading (upload 线程) -> Ready
/// ```
/// 调用线程只会在 [`Self::wait_for_texture`] 和 [`Self::destroy_texture`] 中阻塞。
pub struct TextureStreamingService {
    shared: Arc<StreamingShared>,
    upload_thread: Mutex<Option<JoinHandle<()>>>,
}
// new & init
impl TextureStreamingService {
    pub fn initialize(
        config: TextureStreamingConfig,
        device: Arc<dyn GfxDevice>,
        upload_heap: Box<dyn GfxUploadHeap>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> anyhow::Result<Self> {
        tracy_client::Client::start();
        let _span = tracy_client::span!("TextureStreamingService::initialize");
        config.validate().context("invalid texture streaming config")?;

        let build_pool = |name: &str, threads: usize| -> anyhow::Result<rayon::ThreadPool> {
            let thread_name = format!("{}-{}", config.thread_name_prefix, name);
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(move |index| format!("{}-{}", thread_name, index))
                .build()
                .with_context(|| format!("failed to create {} thread pool", name))
        };
        let disk_workers = config.disk_worker_count();
        let disk_pool = build_pool("Disk", disk_workers)?;
        let mip_pool = build_pool("Mip", config.mip_workers)?;
        let gpu_pool = build_pool("Gpu", 1)?;

        let parker = Parker::new();
        let shared = Arc::new(StreamingShared {
            registry: TaskRegistry::new(),
            metadata: MetadataStore::new(),
            transient: TransientStore::new(),
            upload_queue: UploadQueue::new(parker.unparker().clone()),
            upload_heap: Mutex::new(upload_heap),
            device,
            decoder,
            disk_pool,
            mip_pool,
            gpu_pool,
            stage_jobs: Mutex::new(Some(WaitGroup::new())),
            stats: StreamingStats::default(),
            shutting_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            config,
        });

        let upload_thread = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("{}-Upload", shared.config.thread_name_prefix))
                .spawn(move || upload::run(shared, parker))
                .context("failed to spawn texture upload thread")?
        };

        log::info!(
            "texture streaming service initialized: {} disk workers, {} mip workers, upload heap {} bytes",
            disk_workers,
            shared.config.mip_workers,
            shared.lock_upload_heap().capacity()
        );
        Ok(Self {
            shared,
            upload_thread: Mutex::new(Some(upload_thread)),
        })
    }
}
// destroy
impl TextureStreamingService {
    /// 停止服务：不再接受新的工作，停止 upload 线程，所有未完成的任务以 `ShutDown` 失败，
    /// 释放服务仍然持有的所有 GPU 资源
    ///
    /// 可以重复调用，`Drop` 时也会调用
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _span = tracy_client::span!("TextureStreamingService::shutdown");
        log::info!("texture streaming service is shutting down...");

        self.shared.upload_queue.close();
        let upload_thread = self.upload_thread.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(thread) = upload_thread {
            if thread.join().is_err() {
                log::error!("texture upload thread panicked");
            }
        }

        // 等待已经派发出去的 stage 结束，它们看到关闭标记后会让任务失败
        let jobs = self.shared.stage_jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(jobs) = jobs {
            jobs.wait();
        }

        for id in self.shared.registry.in_flight() {
            self.shared.fail_task(id, StreamError::ShutDown);
        }

        let mut released = 0;
        for (_, metadata) in self.shared.metadata.drain() {
            if let Some(texture) = metadata.texture {
                self.shared.device.destroy_texture(texture);
                released += 1;
            }
        }

        log::info!(
            "texture streaming service shut down, released {} textures. {}",
            released,
            self.shared.stats.snapshot()
        );
    }

    /// 等待纹理完成后释放它，并把句柄置为 `TextureId::INVALID`
    ///
    /// 多个线程对同一个 id 调用时，资源也只会被释放一次
    pub fn destroy_texture(&self, id: &mut TextureId) {
        let _span = tracy_client::span!("TextureStreamingService::destroy_texture");
        let target = std::mem::replace(id, TextureId::INVALID);
        if !target.is_valid() {
            log::warn!("destroy_texture called with an invalid texture id");
            return;
        }

        if self.shared.registry.wait(target).is_none() {
            log::warn!("destroy_texture: unknown texture {}", target);
            return;
        }

        if let Some(metadata) = self.shared.metadata.remove(target) {
            if let Some(texture) = metadata.texture {
                self.shared.device.destroy_texture(texture);
            }
            log::debug!("destroyed texture {} ({})", target, metadata.request.name);
        }
        self.shared.registry.remove(target);
        self.shared.transient.take(target);
        self.shared.upload_queue.purge(target);
    }
}
impl Drop for TextureStreamingService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
// tools
impl TextureStreamingService {
    /// 请求一个纹理，非阻塞
    ///
    /// 同一个文件路径只会加载一次，之后的请求直接返回已有的 id
    pub fn create_texture(&self, request: TextureCreationRequest) -> TextureId {
        let _span = tracy_client::span!("TextureStreamingService::create_texture");
        let shared = &self.shared;

        let route = request.route();
        let name = request.name.clone();
        let reserve = || {
            let id = TextureId::from_raw(shared.next_id.fetch_add(1, Ordering::Relaxed));
            shared.registry.create(id, route);
            id
        };

        // 关闭之后不再写入元数据和路径缓存，只留下一个已经失败的任务供等待者返回
        if shared.is_shutting_down() {
            let id = reserve();
            shared.stats.record_request(false);
            shared.fail_task(id, StreamError::ShutDown);
            return id;
        }

        let (id, created) = shared.metadata.register(request, |_| reserve());
        shared.stats.record_request(!created);

        if !created {
            log::debug!("texture request {} hit cache: {}", name, id);
            return id;
        }
        if shared.is_shutting_down() {
            // 与 shutdown 并发：元数据可能已经被清空，这里自己移除
            shared.metadata.remove(id);
            shared.fail_task(id, StreamError::ShutDown);
            return id;
        }

        log::info!("request texture {}: {}", id, name);
        advance_and_dispatch(shared, id);
        id
    }

    /// 阻塞直到纹理进入 Ready 或者 Failed；未知 id 返回 None
    pub fn wait_for_texture(&self, id: TextureId) -> Option<TaskState> {
        let _span = tracy_client::span!("TextureStreamingService::wait_for_texture");
        self.shared.registry.wait(id).map(|outcome| match outcome {
            TaskOutcome::Ready => TaskState::Ready,
            TaskOutcome::Failed(_) => TaskState::Failed,
        })
    }

    /// 每帧调用，流式加载优先级的挂载点
    pub fn update(&self) {
        let _span = tracy_client::span!("TextureStreamingService::update");
    }

    /// 订阅纹理进入终态的事件
    pub fn subscribe(&self) -> Receiver<TextureEvent> {
        self.shared.registry.subscribe()
    }

    /// 由外部的 descriptor 系统回填 view 句柄
    pub fn set_views(&self, id: TextureId, views: TextureViews) -> bool {
        let updated = self.shared.metadata.set_views(id, views);
        if !updated {
            log::warn!("set_views: unknown texture {}", id);
        }
        updated
    }
}
// getters
impl TextureStreamingService {
    pub fn get_texture(&self, id: TextureId) -> Option<TextureInfo> {
        let info = self.shared.metadata.info(id);
        if info.is_none() {
            log::warn!("get_texture: unknown texture {}", id);
        }
        info
    }

    /// 非阻塞地查询状态
    pub fn get_status(&self, id: TextureId) -> Option<TaskState> {
        self.shared.registry.state(id)
    }

    /// 最近一次失败的原因；未失败或未知 id 返回 None
    pub fn get_error(&self, id: TextureId) -> Option<StreamError> {
        match self.shared.registry.signal(id)?.try_outcome()? {
            TaskOutcome::Failed(e) => Some(e),
            TaskOutcome::Ready => None,
        }
    }

    pub fn find_texture(&self, path: impl AsRef<Path>) -> Option<TextureId> {
        self.shared.metadata.find(path.as_ref())
    }

    pub fn metadata(&self, id: TextureId) -> Option<TextureMetadataSnapshot> {
        self.shared.metadata.snapshot(id)
    }

    pub fn stats(&self) -> StreamingStatsSnapshot {
        self.shared.stats.snapshot()
    }

    #[inline]
    pub fn config(&self) -> &TextureStreamingConfig {
        &self.shared.config
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &StreamingShared {
        &self.shared
    }
}
