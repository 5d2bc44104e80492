//! 整条流水线的测试，全部运行在 headless 后端上

use ash::vk;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use truvis_gfx::headless::{HeadlessDevice, HeadlessUploadHeap};
use truvis_gfx::resources::image::GfxTextureDesc;

use crate::config::TextureStreamingConfig;
use crate::decoder::{DecodedImage, ImageCrateDecoder, ImageDecoder};
use crate::error::StreamError;
use crate::handle::{TaskState, TextureId};
use crate::request::TextureCreationRequest;
use crate::service::TextureStreamingService;
use crate::task_registry::TextureEvent;
use crate::transient::PixelBuffer;

const HEAP_SIZE: u64 = 4 * 1024 * 1024;

/// 按路径返回预先准备好的图片，记录调用次数
#[derive(Default)]
struct ScriptedDecoder {
    images: HashMap<PathBuf, DecodedImage>,
    delay: Duration,
    decode_count: AtomicUsize,
}
impl ScriptedDecoder {
    fn with_image(mut self, path: &str, image: DecodedImage) -> Self {
        self.images.insert(PathBuf::from(path), image);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn decode_count(&self) -> usize {
        self.decode_count.load(Ordering::SeqCst)
    }
}
impl ImageDecoder for ScriptedDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedImage> {
        std::thread::sleep(self.delay);
        self.decode_count.fetch_add(1, Ordering::SeqCst);
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such file: {:?}", path))
    }
}

struct Harness {
    service: TextureStreamingService,
    device: Arc<HeadlessDevice>,
}

fn init_test_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn harness_with(decoder: Arc<dyn ImageDecoder>, heap_size: u64) -> Harness {
    init_test_log();
    let device = Arc::new(HeadlessDevice::new());
    let heap = HeadlessUploadHeap::new(device.clone(), heap_size);
    let config = TextureStreamingConfig {
        disk_workers: 2,
        ..Default::default()
    };
    let service = TextureStreamingService::initialize(config, device.clone(), Box::new(heap), decoder).unwrap();
    Harness { service, device }
}

fn harness(decoder: Arc<ScriptedDecoder>) -> Harness {
    harness_with(decoder, HEAP_SIZE)
}

fn rgba8(width: u32, height: u32, alpha: impl Fn(u32, u32) -> u8) -> DecodedImage {
    let mut rng = rand::thread_rng();
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[rng.r#gen(), rng.r#gen(), rng.r#gen(), alpha(x, y)]);
        }
    }
    DecodedImage {
        width,
        height,
        is_hdr: false,
        pixels: PixelBuffer::Unorm8(pixels),
    }
}

fn raw_desc(width: u32, height: u32) -> GfxTextureDesc {
    GfxTextureDesc::new_2d(width, height, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED)
}

fn raw_buffer(width: u32, height: u32, value: u8) -> Arc<[u8]> {
    Arc::from(vec![value; (width * height * 4) as usize])
}

#[test]
fn test_concurrent_same_path_requests_share_one_task() {
    let decoder = Arc::new(
        ScriptedDecoder::default()
            .with_image("brick.png", rgba8(16, 16, |_, _| 255))
            .with_delay(Duration::from_millis(30)),
    );
    let h = harness(decoder.clone());

    let ids: Vec<TextureId> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = &h.service;
                scope.spawn(move || {
                    service.create_texture(TextureCreationRequest::from_file(format!("Tex{}", i), "brick.png"))
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(h.service.wait_for_texture(ids[0]), Some(TaskState::Ready));
    assert_eq!(decoder.decode_count(), 1);
    assert_eq!(h.device.created_count(), 1);
    assert_eq!(h.service.find_texture("brick.png"), Some(ids[0]));

    let stats = h.service.stats();
    assert_eq!(stats.requests, 8);
    assert_eq!(stats.cache_hits, 7);
}

#[test]
fn test_every_request_reaches_a_terminal_state() {
    let mut rng = rand::thread_rng();
    let mut decoder = ScriptedDecoder::default();
    let mut paths = Vec::new();
    for i in 0..12 {
        let path = format!("tex_{}.png", i);
        decoder = decoder.with_image(&path, rgba8(rng.gen_range(1..70), rng.gen_range(1..70), |_, _| 255));
        paths.push(path);
    }
    let h = harness(Arc::new(decoder));

    let ids: Vec<_> = paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            h.service
                .create_texture(TextureCreationRequest::from_file(path.clone(), path.clone()).with_mips(i % 2 == 0))
        })
        .collect();

    for id in ids {
        assert_eq!(h.service.wait_for_texture(id), Some(TaskState::Ready));
        assert_eq!(h.service.get_status(id), Some(TaskState::Ready));
        let info = h.service.get_texture(id).unwrap();
        let resource = info.resource.unwrap();
        assert_eq!(h.device.texture_layout(resource), Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }
    assert_eq!(h.service.stats().failures, 0);
}

#[test]
fn test_mip_chain_uploaded_with_halving_dimensions() {
    let decoder = Arc::new(ScriptedDecoder::default().with_image("wall.png", rgba8(64, 20, |_, _| 255)));
    let h = harness(decoder);

    let id = h
        .service
        .create_texture(TextureCreationRequest::from_file("wall", "wall.png").with_mips(true));
    assert_eq!(h.service.wait_for_texture(id), Some(TaskState::Ready));

    let info = h.service.get_texture(id).unwrap();
    assert_eq!(info.mip_levels, 7);
    let resource = info.resource.unwrap();

    let mut previous = (u32::MAX, u32::MAX);
    for mip in 0..info.mip_levels {
        let (width, height) = GfxTextureDesc::mip_extent_of(64, 20, mip);
        assert!(width <= previous.0 && height <= previous.1);
        let pixels = h.device.read_subresource(resource, mip, 0).unwrap();
        assert_eq!(pixels.len(), (width * height * 4) as usize, "mip {}", mip);
        // 不透明图片的每一级都保持不透明
        assert!(pixels.chunks_exact(4).all(|texel| texel[3] == 255));
        previous = (width, height);
    }
    assert_eq!(previous, (1, 1));
}

#[test]
fn test_alpha_detection() {
    let decoder = Arc::new(
        ScriptedDecoder::default()
            .with_image("opaque.png", rgba8(9, 9, |_, _| 255))
            .with_image("clear.png", rgba8(9, 9, |_, _| 0))
            .with_image("cutout.png", rgba8(9, 9, |x, y| if x == 8 && y == 8 { 128 } else { 255 })),
    );
    let h = harness(decoder);

    let uses_alpha = |path: &str| {
        let id = h.service.create_texture(TextureCreationRequest::from_file(path, path));
        assert_eq!(h.service.wait_for_texture(id), Some(TaskState::Ready));
        h.service.get_texture(id).unwrap().uses_alpha
    };
    assert!(!uses_alpha("opaque.png"));
    assert!(!uses_alpha("clear.png"));
    assert!(uses_alpha("cutout.png"));
}

#[test]
fn test_alpha_on_a_later_cube_face() {
    let h = harness(Arc::new(ScriptedDecoder::default()));

    let faces: Vec<_> = (0..6).map(|face| raw_buffer(4, 4, if face == 3 { 128 } else { 255 })).collect();
    let cube = h
        .service
        .create_texture(TextureCreationRequest::from_raw("cube", raw_desc(4, 4).with_array_layers(6), faces).cubemap());
    let opaque_faces: Vec<_> = (0..6).map(|_| raw_buffer(4, 4, 255)).collect();
    let opaque = h.service.create_texture(
        TextureCreationRequest::from_raw("opaque_cube", raw_desc(4, 4).with_array_layers(6), opaque_faces).cubemap(),
    );

    assert_eq!(h.service.wait_for_texture(cube), Some(TaskState::Ready));
    assert!(h.service.get_texture(cube).unwrap().uses_alpha);
    assert_eq!(h.service.wait_for_texture(opaque), Some(TaskState::Ready));
    assert!(!h.service.get_texture(opaque).unwrap().uses_alpha);
}

#[test]
fn test_render_target_skips_upload() {
    let h = harness(Arc::new(ScriptedDecoder::default()));
    let desc = GfxTextureDesc::new_2d(
        128,
        64,
        vk::Format::D32_SFLOAT,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
    );

    let id = h.service.create_texture(TextureCreationRequest::uninitialized(
        "SceneDepth",
        desc,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    ));
    let transient = &h.service.shared().transient;
    assert!(!transient.contains(id));
    assert_eq!(h.service.wait_for_texture(id), Some(TaskState::Ready));
    assert!(!transient.contains(id));
    assert!(transient.is_empty());

    let info = h.service.get_texture(id).unwrap();
    let resource = info.resource.unwrap();
    assert!(!info.uses_alpha);
    assert_eq!(h.device.texture_layout(resource), Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
    assert_eq!(h.device.copy_count(), 0);
    assert_eq!(h.device.submission_count(), 0);
    assert_eq!(h.service.stats().uploads, 0);
}

#[test]
fn test_failures_are_isolated() {
    let decoder = Arc::new(ScriptedDecoder::default().with_image("good.png", rgba8(8, 8, |_, _| 255)));
    let h = harness(decoder);

    let good = h.service.create_texture(TextureCreationRequest::from_file("good", "good.png"));
    let missing = h.service.create_texture(TextureCreationRequest::from_file("missing", "missing.png"));
    let empty = h
        .service
        .create_texture(TextureCreationRequest::from_raw("empty", raw_desc(4, 4), Vec::new()));

    assert_eq!(h.service.wait_for_texture(good), Some(TaskState::Ready));
    assert_eq!(h.service.wait_for_texture(missing), Some(TaskState::Failed));
    assert_eq!(h.service.wait_for_texture(empty), Some(TaskState::Failed));
    assert!(matches!(h.service.get_error(missing), Some(StreamError::DecodeFailure(_))));
    assert!(matches!(h.service.get_error(empty), Some(StreamError::DecodeFailure(_))));
    assert_eq!(h.service.get_error(good), None);

    // 失败的任务没有分配任何资源，但元数据保留到 destroy
    let info = h.service.get_texture(missing).unwrap();
    assert_eq!(info.resource, None);
    assert_eq!(h.service.stats().failures, 2);

    // 失败的任务同样需要 destroy 来回收元数据
    let mut handle = missing;
    h.service.destroy_texture(&mut handle);
    assert_eq!(handle, TextureId::INVALID);
    assert!(h.service.get_texture(missing).is_none());
    assert_eq!(h.service.get_status(missing), None);
    assert_eq!(h.service.find_texture("missing.png"), None);
    assert_eq!(h.device.destroyed_count(), 0);
    assert_eq!(h.device.invalid_destroy_count(), 0);
    assert!(h.service.get_texture(good).is_some());
}

#[test]
fn test_allocation_failure() {
    let h = harness(Arc::new(ScriptedDecoder::default()));
    h.device.set_fail_allocations(true);
    let refused = h.service.create_texture(TextureCreationRequest::from_raw(
        "refused",
        raw_desc(4, 4),
        vec![raw_buffer(4, 4, 1)],
    ));
    assert_eq!(h.service.wait_for_texture(refused), Some(TaskState::Failed));
    assert!(matches!(h.service.get_error(refused), Some(StreamError::AllocationFailure(_))));

    h.device.set_fail_allocations(false);
    let accepted = h.service.create_texture(TextureCreationRequest::from_raw(
        "accepted",
        raw_desc(4, 4),
        vec![raw_buffer(4, 4, 1)],
    ));
    assert_eq!(h.service.wait_for_texture(accepted), Some(TaskState::Ready));
}

#[test]
fn test_submission_failure_fails_task() {
    let h = harness(Arc::new(ScriptedDecoder::default()));
    h.device.set_fail_submissions(true);
    let id = h.service.create_texture(TextureCreationRequest::from_raw(
        "lost",
        raw_desc(8, 8),
        vec![raw_buffer(8, 8, 3)],
    ));
    assert_eq!(h.service.wait_for_texture(id), Some(TaskState::Failed));
    assert!(matches!(h.service.get_error(id), Some(StreamError::UploadSubmission(_))));
}

#[test]
fn test_destroy_waits_and_frees_once() {
    let decoder = Arc::new(
        ScriptedDecoder::default()
            .with_image("slow.png", rgba8(32, 32, |_, _| 255))
            .with_delay(Duration::from_millis(50)),
    );
    let h = harness(decoder);

    let mut id = h.service.create_texture(TextureCreationRequest::from_file("slow", "slow.png"));
    let mut copy = id;
    // 加载还没有完成，destroy 会一直等到 Ready
    h.service.destroy_texture(&mut id);

    assert_eq!(id, TextureId::INVALID);
    assert_eq!(h.device.created_count(), 1);
    assert_eq!(h.device.destroyed_count(), 1);
    assert_eq!(h.device.live_texture_count(), 0);
    assert!(h.service.get_texture(copy).is_none());
    assert_eq!(h.service.find_texture("slow.png"), None);

    // 再次销毁同一个 id 不会二次释放
    h.service.destroy_texture(&mut copy);
    assert_eq!(copy, TextureId::INVALID);
    assert_eq!(h.device.destroyed_count(), 1);
    assert_eq!(h.device.invalid_destroy_count(), 0);
}

#[test]
fn test_concurrent_destroy_frees_once() {
    let h = harness(Arc::new(ScriptedDecoder::default()));
    let id = h.service.create_texture(TextureCreationRequest::from_raw(
        "shared",
        raw_desc(16, 16),
        vec![raw_buffer(16, 16, 9)],
    ));

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let service = &h.service;
            scope.spawn(move || {
                let mut handle = id;
                service.destroy_texture(&mut handle);
            });
        }
    });
    assert_eq!(h.device.destroyed_count(), 1);
    assert_eq!(h.device.invalid_destroy_count(), 0);
}

#[test]
fn test_staging_pressure_flushes_and_oversized_texture_fails() {
    let heap_size = 64 * 1024;
    let h = harness_with(Arc::new(ScriptedDecoder::default()), heap_size);

    // 32x32 RGBA8: 每行 128 字节对齐到 256，共 8 KiB
    let ids: Vec<_> = (0..16)
        .map(|i| {
            h.service.create_texture(TextureCreationRequest::from_raw(
                format!("tile{}", i),
                raw_desc(32, 32),
                vec![raw_buffer(32, 32, i as u8)],
            ))
        })
        .collect();
    let oversized = h.service.create_texture(TextureCreationRequest::from_raw(
        "oversized",
        raw_desc(256, 256),
        vec![raw_buffer(256, 256, 0)],
    ));

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(h.service.wait_for_texture(*id), Some(TaskState::Ready));
        let resource = h.service.get_texture(*id).unwrap().resource.unwrap();
        let pixels = h.device.read_subresource(resource, 0, 0).unwrap();
        assert!(pixels.iter().all(|&byte| byte == i as u8));
    }
    assert_eq!(h.service.wait_for_texture(oversized), Some(TaskState::Failed));
    assert_eq!(
        h.service.get_error(oversized),
        Some(StreamError::StagingExhausted {
            required: 256 * 1024,
            capacity: heap_size
        })
    );
}

#[test]
fn test_raw_cubemap_and_full_chain() {
    let h = harness(Arc::new(ScriptedDecoder::default()));

    let faces: Vec<_> = (0..6).map(|face| raw_buffer(4, 4, face * 10)).collect();
    let cube = h.service.create_texture(
        TextureCreationRequest::from_raw("cube", raw_desc(4, 4).with_array_layers(6), faces)
            .cubemap()
            .with_mips(true),
    );

    let chain = vec![raw_buffer(4, 4, 1), raw_buffer(2, 2, 2), raw_buffer(1, 1, 3)];
    let chained = h
        .service
        .create_texture(TextureCreationRequest::from_raw("chain", raw_desc(4, 4).with_mip_levels(3), chain));

    assert_eq!(h.service.wait_for_texture(cube), Some(TaskState::Ready));
    let info = h.service.get_texture(cube).unwrap();
    assert!(info.is_cubemap);
    assert_eq!((info.array_layers, info.mip_levels), (6, 3));
    let resource = info.resource.unwrap();
    assert!(h.device.texture_desc(resource).unwrap().is_cube_compatible());
    assert_eq!(h.device.read_subresource(resource, 2, 5).unwrap(), vec![50; 4]);

    assert_eq!(h.service.wait_for_texture(chained), Some(TaskState::Ready));
    let resource = h.service.get_texture(chained).unwrap().resource.unwrap();
    // 调用方提供的 mip 原样上传，不重新生成
    assert_eq!(h.device.read_subresource(resource, 1, 0).unwrap(), vec![2; 16]);
    assert_eq!(h.service.stats().mip_chains, 1);
}

#[test]
fn test_subscribers_see_terminal_events() {
    let h = harness(Arc::new(ScriptedDecoder::default()));
    let events = h.service.subscribe();

    let ok = h.service.create_texture(TextureCreationRequest::from_raw(
        "ok",
        raw_desc(2, 2),
        vec![raw_buffer(2, 2, 0)],
    ));
    let bad = h.service.create_texture(TextureCreationRequest::from_file("bad", "bad.png"));

    let mut received = HashMap::new();
    for _ in 0..2 {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            TextureEvent::Ready(id) => received.insert(id, true),
            TextureEvent::Failed(id, _) => received.insert(id, false),
        };
    }
    assert_eq!(received.get(&ok), Some(&true));
    assert_eq!(received.get(&bad), Some(&false));
}

#[test]
fn test_shutdown_fails_in_flight_and_releases_textures() {
    let decoder = Arc::new(
        ScriptedDecoder::default()
            .with_image("slow.png", rgba8(8, 8, |_, _| 255))
            .with_delay(Duration::from_millis(100)),
    );
    let h = harness(decoder);

    let ready = h.service.create_texture(TextureCreationRequest::from_raw(
        "ready",
        raw_desc(4, 4),
        vec![raw_buffer(4, 4, 0)],
    ));
    assert_eq!(h.service.wait_for_texture(ready), Some(TaskState::Ready));
    let slow = h.service.create_texture(TextureCreationRequest::from_file("slow", "slow.png"));

    h.service.shutdown();
    assert_eq!(h.service.wait_for_texture(slow), Some(TaskState::Failed));
    assert_eq!(h.service.get_error(slow), Some(StreamError::ShutDown));
    assert_eq!(h.device.live_texture_count(), 0);

    // 关闭之后的请求立即失败
    let late = h.service.create_texture(TextureCreationRequest::from_raw(
        "late",
        raw_desc(4, 4),
        vec![raw_buffer(4, 4, 0)],
    ));
    assert_eq!(h.service.wait_for_texture(late), Some(TaskState::Failed));
    assert_eq!(h.service.get_error(late), Some(StreamError::ShutDown));
    // 关闭之后的请求不会留下元数据和路径缓存
    let late_file = h.service.create_texture(TextureCreationRequest::from_file("late_file", "slow.png"));
    assert_ne!(late_file, slow);
    assert_eq!(h.service.wait_for_texture(late_file), Some(TaskState::Failed));
    assert!(h.service.get_texture(late).is_none());
    assert!(h.service.get_texture(late_file).is_none());
    assert_eq!(h.service.find_texture("slow.png"), None);
    assert_eq!(h.service.shared().metadata.len(), 0);
    assert_eq!(h.device.created_count(), 1);
    // 重复关闭没有副作用
    h.service.shutdown();
}

#[test]
fn test_initialize_rejects_invalid_config() {
    init_test_log();
    let device = Arc::new(HeadlessDevice::new());
    let decoder: Arc<dyn ImageDecoder> = Arc::new(ScriptedDecoder::default());

    let misaligned = TextureStreamingConfig {
        staging_alignment: 300,
        ..Default::default()
    };
    let heap = HeadlessUploadHeap::new(device.clone(), HEAP_SIZE);
    assert!(TextureStreamingService::initialize(misaligned, device.clone(), Box::new(heap), decoder.clone()).is_err());

    let no_mip_workers = TextureStreamingConfig {
        mip_workers: 0,
        ..Default::default()
    };
    let heap = HeadlessUploadHeap::new(device.clone(), HEAP_SIZE);
    assert!(TextureStreamingService::initialize(no_mip_workers, device.clone(), Box::new(heap), decoder).is_err());
}

#[test]
fn test_unknown_ids() {
    let h = harness(Arc::new(ScriptedDecoder::default()));
    let unknown = TextureId::from_raw(12345);
    assert_eq!(h.service.wait_for_texture(unknown), None);
    assert!(h.service.get_texture(unknown).is_none());
    assert_eq!(h.service.get_status(unknown), None);

    let mut invalid = TextureId::INVALID;
    h.service.destroy_texture(&mut invalid);
    assert_eq!(h.device.destroyed_count(), 0);
}

#[test]
fn test_end_to_end_png_with_mips() {
    init_test_log();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brick.png");
    let mut rng = rand::thread_rng();
    let brick = image::RgbImage::from_fn(40, 24, |_, _| image::Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]));
    brick.save(&path).unwrap();

    let h = harness_with(Arc::new(ImageCrateDecoder), HEAP_SIZE);
    let id = h
        .service
        .create_texture(TextureCreationRequest::from_file("Tex0", &path).with_mips(true));
    assert_eq!(h.service.wait_for_texture(id), Some(TaskState::Ready));

    let info = h.service.get_texture(id).unwrap();
    assert_eq!(info.format, vk::Format::R8G8B8A8_UNORM);
    assert_eq!((info.width, info.height), (40, 24));
    assert_eq!(info.mip_levels, 6);
    assert!(!info.uses_alpha);
    let resource = info.resource.unwrap();

    let base = h.device.read_subresource(resource, 0, 0).unwrap();
    let expected: Vec<u8> = brick.pixels().flat_map(|pixel| [pixel[0], pixel[1], pixel[2], 255]).collect();
    assert_eq!(base, expected);

    let snapshot = h.service.metadata(id).unwrap();
    assert_eq!(snapshot.request.name, "Tex0");
    assert!(snapshot.request.desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
}
