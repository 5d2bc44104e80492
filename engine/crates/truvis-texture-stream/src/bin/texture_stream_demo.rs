//! 纹理流式加载演示
//!
//! 在 headless 后端上加载命令行给出的所有图片，外加一个 depth target，等待全部完成后打印结果。
//!
//! 用法: `texture_stream_demo [--config streaming.toml] <image>...`

use anyhow::Context;
use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;
use truvis_crate_tools::init_log::init_log;
use truvis_gfx::headless::{HeadlessDevice, HeadlessUploadHeap};
use truvis_gfx::resources::image::GfxTextureDesc;
use truvis_texture_stream::{
    ImageCrateDecoder, TaskState, TextureCreationRequest, TextureStreamingConfig, TextureStreamingService,
};

const UPLOAD_HEAP_SIZE: u64 = 64 * 1024 * 1024;

struct DemoArgs {
    config: Option<PathBuf>,
    images: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<DemoArgs> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut images = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = Some(PathBuf::from(args.next().context("--config needs a file path")?));
        } else {
            images.push(PathBuf::from(arg));
        }
    }
    Ok(DemoArgs { config, images })
}

fn main() -> anyhow::Result<()> {
    init_log();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => TextureStreamingConfig::from_file(path)?,
        None => TextureStreamingConfig::default(),
    };
    log::info!("streaming config: {:?}", config);

    let device = Arc::new(HeadlessDevice::new());
    let upload_heap = HeadlessUploadHeap::new(device.clone(), UPLOAD_HEAP_SIZE);
    let service =
        TextureStreamingService::initialize(config, device.clone(), Box::new(upload_heap), Arc::new(ImageCrateDecoder))?;

    let mut ids = Vec::with_capacity(args.images.len() + 1);
    for path in &args.images {
        let name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
        ids.push(service.create_texture(TextureCreationRequest::from_file(name, path).with_mips(true)));
    }
    ids.push(service.create_texture(TextureCreationRequest::uninitialized(
        "SceneDepth",
        GfxTextureDesc::new_2d(
            1920,
            1080,
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    )));

    for mut id in ids {
        let state = service.wait_for_texture(id);
        match (state, service.metadata(id)) {
            (Some(TaskState::Ready), Some(snapshot)) => {
                let info = snapshot.info;
                log::info!(
                    "{} {}: {}x{} {:?}, {} mips, {} layers, uses alpha: {}",
                    id,
                    snapshot.request.name,
                    info.width,
                    info.height,
                    info.format,
                    info.mip_levels,
                    info.array_layers,
                    info.uses_alpha
                );
            }
            _ => log::error!("{} failed: {:?}", id, service.get_error(id)),
        }
        service.destroy_texture(&mut id);
    }

    log::info!("{}", service.stats());
    service.shutdown();
    log::info!("live textures after shutdown: {}", device.live_texture_count());
    Ok(())
}
