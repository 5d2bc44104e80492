//! 资源分配阶段 (GPU worker，单线程)

use ash::vk;
use std::sync::Arc;
use truvis_gfx::resources::image::{GfxClearValue, GfxMemoryLocation, GfxTextureCreateInfo};

use crate::alpha_scan;
use crate::error::StreamError;
use crate::handle::TextureId;
use crate::request::TextureCreationRequest;
use crate::service::{StreamingShared, advance_and_dispatch};

pub(crate) fn run(shared: &Arc<StreamingShared>, id: TextureId) {
    let _span = tracy_client::span!("allocate_stage");

    let Some(request) = shared.metadata.request(id) else {
        shared.fail_task(id, StreamError::UnknownTexture(id));
        return;
    };

    let create_info = texture_create_info(&request);
    let texture = match shared.device.create_texture(&create_info) {
        Ok(texture) => texture,
        Err(e) => {
            shared.fail_task(id, StreamError::AllocationFailure(format!("{}: {:#}", request.name, e)));
            return;
        }
    };

    // 扫描每个 layer 的 base level，这一阶段独占该任务的 transient data
    let uses_alpha = match shared.transient.take(id) {
        Some(data) => {
            let uses_alpha = alpha_scan::uses_alpha_layers(
                create_info.desc.format,
                data.slices.iter().filter_map(|mips| mips.first()).map(|base| base.pixels.as_bytes()),
            );
            shared.transient.insert(id, data);
            uses_alpha
        }
        None => false,
    };

    let resource = texture.resource();
    shared.metadata.update_request(id, |request| request.desc = create_info.desc);
    if let Err(texture) = shared.metadata.set_allocated(id, texture, uses_alpha) {
        // 元数据已经被移除 (服务关闭)，资源不能泄漏
        shared.device.destroy_texture(texture);
        shared.fail_task(id, StreamError::UnknownTexture(id));
        return;
    }
    shared.stats.record_allocation();
    log::debug!(
        "allocated {} ({}) as {:?}, initial layout {:?}, uses alpha: {}",
        id,
        request.name,
        resource,
        create_info.initial_layout,
        uses_alpha
    );

    advance_and_dispatch(shared, id);
}

/// 根据请求决定 usage、初始 layout、clear value 和内存位置
pub(crate) fn texture_create_info(request: &TextureCreationRequest) -> GfxTextureCreateInfo {
    let mut desc = request.desc;

    let initial_layout = if request.source.has_data() {
        desc.usage |= vk::ImageUsageFlags::TRANSFER_DST;
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else {
        request.desired_layout
    };

    if request.is_cubemap {
        desc.flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
    }

    let clear_value = if desc.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        Some(GfxClearValue::DepthStencil { depth: 1.0, stencil: 0 })
    } else if desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        Some(GfxClearValue::Color([0.0; 4]))
    } else {
        None
    };

    let memory = if request.is_cpu_readback {
        desc.usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        GfxMemoryLocation::GpuToCpu
    } else {
        GfxMemoryLocation::GpuOnly
    };

    GfxTextureCreateInfo {
        desc,
        initial_layout,
        clear_value,
        memory,
        name: request.name.clone(),
    }
}
