use ash::vk;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::foundation::device::GfxDevice;
use crate::resources::{
    footprint::GfxCopyFootprints,
    handles::{GfxAllocationHandle, GfxResourceHandle, GfxTexture},
    image::{GfxClearValue, GfxMemoryLocation, GfxTextureCreateInfo, GfxTextureDesc, VulkanFormatUtils},
};

struct HeadlessImage {
    info: GfxTextureCreateInfo,
    allocation: GfxAllocationHandle,
    layout: vk::ImageLayout,
    /// 每个 subresource 紧密排列的像素，顺序为 `layer * mip_levels + mip`
    subresources: Vec<Vec<u8>>,
}

/// 在 CPU 内存中模拟 GPU 资源的 device
pub struct HeadlessDevice {
    images: Mutex<HashMap<GfxResourceHandle, HeadlessImage>>,
    next_handle: AtomicU64,

    row_pitch_alignment: u64,
    placement_alignment: u64,
    max_dimension: u32,

    fail_allocations: AtomicBool,
    fail_submissions: AtomicBool,

    created_count: AtomicU64,
    destroyed_count: AtomicU64,
    invalid_destroy_count: AtomicU64,
    copy_count: AtomicU64,
    submission_count: AtomicU64,
}
impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessDevice {
    /// 与 D3D12 一致：row pitch 256 字节对齐，subresource 512 字节对齐
    pub fn new() -> Self {
        Self::with_alignments(256, 512)
    }

    pub fn with_alignments(row_pitch_alignment: u64, placement_alignment: u64) -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            row_pitch_alignment,
            placement_alignment,
            max_dimension: 16384,
            fail_allocations: AtomicBool::new(false),
            fail_submissions: AtomicBool::new(false),
            created_count: AtomicU64::new(0),
            destroyed_count: AtomicU64::new(0),
            invalid_destroy_count: AtomicU64::new(0),
            copy_count: AtomicU64::new(0),
            submission_count: AtomicU64::new(0),
        }
    }
}
// getters
impl HeadlessDevice {
    pub fn live_texture_count(&self) -> usize {
        self.lock_images().len()
    }

    pub fn created_count(&self) -> u64 {
        self.created_count.load(Ordering::Acquire)
    }

    pub fn destroyed_count(&self) -> u64 {
        self.destroyed_count.load(Ordering::Acquire)
    }

    /// 对不存在的资源调用 destroy 的次数 (double free)
    pub fn invalid_destroy_count(&self) -> u64 {
        self.invalid_destroy_count.load(Ordering::Acquire)
    }

    /// 执行过的 buffer -> image 拷贝次数
    pub fn copy_count(&self) -> u64 {
        self.copy_count.load(Ordering::Acquire)
    }

    /// upload heap flush 的次数
    pub fn submission_count(&self) -> u64 {
        self.submission_count.load(Ordering::Acquire)
    }

    pub fn texture_layout(&self, resource: GfxResourceHandle) -> Option<vk::ImageLayout> {
        self.lock_images().get(&resource).map(|image| image.layout)
    }

    pub fn texture_desc(&self, resource: GfxResourceHandle) -> Option<GfxTextureDesc> {
        self.lock_images().get(&resource).map(|image| image.info.desc)
    }

    pub fn texture_memory(&self, resource: GfxResourceHandle) -> Option<GfxMemoryLocation> {
        self.lock_images().get(&resource).map(|image| image.info.memory)
    }

    pub fn texture_clear_value(&self, resource: GfxResourceHandle) -> Option<GfxClearValue> {
        self.lock_images().get(&resource).and_then(|image| image.info.clear_value)
    }

    /// 读回某个 subresource 的像素 (紧密排列)
    pub fn read_subresource(&self, resource: GfxResourceHandle, mip_level: u32, array_layer: u32) -> Option<Vec<u8>> {
        let images = self.lock_images();
        let image = images.get(&resource)?;
        let desc = &image.info.desc;
        if mip_level >= desc.mip_levels || array_layer >= desc.array_layers {
            return None;
        }
        image.subresources.get((array_layer * desc.mip_levels + mip_level) as usize).cloned()
    }
}
// tools
impl HeadlessDevice {
    /// 之后的 `create_texture` 全部失败，用于模拟 allocator 拒绝分配
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Release);
    }

    /// 之后的 upload heap 提交全部失败，用于模拟 device lost
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::Release);
    }

    pub(crate) fn submissions_failing(&self) -> bool {
        self.fail_submissions.load(Ordering::Acquire)
    }

    fn lock_images(&self) -> std::sync::MutexGuard<'_, HashMap<GfxResourceHandle, HeadlessImage>> {
        // 锁中毒只可能来自测试线程 panic，数据本身仍然一致
        self.images.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn validate(&self, info: &GfxTextureCreateInfo) -> anyhow::Result<u32> {
        let desc = &info.desc;
        let texel_size = VulkanFormatUtils::pixel_size_in_bytes(desc.format)
            .ok_or_else(|| anyhow::anyhow!("unsupported format {:?}", desc.format))?;

        // 按真实 device 会拿到的 vk::ImageCreateInfo 检查
        let image_info = desc.as_image_create_info();
        anyhow::ensure!(
            image_info.samples == vk::SampleCountFlags::TYPE_1 || image_info.mip_levels == 1,
            "multisampled texture {} can not have mips",
            info.name
        );
        anyhow::ensure!(
            image_info.samples == vk::SampleCountFlags::TYPE_1 || !desc.is_cube_compatible(),
            "multisampled texture {} can not be cube compatible",
            info.name
        );

        anyhow::ensure!(
            desc.width() > 0 && desc.height() > 0,
            "zero sized texture: {}x{}",
            desc.width(),
            desc.height()
        );
        anyhow::ensure!(
            desc.width() <= self.max_dimension && desc.height() <= self.max_dimension,
            "texture {}x{} exceeds max dimension {}",
            desc.width(),
            desc.height(),
            self.max_dimension
        );
        anyhow::ensure!(desc.array_layers > 0, "array_layers must be at least 1");
        let max_mips = GfxTextureDesc::full_mip_count(desc.width(), desc.height());
        anyhow::ensure!(
            (1..=max_mips).contains(&desc.mip_levels),
            "mip_levels {} out of range 1..={}",
            desc.mip_levels,
            max_mips
        );
        if desc.is_cube_compatible() {
            anyhow::ensure!(
                desc.width() == desc.height() && desc.array_layers % 6 == 0,
                "cube compatible texture must be square with a multiple of 6 layers"
            );
        }
        if info.initial_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            anyhow::ensure!(
                desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST),
                "TRANSFER_DST_OPTIMAL layout requires TRANSFER_DST usage"
            );
        }

        Ok(texel_size)
    }

    /// 执行一次录制好的拷贝：从 staging 内存写入目标纹理
    pub(crate) fn execute_copy(
        &self,
        staging: &[u8],
        dst: GfxResourceHandle,
        dst_layout: vk::ImageLayout,
        region: &vk::BufferImageCopy,
    ) -> anyhow::Result<()> {
        let mut images = self.lock_images();
        let image = images.get_mut(&dst).ok_or_else(|| anyhow::anyhow!("copy into unknown texture {:?}", dst))?;

        anyhow::ensure!(
            dst_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL && image.layout == dst_layout,
            "copy into {} while in layout {:?} (recorded as {:?})",
            image.info.name,
            image.layout,
            dst_layout
        );

        let desc = image.info.desc;
        let subresource = region.image_subresource;
        anyhow::ensure!(
            subresource.mip_level < desc.mip_levels && subresource.base_array_layer < desc.array_layers,
            "copy region out of range: mip {} layer {}",
            subresource.mip_level,
            subresource.base_array_layer
        );

        let texel_size = VulkanFormatUtils::pixel_size_in_bytes(desc.format).unwrap_or(0) as usize;
        let (width, height) = desc.mip_extent(subresource.mip_level);
        anyhow::ensure!(
            region.image_extent.width == width && region.image_extent.height == height,
            "partial subresource copy is not supported"
        );

        let row_size = width as usize * texel_size;
        let row_length = if region.buffer_row_length == 0 { width } else { region.buffer_row_length };
        let row_pitch = row_length as usize * texel_size;
        let base = region.buffer_offset as usize;
        let last_row_end = base + row_pitch * (height as usize - 1) + row_size;
        anyhow::ensure!(
            last_row_end <= staging.len(),
            "copy reads past the end of the upload heap"
        );

        let target = &mut image.subresources[(subresource.base_array_layer * desc.mip_levels + subresource.mip_level) as usize];
        target.clear();
        target.reserve(row_size * height as usize);
        for row in 0..height as usize {
            let begin = base + row * row_pitch;
            target.extend_from_slice(&staging[begin..begin + row_size]);
        }

        self.copy_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub(crate) fn record_submission(&self) {
        self.submission_count.fetch_add(1, Ordering::AcqRel);
    }
}
impl GfxDevice for HeadlessDevice {
    fn create_texture(&self, info: &GfxTextureCreateInfo) -> anyhow::Result<GfxTexture> {
        let _span = tracy_client::span!("HeadlessDevice::create_texture");

        if self.fail_allocations.load(Ordering::Acquire) {
            anyhow::bail!("allocation refused for {}", info.name);
        }
        self.validate(info)?;

        let raw = self.next_handle.fetch_add(1, Ordering::AcqRel);
        let resource = GfxResourceHandle::from_raw(raw);
        let allocation = GfxAllocationHandle::from_raw(raw);

        let image = HeadlessImage {
            info: info.clone(),
            allocation,
            layout: info.initial_layout,
            subresources: vec![Vec::new(); info.desc.subresource_count() as usize],
        };
        self.lock_images().insert(resource, image);
        self.created_count.fetch_add(1, Ordering::AcqRel);

        log::debug!(
            "HeadlessDevice: created {} {:?} {}x{} ({:?})",
            info.name,
            resource,
            info.desc.width(),
            info.desc.height(),
            info.desc.format
        );
        Ok(GfxTexture::new(resource, allocation))
    }

    fn destroy_texture(&self, texture: GfxTexture) {
        match self.lock_images().remove(&texture.resource()) {
            Some(image) => {
                debug_assert_eq!(image.allocation, texture.allocation());
                self.destroyed_count.fetch_add(1, Ordering::AcqRel);
                log::debug!("HeadlessDevice: destroyed {}", image.info.name);
            }
            None => {
                self.invalid_destroy_count.fetch_add(1, Ordering::AcqRel);
                log::error!("HeadlessDevice: destroy of unknown texture {:?}", texture.resource());
            }
        }
    }

    fn transition_texture(
        &self,
        resource: GfxResourceHandle,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> anyhow::Result<()> {
        let mut images = self.lock_images();
        let image = images.get_mut(&resource).ok_or_else(|| anyhow::anyhow!("transition of unknown texture {:?}", resource))?;
        anyhow::ensure!(
            image.layout == old_layout,
            "{}: barrier expects {:?} but texture is in {:?}",
            image.info.name,
            old_layout,
            image.layout
        );
        image.layout = new_layout;
        Ok(())
    }

    fn copy_footprints(&self, desc: &GfxTextureDesc) -> anyhow::Result<GfxCopyFootprints> {
        GfxCopyFootprints::compute(desc, self.row_pitch_alignment, self.placement_alignment)
    }
}
