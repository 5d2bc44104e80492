use ash::vk;
use std::sync::Arc;

use crate::commands::upload_heap::{GfxLinearAllocator, GfxStagingAllocation, GfxUploadHeap};
use crate::headless::device::HeadlessDevice;
use crate::resources::handles::GfxResourceHandle;

struct RecordedCopy {
    dst: GfxResourceHandle,
    dst_layout: vk::ImageLayout,
    region: vk::BufferImageCopy,
}

/// 线性分配的 staging heap，拷贝在 flush 时才真正执行
pub struct HeadlessUploadHeap {
    device: Arc<HeadlessDevice>,
    memory: Vec<u8>,
    allocator: GfxLinearAllocator,
    recorded: Vec<RecordedCopy>,
}
// new & init
impl HeadlessUploadHeap {
    pub fn new(device: Arc<HeadlessDevice>, capacity: u64) -> Self {
        Self {
            device,
            memory: vec![0; capacity as usize],
            allocator: GfxLinearAllocator::new(capacity),
            recorded: Vec::new(),
        }
    }
}
impl GfxUploadHeap for HeadlessUploadHeap {
    fn capacity(&self) -> u64 {
        self.allocator.capacity()
    }

    fn used(&self) -> u64 {
        self.allocator.used()
    }

    fn suballocate(&mut self, size: u64, alignment: u64) -> Option<GfxStagingAllocation> {
        self.allocator.suballocate(size, alignment)
    }

    fn mapped_mut(&mut self, allocation: &GfxStagingAllocation) -> &mut [u8] {
        let begin = allocation.offset as usize;
        &mut self.memory[begin..begin + allocation.size as usize]
    }

    fn cmd_copy_buffer_to_image(&mut self, dst: GfxResourceHandle, dst_layout: vk::ImageLayout, region: vk::BufferImageCopy) {
        self.recorded.push(RecordedCopy { dst, dst_layout, region });
    }

    fn upload_to_gpu_and_wait(&mut self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("HeadlessUploadHeap::upload_to_gpu_and_wait");

        let recorded = std::mem::take(&mut self.recorded);
        let copy_count = recorded.len();
        // 无论成功与否，这次提交的 staging 内存都可以回收了
        let result = if self.device.submissions_failing() {
            Err(anyhow::anyhow!("queue submit failed: device lost"))
        } else {
            recorded
                .iter()
                .try_for_each(|copy| self.device.execute_copy(&self.memory, copy.dst, copy.dst_layout, &copy.region))
        };
        self.allocator.reset();
        self.device.record_submission();

        log::debug!("HeadlessUploadHeap: flushed {} copies", copy_count);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::device::GfxDevice;
    use crate::resources::image::{GfxMemoryLocation, GfxTextureCreateInfo, GfxTextureDesc};

    #[test]
    fn test_copy_honours_row_pitch() {
        let device = Arc::new(HeadlessDevice::new());
        let mut heap = HeadlessUploadHeap::new(device.clone(), 64 * 1024);

        let desc = GfxTextureDesc::new_2d(3, 2, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::TRANSFER_DST);
        let texture = device
            .create_texture(&GfxTextureCreateInfo {
                desc,
                initial_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                clear_value: None,
                memory: GfxMemoryLocation::GpuOnly,
                name: "pitch".to_string(),
            })
            .unwrap();

        let footprints = device.copy_footprints(&desc).unwrap();
        let footprint = footprints.subresources[0];
        assert_eq!(footprint.row_pitch, 256);

        let allocation = heap.suballocate(footprints.total_size, 512).unwrap();
        let pixels: Vec<u8> = (0..24).collect();
        {
            let mapped = heap.mapped_mut(&allocation);
            for row in 0..2 {
                let dst = row * footprint.row_pitch as usize;
                mapped[dst..dst + 12].copy_from_slice(&pixels[row * 12..row * 12 + 12]);
            }
        }
        heap.cmd_copy_buffer_to_image(
            texture.resource(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            footprint.buffer_image_copy(allocation.offset, vk::ImageAspectFlags::COLOR),
        );
        heap.upload_to_gpu_and_wait().unwrap();

        assert_eq!(device.read_subresource(texture.resource(), 0, 0).unwrap(), pixels);
        assert_eq!(device.copy_count(), 1);
        assert_eq!(device.submission_count(), 1);
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn test_copy_rejected_outside_transfer_layout() {
        let device = Arc::new(HeadlessDevice::new());
        let mut heap = HeadlessUploadHeap::new(device.clone(), 64 * 1024);

        let desc = GfxTextureDesc::new_2d(2, 2, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        let texture = device
            .create_texture(&GfxTextureCreateInfo {
                desc,
                initial_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                clear_value: None,
                memory: GfxMemoryLocation::GpuOnly,
                name: "wrong-layout".to_string(),
            })
            .unwrap();
        let footprints = device.copy_footprints(&desc).unwrap();
        let allocation = heap.suballocate(footprints.total_size, 512).unwrap();
        heap.cmd_copy_buffer_to_image(
            texture.resource(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            footprints.subresources[0].buffer_image_copy(allocation.offset, vk::ImageAspectFlags::COLOR),
        );

        assert!(heap.upload_to_gpu_and_wait().is_err());
        assert_eq!(device.copy_count(), 0);
        assert_eq!(heap.used(), 0);
    }
}
