//! Headless 后端
//!
//! 所有资源都保存在 CPU 内存中：
//! - [`HeadlessDevice`] 记录每个纹理的描述、当前 layout 以及每个 subresource 的像素
//! - [`HeadlessUploadHeap`] 是一个真正的线性分配 staging heap，flush 时把录制的拷贝执行到 device 的纹理里
//!
//! 拷贝时会检查目标纹理是否处于 `TRANSFER_DST_OPTIMAL`，行为上接近一个带 validation 的 GPU。

mod device;
mod upload_heap;

pub use device::HeadlessDevice;
pub use upload_heap::HeadlessUploadHeap;
