//! Truvis GFX 边界
//!
//! 纹理流式加载只通过这里的接口接触 GPU：
//! - [`foundation::device::GfxDevice`]：创建/销毁纹理资源，layout 转换，拷贝 footprint
//! - [`commands::upload_heap::GfxUploadHeap`]：线性分配的 staging heap，录制 buffer -> image 拷贝，flush 并等待
//!
//! 资源描述统一使用 `ash::vk` 的类型。[`headless`] 提供一个完全在 CPU 内存中运行的后端，
//! 用于测试和没有 GPU 的环境。

pub mod commands;
pub mod foundation;
pub mod headless;
pub mod resources;
