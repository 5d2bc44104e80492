//! Truvis 纹理流式加载
//!
//! 把 "从文件 / 内存 / 空白创建纹理" 的请求变成一个可用的 GPU 资源。
//! 磁盘读取、mip 生成、资源分配、GPU 上传分别在各自的线程中并行进行，
//! 调用线程除非显式等待，否则不会阻塞。入口是 [`TextureStreamingService`]。

pub mod alpha_scan;
pub mod completion;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handle;
pub mod metadata;
pub mod request;
pub mod service;
pub mod stats;
pub mod task_registry;
pub mod transient;

mod stages;

#[cfg(test)]
mod pipeline_tests;

pub use config::TextureStreamingConfig;
pub use decoder::{DecodedImage, ImageCrateDecoder, ImageDecoder};
pub use error::StreamError;
pub use handle::{TaskState, TextureId};
pub use metadata::{TextureInfo, TextureMetadataSnapshot, TextureViews};
pub use request::{TextureCreationRequest, TextureSource};
pub use service::TextureStreamingService;
pub use task_registry::TextureEvent;
