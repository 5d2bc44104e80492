use crate::handle::{TaskState, TextureId};

/// 流式加载过程中的错误
///
/// 所有流水线错误的处理方式相同：记录日志，任务进入 Failed，唤醒等待者。
/// 不会自动重试，也不会自动释放该任务的其他资源。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// 文件不存在/损坏，或者 raw 数据为空、数量不匹配
    #[error("decode failed: {0}")]
    DecodeFailure(String),

    /// device / allocator 拒绝创建资源
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// 进入 Uploading 时没有可上传的数据，且不是合法的无数据分配
    #[error("upload data missing: {0}")]
    UploadDataMissing(String),

    /// 单个纹理的完整 mip chain 超过了整个 upload heap
    #[error("texture needs {required} staging bytes but the upload heap holds {capacity}")]
    StagingExhausted { required: u64, capacity: u64 },

    /// upload heap 提交或等待失败
    #[error("upload submission failed: {0}")]
    UploadSubmission(String),

    /// 服务正在关闭，任务不再继续
    #[error("texture streaming service is shutting down")]
    ShutDown,

    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),

    #[error("texture {id:?} cannot advance from {state:?}")]
    InvalidTransition { id: TextureId, state: TaskState },
}
