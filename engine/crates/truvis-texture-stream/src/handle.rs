use std::fmt;

/// 纹理的唯一标识
///
/// 单调递增，进程内永不复用：过期的句柄只会查不到，不会指向别的资源。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);
impl TextureId {
    /// 无效句柄，`destroy_texture` 之后句柄会被置为它
    pub const INVALID: TextureId = TextureId(0);

    #[inline]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}
impl fmt::Debug for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextureId({})", self.0)
    }
}
impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 加载任务的状态机
///
/// 状态流转: Pending -> Reading -> (MipGenerating) -> Allocating -> Uploading -> Ready
///                   \-> Allocating (没有源数据)
///           任意非终态 -> Failed
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskState {
    /// 已登记，尚未派发
    Pending,
    /// IO 阶段：读取文件并解码，或者直接接管 raw buffer
    Reading,
    /// CPU 端生成 mip chain
    MipGenerating,
    /// 单线程创建 GPU 资源
    Allocating,
    /// 已进入 upload 队列，等待 upload 线程拷贝
    Uploading,
    /// GPU 资源已就绪
    Ready,
    /// 任一阶段失败
    Failed,
}
impl TaskState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Failed)
    }
}

/// 决定状态表分支的两个请求属性，在任务创建时确定
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TaskRoute {
    /// 有文件路径或者 raw buffer
    pub has_source: bool,
    pub generate_mips: bool,
}

/// 状态表：给定当前状态，返回唯一的下一个状态；终态没有下一个状态
pub fn next_state(current: TaskState, route: TaskRoute) -> Option<TaskState> {
    let next = match current {
        TaskState::Pending if route.has_source => TaskState::Reading,
        TaskState::Pending => TaskState::Allocating,
        TaskState::Reading if route.generate_mips => TaskState::MipGenerating,
        TaskState::Reading => TaskState::Allocating,
        TaskState::MipGenerating => TaskState::Allocating,
        TaskState::Allocating => TaskState::Uploading,
        TaskState::Uploading => TaskState::Ready,
        TaskState::Ready | TaskState::Failed => return None,
    };
    Some(next)
}
