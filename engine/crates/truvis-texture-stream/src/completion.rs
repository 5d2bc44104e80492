use std::sync::{Condvar, Mutex};

use crate::error::StreamError;

/// 任务的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Ready,
    Failed(StreamError),
}

/// 一次性完成信号
///
/// 内部是一个 "pending / resolved(outcome)" 的槽位加条件变量：
/// - `fire` 只能调用一次，第二次调用在 debug 下 panic，release 下记录错误并忽略
/// - `wait` 可以在任意时刻、任意次数调用，信号已触发时立即返回
#[derive(Debug, Default)]
pub struct CompletionSignal {
    slot: Mutex<Option<TaskOutcome>>,
    cond: Condvar,
}
impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self, outcome: TaskOutcome) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.as_ref() {
            debug_assert!(false, "completion signal fired twice: {:?} then {:?}", previous, outcome);
            log::error!("completion signal fired twice: {:?} then {:?}, ignored", previous, outcome);
            return;
        }
        *slot = Some(outcome);
        drop(slot);
        self.cond.notify_all();
    }

    /// 阻塞直到信号触发
    pub fn wait(&self) -> TaskOutcome {
        let slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = self
            .cond
            .wait_while(slot, |slot| slot.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.clone().unwrap_or(TaskOutcome::Failed(StreamError::ShutDown))
    }

    /// 非阻塞查询
    pub fn try_outcome(&self) -> Option<TaskOutcome> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    #[inline]
    pub fn is_fired(&self) -> bool {
        self.try_outcome().is_some()
    }
}
