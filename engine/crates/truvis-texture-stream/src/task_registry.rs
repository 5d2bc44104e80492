use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::completion::{CompletionSignal, TaskOutcome};
use crate::error::StreamError;
use crate::handle::{TaskRoute, TaskState, TextureId, next_state};

/// 任务进入终态时广播给订阅者的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureEvent {
    Ready(TextureId),
    Failed(TextureId, StreamError),
}

struct TaskRecord {
    state: TaskState,
    route: TaskRoute,
    signal: Arc<CompletionSignal>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<TextureId, TaskRecord>,
    subscribers: Vec<Sender<TextureEvent>>,
}
impl RegistryInner {
    /// 广播事件，顺便清理已经断开的订阅者
    fn broadcast(&mut self, event: &TextureEvent) {
        self.subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// 任务状态注册表
///
/// 每个 id 一条状态记录和一个一次性完成信号。所有修改都由同一把锁串行化；
/// 完成信号在锁释放之后才触发，等待者醒来时不会和 worker 抢这把锁。
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}
// new & init
impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}
// state machine
impl TaskRegistry {
    /// 登记一个新任务，初始为 Pending
    pub fn create(&self, id: TextureId, route: TaskRoute) {
        let mut inner = self.lock();
        let previous = inner.tasks.insert(
            id,
            TaskRecord {
                state: TaskState::Pending,
                route,
                signal: Arc::new(CompletionSignal::new()),
            },
        );
        debug_assert!(previous.is_none(), "texture id {:?} registered twice", id);
    }

    /// 按状态表推进一步并返回新状态；进入 Ready 时触发完成信号
    pub fn advance(&self, id: TextureId) -> Result<TaskState, StreamError> {
        let (next, signal) = {
            let mut inner = self.lock();
            Self::advance_locked(&mut inner, id)?
        };
        if let Some(signal) = signal {
            signal.fire(TaskOutcome::Ready);
        }
        Ok(next)
    }

    /// 在一次加锁内推进一批任务，upload 线程用它原子地把整批任务标记为 Ready
    pub fn advance_all(&self, ids: &[TextureId]) -> Vec<(TextureId, Result<TaskState, StreamError>)> {
        let mut signals = Vec::new();
        let results: Vec<_> = {
            let mut inner = self.lock();
            ids.iter()
                .map(|&id| {
                    let result = Self::advance_locked(&mut inner, id).map(|(next, signal)| {
                        signals.extend(signal);
                        next
                    });
                    (id, result)
                })
                .collect()
        };
        for signal in signals {
            signal.fire(TaskOutcome::Ready);
        }
        results
    }

    /// 强制进入 Failed 并立即唤醒等待者
    ///
    /// 返回 false 表示任务不存在或者已经处于终态
    pub fn fail(&self, id: TextureId, error: StreamError) -> bool {
        let signal = {
            let mut inner = self.lock();
            let Some(record) = inner.tasks.get_mut(&id) else {
                return false;
            };
            if record.state.is_terminal() {
                return false;
            }
            record.state = TaskState::Failed;
            let signal = record.signal.clone();
            inner.broadcast(&TextureEvent::Failed(id, error.clone()));
            signal
        };
        signal.fire(TaskOutcome::Failed(error));
        true
    }

    fn advance_locked(
        inner: &mut RegistryInner,
        id: TextureId,
    ) -> Result<(TaskState, Option<Arc<CompletionSignal>>), StreamError> {
        let record = inner.tasks.get_mut(&id).ok_or(StreamError::UnknownTexture(id))?;
        let next = next_state(record.state, record.route).ok_or(StreamError::InvalidTransition {
            id,
            state: record.state,
        })?;
        record.state = next;

        if next == TaskState::Ready {
            let signal = record.signal.clone();
            inner.broadcast(&TextureEvent::Ready(id));
            return Ok((next, Some(signal)));
        }
        Ok((next, None))
    }
}
// query & wait
impl TaskRegistry {
    /// 阻塞直到任务进入终态；未知 id 返回 None
    ///
    /// 锁只用于取出信号，等待期间不持有任何锁
    pub fn wait(&self, id: TextureId) -> Option<TaskOutcome> {
        let signal = self.signal(id)?;
        Some(signal.wait())
    }

    pub fn signal(&self, id: TextureId) -> Option<Arc<CompletionSignal>> {
        self.lock().tasks.get(&id).map(|record| record.signal.clone())
    }

    pub fn state(&self, id: TextureId) -> Option<TaskState> {
        self.lock().tasks.get(&id).map(|record| record.state)
    }

    /// 所有尚未进入终态的任务
    pub fn in_flight(&self) -> Vec<TextureId> {
        self.lock()
            .tasks
            .iter()
            .filter(|(_, record)| !record.state.is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
// tools
impl TaskRegistry {
    pub fn remove(&self, id: TextureId) -> bool {
        self.lock().tasks.remove(&id).is_some()
    }

    pub fn subscribe(&self) -> Receiver<TextureEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.lock().subscribers.push(sender);
        receiver
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
