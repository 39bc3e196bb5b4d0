use crate::core::{EncodedUnit, QuitFlag, StreamKind};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// pop 的结果
#[derive(Debug, PartialEq)]
pub enum PopResult {
    Unit(EncodedUnit),
    /// 当前没有数据（非阻塞调用，或阻塞等待超时）
    Empty,
    /// 上游已结束且队列已空，解码线程应 flush 后退出
    Drained,
    /// 全局退出标志已置位，调用方必须退出而不是重试
    Cancelled,
}

/// 按字节数限流的包队列（单生产者 / 单消费者）
///
/// - push 永不阻塞：由 demux 线程在读取前检查 `is_full()` 自行退避
/// - 不变量：`size == 队列中所有 unit 的字节数之和`
pub struct BoundedUnitQueue {
    kind: StreamKind,
    max_bytes: usize,
    state: Mutex<QueueState>,
    cond: Condvar,
    quit: QuitFlag,
}

#[derive(Default)]
struct QueueState {
    units: VecDeque<EncodedUnit>,
    size: usize,
    drained: bool,
}

impl BoundedUnitQueue {
    pub fn new(kind: StreamKind, max_bytes: usize, quit: QuitFlag) -> Self {
        Self {
            kind,
            max_bytes,
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
            quit,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// 追加到队尾，唤醒一个等待的消费者
    pub fn push(&self, unit: EncodedUnit) {
        let mut state = self.state.lock();
        state.size += unit.byte_size();
        state.units.push_back(unit);
        self.cond.notify_one();
    }

    /// 取出队头
    ///
    /// `block = true` 时等待直到有数据、退出标志置位或超时；超时返回 `Empty`，
    /// 让调用方有机会重新检查自己的状态。
    pub fn pop(&self, block: bool, timeout: Duration) -> PopResult {
        let mut state = self.state.lock();
        let mut waited = false;

        loop {
            if self.quit.is_raised() {
                return PopResult::Cancelled;
            }

            if let Some(unit) = state.units.pop_front() {
                state.size -= unit.byte_size();
                return PopResult::Unit(unit);
            }

            if state.drained {
                return PopResult::Drained;
            }

            if !block || waited {
                return PopResult::Empty;
            }

            // 虚假唤醒也会回到循环顶部重新检查
            waited = self.cond.wait_for(&mut state, timeout).timed_out();
        }
    }

    /// 标记上游结束（终止哨兵）
    pub fn mark_drained(&self) {
        let mut state = self.state.lock();
        state.drained = true;
        self.cond.notify_all();
    }

    pub fn is_drained(&self) -> bool {
        self.state.lock().drained
    }

    /// 已积压字节数是否达到上限
    pub fn is_full(&self) -> bool {
        self.size() >= self.max_bytes
    }

    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    pub fn len(&self) -> usize {
        self.state.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// 退出时唤醒所有等待者
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }
}
