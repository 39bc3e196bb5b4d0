use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 全局退出标志：只会被置位一次，不会被清除
///
/// 所有阻塞等待（包队列、帧缓冲、刷新定时器）醒来后都要检查它。
#[derive(Debug, Clone, Default)]
pub struct QuitFlag {
    inner: Arc<AtomicBool>,
}

impl QuitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 置位，返回是否是第一次置位
    pub fn raise(&self) -> bool {
        !self.inner.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_once() {
        let flag = QuitFlag::new();
        let other = flag.clone();
        assert!(!other.is_raised());
        assert!(flag.raise());
        assert!(!flag.raise());
        assert!(other.is_raised());
    }
}
