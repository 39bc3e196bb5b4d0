use crate::core::{AvClock, PlayerConfig, PlayerError, QuitFlag, StreamKind};
use crate::player::log_ctx;
use crossbeam_channel::Sender;
use log::error;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 工作线程类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Demux,
    Decode(StreamKind),
}

/// 发往控制线程的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// 刷新定时器到期，请求显示下一帧
    Refresh,
    /// 解码线程向帧缓冲提交了一帧
    FrameReady(StreamKind),
    /// 工作线程正常结束（文件读完 / 解码器 flush 完成）
    WorkerFinished(WorkerKind),
    /// 工作线程遇到致命错误（错误本身记录在 PipelineStatus 中）
    Fatal(String),
    Pause,
    Resume,
    TogglePause,
    Quit,
}

/// 工作线程共享的状态：致命错误和各线程是否已结束
///
/// 事件通道只用来唤醒控制线程，真正的结论以这里为准，避免事件丢失导致无法退出。
#[derive(Default)]
pub struct PipelineStatus {
    fatal: Mutex<Option<PlayerError>>,
    demux_finished: AtomicBool,
    video_finished: AtomicBool,
    audio_finished: AtomicBool,
}

impl PipelineStatus {
    /// 记录致命错误，保留最后一个
    pub fn record_fatal(&self, err: PlayerError) {
        *self.fatal.lock() = Some(err);
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.lock().is_some()
    }

    pub fn take_fatal(&self) -> Option<PlayerError> {
        self.fatal.lock().take()
    }

    pub fn fatal_message(&self) -> Option<String> {
        self.fatal.lock().as_ref().map(|e| e.to_string())
    }

    pub fn mark_finished(&self, worker: WorkerKind) {
        let flag = match worker {
            WorkerKind::Demux => &self.demux_finished,
            WorkerKind::Decode(StreamKind::Video) => &self.video_finished,
            WorkerKind::Decode(StreamKind::Audio) => &self.audio_finished,
            WorkerKind::Decode(_) => return,
        };
        flag.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self, worker: WorkerKind) -> bool {
        match worker {
            WorkerKind::Demux => self.demux_finished.load(Ordering::SeqCst),
            WorkerKind::Decode(StreamKind::Video) => self.video_finished.load(Ordering::SeqCst),
            WorkerKind::Decode(StreamKind::Audio) => self.audio_finished.load(Ordering::SeqCst),
            WorkerKind::Decode(_) => true,
        }
    }
}

/// 播放上下文：在 start 时创建，按值（克隆）传给每个工作线程
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PlayerConfig>,
    pub quit: QuitFlag,
    pub clock: AvClock,
    pub status: Arc<PipelineStatus>,
    events: Sender<PlayerEvent>,
}

impl PipelineContext {
    pub fn new(config: PlayerConfig, events: Sender<PlayerEvent>) -> Self {
        let clock = AvClock::from_config(&config);
        Self {
            config: Arc::new(config),
            quit: QuitFlag::new(),
            clock,
            status: Arc::new(PipelineStatus::default()),
            events,
        }
    }

    pub fn events(&self) -> &Sender<PlayerEvent> {
        &self.events
    }

    /// 尽力通知控制线程（通道满时丢弃，控制线程会定期轮询状态）
    pub fn notify(&self, event: PlayerEvent) {
        let _ = self.events.try_send(event);
    }

    /// 工作线程正常结束
    pub fn finish(&self, worker: WorkerKind) {
        self.status.mark_finished(worker);
        self.notify(PlayerEvent::WorkerFinished(worker));
    }

    /// 致命错误：记录错误并让整条管线进入退出流程
    pub fn fail(&self, err: PlayerError) {
        error!("{} ❌ 致命错误，停止整条管线: {}", log_ctx(), err);
        let message = err.to_string();
        self.status.record_fatal(err);
        self.quit.raise();
        self.notify(PlayerEvent::Fatal(message));
    }

    pub fn is_cancelled(&self) -> bool {
        self.quit.is_raised()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_fail_records_error_and_raises_quit() {
        let (tx, rx) = bounded(4);
        let ctx = PipelineContext::new(PlayerConfig::default(), tx);
        ctx.fail(PlayerError::ReadError("boom".to_string()));
        assert!(ctx.is_cancelled());
        assert!(ctx.status.has_fatal());
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::Fatal(msg)) if msg.contains("boom")));
        assert!(matches!(ctx.status.take_fatal(), Some(PlayerError::ReadError(_))));
    }

    #[test]
    fn test_notify_never_blocks_when_full() {
        let (tx, _rx) = bounded(1);
        let ctx = PipelineContext::new(PlayerConfig::default(), tx);
        ctx.notify(PlayerEvent::Refresh);
        ctx.notify(PlayerEvent::Refresh);
        ctx.finish(WorkerKind::Decode(StreamKind::Video));
        assert!(ctx.status.is_finished(WorkerKind::Decode(StreamKind::Video)));
        assert!(!ctx.status.is_finished(WorkerKind::Demux));
    }
}
