use crate::core::{QuitFlag, Result};
use crate::player::context::PlayerEvent;
use crate::player::log_ctx;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, info};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 刷新定时器命令
enum RefreshCommand {
    Schedule(Duration),
    Stop,
}

/// 刷新定时器线程
///
/// `schedule(d)` 之后约 d 时长向控制线程投递一个 `Refresh` 事件。同一时刻只有一个待触发的定时，
/// 新的 schedule 会覆盖旧的。
pub struct RefreshScheduler {
    command_tx: Sender<RefreshCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn start(events: Sender<PlayerEvent>, quit: QuitFlag) -> Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let thread_handle = thread::Builder::new()
            .name("refresh".to_string())
            .spawn(move || Self::timer_loop(command_rx, events, quit))?;
        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// 安排一次刷新，覆盖尚未触发的定时
    pub fn schedule(&self, delay: Duration) {
        let _ = self.command_tx.send(RefreshCommand::Schedule(delay));
    }

    /// 停止定时器线程并等待其退出（可重复调用）
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.command_tx.send(RefreshCommand::Stop);
            let _ = handle.join();
        }
    }

    fn timer_loop(command_rx: Receiver<RefreshCommand>, events: Sender<PlayerEvent>, quit: QuitFlag) {
        info!("{} ⏱️ 刷新定时器线程启动", log_ctx());
        let mut deadline: Option<Instant> = None;
        let mut fired: u64 = 0;

        loop {
            let command = match deadline {
                Some(at) => command_rx.recv_timeout(at.saturating_duration_since(Instant::now())),
                None => command_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match command {
                Ok(RefreshCommand::Schedule(delay)) => deadline = Some(Instant::now() + delay),
                Ok(RefreshCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    deadline = None;
                    fired += 1;
                    if !Self::deliver(&events, &quit) {
                        break;
                    }
                }
            }
        }

        debug!("{} ⏱️ 刷新定时器线程退出（共触发 {} 次）", log_ctx(), fired);
    }

    /// 投递 Refresh；事件通道满时等待，退出标志置位后放弃
    fn deliver(events: &Sender<PlayerEvent>, quit: &QuitFlag) -> bool {
        let mut event = PlayerEvent::Refresh;
        loop {
            if quit.is_raised() {
                return false;
            }
            match events.send_timeout(event, Duration::from_millis(50)) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(e)) => event = e,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_fires_after_delay() {
        let (tx, rx) = bounded(4);
        let mut scheduler = RefreshScheduler::start(tx, QuitFlag::new()).unwrap();
        let start = Instant::now();
        scheduler.schedule(Duration::from_millis(40));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(PlayerEvent::Refresh));
        assert!(start.elapsed() >= Duration::from_millis(35));
        scheduler.stop();
    }

    #[test]
    fn test_reschedule_replaces_pending_deadline() {
        let (tx, rx) = bounded(4);
        let mut scheduler = RefreshScheduler::start(tx, QuitFlag::new()).unwrap();
        scheduler.schedule(Duration::from_secs(10));
        scheduler.schedule(Duration::from_millis(10));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(PlayerEvent::Refresh));
        // 只触发一次
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        scheduler.stop();
    }

    #[test]
    fn test_stop_cancels_pending_refresh() {
        let (tx, rx) = bounded(4);
        let mut scheduler = RefreshScheduler::start(tx, QuitFlag::new()).unwrap();
        scheduler.schedule(Duration::from_millis(200));
        scheduler.stop();
        scheduler.stop();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_quit_aborts_delivery_when_channel_full() {
        let (tx, _rx) = bounded(1);
        tx.send(PlayerEvent::Quit).unwrap();
        let quit = QuitFlag::new();
        let mut scheduler = RefreshScheduler::start(tx, quit.clone()).unwrap();
        scheduler.schedule(Duration::ZERO);
        thread::sleep(Duration::from_millis(30));
        quit.raise();
        let start = Instant::now();
        scheduler.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
