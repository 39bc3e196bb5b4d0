use crate::core::{Frame, MediaInfo, Result};
use crate::player::log_ctx;
use crate::player::source::PresentationSink;
use log::info;
use std::time::Instant;

/// 日志显示端：不画图，只打印每一帧的 pts、播放时间和与上一帧的间隔
#[derive(Default)]
pub struct TraceSink {
    started_at: Option<Instant>,
    last_present: Option<Instant>,
    presented: u64,
}

impl TraceSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationSink for TraceSink {
    fn open_surface(&mut self, info: &MediaInfo) -> Result<()> {
        let (width, height) = info.video().map(|s| (s.width, s.height)).unwrap_or((0, 0));
        info!(
            "{} 🪟 打开显示表面 {}x{}（{}，时长 {}ms）",
            log_ctx(),
            width,
            height,
            info.source,
            info.duration_ms
        );
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        let now = Instant::now();
        let since_start = self
            .started_at
            .map(|t| now.duration_since(t).as_millis())
            .unwrap_or(0);
        let interval = self
            .last_present
            .map(|t| now.duration_since(t).as_millis())
            .unwrap_or(0);
        self.last_present = Some(now);
        self.presented += 1;

        info!(
            "🖼️ #{} pts={:.3}s now={}ms interval={}ms",
            self.presented, frame.pts, since_start, interval
        );
        Ok(())
    }

    fn close(&mut self) {
        info!("{} 🪟 关闭显示表面（共显示 {} 帧）", log_ctx(), self.presented);
    }
}
