use crate::core::{
    FrameTiming, MediaInfo, PlaybackState, PlayerConfig, PlayerError, QuitFlag, Result, StreamInfo, StreamKind,
};
use crate::player::audio_buffer::AudioSampleBuffer;
use crate::player::context::{PipelineContext, PipelineStatus, PlayerEvent, WorkerKind};
use crate::player::decode_worker::DecodeWorker;
use crate::player::demux_worker::DemuxWorker;
use crate::player::frame_ring::{FrameRingBuffer, SlotResult};
use crate::player::log_ctx;
use crate::player::refresh::RefreshScheduler;
use crate::player::source::{AudioDevice, DemuxSource, FrameDecoder, MediaBackend, PresentationSink};
use crate::player::unit_queue::BoundedUnitQueue;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 等待时间小于这个值就直接显示，不再排一次定时
const PRESENT_SLACK: Duration = Duration::from_millis(1);

/// 暂停/继续命令在事件通道满时最多等待这么久
const COMMAND_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// 控制线程的入口
type ControlBody = Box<dyn FnOnce() -> PlaybackStats + Send>;

/// 播放统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackStats {
    /// 已显示的视频帧数
    pub presented_frames: u64,
    /// 暂停或无帧可显示时空转的刷新次数
    pub idle_refreshes: u64,
    /// 显示端报错的次数
    pub present_errors: u64,
    /// 音频欠载次数
    pub audio_underruns: u64,
    /// 最后显示的帧的 PTS（秒）
    pub last_pts: Option<f64>,
    /// 导致提前结束的致命错误
    pub error: Option<String>,
}

/// 控制线程与外部句柄共享的状态
struct ControlShared {
    state: Mutex<PlaybackState>,
    quit: QuitFlag,
    status: Arc<PipelineStatus>,
}

impl ControlShared {
    fn set_state(&self, state: PlaybackState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("{} 🔁 播放状态 {:?} -> {:?}", log_ctx(), *current, state);
            *current = state;
        }
    }
}

/// 可在任意线程使用的控制句柄（键盘线程、信号处理等）
#[derive(Clone)]
pub struct PlaybackHandle {
    shared: Arc<ControlShared>,
    events: Sender<PlayerEvent>,
}

impl PlaybackHandle {
    pub fn pause(&self) {
        self.send(PlayerEvent::Pause);
    }

    pub fn resume(&self) {
        self.send(PlayerEvent::Resume);
    }

    pub fn toggle_pause(&self) {
        self.send(PlayerEvent::TogglePause);
    }

    /// 请求停止（幂等）
    pub fn stop(&self) {
        if self.shared.quit.raise() {
            info!("{} ⏹ 收到停止请求", log_ctx());
        }
        let _ = self.events.try_send(PlayerEvent::Quit);
    }

    pub fn state(&self) -> PlaybackState {
        *self.shared.state.lock()
    }

    fn send(&self, event: PlayerEvent) {
        if self.state().is_terminal() {
            return;
        }
        // 通道可能被 FrameReady 之类的提示占满，控制命令要等一等而不是直接丢
        if let Err(e) = self.events.send_timeout(event, COMMAND_SEND_TIMEOUT) {
            warn!("{} ⚠️ 控制命令发送失败: {:?}", log_ctx(), e.into_inner());
        }
    }
}

/// 播放控制器
///
/// `start` 在调用线程上打开媒体源、创建解码器和显示表面，任何一步失败都直接返回错误，
/// 不会启动任何线程；成功后启动 demux / 解码 / 刷新定时器 / 控制线程。
pub struct PlaybackController {
    handle: PlaybackHandle,
    media_info: MediaInfo,
    control_thread: Option<JoinHandle<PlaybackStats>>,
    stats: Option<PlaybackStats>,
}

impl PlaybackController {
    pub fn start(
        source: &str,
        backend: &dyn MediaBackend,
        sink: Box<dyn PresentationSink>,
        audio_device: Option<Box<dyn AudioDevice>>,
        config: PlayerConfig,
    ) -> Result<Self> {
        Self::start_with(source, backend, sink, audio_device, config, |body| {
            thread::Builder::new().name("playback-control".to_string()).spawn(body)
        })
    }

    fn start_with(
        source: &str,
        backend: &dyn MediaBackend,
        sink: Box<dyn PresentationSink>,
        audio_device: Option<Box<dyn AudioDevice>>,
        config: PlayerConfig,
        spawn: impl FnOnce(ControlBody) -> std::io::Result<JoinHandle<PlaybackStats>>,
    ) -> Result<Self> {
        config.validate()?;
        info!("{} ▶️ 打开媒体源 {}（后端 {}）", log_ctx(), source, backend.name());

        let demux_source = backend.open(source).map_err(|e| match e {
            PlayerError::OpenError(_) => e,
            other => PlayerError::OpenError(format!("{}: {}", source, other)),
        })?;
        let media_info = demux_source.media_info().clone();
        let video_stream = media_info.video().cloned().ok_or(PlayerError::NoVideoStream)?;

        // 音频解码器按设备实际格式重采样
        let mut config = config;
        if let Some(device) = &audio_device {
            let (rate, channels) = device.output_format();
            config.audio_sample_rate = rate;
            config.audio_channels = channels;
        }

        let video_decoder = demux_source.open_decoder(&video_stream, &config)?;
        let audio = match (media_info.audio().cloned(), audio_device) {
            (Some(stream), Some(device)) => match demux_source.open_decoder(&stream, &config) {
                Ok(decoder) => Some((stream, decoder, device)),
                Err(e) => {
                    warn!("{} ⚠️ 音频解码器创建失败，静音播放: {}", log_ctx(), e);
                    None
                }
            },
            (Some(_), None) => {
                info!("{} 🔇 没有音频输出设备，忽略音频流", log_ctx());
                None
            }
            (None, _) => None,
        };

        let mut sink = sink;
        sink.open_surface(&media_info)?;

        let (events_tx, events_rx) = bounded(config.event_channel_capacity);
        let ctx = PipelineContext::new(config, events_tx.clone());
        let shared = Arc::new(ControlShared {
            state: Mutex::new(PlaybackState::Starting),
            quit: ctx.quit.clone(),
            status: ctx.status.clone(),
        });

        let pipeline = match Pipeline::launch(demux_source, video_stream, video_decoder, audio, &ctx) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                sink.close();
                return Err(e);
            }
        };

        let control = ControlLoop {
            ctx,
            shared: shared.clone(),
            events: events_rx,
            sink,
            pipeline,
            stats: PlaybackStats::default(),
            last_presented: None,
            deadline: None,
            paused_at: None,
            starved: false,
        };
        // 控制循环先放在交接槽里，线程起不来时还能拿回来收尾
        let slot = Arc::new(Mutex::new(Some(control)));
        let handoff = slot.clone();
        let body: ControlBody = Box::new(move || {
            let control = handoff.lock().take();
            match control {
                Some(control) => control.run(),
                None => PlaybackStats::default(),
            }
        });
        let control_thread = match spawn(body) {
            Ok(handle) => handle,
            Err(e) => {
                error!("{} ❌ 控制线程启动失败: {}", log_ctx(), e);
                let control = slot.lock().take();
                if let Some(control) = control {
                    control.finish();
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            handle: PlaybackHandle {
                shared,
                events: events_tx,
            },
            media_info,
            control_thread: Some(control_thread),
            stats: None,
        })
    }

    pub fn handle(&self) -> PlaybackHandle {
        self.handle.clone()
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    pub fn state(&self) -> PlaybackState {
        self.handle.state()
    }

    pub fn pause(&self) {
        self.handle.pause();
    }

    pub fn resume(&self) {
        self.handle.resume();
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// 阻塞直到播放结束（文件播完、stop 或致命错误），可重复调用
    pub fn wait_until_stopped(&mut self) -> PlaybackStats {
        if let Some(handle) = self.control_thread.take() {
            let stats = handle.join().unwrap_or_else(|_| {
                error!("{} ❌ 控制线程 panic", log_ctx());
                self.handle.shared.set_state(PlaybackState::Stopped);
                PlaybackStats {
                    error: Some("控制线程 panic".to_string()),
                    ..Default::default()
                }
            });
            self.stats = Some(stats);
        }
        self.stats.clone().unwrap_or_default()
    }

    /// 取出致命错误（只能取一次）
    pub fn take_error(&self) -> Option<PlayerError> {
        self.handle.shared.status.take_fatal()
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if self.control_thread.is_some() {
            self.stop();
            self.wait_until_stopped();
        }
    }
}

/// 一条被播放的流：包队列 + 帧缓冲 + 解码线程
struct StreamPipe {
    queue: Arc<BoundedUnitQueue>,
    ring: Arc<FrameRingBuffer>,
    worker: Option<JoinHandle<()>>,
}

impl StreamPipe {
    fn launch(
        stream: StreamInfo,
        decoder: Box<dyn FrameDecoder>,
        max_bytes: usize,
        ring_capacity: usize,
        ctx: &PipelineContext,
    ) -> Result<Self> {
        let queue = Arc::new(BoundedUnitQueue::new(stream.kind, max_bytes, ctx.quit.clone()));
        let ring = Arc::new(FrameRingBuffer::new(
            ring_capacity,
            ctx.config.slot_timeout(),
            ctx.quit.clone(),
        ));
        let worker = DecodeWorker::new(stream, decoder, queue.clone(), ring.clone(), ctx.clone()).spawn()?;
        Ok(Self {
            queue,
            ring,
            worker: Some(worker),
        })
    }

    fn wake_all(&self) {
        self.queue.wake_all();
        self.ring.wake_all();
    }

    fn join(&mut self, name: &str) -> Option<String> {
        let handle = self.worker.take()?;
        handle.join().err().map(|_| format!("{} 解码线程 panic", name))
    }
}

struct AudioPath {
    pipe: StreamPipe,
    buffer: Arc<AudioSampleBuffer>,
    device: Box<dyn AudioDevice>,
}

/// 所有工作线程和它们之间的缓冲
struct Pipeline {
    video: StreamPipe,
    audio: Option<AudioPath>,
    demux: Option<JoinHandle<()>>,
    scheduler: RefreshScheduler,
}

impl Pipeline {
    fn launch(
        demux_source: Box<dyn DemuxSource>,
        video_stream: StreamInfo,
        video_decoder: Box<dyn FrameDecoder>,
        audio: Option<(StreamInfo, Box<dyn FrameDecoder>, Box<dyn AudioDevice>)>,
        ctx: &PipelineContext,
    ) -> Result<Self> {
        let config = ctx.config.clone();
        let scheduler = RefreshScheduler::start(ctx.events().clone(), ctx.quit.clone())?;
        let mut routes = HashMap::new();

        let video_index = video_stream.index;
        let video = StreamPipe::launch(
            video_stream,
            video_decoder,
            config.max_video_queue_bytes,
            config.video_ring_capacity,
            ctx,
        )?;
        routes.insert(video_index, video.queue.clone());

        let mut pipeline = Self {
            video,
            audio: None,
            demux: None,
            scheduler,
        };

        if let Some((stream, decoder, mut device)) = audio {
            let (rate, channels) = device.output_format();
            let buffer = Arc::new(AudioSampleBuffer::new(rate, channels, ctx.clock.clone()));
            // 设备起不来就不播音频，解码器直接丢弃
            match device.start(buffer.clone()) {
                Ok(()) => {
                    let audio_index = stream.index;
                    let pipe = StreamPipe::launch(
                        stream,
                        decoder,
                        config.max_audio_queue_bytes,
                        config.audio_ring_capacity,
                        ctx,
                    );
                    match pipe {
                        Ok(pipe) => {
                            routes.insert(audio_index, pipe.queue.clone());
                            pipeline.audio = Some(AudioPath { pipe, buffer, device });
                        }
                        Err(e) => {
                            device.stop();
                            pipeline.shutdown(ctx);
                            return Err(e);
                        }
                    }
                }
                Err(e) => warn!("{} ⚠️ 音频设备启动失败，静音播放: {}", log_ctx(), e),
            }
        }

        let demux = DemuxWorker::new(demux_source, routes, ctx.clone()).spawn();
        match demux {
            Ok(handle) => pipeline.demux = Some(handle),
            Err(e) => {
                pipeline.shutdown(ctx);
                return Err(e);
            }
        }
        Ok(pipeline)
    }

    /// 停止所有线程，返回 panic 的线程描述
    fn shutdown(&mut self, ctx: &PipelineContext) -> Vec<String> {
        ctx.quit.raise();
        self.video.wake_all();
        if let Some(audio) = &self.audio {
            audio.pipe.wake_all();
        }
        self.scheduler.stop();

        let mut panicked = Vec::new();
        if let Some(handle) = self.demux.take() {
            if handle.join().is_err() {
                panicked.push("demux 线程 panic".to_string());
            }
        }
        panicked.extend(self.video.join("video"));
        if let Some(audio) = &mut self.audio {
            panicked.extend(audio.pipe.join("audio"));
            audio.device.stop();
            audio.buffer.clear();
        }
        panicked
    }
}

/// 控制线程：处理事件、按时钟显示视频帧、把音频帧搬到输出缓冲
struct ControlLoop {
    ctx: PipelineContext,
    shared: Arc<ControlShared>,
    events: Receiver<PlayerEvent>,
    sink: Box<dyn PresentationSink>,
    pipeline: Pipeline,
    stats: PlaybackStats,
    last_presented: Option<FrameTiming>,
    /// 缓冲头部的帧已经算过延迟，这是它的显示时刻
    deadline: Option<Instant>,
    paused_at: Option<Instant>,
    /// 上次刷新时没有帧可显示
    starved: bool,
}

impl ControlLoop {
    fn run(mut self) -> PlaybackStats {
        info!("{} 🎮 控制线程启动", log_ctx());
        self.shared.set_state(PlaybackState::Playing);
        self.pipeline.scheduler.schedule(Duration::ZERO);

        let idle = self.ctx.config.idle_refresh();
        loop {
            match self.events.recv_timeout(idle) {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if self.ctx.is_cancelled() {
                break;
            }
            self.pump_audio();
            if self.reached_end() {
                info!("{} 🏁 视频播放完毕", log_ctx());
                break;
            }
        }

        self.finish()
    }

    /// 返回 false 表示进入退出流程
    fn handle_event(&mut self, event: PlayerEvent) -> bool {
        match event {
            PlayerEvent::Refresh => self.on_refresh(),
            PlayerEvent::FrameReady(StreamKind::Video) => {
                if self.starved && !self.is_paused() {
                    self.on_refresh();
                }
            }
            PlayerEvent::FrameReady(_) => {}
            PlayerEvent::WorkerFinished(worker) => {
                debug!("{} ✅ 工作线程结束: {:?}", log_ctx(), worker);
            }
            PlayerEvent::Pause => self.set_paused(true),
            PlayerEvent::Resume => self.set_paused(false),
            PlayerEvent::TogglePause => self.set_paused(!self.is_paused()),
            PlayerEvent::Fatal(message) => {
                error!("{} ❌ 管线致命错误: {}", log_ctx(), message);
                return false;
            }
            PlayerEvent::Quit => return false,
        }
        true
    }

    fn is_paused(&self) -> bool {
        *self.shared.state.lock() == PlaybackState::Paused
    }

    fn set_paused(&mut self, paused: bool) {
        if paused == self.is_paused() {
            return;
        }
        if paused {
            self.ctx.clock.pause();
            self.paused_at = Some(Instant::now());
            self.shared.set_state(PlaybackState::Paused);
            info!("{} ⏸ 暂停", log_ctx());
        } else {
            self.ctx.clock.resume();
            // 等待中的显示时刻同样顺延暂停的时长
            let paused_for = self.paused_at.take().map(|at| at.elapsed());
            if let (Some(deadline), Some(paused_for)) = (self.deadline.as_mut(), paused_for) {
                *deadline += paused_for;
            }
            self.shared.set_state(PlaybackState::Playing);
            info!("{} ▶️ 继续播放", log_ctx());
            self.pipeline.scheduler.schedule(Duration::ZERO);
        }
        if let Some(audio) = &mut self.pipeline.audio {
            if let Err(e) = audio.device.set_paused(paused) {
                warn!("{} ⚠️ 音频设备暂停/恢复失败: {}", log_ctx(), e);
            }
        }
    }

    /// 刷新：取缓冲头部的帧，没到显示时刻就排一个定时，到了就显示
    fn on_refresh(&mut self) {
        let idle = self.ctx.config.idle_refresh();
        if self.is_paused() {
            self.stats.idle_refreshes += 1;
            self.pipeline.scheduler.schedule(idle);
            return;
        }

        let ring = self.pipeline.video.ring.clone();
        let slot = match ring.acquire_read_slot(false) {
            SlotResult::Ready(slot) => slot,
            SlotResult::WouldBlock => {
                self.starved = true;
                self.stats.idle_refreshes += 1;
                self.pipeline.scheduler.schedule(idle);
                return;
            }
            SlotResult::Cancelled => return,
        };
        self.starved = false;

        let Some(frame) = slot.frame() else {
            warn!("{} ⚠️ 读槽位 {} 为空，跳过", log_ctx(), slot.index());
            slot.release();
            self.pipeline.scheduler.schedule(Duration::ZERO);
            return;
        };
        let timing = frame.timing();

        let now = Instant::now();
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => {
                let delay = self.ctx.clock.compute_next_delay(timing, self.last_presented);
                let deadline = now + self.ctx.clock.advance_frame_timer(delay);
                self.deadline = Some(deadline);
                deadline
            }
        };
        let wait = deadline.saturating_duration_since(now);
        if wait > PRESENT_SLACK {
            // 帧留在缓冲里，时刻到了再取
            drop(slot);
            self.pipeline.scheduler.schedule(wait);
            return;
        }
        self.deadline = None;

        if let Err(e) = self.sink.present(frame) {
            self.stats.present_errors += 1;
            warn!("{} ⚠️ 显示帧失败（pts={:.3}s）: {}", log_ctx(), timing.pts, e);
        }
        self.stats.presented_frames += 1;
        self.stats.last_pts = Some(timing.pts);
        self.last_presented = Some(timing);
        slot.release();

        self.pipeline.scheduler.schedule(Duration::ZERO);
    }

    /// 把音频帧搬进输出缓冲，直到缓冲够用或没有更多帧
    fn pump_audio(&mut self) {
        if self.is_paused() {
            return;
        }
        let Some(audio) = &self.pipeline.audio else {
            return;
        };
        let max_buffered = self.ctx.config.max_buffered_audio_secs;
        while audio.buffer.buffered_secs() < max_buffered {
            match audio.pipe.ring.acquire_read_slot(false) {
                SlotResult::Ready(slot) => {
                    if let Some(frame) = slot.frame() {
                        audio.buffer.write_frame(frame);
                    }
                    slot.release();
                }
                _ => break,
            }
        }
        if !audio.buffer.is_ended()
            && self.shared.status.is_finished(WorkerKind::Decode(StreamKind::Audio))
            && audio.pipe.ring.is_empty()
        {
            audio.buffer.mark_ended();
        }
    }

    /// 视频解码线程已结束且所有帧都已显示
    fn reached_end(&self) -> bool {
        self.shared.status.is_finished(WorkerKind::Decode(StreamKind::Video))
            && self.pipeline.video.ring.is_empty()
    }

    fn finish(mut self) -> PlaybackStats {
        self.shared.set_state(PlaybackState::Stopping);
        info!("{} 🛑 停止播放管线", log_ctx());

        let panicked = self.pipeline.shutdown(&self.ctx);
        for message in panicked {
            error!("{} ❌ {}", log_ctx(), message);
            self.shared.status.record_fatal(PlayerError::Other(message));
        }
        self.sink.close();

        if let Some(audio) = &self.pipeline.audio {
            self.stats.audio_underruns = audio.buffer.underruns();
        }
        self.stats.error = self.shared.status.fatal_message();
        self.shared.set_state(PlaybackState::Stopped);
        info!(
            "{} ⏹ 播放结束：显示 {} 帧，空转刷新 {} 次",
            log_ctx(),
            self.stats.presented_frames,
            self.stats.idle_refreshes
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::synthetic::{RecordingSink, SyntheticBackend, SyntheticConfig};
    use std::io;

    #[test]
    fn test_control_spawn_failure_tears_down_pipeline() {
        let sink = RecordingSink::new();
        let result = PlaybackController::start_with(
            "synthetic://spawn",
            &SyntheticBackend::new(SyntheticConfig {
                video_frames: 50,
                ..Default::default()
            }),
            Box::new(sink.clone()),
            None,
            PlayerConfig::default(),
            |_body| Err(io::Error::new(io::ErrorKind::Other, "线程数已满")),
        );

        assert!(matches!(result, Err(PlayerError::IoError(_))));
        assert!(sink.surface().is_some());
        assert!(sink.is_closed());
        assert_eq!(sink.presented_count(), 0);
    }

    fn handle_with_channel(capacity: usize) -> (PlaybackHandle, Receiver<PlayerEvent>) {
        let (tx, rx) = bounded(capacity);
        let shared = Arc::new(ControlShared {
            state: Mutex::new(PlaybackState::Playing),
            quit: QuitFlag::new(),
            status: Arc::new(PipelineStatus::default()),
        });
        (PlaybackHandle { shared, events: tx }, rx)
    }

    #[test]
    fn test_pause_waits_for_room_in_full_channel() {
        let (handle, rx) = handle_with_channel(2);
        handle.events.send(PlayerEvent::FrameReady(StreamKind::Video)).unwrap();
        handle.events.send(PlayerEvent::FrameReady(StreamKind::Video)).unwrap();

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut events = Vec::new();
            while let Ok(event) = rx.recv_timeout(Duration::from_millis(200)) {
                events.push(event);
            }
            events
        });

        handle.pause();
        let events = consumer.join().unwrap();
        assert_eq!(events.last(), Some(&PlayerEvent::Pause));
    }

    #[test]
    fn test_commands_ignored_after_stop() {
        let (handle, rx) = handle_with_channel(4);
        handle.shared.set_state(PlaybackState::Stopped);
        handle.pause();
        assert!(rx.try_recv().is_err());
    }
}
