//! 合成媒体后端
//!
//! 不依赖 FFmpeg，按配置生成确定性的编码单元和帧。用于测试、`--synthetic` 演示，
//! 以及在没有系统编解码库的环境里跑通整条管线。

use crate::core::{
    AudioBlock, DecodedFrame, EncodedUnit, Frame, FramePayload, MediaInfo, PixelFormat, PlayerConfig,
    PlayerError, Rational, Result, SampleFormat, StreamInfo, StreamKind, VideoPicture,
};
use crate::player::audio_buffer::AudioSampleBuffer;
use crate::player::source::{
    AudioDevice, DecodeOutput, DecoderInput, DemuxSource, FrameDecoder, MediaBackend, PresentationSink,
};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const VIDEO_TIME_BASE: Rational = Rational::new(1, 90_000);
const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;
const EXTRA_INDEX: usize = 2;

/// 合成源参数
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub video_frames: usize,
    pub frame_rate: Rational,
    pub width: u32,
    pub height: u32,
    /// 每个视频单元的字节数（至少 8 字节，用来携带帧序号）
    pub unit_size: usize,
    /// 是否附带一条音频流（每个视频帧一个音频单元）
    pub audio: bool,
    pub audio_sample_rate: u32,
    /// 音频单元只覆盖前 n 个视频帧（音轨比视频短），None 表示与视频等长
    pub audio_frames: Option<usize>,
    /// 是否附带一条不会被播放的数据流
    pub extra_stream: bool,
    /// 视频解码器输出不带时间戳
    pub missing_video_pts: bool,
    /// 解码器内部压住的帧数，flush 时才全部吐出
    pub decoder_delay: usize,
    /// 成功读取这么多个单元之后读取失败
    pub fail_read_after: Option<usize>,
    /// 解码第 n 个视频单元时失败
    pub fail_decode_at: Option<u64>,
    /// 每次读取前的延迟（模拟慢速 I/O）
    pub read_delay: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            video_frames: 3,
            frame_rate: Rational::new(25, 1),
            width: 4,
            height: 4,
            unit_size: 64,
            audio: false,
            audio_sample_rate: 48_000,
            audio_frames: None,
            extra_stream: false,
            missing_video_pts: false,
            decoder_delay: 0,
            fail_read_after: None,
            fail_decode_at: None,
            read_delay: Duration::ZERO,
        }
    }
}

impl SyntheticConfig {
    fn frame_duration(&self) -> f64 {
        1.0 / self.frame_rate.to_f64()
    }

    fn video_ticks_per_frame(&self) -> i64 {
        VIDEO_TIME_BASE.den as i64 * self.frame_rate.den as i64 / self.frame_rate.num as i64
    }

    fn audio_samples_per_unit(&self) -> i64 {
        self.audio_sample_rate as i64 * self.frame_rate.den as i64 / self.frame_rate.num as i64
    }

    fn units_per_frame(&self) -> usize {
        1 + self.audio as usize + self.extra_stream as usize
    }
}

pub struct SyntheticBackend {
    config: SyntheticConfig,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl MediaBackend for SyntheticBackend {
    fn open(&self, source: &str) -> Result<Box<dyn DemuxSource>> {
        if source.trim().is_empty() {
            return Err(PlayerError::OpenError("媒体源为空".to_string()));
        }
        if !self.config.frame_rate.is_valid() {
            return Err(PlayerError::OpenError(format!(
                "无效帧率 {}/{}",
                self.config.frame_rate.num, self.config.frame_rate.den
            )));
        }
        info!("🧪 打开合成媒体源: {}（{} 帧）", source, self.config.video_frames);
        Ok(Box::new(SyntheticSource::new(source, self.config.clone())))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

/// 合成数据源：按 视频 / 音频 / 数据 的顺序交错输出
pub struct SyntheticSource {
    config: SyntheticConfig,
    media_info: MediaInfo,
    cursor: usize,
}

impl SyntheticSource {
    fn new(source: &str, config: SyntheticConfig) -> Self {
        let mut streams = vec![StreamInfo {
            index: VIDEO_INDEX,
            kind: StreamKind::Video,
            time_base: VIDEO_TIME_BASE,
            frame_rate: Some(config.frame_rate),
            sample_rate: None,
            channels: 0,
            width: config.width,
            height: config.height,
            codec: "synthetic-video".to_string(),
        }];
        if config.audio {
            streams.push(StreamInfo {
                index: AUDIO_INDEX,
                kind: StreamKind::Audio,
                time_base: Rational::new(1, config.audio_sample_rate as i32),
                frame_rate: None,
                sample_rate: Some(config.audio_sample_rate),
                channels: 2,
                width: 0,
                height: 0,
                codec: "synthetic-audio".to_string(),
            });
        }
        if config.extra_stream {
            streams.push(StreamInfo {
                index: EXTRA_INDEX,
                kind: StreamKind::Other,
                time_base: VIDEO_TIME_BASE,
                frame_rate: None,
                sample_rate: None,
                channels: 0,
                width: 0,
                height: 0,
                codec: "synthetic-data".to_string(),
            });
        }

        let mut media_info = MediaInfo {
            source: source.to_string(),
            duration_ms: (config.video_frames as f64 * config.frame_duration() * 1000.0) as i64,
            streams,
            video_stream: None,
            audio_stream: None,
        };
        media_info.select_default_streams();

        Self {
            config,
            media_info,
            cursor: 0,
        }
    }
}

/// 单元前 8 字节是帧序号
fn unit_payload(index: u64, size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size.max(8)];
    data[..8].copy_from_slice(&index.to_le_bytes());
    data
}

fn unit_index(unit: &EncodedUnit) -> Result<u64> {
    let bytes: [u8; 8] = unit
        .data
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| PlayerError::DecodeError(format!("单元太短: {} 字节", unit.data.len())))?;
    Ok(u64::from_le_bytes(bytes))
}

impl DemuxSource for SyntheticSource {
    fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn read_unit(&mut self) -> Result<Option<EncodedUnit>> {
        if !self.config.read_delay.is_zero() {
            thread::sleep(self.config.read_delay);
        }
        if self.config.fail_read_after == Some(self.cursor) {
            return Err(PlayerError::ReadError(format!("合成源在第 {} 个单元处读取失败", self.cursor)));
        }

        let per_frame = self.config.units_per_frame();
        let audio_frames = self.config.audio_frames.unwrap_or(self.config.video_frames);
        loop {
            let frame = self.cursor / per_frame;
            if frame >= self.config.video_frames {
                return Ok(None);
            }
            let slot = self.cursor % per_frame;
            self.cursor += 1;

            let index = frame as u64;
            let unit = match (slot, self.config.audio) {
                (0, _) => EncodedUnit::new(
                    VIDEO_INDEX,
                    Some(frame as i64 * self.config.video_ticks_per_frame()),
                    unit_payload(index, self.config.unit_size),
                ),
                // 音轨已结束
                (1, true) if frame >= audio_frames => continue,
                (1, true) => EncodedUnit::new(
                    AUDIO_INDEX,
                    Some(frame as i64 * self.config.audio_samples_per_unit()),
                    unit_payload(index, 32),
                ),
                _ => EncodedUnit::new(EXTRA_INDEX, Some(0), unit_payload(index, 16)),
            };
            return Ok(Some(unit));
        }
    }

    fn open_decoder(&self, stream: &StreamInfo, config: &PlayerConfig) -> Result<Box<dyn FrameDecoder>> {
        let decoder = match stream.kind {
            StreamKind::Video => SyntheticDecoder {
                kind: StreamKind::Video,
                config: self.config.clone(),
                output_rate: 0,
                output_channels: 0,
                pending: VecDeque::new(),
                flushing: false,
            },
            StreamKind::Audio => SyntheticDecoder {
                kind: StreamKind::Audio,
                config: self.config.clone(),
                output_rate: config.audio_sample_rate,
                output_channels: config.audio_channels,
                pending: VecDeque::new(),
                flushing: false,
            },
            other => {
                return Err(PlayerError::DecodeError(format!(
                    "合成源不支持 {} 流",
                    other.as_str()
                )))
            }
        };
        Ok(Box::new(decoder))
    }

    fn description(&self) -> String {
        format!("SyntheticSource({})", self.media_info.source)
    }
}

/// 合成解码器：可以压住若干帧、丢弃时间戳或在指定单元上失败
struct SyntheticDecoder {
    kind: StreamKind,
    config: SyntheticConfig,
    output_rate: u32,
    output_channels: u16,
    pending: VecDeque<DecodedFrame>,
    flushing: bool,
}

impl SyntheticDecoder {
    fn decode(&self, unit: &EncodedUnit) -> Result<DecodedFrame> {
        let index = unit_index(unit)?;
        match self.kind {
            StreamKind::Video => {
                if self.config.fail_decode_at == Some(index) {
                    return Err(PlayerError::DecodeError(format!("合成视频单元 {} 已损坏", index)));
                }
                let size = (self.config.width * self.config.height * 4) as usize;
                Ok(DecodedFrame {
                    pts: if self.config.missing_video_pts { None } else { unit.pts },
                    payload: FramePayload::Video(VideoPicture {
                        width: self.config.width,
                        height: self.config.height,
                        format: PixelFormat::RGBA,
                        data: vec![(index % 256) as u8; size],
                    }),
                })
            }
            _ => {
                let frames = (self.output_rate as f64 * self.config.frame_duration()).round() as usize;
                Ok(DecodedFrame {
                    pts: unit.pts,
                    payload: FramePayload::Audio(AudioBlock {
                        sample_rate: self.output_rate,
                        channels: self.output_channels,
                        format: SampleFormat::F32,
                        samples: vec![0.0; frames * self.output_channels as usize],
                    }),
                })
            }
        }
    }
}

impl FrameDecoder for SyntheticDecoder {
    fn submit(&mut self, input: DecoderInput) -> Result<()> {
        match input {
            DecoderInput::Unit(unit) => {
                let frame = self.decode(&unit)?;
                self.pending.push_back(frame);
            }
            DecoderInput::Flush => self.flushing = true,
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<DecodeOutput> {
        if self.pending.len() > self.config.decoder_delay || (self.flushing && !self.pending.is_empty()) {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(DecodeOutput::Frame(frame));
            }
        }
        if self.flushing {
            Ok(DecodeOutput::Eof)
        } else {
            Ok(DecodeOutput::NeedsMoreInput)
        }
    }

    fn description(&self) -> String {
        format!("SyntheticDecoder({}, delay={})", self.kind.as_str(), self.config.decoder_delay)
    }
}

/// 被显示的一帧
#[derive(Debug, Clone, Copy)]
pub struct PresentedFrame {
    pub pts: f64,
    pub at: Instant,
}

/// 记录每次 present 的显示端，克隆出来的句柄共享同一份记录
#[derive(Clone, Default)]
pub struct RecordingSink {
    presented: Arc<Mutex<Vec<PresentedFrame>>>,
    surface: Arc<Mutex<Option<MediaInfo>>>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> Vec<PresentedFrame> {
        self.presented.lock().clone()
    }

    pub fn presented_pts(&self) -> Vec<f64> {
        self.presented.lock().iter().map(|f| f.pts).collect()
    }

    pub fn presented_count(&self) -> usize {
        self.presented.lock().len()
    }

    pub fn surface(&self) -> Option<MediaInfo> {
        self.surface.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PresentationSink for RecordingSink {
    fn open_surface(&mut self, info: &MediaInfo) -> Result<()> {
        *self.surface.lock() = Some(info.clone());
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.presented.lock().push(PresentedFrame {
            pts: frame.pts,
            at: Instant::now(),
        });
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// 模拟音频设备：后台线程按固定周期从样本缓冲拉取数据
pub struct SimulatedAudioDevice {
    sample_rate: u32,
    channels: u16,
    period: Duration,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SimulatedAudioDevice {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            period: Duration::from_millis(10),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl AudioDevice for SimulatedAudioDevice {
    fn output_format(&self) -> (u32, u16) {
        (self.sample_rate, self.channels)
    }

    fn start(&mut self, buffer: Arc<AudioSampleBuffer>) -> Result<()> {
        if self.thread_handle.is_some() {
            return Ok(());
        }
        let samples_per_period =
            (self.sample_rate as f64 * self.period.as_secs_f64()) as usize * self.channels as usize;
        let period = self.period;
        let running = self.running.clone();
        let paused = self.paused.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-sim".to_string())
            .spawn(move || {
                let mut out = vec![0.0f32; samples_per_period];
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    if !paused.load(Ordering::SeqCst) {
                        buffer.pull_audio(&mut out);
                    }
                    next += period;
                    thread::sleep(next.saturating_duration_since(Instant::now()));
                }
            })?;
        self.thread_handle = Some(handle);
        debug!("🔈 模拟音频设备已启动: {} Hz, {} 声道", self.sample_rate, self.channels);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            debug!("🔈 模拟音频设备已停止");
        }
    }
}

impl Drop for SimulatedAudioDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
