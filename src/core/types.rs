use serde::{Deserialize, Serialize};

/// 有理数（时间基、帧率）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 分子分母均为正才有意义（FFmpeg 用 0/0 表示未知）
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
            StreamKind::Other => "other",
        }
    }
}

/// 容器中单条流的元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: Rational,
    /// 平均帧率（仅视频）
    pub frame_rate: Option<Rational>,
    /// 采样率（仅音频）
    pub sample_rate: Option<u32>,
    pub channels: u16,
    pub width: u32,
    pub height: u32,
    pub codec: String,
}

impl StreamInfo {
    /// 把流时间基下的时间戳换算成秒
    pub fn ticks_to_secs(&self, ticks: i64) -> f64 {
        ticks as f64 * self.time_base.to_f64()
    }

    /// 名义帧时长（秒）：视频取 1 / avg_frame_rate
    pub fn nominal_frame_duration(&self) -> Option<f64> {
        match self.frame_rate {
            Some(rate) if rate.is_valid() => Some(1.0 / rate.to_f64()),
            _ => None,
        }
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub source: String,
    pub duration_ms: i64,
    pub streams: Vec<StreamInfo>,
    /// 被选中播放的视频流索引
    pub video_stream: Option<usize>,
    /// 被选中播放的音频流索引
    pub audio_stream: Option<usize>,
}

impl MediaInfo {
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.index == index)
    }

    pub fn video(&self) -> Option<&StreamInfo> {
        self.video_stream.and_then(|i| self.stream(i))
    }

    pub fn audio(&self) -> Option<&StreamInfo> {
        self.audio_stream.and_then(|i| self.stream(i))
    }

    /// 选出第一条视频流和第一条音频流
    pub fn select_default_streams(&mut self) {
        self.video_stream = self
            .streams
            .iter()
            .find(|s| s.kind == StreamKind::Video)
            .map(|s| s.index);
        self.audio_stream = self
            .streams
            .iter()
            .find(|s| s.kind == StreamKind::Audio)
            .map(|s| s.index);
    }
}

/// 压缩数据单元（一个 packet）
///
/// 由解封装线程创建，进入队列后只会被对应解码线程消费一次，创建后不再修改。
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedUnit {
    pub stream_index: usize,
    /// 显示时间戳（流时间基）
    pub pts: Option<i64>,
    /// 解码时间戳（流时间基）
    pub dts: Option<i64>,
    pub duration: i64,
    pub data: Vec<u8>,
}

impl EncodedUnit {
    pub fn new(stream_index: usize, pts: Option<i64>, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            pts,
            dts: pts,
            duration: 0,
            data,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 解码后的图像
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPicture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// 解码后的音频块（交错 f32）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub samples: Vec<f32>,
}

impl AudioBlock {
    /// 每声道采样数
    pub fn frames_per_channel(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames_per_channel() as f64 / self.sample_rate as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Video(VideoPicture),
    Audio(AudioBlock),
}

/// 解码器直接输出的帧，时间戳仍是流时间基，可能缺失
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub pts: Option<i64>,
    pub payload: FramePayload,
}

/// 可以渲染的帧（时间单位：秒）
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub pts: f64,
    pub duration: f64,
    pub payload: FramePayload,
}

impl Frame {
    pub fn timing(&self) -> FrameTiming {
        FrameTiming {
            pts: self.pts,
            duration: self.duration,
        }
    }

    pub fn as_video(&self) -> Option<&VideoPicture> {
        match &self.payload {
            FramePayload::Video(picture) => Some(picture),
            FramePayload::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioBlock> {
        match &self.payload {
            FramePayload::Audio(block) => Some(block),
            FramePayload::Video(_) => None,
        }
    }
}

/// 同步计算只需要的帧时间信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub pts: f64,
    pub duration: f64,
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Starting,
    Playing,
    Paused,
    Stopping,
    Stopped,
}

impl PlaybackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Stopping | PlaybackState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream(frame_rate: Option<Rational>) -> StreamInfo {
        StreamInfo {
            index: 0,
            kind: StreamKind::Video,
            time_base: Rational::new(1, 90_000),
            frame_rate,
            sample_rate: None,
            channels: 0,
            width: 640,
            height: 360,
            codec: "h264".to_string(),
        }
    }

    #[test]
    fn test_nominal_frame_duration() {
        let stream = video_stream(Some(Rational::new(25, 1)));
        assert!((stream.nominal_frame_duration().unwrap() - 0.04).abs() < 1e-9);
        assert_eq!(video_stream(Some(Rational::new(0, 0))).nominal_frame_duration(), None);
        assert_eq!(video_stream(None).nominal_frame_duration(), None);
    }

    #[test]
    fn test_ticks_to_secs() {
        let stream = video_stream(None);
        assert!((stream.ticks_to_secs(90_000) - 1.0).abs() < 1e-9);
        assert!((stream.ticks_to_secs(3_600) - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_audio_block_duration() {
        let block = AudioBlock {
            sample_rate: 48_000,
            channels: 2,
            format: SampleFormat::F32,
            samples: vec![0.0; 2 * 1024],
        };
        assert_eq!(block.frames_per_channel(), 1024);
        assert!((block.duration_secs() - 1024.0 / 48_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_default_streams() {
        let mut audio = video_stream(None);
        audio.index = 1;
        audio.kind = StreamKind::Audio;
        let mut info = MediaInfo {
            streams: vec![audio, video_stream(None)],
            ..Default::default()
        };
        info.select_default_streams();
        assert_eq!(info.video_stream, Some(0));
        assert_eq!(info.audio_stream, Some(1));
    }
}
