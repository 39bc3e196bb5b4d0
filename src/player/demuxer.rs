use crate::core::{
    EncodedUnit, MediaInfo, PlayerConfig, PlayerError, Rational, Result, StreamInfo, StreamKind,
};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::source::{DemuxSource, FrameDecoder, MediaBackend};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info};

/// FFmpeg 后端
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// 初始化 FFmpeg（可重复调用）
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open(&self, source: &str) -> Result<Box<dyn DemuxSource>> {
        Ok(Box::new(Demuxer::open(source)?))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// 解封装器 - 负责读取媒体文件并分离音视频流
pub struct Demuxer {
    input_ctx: format::context::Input,
    media_info: MediaInfo,
    source_path: String,
}

impl Demuxer {
    /// 打开媒体文件
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开文件: {}", path);

        let input_ctx =
            format::input(&path).map_err(|e| PlayerError::OpenError(format!("无法打开文件: {}", e)))?;

        let media_info = Self::extract_media_info(&input_ctx, path);
        if media_info.video_stream.is_none() {
            return Err(PlayerError::NoVideoStream);
        }

        debug!("视频流索引: {:?}", media_info.video_stream);
        debug!("音频流索引: {:?}", media_info.audio_stream);

        Ok(Self {
            input_ctx,
            media_info,
            source_path: path.to_string(),
        })
    }

    /// 提取所有流的元数据，选出最佳音视频流
    fn extract_media_info(input_ctx: &format::context::Input, path: &str) -> MediaInfo {
        let streams = input_ctx.streams().map(|stream| Self::stream_info(&stream)).collect();

        MediaInfo {
            source: path.to_string(),
            duration_ms: input_ctx.duration().max(0) / 1000, // 微秒转毫秒
            streams,
            video_stream: input_ctx.streams().best(media::Type::Video).map(|s| s.index()),
            audio_stream: input_ctx.streams().best(media::Type::Audio).map(|s| s.index()),
        }
    }

    fn stream_info(stream: &format::stream::Stream) -> StreamInfo {
        let parameters = stream.parameters();
        let codec = parameters.id().name().to_string();
        let kind = match parameters.medium() {
            media::Type::Video => StreamKind::Video,
            media::Type::Audio => StreamKind::Audio,
            media::Type::Subtitle => StreamKind::Subtitle,
            _ => StreamKind::Other,
        };
        let time_base = stream.time_base();
        let frame_rate = stream.avg_frame_rate();

        let mut info = StreamInfo {
            index: stream.index(),
            kind,
            time_base: Rational::new(time_base.numerator(), time_base.denominator()),
            frame_rate: None,
            sample_rate: None,
            channels: 0,
            width: 0,
            height: 0,
            codec,
        };

        // 宽高、采样率需要打开解码器上下文才能拿到，失败时保留默认值
        let context = ffmpeg::codec::context::Context::from_parameters(parameters).ok();
        match kind {
            StreamKind::Video => {
                info.frame_rate = Some(Rational::new(frame_rate.numerator(), frame_rate.denominator()));
                if let Some(video) = context.and_then(|c| c.decoder().video().ok()) {
                    info.width = video.width();
                    info.height = video.height();
                }
            }
            StreamKind::Audio => {
                if let Some(audio) = context.and_then(|c| c.decoder().audio().ok()) {
                    info.sample_rate = Some(audio.rate());
                    info.channels = audio.channels();
                }
            }
            _ => {}
        }
        info
    }
}

impl DemuxSource for Demuxer {
    fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn read_unit(&mut self) -> Result<Option<EncodedUnit>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(EncodedUnit {
                stream_index: packet.stream(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(PlayerError::ReadError(e.to_string())),
        }
    }

    fn open_decoder(&self, stream: &StreamInfo, config: &PlayerConfig) -> Result<Box<dyn FrameDecoder>> {
        let ff_stream = self
            .input_ctx
            .stream(stream.index)
            .ok_or_else(|| PlayerError::DecodeError(format!("流 {} 不存在", stream.index)))?;

        match stream.kind {
            StreamKind::Video => Ok(Box::new(VideoDecoder::from_stream(ff_stream)?)),
            StreamKind::Audio => Ok(Box::new(AudioDecoder::from_stream(
                ff_stream,
                config.audio_sample_rate,
                config.audio_channels,
            )?)),
            other => Err(PlayerError::DecodeError(format!("不支持解码 {} 流", other.as_str()))),
        }
    }

    fn description(&self) -> String {
        format!("Demuxer(file: {})", self.source_path)
    }
}
