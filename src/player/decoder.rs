use crate::core::{
    AudioBlock, DecodedFrame, EncodedUnit, FramePayload, PixelFormat, PlayerError, Result, SampleFormat,
    VideoPicture,
};
use crate::player::source::{DecodeOutput, DecoderInput, FrameDecoder};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::debug;
use std::collections::VecDeque;

fn decode_error(e: ffmpeg::Error) -> PlayerError {
    PlayerError::DecodeError(e.to_string())
}

fn to_packet(unit: &EncodedUnit) -> ffmpeg::Packet {
    let mut packet = ffmpeg::Packet::copy(&unit.data);
    packet.set_pts(unit.pts);
    packet.set_dts(unit.dts);
    packet.set_duration(unit.duration);
    packet.set_stream(unit.stream_index);
    packet
}

/// 送包状态：解码器暂时不收（EAGAIN）的包先排着，取帧之后再送
#[derive(Default)]
struct PacketFeeder {
    pending: VecDeque<ffmpeg::Packet>,
    eof_requested: bool,
    eof_sent: bool,
}

impl PacketFeeder {
    fn submit(&mut self, decoder: &mut codec::decoder::Opened, input: DecoderInput) -> Result<()> {
        match input {
            DecoderInput::Unit(unit) => self.pending.push_back(to_packet(&unit)),
            DecoderInput::Flush => self.eof_requested = true,
        }
        self.feed(decoder).map(|_| ())
    }

    /// 尽量把排队的包送进解码器，返回是否有进展
    fn feed(&mut self, decoder: &mut codec::decoder::Opened) -> Result<bool> {
        let mut progressed = false;
        while let Some(packet) = self.pending.front() {
            match decoder.send_packet(packet) {
                Ok(()) => {
                    self.pending.pop_front();
                    progressed = true;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => return Ok(progressed),
                Err(e) => {
                    self.pending.pop_front();
                    return Err(decode_error(e));
                }
            }
        }
        if self.eof_requested && !self.eof_sent {
            decoder.send_eof().map_err(decode_error)?;
            self.eof_sent = true;
            progressed = true;
        }
        Ok(progressed)
    }

    /// receive 返回 EAGAIN 时：有排队的输入就先送进去再取
    fn after_again(&mut self, decoder: &mut codec::decoder::Opened) -> Result<Option<DecodeOutput>> {
        if self.feed(decoder)? {
            Ok(None)
        } else {
            Ok(Some(DecodeOutput::NeedsMoreInput))
        }
    }
}

/// 软件视频解码器，输出 RGBA
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    feeder: PacketFeeder,
}

// SwsContext 本身不是 Send，但每个解码器实例只在自己的解码线程里使用
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    /// 从视频流创建解码器
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        debug!(
            "软件解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            scaler: None,
            feeder: PacketFeeder::default(),
        })
    }

    /// 转换帧格式为 RGBA
    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<VideoPicture> {
        let width = frame.width();
        let height = frame.height();

        // 初始化 scaler（YUV -> RGBA），分辨率变化时重建
        let rebuild = match &self.scaler {
            Some(scaler) => scaler.input().width != width || scaler.input().height != height,
            None => true,
        };
        if rebuild {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(PlayerError::DecodeError("scaler 未初始化".to_string()));
        };

        let mut rgba_frame = util::frame::Video::empty();
        scaler.run(frame, &mut rgba_frame)?;

        // 复制数据到连续内存（去掉行对齐填充）
        let row_size = width as usize * 4;
        let mut data = vec![0u8; row_size * height as usize];
        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);
        for (y, row) in data.chunks_exact_mut(row_size).enumerate() {
            let src_offset = y * stride;
            row.copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }

        Ok(VideoPicture {
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

impl FrameDecoder for VideoDecoder {
    fn submit(&mut self, input: DecoderInput) -> Result<()> {
        self.feeder.submit(&mut self.decoder, input)
    }

    fn receive(&mut self) -> Result<DecodeOutput> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts = decoded.timestamp().or_else(|| decoded.pts());
                    let picture = self.convert_frame(&decoded)?;
                    return Ok(DecodeOutput::Frame(DecodedFrame {
                        pts,
                        payload: FramePayload::Video(picture),
                    }));
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    if let Some(output) = self.feeder.after_again(&mut self.decoder)? {
                        return Ok(output);
                    }
                }
                Err(ffmpeg::Error::Eof) => return Ok(DecodeOutput::Eof),
                Err(e) => return Err(decode_error(e)),
            }
        }
    }

    fn description(&self) -> String {
        format!("ffmpeg video {:?} {}x{}", self.decoder.id(), self.decoder.width(), self.decoder.height())
    }
}

/// 音频解码器，输出交错 f32（按输出设备格式重采样）
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    feeder: PacketFeeder,
    target_channels: u16,
    target_sample_rate: u32,
}

// SwrContext 同样只在解码线程内使用
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    /// 从音频流创建解码器（指定目标配置）
    pub fn from_stream(
        stream: format::stream::Stream,
        target_sample_rate: u32,
        target_channels: u16,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        debug!(
            "音频解码器: {} Hz, {} 声道 → 目标: {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            target_sample_rate,
            target_channels
        );

        Ok(Self {
            decoder,
            resampler: None,
            feeder: PacketFeeder::default(),
            target_channels,
            target_sample_rate,
        })
    }

    /// 转换音频帧为 f32 格式（支持声道转换和重采样）
    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioBlock> {
        if self.resampler.is_none() {
            let target_layout = match self.target_channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };

            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target_sample_rate,
                self.target_channels
            );

            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.target_sample_rate,
            )?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(PlayerError::DecodeError("resampler 未初始化".to_string()));
        };

        let mut resampled = util::frame::Audio::empty();
        resampler.run(frame, &mut resampled)?;

        let sample_count = resampled.samples() * self.target_channels as usize;
        let bytes = &resampled.data(0)[..sample_count * std::mem::size_of::<f32>()];
        let samples: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);

        Ok(AudioBlock {
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
            format: SampleFormat::F32,
            samples,
        })
    }
}

impl FrameDecoder for AudioDecoder {
    fn submit(&mut self, input: DecoderInput) -> Result<()> {
        self.feeder.submit(&mut self.decoder, input)
    }

    fn receive(&mut self) -> Result<DecodeOutput> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts = decoded.timestamp().or_else(|| decoded.pts());
                    let block = self.convert_frame(&decoded)?;
                    return Ok(DecodeOutput::Frame(DecodedFrame {
                        pts,
                        payload: FramePayload::Audio(block),
                    }));
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    if let Some(output) = self.feeder.after_again(&mut self.decoder)? {
                        return Ok(output);
                    }
                }
                Err(ffmpeg::Error::Eof) => return Ok(DecodeOutput::Eof),
                Err(e) => return Err(decode_error(e)),
            }
        }
    }

    fn description(&self) -> String {
        format!(
            "ffmpeg audio {:?} → {}Hz/{}ch",
            self.decoder.id(),
            self.target_sample_rate,
            self.target_channels
        )
    }
}
