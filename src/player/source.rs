use crate::core::{DecodedFrame, EncodedUnit, Frame, MediaInfo, PlayerConfig, Result, StreamInfo};
use crate::player::audio_buffer::AudioSampleBuffer;
use std::sync::Arc;

/// 送入解码器的输入
#[derive(Debug)]
pub enum DecoderInput {
    Unit(EncodedUnit),
    /// 输入结束，要求解码器吐出内部缓存的所有帧
    Flush,
}

/// 从解码器取帧的结果
#[derive(Debug)]
pub enum DecodeOutput {
    Frame(DecodedFrame),
    /// 需要更多输入才能产出下一帧（不是错误）
    NeedsMoreInput,
    /// flush 之后所有帧都已取出
    Eof,
}

/// 解复用数据源抽象接口
///
/// 不同的媒体源（本地文件、合成测试源等）实现这个接口，整个读取过程只在 demux 线程里进行。
pub trait DemuxSource: Send {
    /// 获取媒体信息（打开时已探测完毕）
    fn media_info(&self) -> &MediaInfo;

    /// 读取下一个编码单元
    ///
    /// 返回：
    /// - Ok(Some(unit)): 成功读取
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误（致命）
    fn read_unit(&mut self) -> Result<Option<EncodedUnit>>;

    /// 为指定流创建解码器
    ///
    /// 解码器参数来自打开的容器，所以由数据源负责构造；`config` 提供音频输出格式等目标参数。
    fn open_decoder(&self, stream: &StreamInfo, config: &PlayerConfig) -> Result<Box<dyn FrameDecoder>>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 解码器：提交输入 / 取出帧，输入和输出不是一一对应
pub trait FrameDecoder: Send {
    fn submit(&mut self, input: DecoderInput) -> Result<()>;

    fn receive(&mut self) -> Result<DecodeOutput>;

    fn description(&self) -> String;
}

/// 打开媒体源的后端（FFmpeg / 合成源）
pub trait MediaBackend: Send + Sync {
    fn open(&self, source: &str) -> Result<Box<dyn DemuxSource>>;

    fn name(&self) -> &'static str;
}

/// 视频显示端
pub trait PresentationSink: Send {
    /// 拿到流信息后创建显示表面
    fn open_surface(&mut self, info: &MediaInfo) -> Result<()>;

    fn present(&mut self, frame: &Frame) -> Result<()>;

    fn close(&mut self) {}
}

/// 音频输出设备
///
/// 设备回调从 `AudioSampleBuffer::pull_audio` 拉取样本，同时推进音频时钟。
pub trait AudioDevice: Send {
    /// 设备实际使用的 (采样率, 声道数)，音频解码器按此重采样
    fn output_format(&self) -> (u32, u16);

    fn start(&mut self, buffer: Arc<AudioSampleBuffer>) -> Result<()>;

    fn set_paused(&mut self, _paused: bool) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self);
}
