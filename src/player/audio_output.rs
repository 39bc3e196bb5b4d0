use crate::core::{PlayerError, Result};
use crate::player::audio_buffer::AudioSampleBuffer;
use crate::player::source::AudioDevice;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// 设备不支持请求的格式时依次尝试的 (采样率, 声道数)
const FALLBACK_CONFIGS: [(u32, u16); 4] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];

/// 音频输出 - 使用 cpal 播放音频
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

// cpal::Stream 本身不是 Send；AudioOutput 创建后只交给控制线程，由它启动、暂停和销毁
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 创建音频输出（支持非标准配置自动回退）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let requested = Self::stream_config(sample_rate, channels);
        let config = if Self::is_supported(&device, &requested)? {
            requested
        } else {
            warn!("⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置", sample_rate, channels);
            let mut chosen = None;
            for (fb_rate, fb_channels) in FALLBACK_CONFIGS {
                let candidate = Self::stream_config(fb_rate, fb_channels);
                if Self::is_supported(&device, &candidate)? {
                    info!("✅ 使用回退配置: {} Hz, {} 声道", fb_rate, fb_channels);
                    chosen = Some(candidate);
                    break;
                }
            }
            chosen.ok_or_else(|| {
                PlayerError::AudioError(format!(
                    "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                    sample_rate, channels
                ))
            })?
        };

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    fn stream_config(sample_rate: u32, channels: u16) -> StreamConfig {
        StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    fn is_supported(device: &Device, config: &StreamConfig) -> Result<bool> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported.any(|range| Self::is_config_compatible(config, &range)))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }
}

impl AudioDevice for AudioOutput {
    fn output_format(&self) -> (u32, u16) {
        (self.config.sample_rate.0, self.config.channels)
    }

    /// 开始播放：设备回调从样本缓冲拉数据
    fn start(&mut self, buffer: Arc<AudioSampleBuffer>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    buffer.pull_audio(data);
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("音频输出已启动");
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        let Some(stream) = &self.stream else {
            return Ok(());
        };
        let result = if paused { stream.pause() } else { stream.play() };
        result.map_err(|e| PlayerError::AudioError(format!("切换音频流状态失败: {}", e)))
    }

    /// 停止播放
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
