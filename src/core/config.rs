use crate::core::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放管线配置
///
/// 默认值与经典 ffplay 教程一致：视频包队列 5*256KB、音频包队列 5*16KB、
/// 视频帧缓冲 1 帧、同步阈值 10ms、放弃同步阈值 10s。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 视频包队列字节上限
    pub max_video_queue_bytes: usize,
    /// 音频包队列字节上限
    pub max_audio_queue_bytes: usize,
    /// 视频帧环形缓冲槽位数
    pub video_ring_capacity: usize,
    /// 音频帧环形缓冲槽位数
    pub audio_ring_capacity: usize,
    /// 包队列阻塞 pop 的单次等待时长
    pub pop_timeout_ms: u64,
    /// 帧缓冲阻塞等待的单次时长
    pub slot_timeout_ms: u64,
    /// 队列满时 demux 退避的最短 / 最长睡眠
    pub demux_backoff_min_ms: u64,
    pub demux_backoff_max_ms: u64,
    /// 音视频偏差小于该值时不做修正（秒）
    pub sync_threshold_secs: f64,
    /// 偏差超过该值视为跳变，不做修正（秒）
    pub nosync_threshold_secs: f64,
    /// 无帧可显示 / 暂停时的轮询刷新间隔
    pub idle_refresh_ms: u64,
    /// 控制线程事件通道容量
    pub event_channel_capacity: usize,
    /// 音频输出缓冲最多积压多少秒
    pub max_buffered_audio_secs: f64,
    /// 音频输出目标格式
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_video_queue_bytes: 5 * 256 * 1024,
            max_audio_queue_bytes: 5 * 16 * 1024,
            video_ring_capacity: 1,
            audio_ring_capacity: 8,
            pop_timeout_ms: 100,
            slot_timeout_ms: 100,
            demux_backoff_min_ms: 1,
            demux_backoff_max_ms: 100,
            sync_threshold_secs: 0.01,
            nosync_threshold_secs: 10.0,
            idle_refresh_ms: 10,
            event_channel_capacity: 64,
            max_buffered_audio_secs: 1.0,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}

impl PlayerConfig {
    /// 从 TOML 文件加载，缺失字段使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| PlayerError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| PlayerError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PlayerError::ConfigError(msg.to_string()));

        if self.max_video_queue_bytes == 0 || self.max_audio_queue_bytes == 0 {
            return invalid("包队列字节上限必须大于 0");
        }
        if self.video_ring_capacity == 0 || self.audio_ring_capacity == 0 {
            return invalid("帧缓冲容量必须大于 0");
        }
        if self.pop_timeout_ms == 0 || self.slot_timeout_ms == 0 || self.idle_refresh_ms == 0 {
            return invalid("等待超时必须大于 0");
        }
        if self.demux_backoff_min_ms == 0 || self.demux_backoff_min_ms > self.demux_backoff_max_ms {
            return invalid("demux 退避区间无效");
        }
        if !(self.sync_threshold_secs > 0.0 && self.sync_threshold_secs < self.nosync_threshold_secs) {
            return invalid("同步阈值必须满足 0 < sync < nosync");
        }
        if self.event_channel_capacity == 0 {
            return invalid("事件通道容量必须大于 0");
        }
        if self.max_buffered_audio_secs <= 0.0 || self.audio_sample_rate == 0 || self.audio_channels == 0 {
            return invalid("音频输出参数无效");
        }
        Ok(())
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }

    pub fn idle_refresh(&self) -> Duration {
        Duration::from_millis(self.idle_refresh_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PlayerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = PlayerConfig::from_toml("video_ring_capacity = 3\nsync_threshold_secs = 0.02\n").unwrap();
        assert_eq!(config.video_ring_capacity, 3);
        assert_eq!(config.sync_threshold_secs, 0.02);
        assert_eq!(config.max_video_queue_bytes, 5 * 256 * 1024);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(PlayerConfig::from_toml("video_ring_capacity = 0").is_err());
        assert!(PlayerConfig::from_toml("sync_threshold_secs = 20.0").is_err());
        assert!(PlayerConfig::from_toml("demux_backoff_min_ms = 50\ndemux_backoff_max_ms = 10").is_err());
        assert!(PlayerConfig::from_toml("not toml at all = = =").is_err());
    }
}
