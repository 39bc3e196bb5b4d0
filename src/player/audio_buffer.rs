use crate::core::{AvClock, Frame};
use crossbeam::queue::SegQueue;
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 音频样本缓冲：控制线程写入解码后的音频块，设备回调从中拉取
///
/// 每次拉取后用 "已写入样本的结束时间 - 仍在缓冲里的时长" 更新音频时钟。
pub struct AudioSampleBuffer {
    samples: SegQueue<f32>,
    timing: Mutex<BufferTiming>,
    volume: Mutex<f32>,
    underruns: AtomicU64,
    /// 音频流已经没有后续帧
    ended: AtomicBool,
    clock: AvClock,
}

#[derive(Debug, Clone, Copy)]
struct BufferTiming {
    /// 最后写入的音频块的结束时间（秒），还没写入过则为 None
    end_pts: Option<f64>,
    sample_rate: u32,
    channels: u16,
}

impl AudioSampleBuffer {
    pub fn new(sample_rate: u32, channels: u16, clock: AvClock) -> Self {
        Self {
            samples: SegQueue::new(),
            timing: Mutex::new(BufferTiming {
                end_pts: None,
                sample_rate,
                channels,
            }),
            volume: Mutex::new(1.0),
            underruns: AtomicU64::new(0),
            ended: AtomicBool::new(false),
            clock,
        }
    }

    /// 写入一帧音频（非音频帧忽略）
    pub fn write_frame(&self, frame: &Frame) {
        let Some(block) = frame.as_audio() else {
            return;
        };
        // 样本和结束时间在同一把锁内更新，回调看到的两者总是一致的
        let mut timing = self.timing.lock();
        for sample in &block.samples {
            self.samples.push(*sample);
        }
        timing.end_pts = Some(frame.pts + block.duration_secs());
        timing.sample_rate = block.sample_rate;
        timing.channels = block.channels;
    }

    /// 设备回调：填满 `out`，数据不足时补静音
    ///
    /// 返回实际从缓冲取出的样本数。
    pub fn pull_audio(&self, out: &mut [f32]) -> usize {
        let volume = *self.volume.lock();
        let mut filled = 0;
        for sample in out.iter_mut() {
            match self.samples.pop() {
                Some(value) => {
                    *sample = value * volume;
                    filled += 1;
                }
                None => *sample = 0.0,
            }
        }

        if filled < out.len() {
            let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            if count <= 3 || count % 100 == 0 {
                debug!("🔇 音频欠载 #{}（需要 {}，只有 {}）", count, out.len(), filled);
            }
        }

        if self.ended.load(Ordering::Acquire) && self.samples.is_empty() {
            // 音轨播完，不再作为同步参考
            self.clock.clear_audio_clock();
        } else if let Some(pts) = self.playing_pts() {
            self.clock.set_audio_clock(pts);
        }
        filled
    }

    /// 标记音频流结束：缓冲放空后音频时钟失效，视频按自身节奏播放
    pub fn mark_ended(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            debug!("🔚 音频流结束，剩余 {} 个样本", self.samples.len());
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// 设备正在播放的位置：已写入的结束时间减去仍在缓冲里的时长
    fn playing_pts(&self) -> Option<f64> {
        let timing = self.timing.lock();
        let end_pts = timing.end_pts?;
        let per_sec = timing.sample_rate as f64 * timing.channels as f64;
        if per_sec <= 0.0 {
            return None;
        }
        Some(end_pts - self.samples.len() as f64 / per_sec)
    }

    /// 缓冲中剩余的时长（秒）
    pub fn buffered_secs(&self) -> f64 {
        let timing = *self.timing.lock();
        let per_sec = timing.sample_rate as f64 * timing.channels as f64;
        if per_sec <= 0.0 {
            0.0
        } else {
            self.samples.len() as f64 / per_sec
        }
    }

    pub fn buffered_samples(&self) -> usize {
        self.samples.len()
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// 清空缓冲区
    pub fn clear(&self) {
        while self.samples.pop().is_some() {}
    }
}
