use crate::core::{FrameTiming, PlayerConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME_TIMER_RESYNC_SECS: f64 = 0.1;

/// 音视频同步时钟
///
/// - 音频时钟由音频回调写入（时间戳 + 写入时刻的快照），视频渲染路径只读
/// - 视频时钟由视频解码线程维护，用于补全缺失的 PTS
/// - 帧定时器由控制线程维护，用于计算下一次刷新的等待时间
#[derive(Clone)]
pub struct AvClock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    epoch: Instant,
    sync_threshold: f64,
    nosync_threshold: f64,
    audio: Mutex<Option<AudioSnapshot>>,
    video: Mutex<VideoClockState>,
    timer: Mutex<FrameTimerState>,
    paused_at: Mutex<Option<Instant>>,
}

#[derive(Clone, Copy)]
struct AudioSnapshot {
    pts: f64,
    at: Instant,
}

#[derive(Default)]
struct VideoClockState {
    /// 下一帧的预测 PTS
    video_clock: f64,
}

#[derive(Default)]
struct FrameTimerState {
    /// 相对 epoch 的秒数
    frame_timer: Option<f64>,
    last_frame_delay: f64,
}

impl AvClock {
    pub fn new(sync_threshold: f64, nosync_threshold: f64) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                epoch: Instant::now(),
                sync_threshold,
                nosync_threshold,
                audio: Mutex::new(None),
                video: Mutex::new(VideoClockState::default()),
                timer: Mutex::new(FrameTimerState::default()),
                paused_at: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &PlayerConfig) -> Self {
        Self::new(config.sync_threshold_secs, config.nosync_threshold_secs)
    }

    // ==================== 音频时钟 ====================

    /// 音频回调更新音频时钟（以当前时刻为快照）
    pub fn set_audio_clock(&self, pts: f64) {
        self.set_audio_clock_at(pts, Instant::now());
    }

    pub fn set_audio_clock_at(&self, pts: f64, at: Instant) {
        *self.inner.audio.lock() = Some(AudioSnapshot { pts, at });
    }

    /// 音频结束后撤掉同步参考
    pub fn clear_audio_clock(&self) {
        *self.inner.audio.lock() = None;
    }

    /// 当前音频时钟（按流逝的墙钟时间外推），没有音频时返回 None
    pub fn audio_clock(&self) -> Option<f64> {
        self.audio_clock_at(Instant::now())
    }

    pub fn audio_clock_at(&self, now: Instant) -> Option<f64> {
        let snapshot = (*self.inner.audio.lock())?;
        // 暂停期间时钟冻结在暂停时刻
        let paused_at = *self.inner.paused_at.lock();
        let now = paused_at.unwrap_or(now);
        let elapsed = now.saturating_duration_since(snapshot.at).as_secs_f64();
        Some(snapshot.pts + elapsed)
    }

    // ==================== 视频时钟 ====================

    /// 确定一帧视频的 PTS：优先使用解码器给出的时间戳，缺失时使用预测值，
    /// 然后把预测值推进本帧时长
    pub fn synchronize_video(&self, pts: Option<f64>, duration: f64) -> f64 {
        let mut video = self.inner.video.lock();
        let pts = match pts {
            Some(pts) => {
                video.video_clock = pts;
                pts
            }
            None => video.video_clock,
        };
        video.video_clock += duration;
        pts
    }

    pub fn video_clock(&self) -> f64 {
        self.inner.video.lock().video_clock
    }

    // ==================== 刷新延迟 ====================

    /// 计算显示 current 之前需要等待的时长（秒），使用此刻的音频时钟
    pub fn compute_next_delay(&self, current: FrameTiming, previous: Option<FrameTiming>) -> f64 {
        let delay = compute_delay(
            current,
            previous,
            self.audio_clock(),
            self.inner.sync_threshold,
            self.inner.nosync_threshold,
        );
        self.inner.timer.lock().last_frame_delay = delay;
        delay
    }

    /// frame_timer += delay，返回距离 frame_timer 还需等待的时长
    ///
    /// 以累加的 frame_timer 为基准调度，而不是以"现在"为基准，避免刷新开销累积成整体变慢。
    pub fn advance_frame_timer(&self, delay: f64) -> Duration {
        self.advance_frame_timer_at(delay, Instant::now())
    }

    pub fn advance_frame_timer_at(&self, delay: f64, now: Instant) -> Duration {
        let now_secs = now.saturating_duration_since(self.inner.epoch).as_secs_f64();
        let mut timer = self.inner.timer.lock();
        let mut frame_timer = timer.frame_timer.unwrap_or(now_secs) + delay.max(0.0);
        // 落后太多（长时间饥饿）时重新对齐到当前时刻，否则后续帧会不等待连续显示
        if now_secs - frame_timer > FRAME_TIMER_RESYNC_SECS {
            frame_timer = now_secs;
        }
        timer.frame_timer = Some(frame_timer);
        Duration::from_secs_f64((frame_timer - now_secs).max(0.0))
    }

    pub fn last_frame_delay(&self) -> f64 {
        self.inner.timer.lock().last_frame_delay
    }

    // ==================== 暂停 ====================

    pub fn pause(&self) {
        let mut paused_at = self.inner.paused_at.lock();
        if paused_at.is_none() {
            *paused_at = Some(Instant::now());
        }
    }

    /// 恢复：帧定时器和音频快照都顺延暂停的时长
    pub fn resume(&self) {
        let Some(paused_at) = self.inner.paused_at.lock().take() else {
            return;
        };
        let paused_for = paused_at.elapsed();

        if let Some(frame_timer) = self.inner.timer.lock().frame_timer.as_mut() {
            *frame_timer += paused_for.as_secs_f64();
        }
        if let Some(snapshot) = self.inner.audio.lock().as_mut() {
            snapshot.at += paused_for;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused_at.lock().is_some()
    }
}

/// 刷新延迟计算
///
/// 1. 基础延迟 = 两帧 PTS 之差；首帧或差值非正时退回本帧名义时长
/// 2. 偏差 = 本帧 PTS - 音频时钟
/// 3. sync_threshold < |偏差| < nosync_threshold 时按偏差修正：视频落后则缩短，
///    超前则延长，结果限制在 [0, 2 * 基础延迟]
/// 4. 偏差超过 nosync_threshold 视为跳变，不修正
///
/// 符号约定：偏差为正表示视频超前音频，延迟变大（与 ffplay 一致）。
pub fn compute_delay(
    current: FrameTiming,
    previous: Option<FrameTiming>,
    audio_clock: Option<f64>,
    sync_threshold: f64,
    nosync_threshold: f64,
) -> f64 {
    let base = match previous {
        Some(prev) if current.pts - prev.pts > 0.0 => current.pts - prev.pts,
        _ => current.duration.max(0.0),
    };

    let Some(audio_clock) = audio_clock else {
        return base;
    };

    let drift = current.pts - audio_clock;
    if drift.abs() > sync_threshold && drift.abs() < nosync_threshold {
        (base + drift).clamp(0.0, 2.0 * base)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNC: f64 = 0.01;
    const NOSYNC: f64 = 10.0;

    fn timing(pts: f64) -> FrameTiming {
        FrameTiming { pts, duration: 0.04 }
    }

    #[test]
    fn test_base_delay_from_pts_difference() {
        let delay = compute_delay(timing(1.04), Some(timing(1.0)), None, SYNC, NOSYNC);
        assert!((delay - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_first_frame_uses_nominal_duration() {
        assert!((compute_delay(timing(0.0), None, None, SYNC, NOSYNC) - 0.04).abs() < 1e-9);
        // PTS 回退（非正差值）同样退回名义时长
        let delay = compute_delay(timing(1.0), Some(timing(1.2)), None, SYNC, NOSYNC);
        assert!((delay - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_drift_within_threshold_is_ignored() {
        let delay = compute_delay(timing(10.002), Some(timing(9.962)), Some(10.0), SYNC, NOSYNC);
        assert!((delay - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_video_ahead_of_audio_waits_longer() {
        let delay = compute_delay(timing(10.015), Some(timing(9.975)), Some(10.0), SYNC, NOSYNC);
        assert!((delay - 0.055).abs() < 1e-9);
    }

    #[test]
    fn test_video_behind_audio_speeds_up() {
        let delay = compute_delay(timing(9.985), Some(timing(9.945)), Some(10.0), SYNC, NOSYNC);
        assert!((delay - 0.025).abs() < 1e-9);
    }

    #[test]
    fn test_correction_is_clamped() {
        // 落后太多：不会变成负数
        let delay = compute_delay(timing(9.0), Some(timing(8.96)), Some(10.0), SYNC, NOSYNC);
        assert_eq!(delay, 0.0);
        // 超前太多：最多两倍基础延迟
        let delay = compute_delay(timing(11.0), Some(timing(10.96)), Some(10.0), SYNC, NOSYNC);
        assert!((delay - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_gross_desync_leaves_base_delay() {
        let delay = compute_delay(timing(25.0), Some(timing(24.96)), Some(10.0), SYNC, NOSYNC);
        assert!((delay - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_synchronize_video_predicts_missing_pts() {
        let clock = AvClock::new(SYNC, NOSYNC);
        assert_eq!(clock.synchronize_video(Some(1.0), 0.04), 1.0);
        let predicted = clock.synchronize_video(None, 0.04);
        assert!((predicted - 1.04).abs() < 1e-9);
        let predicted = clock.synchronize_video(None, 0.04);
        assert!((predicted - 1.08).abs() < 1e-9);
        assert!((clock.video_clock() - 1.12).abs() < 1e-9);
    }

    #[test]
    fn test_audio_clock_extrapolates() {
        let clock = AvClock::new(SYNC, NOSYNC);
        assert_eq!(clock.audio_clock(), None);
        let t0 = Instant::now();
        clock.set_audio_clock_at(10.0, t0);
        let later = clock.audio_clock_at(t0 + Duration::from_millis(250)).unwrap();
        assert!((later - 10.25).abs() < 1e-6);

        // 撤掉音频参考后不再修正漂移
        clock.clear_audio_clock();
        assert_eq!(clock.audio_clock(), None);
        let delay = clock.compute_next_delay(timing(20.0), Some(timing(19.96)));
        assert!((delay - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_frame_timer_accumulates() {
        let clock = AvClock::new(SYNC, NOSYNC);
        let now = Instant::now();
        let first = clock.advance_frame_timer_at(0.04, now);
        assert!((first.as_secs_f64() - 0.04).abs() < 1e-6);
        // 刷新处理花了 10ms：下一次只需等 70ms，而不是 40ms 之后再多 10ms
        let second = clock.advance_frame_timer_at(0.04, now + Duration::from_millis(10));
        assert!((second.as_secs_f64() - 0.07).abs() < 1e-6);
        // 落后于定时器时不会返回负值
        let late = clock.advance_frame_timer_at(0.04, now + Duration::from_secs(1));
        assert_eq!(late, Duration::ZERO);
    }

    #[test]
    fn test_pause_freezes_audio_clock() {
        let clock = AvClock::new(SYNC, NOSYNC);
        clock.set_audio_clock(5.0);
        clock.pause();
        assert!(clock.is_paused());
        let frozen = clock.audio_clock().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.audio_clock().unwrap(), frozen);
        clock.resume();
        assert!(!clock.is_paused());
        assert!(clock.audio_clock().unwrap() - frozen < 0.02);
    }
}
