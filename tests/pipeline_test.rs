use sffplay::core::{PlaybackState, PlayerConfig, PlayerError};
use sffplay::player::{
    AudioDevice, PlaybackController, RecordingSink, SimulatedAudioDevice, SyntheticBackend, SyntheticConfig,
};
use std::thread;
use std::time::{Duration, Instant};

fn start(
    synthetic: SyntheticConfig,
    audio: Option<Box<dyn AudioDevice>>,
) -> (PlaybackController, RecordingSink) {
    let sink = RecordingSink::new();
    let controller = PlaybackController::start(
        "synthetic://pipeline",
        &SyntheticBackend::new(synthetic),
        Box::new(sink.clone()),
        audio,
        PlayerConfig::default(),
    )
    .expect("playback should start");
    (controller, sink)
}

fn assert_pts(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "presented {:?}", actual);
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6, "presented {:?}, expected {:?}", actual, expected);
    }
}

fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_presents_three_frames_in_order_then_stops() {
    let (mut controller, sink) = start(SyntheticConfig::default(), None);
    let stats = controller.wait_until_stopped();

    assert_pts(&sink.presented_pts(), &[0.0, 0.04, 0.08]);
    assert_eq!(stats.presented_frames, 3);
    assert_eq!(stats.error, None);
    assert!(controller.take_error().is_none());
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert!(sink.is_closed());
    assert!(sink.surface().is_some());

    // 按帧定时器节奏显示，而不是一口气刷完
    let presented = sink.presented();
    let span = presented[2].at.duration_since(presented[0].at);
    assert!(span >= Duration::from_millis(60), "span {:?}", span);
}

#[test]
fn test_missing_timestamps_are_predicted() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 4,
            missing_video_pts: true,
            ..Default::default()
        },
        None,
    );
    controller.wait_until_stopped();
    assert_pts(&sink.presented_pts(), &[0.0, 0.04, 0.08, 0.12]);
}

#[test]
fn test_decoder_delay_frames_are_flushed_at_end() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 5,
            decoder_delay: 2,
            frame_rate: sffplay::core::Rational::new(50, 1),
            ..Default::default()
        },
        None,
    );
    controller.wait_until_stopped();
    assert_pts(&sink.presented_pts(), &[0.0, 0.02, 0.04, 0.06, 0.08]);
}

#[test]
fn test_untracked_streams_are_ignored() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            extra_stream: true,
            ..Default::default()
        },
        None,
    );
    let stats = controller.wait_until_stopped();
    assert_eq!(stats.presented_frames, 3);
    assert_eq!(sink.presented_count(), 3);
}

#[test]
fn test_plays_with_audio_device() {
    let device = SimulatedAudioDevice::new(48_000, 2);
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 10,
            audio: true,
            ..Default::default()
        },
        Some(Box::new(device)),
    );
    let stats = controller.wait_until_stopped();

    let expected: Vec<f64> = (0..10).map(|i| i as f64 * 0.04).collect();
    assert_pts(&sink.presented_pts(), &expected);
    assert_eq!(stats.error, None);
}

#[test]
fn test_video_keeps_pace_after_audio_track_ends() {
    let device = SimulatedAudioDevice::new(48_000, 2);
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 50,
            audio: true,
            audio_frames: Some(5),
            ..Default::default()
        },
        Some(Box::new(device)),
    );
    let stats = controller.wait_until_stopped();
    assert_eq!(stats.presented_frames, 50);
    assert_eq!(stats.error, None);

    // 音轨只有 0.2s，之后视频应按自身 PTS 节奏播完 1.96s，而不是被拖成半速
    let presented = sink.presented();
    let span = presented[49].at.duration_since(presented[0].at);
    assert!(span >= Duration::from_millis(1800), "span {:?}", span);
    assert!(span < Duration::from_millis(2600), "span {:?}", span);
}

#[test]
fn test_audio_stream_ignored_without_device() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 5,
            audio: true,
            ..Default::default()
        },
        None,
    );
    controller.wait_until_stopped();
    assert_eq!(sink.presented_count(), 5);
}

#[test]
fn test_stop_while_decoder_blocked_on_full_ring() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 500,
            ..Default::default()
        },
        None,
    );
    controller.pause();
    assert!(wait_for(
        || controller.state() == PlaybackState::Paused,
        Duration::from_secs(1)
    ));
    // 暂停后解码线程很快填满 1 帧缓冲并阻塞
    thread::sleep(Duration::from_millis(150));

    let begin = Instant::now();
    controller.stop();
    let stats = controller.wait_until_stopped();
    assert!(begin.elapsed() < Duration::from_secs(1), "stop took {:?}", begin.elapsed());

    assert!(stats.presented_frames < 500);
    assert_eq!(stats.error, None);
    assert!(controller.take_error().is_none());
    assert!(sink.is_closed());
    assert_eq!(controller.state(), PlaybackState::Stopped);
}

#[test]
fn test_stop_is_idempotent() {
    let (mut controller, _sink) = start(
        SyntheticConfig {
            video_frames: 500,
            ..Default::default()
        },
        None,
    );
    controller.stop();
    controller.stop();
    let first = controller.wait_until_stopped();
    let second = controller.wait_until_stopped();
    assert_eq!(first.presented_frames, second.presented_frames);
    controller.stop();
    assert_eq!(controller.state(), PlaybackState::Stopped);
}

#[test]
fn test_pause_holds_presentation_until_resume() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 20,
            frame_rate: sffplay::core::Rational::new(50, 1),
            ..Default::default()
        },
        None,
    );
    assert!(wait_for(|| sink.presented_count() >= 2, Duration::from_secs(2)));

    controller.pause();
    assert!(wait_for(
        || controller.state() == PlaybackState::Paused,
        Duration::from_secs(1)
    ));
    thread::sleep(Duration::from_millis(50));
    let paused_count = sink.presented_count();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(sink.presented_count(), paused_count);
    assert!(paused_count < 20);

    controller.resume();
    let stats = controller.wait_until_stopped();
    assert_eq!(stats.presented_frames, 20);
    assert!(stats.idle_refreshes > 0);

    let expected: Vec<f64> = (0..20).map(|i| i as f64 * 0.02).collect();
    assert_pts(&sink.presented_pts(), &expected);
}

#[test]
fn test_read_error_is_reported_after_stop() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 10,
            fail_read_after: Some(2),
            ..Default::default()
        },
        None,
    );
    let stats = controller.wait_until_stopped();

    assert!(stats.error.is_some());
    assert!(matches!(controller.take_error(), Some(PlayerError::ReadError(_))));
    assert!(sink.presented_count() <= 2);
    assert!(sink.is_closed());
    assert_eq!(controller.state(), PlaybackState::Stopped);
}

#[test]
fn test_decode_error_is_reported_after_stop() {
    let (mut controller, sink) = start(
        SyntheticConfig {
            video_frames: 10,
            fail_decode_at: Some(1),
            ..Default::default()
        },
        None,
    );
    let stats = controller.wait_until_stopped();

    assert!(stats.error.is_some());
    assert!(matches!(controller.take_error(), Some(PlayerError::DecodeError(_))));
    assert!(sink.presented_count() <= 1);
}

#[test]
fn test_open_error_returned_before_any_thread_starts() {
    let sink = RecordingSink::new();
    let result = PlaybackController::start(
        "",
        &SyntheticBackend::new(SyntheticConfig::default()),
        Box::new(sink.clone()),
        None,
        PlayerConfig::default(),
    );
    assert!(matches!(result, Err(PlayerError::OpenError(_))));
    assert!(sink.surface().is_none());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = PlayerConfig {
        video_ring_capacity: 0,
        ..Default::default()
    };
    let result = PlaybackController::start(
        "synthetic://pipeline",
        &SyntheticBackend::new(SyntheticConfig::default()),
        Box::new(RecordingSink::new()),
        None,
        config,
    );
    assert!(matches!(result, Err(PlayerError::ConfigError(_))));
}
