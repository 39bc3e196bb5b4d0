use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use sffplay::core::{PlayerConfig, Rational};
use sffplay::player::{
    AudioDevice, MediaBackend, PlaybackController, PlaybackHandle, SimulatedAudioDevice, SyntheticBackend,
    SyntheticConfig, TraceSink,
};
use std::io::{self, BufRead};
use std::thread;

mod cli;

use cli::{Cli, Commands, SourceArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    let config = match &cli.config {
        Some(path) => PlayerConfig::load(path).with_context(|| format!("加载配置失败: {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    match cli.command {
        Commands::Play {
            source,
            ring_capacity,
            no_audio,
        } => {
            let mut config = config;
            if let Some(capacity) = ring_capacity {
                config.video_ring_capacity = capacity;
            }
            play(&source, config, no_audio)
        }
        Commands::Info { source } => probe(&source),
    }
}

fn play(args: &SourceArgs, config: PlayerConfig, no_audio: bool) -> Result<()> {
    info!("🎬 sffplay 启动: {}", args.source);

    let backend = backend(args)?;
    let device = if no_audio {
        None
    } else {
        audio_device(args, &config)
    };

    let mut controller = PlaybackController::start(
        &args.source,
        backend.as_ref(),
        Box::new(TraceSink::new()),
        device,
        config,
    )
    .with_context(|| format!("无法开始播放 {}", args.source))?;

    spawn_keyboard(controller.handle());

    let stats = controller.wait_until_stopped();
    info!("📊 播放统计: {}", serde_json::to_string(&stats)?);

    if let Some(err) = controller.take_error() {
        return Err(err).context("播放中止");
    }
    Ok(())
}

fn probe(args: &SourceArgs) -> Result<()> {
    let backend = backend(args)?;
    let source = backend
        .open(&args.source)
        .with_context(|| format!("无法打开 {}", args.source))?;
    println!("{}", serde_json::to_string_pretty(source.media_info())?);
    Ok(())
}

fn backend(args: &SourceArgs) -> Result<Box<dyn MediaBackend>> {
    if args.synthetic {
        return Ok(Box::new(SyntheticBackend::new(SyntheticConfig {
            video_frames: args.frames,
            frame_rate: Rational::new(args.fps, 1),
            audio: args.with_audio,
            ..Default::default()
        })));
    }
    file_backend()
}

#[cfg(feature = "ffmpeg")]
fn file_backend() -> Result<Box<dyn MediaBackend>> {
    let backend = sffplay::player::FfmpegBackend::new().context("FFmpeg 初始化失败")?;
    info!("✅ FFmpeg 初始化成功");
    Ok(Box::new(backend))
}

#[cfg(not(feature = "ffmpeg"))]
fn file_backend() -> Result<Box<dyn MediaBackend>> {
    anyhow::bail!("编译时未启用 ffmpeg 特性，只能用 --synthetic 播放合成源")
}

/// 有 cpal 时用真实设备，打不开时合成源退回模拟设备
fn audio_device(args: &SourceArgs, config: &PlayerConfig) -> Option<Box<dyn AudioDevice>> {
    if let Some(device) = output_device(config) {
        return Some(device);
    }
    if args.synthetic {
        return Some(Box::new(SimulatedAudioDevice::new(
            config.audio_sample_rate,
            config.audio_channels,
        )));
    }
    None
}

#[cfg(feature = "audio")]
fn output_device(config: &PlayerConfig) -> Option<Box<dyn AudioDevice>> {
    match sffplay::player::AudioOutput::new(config.audio_sample_rate, config.audio_channels) {
        Ok(output) => Some(Box::new(output)),
        Err(e) => {
            warn!("⚠️ 音频输出不可用，静音播放: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "audio"))]
fn output_device(_config: &PlayerConfig) -> Option<Box<dyn AudioDevice>> {
    None
}

/// 键盘线程：p / 空行 切换暂停，q 退出
fn spawn_keyboard(handle: PlaybackHandle) {
    let spawned = thread::Builder::new().name("keyboard".to_string()).spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if handle.state().is_terminal() {
                break;
            }
            match line.trim() {
                "" | "p" => handle.toggle_pause(),
                "q" => {
                    handle.stop();
                    break;
                }
                other => warn!("未知命令 {:?}（p/空行 暂停，q 退出）", other),
            }
        }
    });
    if let Err(e) = spawned {
        warn!("⚠️ 键盘线程启动失败，只能等待播放结束: {}", e);
    }
}
