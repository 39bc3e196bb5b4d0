// 播放器核心模块

pub mod unit_queue;
pub mod frame_ring;
pub mod source;
pub mod context;
pub mod demux_worker;
pub mod decode_worker;
pub mod refresh;
pub mod audio_buffer;
pub mod controller;
pub mod sink;
pub mod synthetic;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "audio")]
pub mod audio_output;

pub use audio_buffer::AudioSampleBuffer;
pub use context::{PlayerEvent, WorkerKind};
pub use controller::{PlaybackController, PlaybackHandle, PlaybackStats};
pub use frame_ring::{FrameRingBuffer, SlotResult};
pub use sink::TraceSink;
pub use source::{AudioDevice, DecodeOutput, DecoderInput, DemuxSource, FrameDecoder, MediaBackend, PresentationSink};
pub use synthetic::{RecordingSink, SimulatedAudioDevice, SyntheticBackend, SyntheticConfig};
pub use unit_queue::{BoundedUnitQueue, PopResult};
#[cfg(feature = "ffmpeg")]
pub use demuxer::FfmpegBackend;
#[cfg(feature = "audio")]
pub use audio_output::AudioOutput;

use std::process;
use std::thread;

/// 日志前缀：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
