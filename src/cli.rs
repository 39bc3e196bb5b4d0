use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sffplay")]
#[command(author, version, about = "多线程音视频播放管线")]
pub struct Cli {
    /// TOML 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 播放媒体源（stdin 输入 p 或空行暂停/继续，q 退出）
    Play {
        #[command(flatten)]
        source: SourceArgs,

        /// 视频帧缓冲槽位数（覆盖配置文件）
        #[arg(long)]
        ring_capacity: Option<usize>,

        /// 不输出音频
        #[arg(long)]
        no_audio: bool,
    },

    /// 探测媒体源并以 JSON 输出流信息
    Info {
        #[command(flatten)]
        source: SourceArgs,
    },
}

#[derive(Args)]
pub struct SourceArgs {
    /// 媒体文件路径（--synthetic 时仅作名称）
    #[arg(required = true)]
    pub source: String,

    /// 使用内置合成源代替 FFmpeg
    #[arg(long)]
    pub synthetic: bool,

    /// 合成源的帧数
    #[arg(long, default_value_t = 250)]
    pub frames: usize,

    /// 合成源的帧率
    #[arg(long, default_value_t = 25)]
    pub fps: i32,

    /// 合成源附带音频流
    #[arg(long)]
    pub with_audio: bool,
}
