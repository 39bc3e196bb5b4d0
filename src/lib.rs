// 多线程播放管线：解封装线程 → 包队列 → 解码线程 → 帧环形缓冲 → 控制线程刷新渲染

pub mod core;
pub mod player;

pub use crate::core::{PlayerConfig, PlayerError, Result};
pub use crate::player::{PlaybackController, PlaybackHandle, PlaybackStats};
