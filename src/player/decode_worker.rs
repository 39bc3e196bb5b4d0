use crate::core::{DecodedFrame, Frame, FramePayload, PlayerError, Result, StreamInfo};
use crate::player::context::{PipelineContext, PlayerEvent, WorkerKind};
use crate::player::frame_ring::{FrameRingBuffer, SlotResult};
use crate::player::log_ctx;
use crate::player::source::{DecodeOutput, DecoderInput, FrameDecoder};
use crate::player::unit_queue::{BoundedUnitQueue, PopResult};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const LOG_FIRST_N: u64 = 5;

/// 流里没有有效帧率时使用的名义帧时长（25fps）
const FALLBACK_FRAME_DURATION: f64 = 0.04;

/// 内层循环的去向
enum Flow {
    Continue,
    Stop,
}

/// 解码线程：从包队列取编码单元，解码后写入帧缓冲
///
/// 每条被播放的流一个实例。解码器的输入和输出不是一一对应的：
/// 每提交一次都要把能取出的帧全部取完，直到解码器要求更多输入。
pub struct DecodeWorker {
    stream: StreamInfo,
    decoder: Box<dyn FrameDecoder>,
    queue: Arc<BoundedUnitQueue>,
    ring: Arc<FrameRingBuffer>,
    ctx: PipelineContext,
    /// 音频时间戳缺失时的预测值
    next_audio_pts: f64,
    frame_count: u64,
}

impl DecodeWorker {
    pub fn new(
        stream: StreamInfo,
        decoder: Box<dyn FrameDecoder>,
        queue: Arc<BoundedUnitQueue>,
        ring: Arc<FrameRingBuffer>,
        ctx: PipelineContext,
    ) -> Self {
        Self {
            stream,
            decoder,
            queue,
            ring,
            ctx,
            next_audio_pts: 0.0,
            frame_count: 0,
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("decode-{}", self.stream.kind.as_str());
        let handle = thread::Builder::new().name(name).spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(mut self) {
        let kind = self.stream.kind;
        info!(
            "{} 🎞️ {} 解码线程启动: {}",
            log_ctx(),
            kind.as_str(),
            self.decoder.description()
        );

        let timeout = self.ctx.config.pop_timeout();
        loop {
            match self.queue.pop(true, timeout) {
                PopResult::Unit(unit) => {
                    if let Err(e) = self.decoder.submit(DecoderInput::Unit(unit)) {
                        self.fail(e);
                        break;
                    }
                    if let Flow::Stop = self.drain_decoder() {
                        break;
                    }
                }
                PopResult::Empty => continue,
                PopResult::Drained => {
                    debug!("{} 🚿 {} 包队列已结束，flush 解码器", log_ctx(), kind.as_str());
                    if let Err(e) = self.decoder.submit(DecoderInput::Flush) {
                        self.fail(e);
                        break;
                    }
                    if let Flow::Continue = self.drain_decoder() {
                        self.ctx.finish(WorkerKind::Decode(kind));
                    }
                    break;
                }
                PopResult::Cancelled => break,
            }
        }

        info!(
            "{} 🛑 {} 解码线程退出（共输出 {} 帧）",
            log_ctx(),
            kind.as_str(),
            self.frame_count
        );
    }

    /// 取出解码器当前能给出的所有帧
    fn drain_decoder(&mut self) -> Flow {
        loop {
            match self.decoder.receive() {
                Ok(DecodeOutput::Frame(decoded)) => {
                    let frame = self.to_frame(decoded);
                    if let Flow::Stop = self.store(frame) {
                        return Flow::Stop;
                    }
                }
                Ok(DecodeOutput::NeedsMoreInput) | Ok(DecodeOutput::Eof) => return Flow::Continue,
                Err(e) => {
                    self.fail(e);
                    return Flow::Stop;
                }
            }
        }
    }

    /// 计算秒为单位的 PTS 和帧时长
    ///
    /// 视频经由时钟的 synchronize_video：时间戳缺失时用上一帧预测。
    fn to_frame(&mut self, decoded: DecodedFrame) -> Frame {
        let pts = decoded.pts.map(|ticks| self.stream.ticks_to_secs(ticks));
        let (pts, duration) = match &decoded.payload {
            FramePayload::Video(_) => {
                let duration = self
                    .stream
                    .nominal_frame_duration()
                    .unwrap_or(FALLBACK_FRAME_DURATION);
                (self.ctx.clock.synchronize_video(pts, duration), duration)
            }
            FramePayload::Audio(block) => {
                let duration = block.duration_secs();
                let pts = pts.unwrap_or(self.next_audio_pts);
                self.next_audio_pts = pts + duration;
                (pts, duration)
            }
        };
        Frame {
            pts,
            duration,
            payload: decoded.payload,
        }
    }

    /// 写入帧缓冲，缓冲满时阻塞等待消费者
    fn store(&mut self, frame: Frame) -> Flow {
        match self.ring.acquire_write_slot(true) {
            SlotResult::Ready(slot) => {
                self.frame_count += 1;
                if self.frame_count <= LOG_FIRST_N || self.frame_count % 100 == 0 {
                    debug!(
                        "{} 🖼️ {} 帧 #{} 写入槽位 {}（pts={:.3}s）",
                        log_ctx(),
                        self.stream.kind.as_str(),
                        self.frame_count,
                        slot.index(),
                        frame.pts
                    );
                }
                slot.commit(frame);
                self.ctx.notify(PlayerEvent::FrameReady(self.stream.kind));
                Flow::Continue
            }
            SlotResult::Cancelled => Flow::Stop,
            SlotResult::WouldBlock => {
                warn!("{} ⚠️ 阻塞获取写槽位却返回 WouldBlock", log_ctx());
                Flow::Stop
            }
        }
    }

    fn fail(&self, err: PlayerError) {
        let err = match err {
            PlayerError::DecodeError(_) => err,
            other => PlayerError::DecodeError(format!("{} 流: {}", self.stream.kind.as_str(), other)),
        };
        self.ctx.fail(err);
    }
}
