use crate::core::{PlayerError, Result};
use crate::player::context::{PipelineContext, WorkerKind};
use crate::player::log_ctx;
use crate::player::source::DemuxSource;
use crate::player::unit_queue::BoundedUnitQueue;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LOG_FIRST_N: usize = 5;

/// 队列满时的退避：从最短间隔开始翻倍，封顶到最长间隔
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self { min, max, current: min }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Demux 线程：读取编码单元并按流分发到各自的包队列
///
/// - 读取前检查队列是否已满，满了就退避等待（push 本身从不阻塞）
/// - 没有被选中播放的流直接丢弃
/// - 读到末尾时把所有队列标记为 drained 后退出
pub struct DemuxWorker {
    source: Box<dyn DemuxSource>,
    routes: HashMap<usize, Arc<BoundedUnitQueue>>,
    ctx: PipelineContext,
}

impl DemuxWorker {
    pub fn new(
        source: Box<dyn DemuxSource>,
        routes: HashMap<usize, Arc<BoundedUnitQueue>>,
        ctx: PipelineContext,
    ) -> Self {
        Self { source, routes, ctx }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("demux".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(mut self) {
        info!("{} 🎬 Demux 线程启动: {}", log_ctx(), self.source.description());

        let config = self.ctx.config.clone();
        let mut backoff = Backoff::new(
            Duration::from_millis(config.demux_backoff_min_ms),
            Duration::from_millis(config.demux_backoff_max_ms),
        );
        let mut unit_count: usize = 0;
        let mut discarded: usize = 0;

        while !self.ctx.is_cancelled() {
            if self.routes.values().any(|q| q.is_full()) {
                thread::sleep(backoff.next_delay());
                continue;
            }
            backoff.reset();

            match self.source.read_unit() {
                Ok(Some(unit)) => {
                    unit_count += 1;
                    match self.routes.get(&unit.stream_index) {
                        Some(queue) => {
                            if unit_count <= LOG_FIRST_N || unit_count % 100 == 0 {
                                debug!(
                                    "{} 📦 读取 {} 单元 #{}（{} 字节，队列积压 {} 字节）",
                                    log_ctx(),
                                    queue.kind().as_str(),
                                    unit_count,
                                    unit.byte_size(),
                                    queue.size()
                                );
                            }
                            queue.push(unit);
                        }
                        None => discarded += 1,
                    }
                }
                Ok(None) => {
                    info!("{} 📄 Demux 到达文件末尾", log_ctx());
                    for queue in self.routes.values() {
                        queue.mark_drained();
                    }
                    self.ctx.finish(WorkerKind::Demux);
                    break;
                }
                Err(e) => {
                    let err = match e {
                        PlayerError::ReadError(_) => e,
                        other => PlayerError::ReadError(other.to_string()),
                    };
                    self.ctx.fail(err);
                    break;
                }
            }
        }

        info!(
            "{} 🛑 Demux 线程退出（共读取 {} 个单元，丢弃 {} 个）",
            log_ctx(),
            unit_count,
            discarded
        );
    }
}
