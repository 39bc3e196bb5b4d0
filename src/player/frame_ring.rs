//! 解码帧环形缓冲
//!
//! 固定容量的槽位数组，读写下标各自只由一方推进。容量通常很小（默认 1 帧），
//! 只用于把解码和渲染的抖动隔开一帧，而不是做深度预读。

use crate::core::{Frame, QuitFlag};
use log::warn;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// 获取槽位的结果
#[derive(Debug)]
pub enum SlotResult<T> {
    Ready(T),
    /// 非阻塞调用时缓冲满（写）或空（读）
    WouldBlock,
    Cancelled,
}

impl<T> SlotResult<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SlotResult::Cancelled)
    }
}

pub struct FrameRingBuffer {
    capacity: usize,
    slots: Vec<Mutex<Option<Frame>>>,
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
    wait_interval: Duration,
    quit: QuitFlag,
}

#[derive(Debug, Default, Clone, Copy)]
struct RingState {
    rindex: usize,
    windex: usize,
    size: usize,
}

/// 生产者持有的写槽位（下标 w）
pub struct WriteSlot<'a> {
    ring: &'a FrameRingBuffer,
    index: usize,
}

impl WriteSlot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// 写入帧并提交（w 前进一格）
    pub fn commit(self, frame: Frame) {
        *self.ring.slots[self.index].lock() = Some(frame);
        self.ring.commit_write();
    }
}

/// 消费者持有的读槽位（下标 r）
///
/// 直接丢弃不会释放槽位，帧会留在缓冲里等下次读取。
pub struct ReadSlot<'a> {
    ring: &'a FrameRingBuffer,
    index: usize,
    guard: MutexGuard<'a, Option<Frame>>,
}

impl ReadSlot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.guard.as_ref()
    }

    /// 释放槽位（r 前进一格），槽位内容原地保留等待复用
    pub fn release(self) {
        let ring = self.ring;
        drop(self.guard);
        ring.release_read();
    }
}

impl FrameRingBuffer {
    pub fn new(capacity: usize, wait_interval: Duration, quit: QuitFlag) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            state: Mutex::new(RingState::default()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            wait_interval,
            quit,
        }
    }

    /// 获取写槽位；缓冲满时 `block = true` 会一直等待，直到有空位或退出
    pub fn acquire_write_slot(&self, block: bool) -> SlotResult<WriteSlot<'_>> {
        let mut state = self.state.lock();
        loop {
            if self.quit.is_raised() {
                return SlotResult::Cancelled;
            }
            if state.size < self.capacity {
                return SlotResult::Ready(WriteSlot {
                    ring: self,
                    index: state.windex,
                });
            }
            if !block {
                return SlotResult::WouldBlock;
            }
            // 带超时等待，醒来后重新检查退出标志
            self.not_full.wait_for(&mut state, self.wait_interval);
        }
    }

    /// w = (w + 1) mod capacity，n += 1，唤醒一个读者
    pub fn commit_write(&self) {
        let mut state = self.state.lock();
        if state.size == self.capacity {
            warn!("⚠️ 帧缓冲已满仍提交写入，忽略");
            return;
        }
        state.windex = (state.windex + 1) % self.capacity;
        state.size += 1;
        self.not_empty.notify_one();
    }

    /// 获取读槽位；缓冲空时 `block = true` 会一直等待，直到有帧或退出
    pub fn acquire_read_slot(&self, block: bool) -> SlotResult<ReadSlot<'_>> {
        let mut state = self.state.lock();
        loop {
            if self.quit.is_raised() {
                return SlotResult::Cancelled;
            }
            if state.size > 0 {
                let index = state.rindex;
                drop(state);
                return SlotResult::Ready(ReadSlot {
                    ring: self,
                    index,
                    guard: self.slots[index].lock(),
                });
            }
            if !block {
                return SlotResult::WouldBlock;
            }
            self.not_empty.wait_for(&mut state, self.wait_interval);
        }
    }

    /// r = (r + 1) mod capacity，n -= 1，唤醒一个写者
    pub fn release_read(&self) {
        let mut state = self.state.lock();
        if state.size == 0 {
            warn!("⚠️ 帧缓冲为空仍释放读槽位，忽略");
            return;
        }
        state.rindex = (state.rindex + 1) % self.capacity;
        state.size -= 1;
        self.not_full.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FramePayload, PixelFormat, VideoPicture};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame(pts: f64) -> Frame {
        Frame {
            pts,
            duration: 0.04,
            payload: FramePayload::Video(VideoPicture {
                width: 2,
                height: 2,
                format: PixelFormat::RGBA,
                data: vec![0u8; 16],
            }),
        }
    }

    fn ring(capacity: usize) -> (FrameRingBuffer, QuitFlag) {
        let quit = QuitFlag::new();
        (
            FrameRingBuffer::new(capacity, Duration::from_millis(20), quit.clone()),
            quit,
        )
    }

    fn write(ring: &FrameRingBuffer, pts: f64) {
        match ring.acquire_write_slot(false) {
            SlotResult::Ready(slot) => slot.commit(frame(pts)),
            other => panic!("write slot unavailable: {:?}", other.is_cancelled()),
        }
    }

    fn read(ring: &FrameRingBuffer) -> Option<f64> {
        match ring.acquire_read_slot(false) {
            SlotResult::Ready(slot) => {
                let pts = slot.frame().map(|f| f.pts);
                slot.release();
                pts
            }
            _ => None,
        }
    }

    #[test]
    fn test_order_and_wraparound() {
        let (ring, _quit) = ring(3);
        for round in 0..4 {
            let base = round as f64 * 10.0;
            write(&ring, base);
            write(&ring, base + 1.0);
            assert_eq!(read(&ring), Some(base));
            write(&ring, base + 2.0);
            assert_eq!(read(&ring), Some(base + 1.0));
            assert_eq!(read(&ring), Some(base + 2.0));
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_full_and_empty_are_reported() {
        let (ring, _quit) = ring(2);
        assert!(matches!(ring.acquire_read_slot(false), SlotResult::WouldBlock));
        write(&ring, 0.0);
        write(&ring, 1.0);
        assert_eq!(ring.len(), 2);
        assert!(matches!(ring.acquire_write_slot(false), SlotResult::WouldBlock));
    }

    #[test]
    fn test_dropped_read_slot_keeps_frame() {
        let (ring, _quit) = ring(1);
        write(&ring, 3.0);
        if let SlotResult::Ready(slot) = ring.acquire_read_slot(false) {
            assert_eq!(slot.frame().map(|f| f.pts), Some(3.0));
        }
        assert_eq!(ring.len(), 1);
        assert_eq!(read(&ring), Some(3.0));
    }

    #[test]
    fn test_size_stays_within_bounds_under_concurrency() {
        let (ring, _quit) = ring(2);
        let ring = Arc::new(ring);
        const COUNT: usize = 200;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..COUNT {
                    match ring.acquire_write_slot(true) {
                        SlotResult::Ready(slot) => slot.commit(frame(i as f64)),
                        _ => panic!("producer cancelled"),
                    }
                    assert!(ring.len() <= ring.capacity());
                }
            })
        };

        let mut received = Vec::with_capacity(COUNT);
        while received.len() < COUNT {
            if let SlotResult::Ready(slot) = ring.acquire_read_slot(true) {
                received.push(slot.frame().map(|f| f.pts).unwrap());
                slot.release();
            }
            assert!(ring.len() <= ring.capacity());
        }
        producer.join().unwrap();

        let expected: Vec<f64> = (0..COUNT).map(|i| i as f64).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_release_unblocks_writer() {
        let (ring, _quit) = ring(1);
        let ring = Arc::new(ring);
        write(&ring, 0.0);

        let writer = {
            let ring = ring.clone();
            thread::spawn(move || match ring.acquire_write_slot(true) {
                SlotResult::Ready(slot) => {
                    slot.commit(frame(1.0));
                    true
                }
                _ => false,
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(read(&ring), Some(0.0));
        assert!(writer.join().unwrap());
        assert_eq!(read(&ring), Some(1.0));
    }

    #[test]
    fn test_cancel_unblocks_full_writer() {
        let (ring, quit) = ring(1);
        let ring = Arc::new(ring);
        write(&ring, 0.0);

        let writer = {
            let ring = ring.clone();
            thread::spawn(move || ring.acquire_write_slot(true).is_cancelled())
        };
        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        quit.raise();
        assert!(writer.join().unwrap());
        // 最多一个等待周期
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
