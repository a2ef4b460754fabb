//! Frame container and the single-slot frame holder.
//!
//! - `Frame`: RGB pixel buffer plus its capture sequence number.
//! - `FrameSlot`: holds at most one frame. Writers replace whatever is held
//!   (drop-oldest); readers block until a frame exists or the slot closes.
//!
//! The slot is what makes capture "bufferless": the consumer never sees a
//! backlog, only the newest frame the producer managed to grab.

use image::RgbImage;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured frame (RGB, 8 bits per channel).
pub struct Frame {
    image: RgbImage,
    /// Monotonic per-source sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameSlot
// ----------------------------------------------------------------------------

/// Outcome of waiting on the slot.
#[derive(Debug)]
pub enum SlotRead {
    Frame(Frame),
    TimedOut,
    Closed,
}

/// Counters kept by the slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Frames written by the producer.
    pub written: u64,
    /// Frames overwritten before anyone read them.
    pub overwritten: u64,
    /// Frames handed to readers.
    pub taken: u64,
}

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    closed: bool,
    stats: SlotStats,
}

/// Single-slot, drop-oldest frame holder shared by the producer and reader.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panicking holder cannot leave the slot half-written; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `frame`, discarding any unread frame. Returns true when a frame
    /// was discarded.
    pub fn put(&self, frame: Frame) -> bool {
        let mut state = self.lock();
        let replaced = state.frame.replace(frame).is_some();
        state.stats.written += 1;
        if replaced {
            state.stats.overwritten += 1;
        }
        drop(state);
        self.ready.notify_all();
        replaced
    }

    /// Take the held frame, waiting up to `timeout` (forever when `None`).
    ///
    /// A frame written before `close()` is still handed out; `Closed` is only
    /// reported once the slot is both closed and empty.
    pub fn take(&self, timeout: Option<Duration>) -> SlotRead {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.frame.take() {
                state.stats.taken += 1;
                return SlotRead::Frame(frame);
            }
            if state.closed {
                return SlotRead::Closed;
            }
            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return SlotRead::TimedOut;
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    /// Mark the slot closed and wake all readers.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn stats(&self) -> SlotStats {
        self.lock().stats
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn make_test_frame(sequence: u64) -> Frame {
        Frame::new(RgbImage::new(4, 4), sequence)
    }

    #[test]
    fn slot_keeps_only_latest_frame() {
        let slot = FrameSlot::new();
        assert!(!slot.put(make_test_frame(1)));
        for seq in 2..=5 {
            assert!(slot.put(make_test_frame(seq)));
        }

        match slot.take(Some(Duration::from_millis(10))) {
            SlotRead::Frame(frame) => assert_eq!(frame.sequence, 5),
            other => panic!("expected frame, got {:?}", other),
        }
        assert!(matches!(
            slot.take(Some(Duration::from_millis(1))),
            SlotRead::TimedOut
        ));

        let stats = slot.stats();
        assert_eq!(stats.written, 5);
        assert_eq!(stats.overwritten, 4);
        assert_eq!(stats.taken, 1);
    }

    #[test]
    fn take_times_out_when_empty() {
        let slot = FrameSlot::new();
        assert!(matches!(
            slot.take(Some(Duration::from_millis(5))),
            SlotRead::TimedOut
        ));
    }

    #[test]
    fn close_drains_pending_frame_first() {
        let slot = FrameSlot::new();
        slot.put(make_test_frame(7));
        slot.close();

        assert!(matches!(slot.take(None), SlotRead::Frame(f) if f.sequence == 7));
        assert!(matches!(slot.take(None), SlotRead::Closed));
    }

    #[test]
    fn blocked_reader_wakes_on_put() {
        let slot = Arc::new(FrameSlot::new());
        let writer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.put(make_test_frame(1));
        });

        let read = slot.take(Some(Duration::from_secs(5)));
        assert!(matches!(read, SlotRead::Frame(f) if f.sequence == 1));
        handle.join().unwrap();
    }
}
