//! Latest-frame hand-off between one producer and many connection handlers.
//!
//! The buffer holds at most one frame. Publishing replaces it atomically, so
//! a reader sees either the previous frame or the new one, never a mix.
//! Readers that fall behind skip straight to the newest frame.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::watch;

/// A JPEG-encoded frame and its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number assigned when the frame was published.
    ///
    /// Strictly increasing per buffer, so two publishes of identical bytes
    /// are still two distinct frames.
    pub seq: u64,
    /// Encoded image data.
    pub data: Bytes,
}

/// Outcome of waiting on a [`FrameWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A frame not yet returned by this watcher.
    Frame(Frame),
    /// The buffer was cleared after this watcher had seen a frame.
    Cleared,
    /// The buffer was dropped.
    Closed,
}

/// Single-writer, multi-reader slot for the most recent frame.
#[derive(Debug)]
pub struct FrameBuffer {
    tx: watch::Sender<Option<Frame>>,
    next_seq: AtomicU64,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Replaces the stored frame.
    ///
    /// `None` empties the buffer; waiting watchers that already saw a frame
    /// observe [`Change::Cleared`]. Returns the sequence number assigned to
    /// the new frame, if any.
    pub fn update(&self, data: Option<Bytes>) -> Option<u64> {
        let mut assigned = None;
        // Sequence assignment happens under the channel's write lock so
        // concurrent publishers cannot store numbers out of order.
        self.tx.send_modify(|slot| {
            *slot = data.map(|data| {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                assigned = Some(seq);
                Frame { seq, data }
            });
        });
        assigned
    }

    /// Stores a new frame and returns its sequence number.
    pub fn publish(&self, data: impl Into<Bytes>) -> u64 {
        self.update(Some(data.into())).unwrap_or_default()
    }

    /// Empties the buffer.
    pub fn clear(&self) {
        self.update(None);
    }

    /// Returns a snapshot of the current frame.
    pub fn read(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }

    /// Creates a watcher that has not yet seen any frame.
    pub fn subscribe(&self) -> FrameWatcher {
        FrameWatcher {
            rx: self.tx.subscribe(),
            last_seq: None,
        }
    }

    /// Number of live watchers.
    pub fn watcher_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader handle that waits for frame changes without polling.
#[derive(Debug)]
pub struct FrameWatcher {
    rx: watch::Receiver<Option<Frame>>,
    last_seq: Option<u64>,
}

impl FrameWatcher {
    /// Sequence number of the last frame returned by [`next_change`](Self::next_change).
    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Waits until the buffer differs from what this watcher last returned.
    ///
    /// Returns immediately if the current frame has not been returned yet.
    /// While the watcher has never seen a frame, an empty buffer is not a
    /// change: the call keeps waiting for the first frame.
    pub async fn next_change(&mut self) -> Change {
        loop {
            let current = self.rx.borrow_and_update().clone();
            match current {
                Some(frame) if Some(frame.seq) != self.last_seq => {
                    self.last_seq = Some(frame.seq);
                    return Change::Frame(frame);
                }
                None if self.last_seq.is_some() => {
                    self.last_seq = None;
                    return Change::Cleared;
                }
                _ => {}
            }

            if self.rx.changed().await.is_err() {
                return Change::Closed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn new_buffer_is_empty() {
        let buffer = FrameBuffer::new();
        assert!(buffer.read().is_none());
    }

    #[test]
    fn publish_replaces_frame() {
        let buffer = FrameBuffer::new();
        let first = buffer.publish(&b"one"[..]);
        let second = buffer.publish(&b"two"[..]);
        assert!(second > first);

        let frame = buffer.read().unwrap();
        assert_eq!(frame.seq, second);
        assert_eq!(&frame.data[..], b"two");
    }

    #[test]
    fn identical_bytes_get_distinct_identity() {
        let buffer = FrameBuffer::new();
        let a = buffer.publish(&b"same"[..]);
        let b = buffer.publish(&b"same"[..]);
        assert_ne!(a, b);
    }

    #[test]
    fn clear_empties_buffer() {
        let buffer = FrameBuffer::new();
        buffer.publish(&b"frame"[..]);
        buffer.clear();
        assert!(buffer.read().is_none());
        assert_eq!(buffer.update(None), None);
    }

    #[tokio::test]
    async fn watcher_returns_current_frame_first() {
        let buffer = FrameBuffer::new();
        let seq = buffer.publish(&b"existing"[..]);

        let mut watcher = buffer.subscribe();
        match watcher.next_change().await {
            Change::Frame(frame) => assert_eq!(frame.seq, seq),
            other => panic!("unexpected change: {other:?}"),
        }
        assert_eq!(watcher.last_seq(), Some(seq));
    }

    #[tokio::test]
    async fn watcher_waits_for_first_frame() {
        let buffer = FrameBuffer::new();
        let mut watcher = buffer.subscribe();

        // An empty buffer, even after an explicit clear, is not a change yet.
        buffer.clear();
        let pending = tokio::time::timeout(Duration::from_millis(50), watcher.next_change()).await;
        assert!(pending.is_err());

        buffer.publish(&b"first"[..]);
        assert!(matches!(watcher.next_change().await, Change::Frame(_)));
    }

    #[tokio::test]
    async fn watcher_skips_to_latest() {
        let buffer = FrameBuffer::new();
        let mut watcher = buffer.subscribe();

        buffer.publish(&b"1"[..]);
        buffer.publish(&b"2"[..]);
        let last = buffer.publish(&b"3"[..]);

        match watcher.next_change().await {
            Change::Frame(frame) => {
                assert_eq!(frame.seq, last);
                assert_eq!(&frame.data[..], b"3");
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[tokio::test]
    async fn watcher_does_not_repeat_a_frame() {
        let buffer = FrameBuffer::new();
        buffer.publish(&b"only"[..]);

        let mut watcher = buffer.subscribe();
        assert!(matches!(watcher.next_change().await, Change::Frame(_)));

        let again = tokio::time::timeout(Duration::from_millis(50), watcher.next_change()).await;
        assert!(again.is_err(), "same frame must not be returned twice");
    }

    #[tokio::test]
    async fn watcher_sees_clear_after_frame() {
        let buffer = FrameBuffer::new();
        let mut watcher = buffer.subscribe();

        buffer.publish(&b"frame"[..]);
        assert!(matches!(watcher.next_change().await, Change::Frame(_)));

        buffer.clear();
        assert_eq!(watcher.next_change().await, Change::Cleared);
        assert_eq!(watcher.last_seq(), None);
    }

    #[tokio::test]
    async fn watcher_closed_when_buffer_dropped() {
        let buffer = FrameBuffer::new();
        let mut watcher = buffer.subscribe();
        drop(buffer);
        assert_eq!(watcher.next_change().await, Change::Closed);
    }

    #[tokio::test]
    async fn concurrent_reader_sees_ordered_untorn_frames() {
        let buffer = std::sync::Arc::new(FrameBuffer::new());
        let mut watcher = buffer.subscribe();

        let writer = {
            let buffer = std::sync::Arc::clone(&buffer);
            tokio::spawn(async move {
                for i in 0..200u32 {
                    let len = 16 + i as usize;
                    buffer.publish(vec![(i % 251) as u8; len]);
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut last = 0;
        loop {
            let Change::Frame(frame) = watcher.next_change().await else {
                panic!("buffer cleared unexpectedly");
            };
            assert!(frame.seq > last, "frames must arrive in publish order");
            last = frame.seq;

            let i = frame.data.len() - 16;
            assert!(frame.data.iter().all(|b| *b == (i % 251) as u8));
            if i == 199 {
                break;
            }
        }

        writer.await.unwrap();
        assert_eq!(buffer.watcher_count(), 1);
    }
}
