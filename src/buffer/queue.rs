//! The handle-queue machine: a FIFO (default) or LIFO of whole byte-packet
//! entries, used where message boundaries — not a flat byte stream — matter.
//!
//! Grounded on spec.md §4.5 and the open question in §9 about packet
//! ownership on the read side: here `read()` returns an owned [`Bytes`], so
//! "releasing" a packet is just dropping the value Rust already gave the
//! caller — no separate `done_with_packet` call is needed.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrder {
    Fifo,
    Lifo,
}

struct Entry {
    payload: Bytes,
    #[allow(dead_code)]
    enqueued_at: Instant,
}

pub struct HandleQueue {
    order: QueueOrder,
    entries: Mutex<VecDeque<Entry>>,
    flushing: std::sync::atomic::AtomicBool,
}

impl HandleQueue {
    pub fn new(order: QueueOrder) -> Self {
        HandleQueue {
            order,
            entries: Mutex::new(VecDeque::new()),
            flushing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write(&self, buf: &[u8]) -> (usize, Status) {
        let entry = Entry {
            payload: Bytes::copy_from_slice(buf),
            enqueued_at: Instant::now(),
        };
        self.entries.lock().push_back(entry);
        (buf.len(), Status::Success)
    }

    /// Pops the next packet according to queue order. `None` when empty and
    /// not flushing (callers see this as a zero-byte `Success`); `Some` with
    /// an empty `Bytes` never happens — an empty queue always reports
    /// zero-length rather than an empty packet.
    pub fn read(&self) -> (Option<Bytes>, Status) {
        let mut entries = self.entries.lock();
        let popped = match self.order {
            QueueOrder::Fifo => entries.pop_front(),
            QueueOrder::Lifo => entries.pop_back(),
        };
        drop(entries);

        match popped {
            Some(entry) => (Some(entry.payload), Status::Success),
            None if self.flushing.load(std::sync::atomic::Ordering::Acquire) => {
                (None, Status::Complete)
            }
            None => (None, Status::Success),
        }
    }

    pub fn request_flush(&self) {
        self.flushing.store(true, std::sync::atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_preserves_order() {
        let q = HandleQueue::new(QueueOrder::Fifo);
        q.write(b"a");
        q.write(b"b");
        let (first, _) = q.read();
        let (second, _) = q.read();
        assert_eq!(first.unwrap().as_ref(), b"a");
        assert_eq!(second.unwrap().as_ref(), b"b");
    }

    #[test]
    fn lifo_reverses_order() {
        let q = HandleQueue::new(QueueOrder::Lifo);
        q.write(b"a");
        q.write(b"b");
        let (first, _) = q.read();
        assert_eq!(first.unwrap().as_ref(), b"b");
    }

    #[test]
    fn empty_then_flushing_completes() {
        let q = HandleQueue::new(QueueOrder::Fifo);
        let (payload, status) = q.read();
        assert!(payload.is_none());
        assert_eq!(status, Status::Success);

        q.request_flush();
        let (payload2, status2) = q.read();
        assert!(payload2.is_none());
        assert_eq!(status2, Status::Complete);
    }
}
