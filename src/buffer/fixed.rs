//! The bounded sibling of [`super::ring::RingBuf`]: a fixed number of
//! fixed-size blocks, never grown. Oversized writes are rejected outright
//! rather than accepted partially, and reads discard whatever doesn't fit
//! the caller-requested alignment. Grounded on spec.md §4.4; the original
//! engine's fixed-block machine (`fbb_machine` in
//! `original_source/include/simple-buffers.h`) is only referenced there by
//! name, so the block-walking mechanics below are adapted from `ring.rs`
//! minus the growth path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::block::{self, BlockNode};
use crate::status::{Blocking, Status};

/// A bounded ring: `block_count` blocks of `block_bytes` each, allocated up
/// front, never grown. A write larger than a single block's capacity is
/// rejected wholesale (zero bytes accepted) rather than split or grown into.
pub struct FixedBuffer {
    head: Arc<BlockNode>,
    wp: Mutex<Arc<BlockNode>>,
    rp: Mutex<Arc<BlockNode>>,
    block_bytes: usize,
    bytes: AtomicUsize,
    capacity: usize,
}

impl FixedBuffer {
    pub fn new(block_bytes: usize, block_count: usize) -> Self {
        assert!(block_bytes > 0 && block_count > 0);
        let head = block::new_cycle(block_bytes, block_count);
        FixedBuffer {
            head: head.clone(),
            wp: Mutex::new(head.clone()),
            rp: Mutex::new(head),
            block_bytes,
            bytes: AtomicUsize::new(0),
            capacity: block_bytes * block_count,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write(&self, buf: &[u8], _blocking: Blocking) -> (usize, Status) {
        if buf.len() > self.block_bytes {
            // A rejection, not irrecoverable corruption — per spec.md §7 that
            // means `NoData`, not `Error`: an oversized write must not
            // permanently knock the whole machine into the error state.
            tracing::warn!(
                len = buf.len(),
                block_bytes = self.block_bytes,
                "fixed buffer write exceeds block capacity, rejecting"
            );
            return (0, Status::NoData);
        }

        let mut wp = self.wp.lock();
        let cur = wp.clone();
        if !cur.is_empty() {
            return (0, Status::NoData);
        }
        {
            let mut data = cur.data.lock();
            data[..buf.len()].copy_from_slice(buf);
        }
        cur.filled.store(buf.len(), Ordering::Release);
        *wp = cur.next();
        self.bytes.fetch_add(buf.len(), Ordering::AcqRel);
        (buf.len(), Status::Success)
    }

    pub fn read(&self, out: &mut [u8], alignment: usize, _blocking: Blocking) -> (usize, Status) {
        let align = alignment.max(1);
        let want = out.len() - (out.len() % align);

        let mut rp = self.rp.lock();
        let cur = rp.clone();
        let filled = cur.filled.load(Ordering::Acquire);
        if filled == 0 || want == 0 {
            return (0, Status::Success);
        }
        let take = want.min(filled);
        {
            let data = cur.data.lock();
            out[..take].copy_from_slice(&data[..take]);
        }
        cur.filled.store(0, Ordering::Release);
        *rp = cur.next();
        self.bytes.fetch_sub(take, Ordering::AcqRel);
        (take, Status::Success)
    }
}

// Keep `head` reachable for debugging/introspection even though the steady
// state only ever touches it through `wp`/`rp`.
impl std::fmt::Debug for FixedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("block_bytes", &self.block_bytes)
            .field("capacity", &self.capacity)
            .field("bytes", &self.bytes())
            .field("head_filled", &!self.head.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_write_rejected() {
        let buf = FixedBuffer::new(8, 4);
        let (written, status) = buf.write(&[0u8; 16], Blocking::NoBlock);
        assert_eq!(written, 0);
        assert_eq!(status, Status::NoData);
    }

    #[test]
    fn round_trip_across_blocks() {
        let buf = FixedBuffer::new(8, 4);
        for i in 0..4u8 {
            let (w, status) = buf.write(&[i; 8], Blocking::NoBlock);
            assert_eq!(w, 8);
            assert_eq!(status, Status::Success);
        }
        assert_eq!(buf.bytes(), 32);

        let mut out = [0u8; 8];
        let (r, _) = buf.read(&mut out, 1, Blocking::NoBlock);
        assert_eq!(r, 8);
        assert_eq!(out, [0u8; 8]);
    }
}
