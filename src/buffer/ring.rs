//! The growable, back-pressured ring buffer: the heart of the engine.
//!
//! Grounded on `original_source/src/buf/ring-buf.c`. Faithful to that source
//! for the water-mark hysteresis formula and the write/read block-walking
//! shape; deliberately *not* faithful to one quirk of the C `buf_write`,
//! which advances `wp` onto a fresh block after every write call even when
//! the current block was filled exactly to capacity (checked against its own
//! self-looped next, which is never truly empty) — following that literally
//! would trigger a spurious growth on the very first full write and blow
//! past the growth bound in testable property 4. Advancing only happens here
//! once a block is actually exhausted, which is what §4.3's own prose and
//! scenario S2 require. `acquire_write_block`/`release_write_block` keep the
//! original's always-advance behavior, since that path is only ever used by
//! a source worker doing one claim-fill-release cycle per call.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::block::{self, BlockNode};
use crate::status::{Blocking, Status};

const DEFAULT_BUF_BYTES: usize = 1024 * 1024;
const DEFAULT_BLOCK_ALIGN: usize = 1;
const DEFAULT_REALLOC_STEP: usize = 1;
const CONDVAR_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RbState {
    NoInit,
    Ready,
}

/// A growable chain of equally sized blocks behaving as a back-pressured
/// FIFO. See module docs and `SPEC_FULL.md` §4.3 for the full contract.
pub struct RingBuf {
    state: Mutex<RbState>,

    wp: Mutex<Arc<BlockNode>>,
    rp: Mutex<Arc<BlockNode>>,

    /// Guards `size`/`bytes`/`block_realloc` updates and doubles as the
    /// condvar mutex for both wait queues below.
    structural: Mutex<()>,
    data_ready: Condvar,
    space_ready: Condvar,

    size: AtomicUsize,
    bytes: AtomicUsize,

    block_bytes: AtomicUsize,
    default_buf_bytes: AtomicUsize,
    block_align: AtomicUsize,
    block_realloc: AtomicUsize,

    high_water_mark: AtomicUsize,
    high_water_count: AtomicUsize,
    low_water_mark: AtomicUsize,
    min_return_size: AtomicUsize,

    flush: AtomicBool,
}

impl Default for RingBuf {
    fn default() -> Self {
        RingBuf::new()
    }
}

impl RingBuf {
    pub fn new() -> Self {
        // Placeholder self-loop, replaced wholesale on first real init; keeps
        // `wp`/`rp` infallible to lock before the ring has seen a byte.
        let seed = block::new_ring_of_one(1);
        RingBuf {
            state: Mutex::new(RbState::NoInit),
            wp: Mutex::new(seed.clone()),
            rp: Mutex::new(seed),
            structural: Mutex::new(()),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            size: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            block_bytes: AtomicUsize::new(0),
            default_buf_bytes: AtomicUsize::new(DEFAULT_BUF_BYTES),
            block_align: AtomicUsize::new(DEFAULT_BLOCK_ALIGN),
            block_realloc: AtomicUsize::new(DEFAULT_REALLOC_STEP),
            high_water_mark: AtomicUsize::new(0),
            high_water_count: AtomicUsize::new(0),
            low_water_mark: AtomicUsize::new(0),
            min_return_size: AtomicUsize::new(0),
            flush: AtomicBool::new(false),
        }
    }

    pub fn set_alignment(&self, bytes: usize) {
        self.block_align.store(bytes.max(1), Ordering::Relaxed);
    }

    /// Convenience setter used by tests: sets both the default initial
    /// buffer size and the block alignment to the same value, matching how
    /// scenario S2 talks about "default block size".
    pub fn set_block_size(&self, bytes: usize) {
        self.default_buf_bytes.store(bytes, Ordering::Relaxed);
        self.block_align.store(bytes.max(1), Ordering::Relaxed);
    }

    pub fn set_high_water_mark(&self, bytes: usize) {
        self.high_water_mark.store(bytes, Ordering::Relaxed);
    }

    pub fn set_min_return_size(&self, bytes: usize) {
        self.min_return_size.store(bytes, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn round_up(value: usize, align: usize) -> usize {
        if align <= 1 {
            value
        } else {
            value.div_ceil(align) * align
        }
    }

    fn ensure_init(&self, min_bytes: usize) {
        let mut state = self.state.lock();
        if *state == RbState::Ready {
            return;
        }
        let default_bytes = self.default_buf_bytes.load(Ordering::Relaxed);
        let align = self.block_align.load(Ordering::Relaxed).max(1);
        let block_size = Self::round_up(min_bytes.max(default_bytes).max(1), align);

        let head = block::new_ring_of_one(block_size);
        *self.wp.lock() = head.clone();
        *self.rp.lock() = head;
        self.block_bytes.store(block_size, Ordering::Relaxed);
        self.size.store(block_size, Ordering::Release);
        *state = RbState::Ready;
    }

    fn check_high_water(&self) {
        let hwm = self.high_water_mark.load(Ordering::Relaxed);
        if hwm == 0 || self.bytes.load(Ordering::Acquire) < hwm {
            return;
        }
        let strikes = self.high_water_count.fetch_add(1, Ordering::Relaxed) + 1;
        let ratio = (1.0 - 0.1 * strikes as f64).max(0.1);
        let lwm = (ratio * hwm as f64) as usize;
        self.low_water_mark.store(lwm, Ordering::Relaxed);
        tracing::debug!(high_water_mark = hwm, strikes, low_water_mark = lwm, "ring high water mark tripped");
    }

    /// Returns `true` if a low-water gate is still in effect.
    fn check_low_water(&self) -> bool {
        let lwm = self.low_water_mark.load(Ordering::Relaxed);
        if lwm == 0 {
            return false;
        }
        if self.bytes.load(Ordering::Acquire) < lwm {
            self.low_water_mark.store(0, Ordering::Relaxed);
            let _guard = self.structural.lock();
            self.space_ready.notify_all();
            tracing::debug!("ring low water mark cleared");
            false
        } else {
            true
        }
    }

    /// Grows the ring by splicing `block_realloc` (doubled after use) fresh
    /// blocks after `cur`, then returns the new current block (the first of
    /// the spliced-in run) if a genuine grow happened, or `cur.next()` if
    /// the next block already had room.
    fn advance_or_grow(&self, cur: &Arc<BlockNode>) -> Arc<BlockNode> {
        let next = cur.next();
        if next.is_empty() {
            return next;
        }

        let add_count = self
            .block_realloc
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_mul(2)))
            .unwrap()
            .max(1);
        let block_size = self.block_bytes.load(Ordering::Relaxed);
        let (head, tail) = block::new_chain(block_size, add_count);
        block::splice_after(cur, head.clone(), tail);

        let _guard = self.structural.lock();
        self.size.fetch_add(add_count * block_size, Ordering::Release);
        tracing::debug!(added_blocks = add_count, block_size, "ring grew");
        head
    }

    pub fn write(&self, buf: &[u8], blocking: Blocking) -> (usize, Status) {
        if self.low_water_mark.load(Ordering::Relaxed) != 0 {
            loop {
                if !self.check_low_water() {
                    break;
                }
                if blocking == Blocking::NoBlock {
                    return (0, Status::NoData);
                }
                let mut guard = self.structural.lock();
                self.space_ready.wait_for(&mut guard, CONDVAR_POLL);
            }
        }

        self.ensure_init(buf.len());

        let mut wp = self.wp.lock();
        let mut cur = wp.clone();
        let mut offset = 0usize;
        let mut written = 0usize;
        let mut remaining = buf.len();

        while remaining > 0 {
            let filled = cur.filled.load(Ordering::Acquire);
            let free = cur.capacity - filled;
            if free == 0 {
                cur = self.advance_or_grow(&cur);
                continue;
            }
            let take = remaining.min(free);
            {
                let mut data = cur.data.lock();
                data[filled..filled + take].copy_from_slice(&buf[offset..offset + take]);
            }
            cur.filled.fetch_add(take, Ordering::Release);
            offset += take;
            remaining -= take;
            written += take;
        }
        *wp = cur;
        drop(wp);

        if written > 0 {
            self.bytes.fetch_add(written, Ordering::AcqRel);
            self.check_high_water();
            let _guard = self.structural.lock();
            self.data_ready.notify_all();
        }

        (written, Status::Success)
    }

    pub fn read(&self, out: &mut [u8], alignment: usize, blocking: Blocking) -> (usize, Status) {
        let align = alignment.max(1);
        loop {
            let mut want = out.len() - (out.len() % align);
            if self.min_return_size.load(Ordering::Relaxed) > self.bytes.load(Ordering::Acquire) {
                want = 0;
            }
            // Never chase more than is actually buffered right now: besides
            // being pointless, it bounds the peek below to at most one lap
            // of the block cycle even when every block happens to be full.
            want = want.min(self.bytes.load(Ordering::Acquire));

            let mut rp = self.rp.lock();
            let mut cur = rp.clone();

            // Peek how many contiguous bytes are actually sitting in the
            // chain before touching anything, so the amount we commit to can
            // be rounded down to `align` up front. Without this, running dry
            // partway through the last block in the chain would hand back
            // whatever was left in it verbatim, which is not necessarily a
            // multiple of `align`.
            let mut available = 0usize;
            let mut probe = cur.clone();
            while available < want {
                let filled = probe.filled.load(Ordering::Acquire);
                if filled == 0 {
                    break;
                }
                available += filled;
                probe = probe.next();
            }
            let mut remaining = available.min(want);
            remaining -= remaining % align;

            let mut offset = 0usize;
            let mut read_total = 0usize;

            while remaining > 0 {
                let filled = cur.filled.load(Ordering::Acquire);
                if filled == 0 {
                    break;
                }
                let take = remaining.min(filled);
                {
                    let mut data = cur.data.lock();
                    out[offset..offset + take].copy_from_slice(&data[..take]);
                    if take < filled {
                        data.copy_within(take..filled, 0);
                    }
                }
                cur.filled.fetch_sub(take, Ordering::Release);
                offset += take;
                remaining -= take;
                read_total += take;
                if take == filled {
                    cur = cur.next();
                }
            }
            *rp = cur;
            drop(rp);

            if read_total > 0 {
                self.bytes.fetch_sub(read_total, Ordering::AcqRel);
                self.check_low_water();
                return (read_total, Status::Success);
            }

            if self.flush.load(Ordering::Acquire) {
                return (0, Status::Complete);
            }

            if blocking == Blocking::NoBlock {
                return (0, Status::Success);
            }

            let mut guard = self.structural.lock();
            self.data_ready.wait_for(&mut guard, CONDVAR_POLL);
        }
    }

    /// Zero-copy write path for source segments: lend the caller the raw
    /// memory of the current write block.
    pub fn acquire_write_block(&self, min_init_bytes: usize) -> Option<WriteBlockLease<'_>> {
        if self.low_water_mark.load(Ordering::Relaxed) != 0 && self.check_low_water() {
            return None;
        }
        self.ensure_init(min_init_bytes.max(1));
        let guard = self.wp.lock();
        let block = guard.clone();
        Some(WriteBlockLease {
            ring: self,
            guard,
            block,
        })
    }

    /// Marks the read side for drain-then-complete: subsequent reads still
    /// return buffered bytes, but once empty they report `Complete`.
    pub fn request_flush(&self) {
        self.flush.store(true, Ordering::Release);
        let _guard = self.structural.lock();
        self.data_ready.notify_all();
    }
}

/// A loaned view of the ring's current write block, returned by
/// [`RingBuf::acquire_write_block`]. Resolves the "does `release` always
/// pair with `acquire`?" ambiguity in spec.md §9 by construction: there is
/// no way to call the analogue of `release_write_block` without first
/// holding one of these, and the writer mutex it holds is released exactly
/// once, when the lease is consumed.
pub struct WriteBlockLease<'a> {
    ring: &'a RingBuf,
    guard: MutexGuard<'a, Arc<BlockNode>>,
    block: Arc<BlockNode>,
}

impl<'a> WriteBlockLease<'a> {
    pub fn capacity(&self) -> usize {
        self.block.capacity
    }

    /// Write directly into the block's backing storage. `src.len()` must not
    /// exceed [`capacity`](Self::capacity).
    pub fn fill(&self, src: &[u8]) {
        assert!(src.len() <= self.block.capacity, "write exceeds leased block capacity");
        self.block.data.lock()[..src.len()].copy_from_slice(src);
    }

    /// Record `bytes` as filled, advance the write pointer (growing the ring
    /// if the block after it is non-empty) and release the writer mutex.
    /// Mirrors `rb_release_write_block`'s always-advance behavior.
    pub fn release(mut self, bytes: usize) {
        self.block.filled.store(bytes, Ordering::Release);
        let advanced = self.ring.advance_or_grow(&self.block);
        *self.guard = advanced;

        if bytes > 0 {
            self.ring.bytes.fetch_add(bytes, Ordering::AcqRel);
            self.ring.check_high_water();
            let _guard = self.ring.structural.lock();
            self.ring.data_ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_round_trip() {
        let ring = RingBuf::new();
        ring.set_block_size(1024 * 1024);
        let data = vec![7u8; 1024 * 1024];
        let (written, status) = ring.write(&data, Blocking::NoBlock);
        assert_eq!(written, data.len());
        assert_eq!(status, Status::Success);
        assert_eq!(ring.bytes(), 1024 * 1024);
        assert_eq!(ring.capacity(), 1024 * 1024);

        let mut out = vec![0u8; 2 * 1024 * 1024];
        let (read, status) = ring.read(&mut out, 1, Blocking::NoBlock);
        assert_eq!(read, 1024 * 1024);
        assert_eq!(status, Status::Success);
        assert_eq!(ring.bytes(), 0);
        assert_eq!(&out[..read], &data[..]);
    }

    #[test]
    fn growth_stays_within_double_of_written() {
        let ring = RingBuf::new();
        let chunk = vec![1u8; 1024 * 1024];
        let mut total = 0usize;
        for _ in 0..64 {
            let (written, _) = ring.write(&chunk, Blocking::NoBlock);
            total += written;
            assert!(ring.capacity() >= total);
            assert!(ring.capacity() <= 2 * total);
        }
    }

    #[test]
    fn high_water_mark_gates_then_clears() {
        let ring = RingBuf::new();
        ring.set_block_size(4096);
        ring.set_high_water_mark(4096);
        let chunk = vec![0u8; 4096];
        let (w1, _) = ring.write(&chunk, Blocking::NoBlock);
        assert_eq!(w1, 4096);
        let (w2, status) = ring.write(&chunk, Blocking::NoBlock);
        assert_eq!(w2, 0);
        assert_eq!(status, Status::NoData);

        let mut out = vec![0u8; 4096];
        let (r, _) = ring.read(&mut out, 1, Blocking::NoBlock);
        assert_eq!(r, 4096);

        let (w3, status3) = ring.write(&chunk, Blocking::NoBlock);
        assert_eq!(status3, Status::Success);
        assert_eq!(w3, 4096);
    }

    #[test]
    fn flush_then_complete() {
        let ring = RingBuf::new();
        let (w, _) = ring.write(b"hello", Blocking::NoBlock);
        assert_eq!(w, 5);
        ring.request_flush();

        let mut out = [0u8; 5];
        let (r, status) = ring.read(&mut out, 1, Blocking::NoBlock);
        assert_eq!(r, 5);
        assert_eq!(status, Status::Success);

        let (r2, status2) = ring.read(&mut out, 1, Blocking::NoBlock);
        assert_eq!(r2, 0);
        assert_eq!(status2, Status::Complete);
    }

    #[test]
    fn acquire_release_write_block_always_advances() {
        let ring = RingBuf::new();
        ring.set_block_size(16);
        {
            let lease = ring.acquire_write_block(16).unwrap();
            assert_eq!(lease.capacity(), 16);
            lease.fill(&[1u8; 8]);
            lease.release(8);
        }
        assert_eq!(ring.bytes(), 8);
        assert!(ring.capacity() >= 16);
    }
}
