//! Fixed-capacity data slabs and the circular chains built from them.
//!
//! Grounded on `original_source/include/block-list-buffer.h` and the
//! `forge_ring`/`block_list_alloc` helpers `ring-buf.c` builds on: a block
//! knows only its own capacity/fill and a pointer to the next block. A ring
//! closes the chain into a cycle; a plain chain (used for growth splicing)
//! leaves the tail dangling until the caller links it in.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// One slab of the ring. Never resized after construction; growth adds new
/// nodes rather than enlarging existing ones, so `Arc<BlockNode>` clones
/// handed to a write-block lease stay valid no matter what else the ring
/// does concurrently.
pub(crate) struct BlockNode {
    pub capacity: usize,
    pub data: Mutex<Vec<u8>>,
    pub filled: AtomicUsize,
    next: Mutex<Option<Arc<BlockNode>>>,
}

impl BlockNode {
    fn leaf(capacity: usize) -> Arc<BlockNode> {
        Arc::new(BlockNode {
            capacity,
            data: Mutex::new(vec![0u8; capacity]),
            filled: AtomicUsize::new(0),
            next: Mutex::new(None),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.filled.load(Ordering::Acquire) == 0
    }

    /// The next block in the chain. Panics if called before the chain this
    /// node belongs to has been closed — every `RingBuf` block chain is
    /// closed before it is ever handed out, so this never fires in practice.
    pub fn next(&self) -> Arc<BlockNode> {
        self.next
            .lock()
            .clone()
            .expect("ring block chain not yet closed")
    }

    fn set_next(&self, node: Arc<BlockNode>) {
        *self.next.lock() = Some(node);
    }
}

/// Build a single self-looping block — the ring's state right after its
/// first write, before any growth has happened.
pub(crate) fn new_ring_of_one(capacity: usize) -> Arc<BlockNode> {
    let node = BlockNode::leaf(capacity);
    node.set_next(node.clone());
    node
}

/// Build a fresh linear chain of `count` same-sized blocks, returned as
/// `(head, tail)`. The tail's `next` is left unset; the caller splices this
/// chain into an existing ring by pointing the insertion point at `head` and
/// `tail` at whatever followed the insertion point.
pub(crate) fn new_chain(capacity: usize, count: usize) -> (Arc<BlockNode>, Arc<BlockNode>) {
    assert!(count > 0, "growth step must add at least one block");
    let nodes: Vec<Arc<BlockNode>> = (0..count).map(|_| BlockNode::leaf(capacity)).collect();
    for i in 0..count - 1 {
        nodes[i].set_next(nodes[i + 1].clone());
    }
    (nodes[0].clone(), nodes[count - 1].clone())
}

/// Build a closed cycle of `count` same-sized blocks up front — used by the
/// fixed-block buffer, which never grows past its initial allocation.
pub(crate) fn new_cycle(capacity: usize, count: usize) -> Arc<BlockNode> {
    if count == 1 {
        return new_ring_of_one(capacity);
    }
    let (head, tail) = new_chain(capacity, count);
    tail.set_next(head.clone());
    head
}

/// Splice `(head, tail)` in immediately after `at`, preserving the cycle:
/// `at.next` becomes `head`, and `tail.next` becomes whatever `at.next` used
/// to be.
pub(crate) fn splice_after(at: &Arc<BlockNode>, head: Arc<BlockNode>, tail: Arc<BlockNode>) {
    let old_next = at.next();
    tail.set_next(old_next);
    at.set_next(head);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_loops_to_itself() {
        let head = new_ring_of_one(16);
        assert!(Arc::ptr_eq(&head.next(), &head));
    }

    #[test]
    fn splice_preserves_cycle() {
        let head = new_ring_of_one(16);
        let (new_head, new_tail) = new_chain(16, 2);
        splice_after(&head, new_head.clone(), new_tail.clone());
        assert!(Arc::ptr_eq(&head.next(), &new_head));
        assert!(Arc::ptr_eq(&new_tail.next(), &head));
    }
}
