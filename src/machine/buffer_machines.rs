//! `Machine` adapters over the three in-memory buffer types in
//! [`crate::buffer`]. The buffers themselves know nothing about handles,
//! filter chains or `IoDesc` — these thin wrappers are what the registry
//! actually stores so buffers can be created via the same `create(kind,
//! args)` entry point as any device machine.

use std::any::Any;
use std::sync::Arc;

use crate::arena::Arena;
use crate::buffer::{FixedBuffer, HandleQueue, QueueOrder, RingBuf};
use crate::error::Result;
use crate::handle::Handle;
use crate::registry;
use crate::status::{Blocking, Status};

use super::{Machine, MachineDesc};

const RING_BUFFER_KIND: &str = "ring_buffer";
const FIXED_BUFFER_KIND: &str = "fixed_buffer";
const HANDLE_QUEUE_KIND: &str = "handle_queue";

pub struct RingBufferMachine(pub RingBuf);

impl RingBufferMachine {
    pub fn new(ring: RingBuf) -> Self {
        RingBufferMachine(ring)
    }
}

impl Machine for RingBufferMachine {
    fn raw_read(&self, buf: &mut [u8], blocking: Blocking, alignment: usize) -> (usize, Status) {
        self.0.read(buf, alignment, blocking)
    }

    fn raw_write(&self, buf: &[u8], blocking: Blocking, _alignment: usize) -> (usize, Status) {
        self.0.write(buf, blocking)
    }

    fn stop(&self) {
        self.0.request_flush();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_ring_buf(&self) -> Option<&RingBuf> {
        Some(&self.0)
    }
}

/// Registers a fresh ring-buffer machine under the process-global registry
/// and returns its handle. Used by [`crate::stream::Stream::add_source_segment`]
/// to materialize the zero-copy target a source worker lends blocks from.
pub fn new_ring_buffer_machine() -> Result<Handle> {
    if registry::find_kind(RING_BUFFER_KIND).is_none() {
        // Another thread may have won this race; either outcome leaves the
        // kind registered, which is all `request_handle` needs.
        let _ = registry::register_kind(RING_BUFFER_KIND, 1024 * 1024);
    }
    let handle = registry::request_handle(RING_BUFFER_KIND)?;
    let desc = Arc::new(MachineDesc::new(
        handle,
        "ring_buffer",
        Arena::root().child(format!("ring{}", handle.raw())),
        Box::new(RingBufferMachine::new(RingBuf::new())),
    ));
    registry::add_desc(desc);
    Ok(handle)
}

pub struct FixedBufferMachine(pub FixedBuffer);

impl FixedBufferMachine {
    pub fn new(buf: FixedBuffer) -> Self {
        FixedBufferMachine(buf)
    }
}

impl Machine for FixedBufferMachine {
    fn raw_read(&self, buf: &mut [u8], blocking: Blocking, alignment: usize) -> (usize, Status) {
        self.0.read(buf, alignment, blocking)
    }

    fn raw_write(&self, buf: &[u8], blocking: Blocking, _alignment: usize) -> (usize, Status) {
        self.0.write(buf, blocking)
    }

    fn stop(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `create("fixed_buffer", {block_bytes, block_count})`: the bounded,
/// back-pressure-by-drop sibling of the ring buffer.
pub fn new_fixed_buffer_machine(block_bytes: usize, block_count: usize) -> Result<Handle> {
    if registry::find_kind(FIXED_BUFFER_KIND).is_none() {
        let _ = registry::register_kind(FIXED_BUFFER_KIND, block_bytes);
    }
    let handle = registry::request_handle(FIXED_BUFFER_KIND)?;
    let desc = Arc::new(MachineDesc::new(
        handle,
        "fixed_buffer",
        Arena::root().child(format!("fbb{}", handle.raw())),
        Box::new(FixedBufferMachine::new(FixedBuffer::new(block_bytes, block_count))),
    ));
    registry::add_desc(desc);
    Ok(handle)
}

/// `create("handle_queue", order)`: a FIFO/LIFO of whole byte packets.
pub fn new_handle_queue_machine(order: QueueOrder) -> Result<Handle> {
    if registry::find_kind(HANDLE_QUEUE_KIND).is_none() {
        let _ = registry::register_kind(HANDLE_QUEUE_KIND, 4096);
    }
    let handle = registry::request_handle(HANDLE_QUEUE_KIND)?;
    let desc = Arc::new(MachineDesc::new(
        handle,
        "handle_queue",
        Arena::root().child(format!("hq{}", handle.raw())),
        Box::new(HandleQueueMachine::new(HandleQueue::new(order))),
    ));
    registry::add_desc(desc);
    Ok(handle)
}

pub struct HandleQueueMachine(pub HandleQueue);

impl HandleQueueMachine {
    pub fn new(queue: HandleQueue) -> Self {
        HandleQueueMachine(queue)
    }
}

impl Machine for HandleQueueMachine {
    fn raw_read(&self, buf: &mut [u8], _blocking: Blocking, _alignment: usize) -> (usize, Status) {
        let (payload, status) = self.0.read();
        match payload {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                if bytes.len() > buf.len() {
                    tracing::warn!(
                        packet_len = bytes.len(),
                        buf_len = buf.len(),
                        "handle queue packet truncated to caller buffer"
                    );
                }
                buf[..n].copy_from_slice(&bytes[..n]);
                (n, status)
            }
            None => (0, status),
        }
    }

    fn raw_write(&self, buf: &[u8], _blocking: Blocking, _alignment: usize) -> (usize, Status) {
        self.0.write(buf)
    }

    fn stop(&self) {
        self.0.request_flush();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
