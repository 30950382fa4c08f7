//! The base machine descriptor every concrete machine embeds, and the
//! `Machine` trait concrete machines implement.
//!
//! Grounded on `original_source/include/machine.h`'s `struct machine_desc_t`
//! / `struct io_desc` pair: here `MachineDesc` plays the first role and
//! `IoDesc` the second, generalized with a trait object (`Box<dyn Machine>`)
//! in place of the C source's raw function-pointer table, per SPEC_FULL.md
//! §9's note on replacing `void*` + struct-embedding polymorphism.

pub mod buffer_machines;
pub mod file;
pub mod null;
pub mod udp;

pub use buffer_machines::{new_fixed_buffer_machine, new_handle_queue_machine, new_ring_buffer_machine};
pub use file::{new_file_machine, new_rotating_file_machine};
pub use null::new_null_machine;
pub use udp::{new_udp_client_machine, new_udp_server_machine};

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::arena::Arena;
use crate::error::{ConduitError, Result};
use crate::filter::{Direction, FilterChain, FilterCtx};
use crate::handle::Handle;
use crate::metrics::MetricsPair;
use crate::status::{Blocking, Status};

/// One direction's lifecycle state, mirroring `IO_DESC_*` from the C source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    Normal,
    Disabling,
    Disabled,
    Stopped,
    Error,
}

/// One direction (read or write) of a machine: its state and filter chain.
pub struct IoDesc {
    pub state: Mutex<IoState>,
    pub filters: Mutex<FilterChain>,
}

impl Default for IoDesc {
    fn default() -> Self {
        IoDesc {
            state: Mutex::new(IoState::Normal),
            filters: Mutex::new(FilterChain::new()),
        }
    }
}

impl IoDesc {
    pub fn state(&self) -> IoState {
        *self.state.lock()
    }
}

/// What a concrete machine (file, UDP socket, ring buffer, ...) must supply:
/// the actual read/write syscalls or buffer operations, underneath whatever
/// filter chain the owning `MachineDesc` drives.
pub trait Machine: Send + Sync {
    fn raw_read(&self, buf: &mut [u8], blocking: Blocking, alignment: usize) -> (usize, Status);
    fn raw_write(&self, buf: &[u8], blocking: Blocking, alignment: usize) -> (usize, Status);
    fn stop(&self);
    fn as_any(&self) -> &dyn Any;

    /// Overridden only by the ring-buffer machine, so segment source
    /// workers can obtain the zero-copy `acquire_write_block` path without
    /// every other machine kind needing to know about it.
    fn as_ring_buf(&self) -> Option<&crate::buffer::RingBuf> {
        None
    }
}

/// Every live machine instance: identity, scope, both directions, and the
/// concrete implementation.
pub struct MachineDesc {
    pub handle: Handle,
    pub kind: &'static str,
    pub arena: Arena,
    pub read: IoDesc,
    pub write: IoDesc,
    pub metrics: OnceLock<MetricsPair>,
    use_count: AtomicUsize,
    machine: Box<dyn Machine>,
}

impl MachineDesc {
    pub fn new(handle: Handle, kind: &'static str, arena: Arena, machine: Box<dyn Machine>) -> Self {
        MachineDesc {
            handle,
            kind,
            arena,
            read: IoDesc::default(),
            write: IoDesc::default(),
            metrics: OnceLock::new(),
            use_count: AtomicUsize::new(0),
            machine,
        }
    }

    /// Attaches metrics counters at construction time.
    pub fn with_metrics(self) -> Self {
        self.enable_metrics();
        self
    }

    /// `enable_metrics(handle)`: attaches metrics counters if not already
    /// present. Idempotent — calling it twice keeps the first pair's
    /// accumulated totals rather than resetting them.
    pub fn enable_metrics(&self) {
        let _ = self.metrics.get_or_init(MetricsPair::new);
    }

    pub fn metrics(&self) -> Option<&MetricsPair> {
        self.metrics.get()
    }

    pub fn machine(&self) -> &dyn Machine {
        self.machine.as_ref()
    }

    pub fn acquire(&self) {
        self.use_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        self.use_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Acquire)
    }

    pub fn read(&self, buf: &mut [u8], blocking: Blocking, alignment: usize) -> Result<(usize, Status)> {
        self.dispatch(&self.read, true, buf, blocking, alignment)
    }

    pub fn write(&self, buf: &mut [u8], blocking: Blocking, alignment: usize) -> Result<(usize, Status)> {
        self.dispatch(&self.write, false, buf, blocking, alignment)
    }

    fn dispatch(
        &self,
        desc: &IoDesc,
        is_read: bool,
        buf: &mut [u8],
        blocking: Blocking,
        alignment: usize,
    ) -> Result<(usize, Status)> {
        {
            let mut state = desc.state.lock();
            match *state {
                IoState::Disabling => {
                    *state = IoState::Disabled;
                    return Ok((0, Status::Complete));
                }
                IoState::Disabled | IoState::Stopped => {
                    return Ok((0, Status::Complete));
                }
                IoState::Error => {
                    return Err(ConduitError::io_failed(
                        self.handle,
                        std::io::Error::other("endpoint in error state"),
                    ));
                }
                IoState::Normal => {}
            }
        }

        let len = buf.len();
        let machine = &self.machine;
        let mut chain = desc.filters.lock();
        let mut ctx = FilterCtx::new(buf, len, blocking, alignment);

        let status = if is_read {
            chain.drive(&mut ctx, &mut |ctx| {
                let requested = ctx.len;
                let (n, status) = machine.raw_read(&mut ctx.buf[..requested], ctx.blocking, ctx.alignment);
                ctx.len = n;
                status
            })
        } else {
            chain.drive(&mut ctx, &mut |ctx| {
                let (n, status) = machine.raw_write(&ctx.buf[..ctx.len], ctx.blocking, ctx.alignment);
                ctx.len = n;
                status
            })
        };
        let produced = ctx.len;
        drop(chain);

        if let Some(metrics) = self.metrics.get() {
            let pair = if is_read { &metrics.input } else { &metrics.output };
            pair.record(len as u64, produced as u64);
        }

        match status {
            Status::Complete => *desc.state.lock() = IoState::Disabling,
            Status::Error => *desc.state.lock() = IoState::Error,
            _ => {}
        }

        Ok((produced, status))
    }

    /// `stop(handle)`: disables the write side and lets the concrete
    /// machine react (a ring sets its flush flag; a file/UDP machine closes
    /// its handle on the next write attempt).
    pub fn stop(&self) {
        *self.write.state.lock() = IoState::Disabling;
        self.machine.stop();
    }

    /// `Some` only when this descriptor wraps a ring-buffer machine;
    /// segment source workers use it for zero-copy write-block lending.
    pub fn as_ring_buf(&self) -> Option<&crate::buffer::RingBuf> {
        self.machine.as_ring_buf()
    }

    pub fn direction(&self, dir: Direction) -> Option<&IoDesc> {
        match dir {
            Direction::Read => Some(&self.read),
            Direction::Write => Some(&self.write),
            Direction::Bidirectional => None,
        }
    }
}
