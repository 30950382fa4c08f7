//! The Handle-dispatch façade from spec.md §6 ("External Interfaces").
//!
//! Every concrete machine and the ring buffer already expose a natural Rust
//! API on their own types ([`crate::machine::MachineDesc::read`],
//! [`crate::buffer::RingBuf::acquire_write_block`], ...); this module adds
//! the thin `Handle -> registry lookup -> delegate` wrappers the spec
//! describes as the engine's "C-equivalent ABI around opaque handles", for
//! callers that only ever hold a [`Handle`] and never the descriptor itself
//! (e.g. a host process dispatching on values crossing an FFI boundary).

use crate::buffer::RingBuf;
use crate::error::{ConduitError, Result};
use crate::filter::{Direction, Filter};
use crate::handle::Handle;
use crate::machine::MachineDesc;
use crate::metrics::SnapshotKind;
use crate::registry;
use crate::status::{Blocking, Status};
use crate::stream;

fn desc(handle: Handle) -> Result<std::sync::Arc<MachineDesc>> {
    stream::require_desc(handle)
}

/// `destroy(Handle)`: waits for `use_count() == 0` then drops the descriptor
/// from the registry. Per invariant 6, the arena (here, the `Arc`'s backing
/// allocation) is only actually freed once the last reference — including
/// this one — goes away.
pub fn destroy(handle: Handle) -> Result<()> {
    let d = desc(handle)?;
    while d.use_count() > 0 {
        std::thread::yield_now();
    }
    registry::remove_desc(handle);
    Ok(())
}

/// `stop(Handle)`.
pub fn stop(handle: Handle) -> Result<()> {
    desc(handle)?.stop();
    Ok(())
}

/// `read(Handle, buf, &len) -> Status`. A `NotFound` handle is surfaced to
/// the caller as an `Error` status with zero bytes transferred, per spec.md
/// §7's propagation policy — not logged, since an unknown handle is a caller
/// bug the core has no more context on.
pub fn read(handle: Handle, buf: &mut [u8], blocking: Blocking, alignment: usize) -> (usize, Status) {
    match desc(handle) {
        Ok(d) => d.read(buf, blocking, alignment).unwrap_or((0, Status::Error)),
        Err(_) => (0, Status::Error),
    }
}

/// `write(Handle, buf, &len) -> Status`.
pub fn write(handle: Handle, buf: &mut [u8], blocking: Blocking, alignment: usize) -> (usize, Status) {
    match desc(handle) {
        Ok(d) => d.write(buf, blocking, alignment).unwrap_or((0, Status::Error)),
        Err(_) => (0, Status::Error),
    }
}

/// `register_read_filter(Handle, name, fn)` / `register_write_filter`.
pub fn register_filter(handle: Handle, direction: Direction, filter: Box<dyn Filter>) -> Result<()> {
    let d = desc(handle)?;
    let io = d
        .direction(direction)
        .ok_or_else(|| ConduitError::invalid_argument("register_filter needs Read or Write, not Bidirectional"))?;
    io.filters.lock().register(filter);
    Ok(())
}

/// `add_read_filter(Handle, chain)` / `add_write_filter`.
pub fn add_filter_chain(handle: Handle, direction: Direction, chain: Vec<Box<dyn Filter>>) -> Result<()> {
    let d = desc(handle)?;
    let io = d
        .direction(direction)
        .ok_or_else(|| ConduitError::invalid_argument("add_filter_chain needs Read or Write, not Bidirectional"))?;
    io.filters.lock().splice_front(chain);
    Ok(())
}

fn ring_of(handle: Handle) -> Result<std::sync::Arc<MachineDesc>> {
    let d = desc(handle)?;
    if d.as_ring_buf().is_none() {
        return Err(ConduitError::invalid_argument(format!(
            "handle {handle} is not a ring buffer machine"
        )));
    }
    Ok(d)
}

fn with_ring<T>(handle: Handle, f: impl FnOnce(&RingBuf) -> T) -> Result<T> {
    let d = ring_of(handle)?;
    Ok(f(d.as_ring_buf().expect("checked above")))
}

/// `set_high_water(Handle, bytes)`.
pub fn set_high_water(handle: Handle, bytes: usize) -> Result<()> {
    with_ring(handle, |r| r.set_high_water_mark(bytes))
}

/// `set_alignment(Handle, bytes)`.
pub fn set_alignment(handle: Handle, bytes: usize) -> Result<()> {
    with_ring(handle, |r| r.set_alignment(bytes))
}

/// `set_min_return_size(Handle, bytes)`.
pub fn set_min_return_size(handle: Handle, bytes: usize) -> Result<()> {
    with_ring(handle, |r| r.set_min_return_size(bytes))
}

/// `enable_metrics(Handle)`.
pub fn enable_metrics(handle: Handle) -> Result<()> {
    desc(handle)?.enable_metrics();
    Ok(())
}

/// `format_metrics(Handle, flags) -> String`. `flags` selects the
/// input/output pair the way the spec's single call does; this returns both
/// formatted directions joined, or an explanatory string if metrics were
/// never enabled on this handle.
pub fn format_metrics(handle: Handle, kind: SnapshotKind) -> Result<String> {
    let d = desc(handle)?;
    match d.metrics() {
        Some(pair) => Ok(format!(
            "in: {} | out: {}",
            pair.input.format(kind),
            pair.output.format(kind)
        )),
        None => Ok(format!("handle {handle}: metrics not enabled")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::filter::builtin::ByteCounter;
    use crate::machine::null::NullMachine;
    use crate::metrics::SnapshotKind;
    use std::sync::Arc;

    fn register_null() -> Handle {
        let name = format!("api-test-null-{}", crate::handle::next_handle().raw());
        let kind = registry::register_kind(&name, 4096).unwrap();
        let handle = registry::request_handle(&kind.name).unwrap();
        let d = Arc::new(MachineDesc::new(
            handle,
            "null",
            Arena::root().child("api-test"),
            Box::new(NullMachine::new()),
        ));
        registry::add_desc(d);
        handle
    }

    #[test]
    fn read_write_on_unknown_handle_is_error_status() {
        let bogus = crate::handle::next_handle();
        let mut buf = [0u8; 4];
        let (n, status) = write(bogus, &mut buf, Blocking::NoBlock, 1);
        assert_eq!(n, 0);
        assert_eq!(status, Status::Error);
    }

    #[test]
    fn write_then_destroy_round_trip() {
        let handle = register_null();
        let mut buf = [1u8; 8];
        let (n, status) = write(handle, &mut buf, Blocking::NoBlock, 1);
        assert_eq!(n, 8);
        assert_eq!(status, Status::Success);
        destroy(handle).unwrap();
        assert!(stream::require_desc(handle).is_err());
    }

    #[test]
    fn register_filter_then_metrics_round_trip() {
        let handle = register_null();
        let (counter, total) = ByteCounter::new("count", Direction::Write);
        register_filter(handle, Direction::Write, Box::new(counter)).unwrap();
        enable_metrics(handle).unwrap();

        let mut buf = [9u8; 16];
        let (n, status) = write(handle, &mut buf, Blocking::NoBlock, 1);
        assert_eq!(n, 16);
        assert_eq!(status, Status::Success);
        assert_eq!(total.load(std::sync::atomic::Ordering::Relaxed), 16);

        let formatted = format_metrics(handle, SnapshotKind::Full).unwrap();
        assert!(formatted.contains("in:"));
    }

    #[test]
    fn ring_setters_reject_non_ring_handles() {
        let handle = register_null();
        assert!(set_high_water(handle, 100).is_err());
    }
}
