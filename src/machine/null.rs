//! The null machine: discards every write, refuses every read. Grounded on
//! `original_source/src/null-machine.c`'s `null_read`/`null_write` pair.

use std::any::Any;
use std::sync::Arc;

use crate::arena::Arena;
use crate::error::Result;
use crate::handle::Handle;
use crate::registry;
use crate::status::{Blocking, Status};

use super::{Machine, MachineDesc};

const NULL_KIND: &str = "null";

#[derive(Debug, Default)]
pub struct NullMachine;

impl NullMachine {
    pub fn new() -> Self {
        NullMachine
    }
}

/// `create("null")`: a sink that discards everything written to it, for
/// pipelines that only care about byte counts via a metrics/filter chain.
pub fn new_null_machine() -> Result<Handle> {
    if registry::find_kind(NULL_KIND).is_none() {
        let _ = registry::register_kind(NULL_KIND, 4096);
    }
    let handle = registry::request_handle(NULL_KIND)?;
    let desc = Arc::new(MachineDesc::new(
        handle,
        NULL_KIND,
        Arena::root().child(format!("null{}", handle.raw())),
        Box::new(NullMachine::new()),
    ));
    registry::add_desc(desc);
    Ok(handle)
}

impl Machine for NullMachine {
    fn raw_read(&self, _buf: &mut [u8], _blocking: Blocking, _alignment: usize) -> (usize, Status) {
        tracing::error!("attempted read from a null machine");
        (0, Status::Error)
    }

    fn raw_write(&self, buf: &[u8], _blocking: Blocking, _alignment: usize) -> (usize, Status) {
        (buf.len(), Status::Success)
    }

    fn stop(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_discards_everything_successfully() {
        let m = NullMachine::new();
        let (n, status) = m.raw_write(b"whatever", Blocking::NoBlock, 1);
        assert_eq!(n, 8);
        assert_eq!(status, Status::Success);
    }

    #[test]
    fn read_is_an_error() {
        let m = NullMachine::new();
        let mut buf = [0u8; 4];
        let (n, status) = m.raw_read(&mut buf, Blocking::NoBlock, 1);
        assert_eq!(n, 0);
        assert_eq!(status, Status::Error);
    }
}
