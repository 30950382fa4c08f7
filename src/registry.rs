//! Process-wide name→kind and handle→descriptor lookup.
//!
//! Grounded on spec.md §4.1 and the original engine's global machine-kind
//! table: a single global lock protects both maps, and `find_*` returning
//! absence is not itself an error — callers translate that into
//! [`ConduitError::NotFound`] at the call site that actually needs a result.
//! `OnceLock` replaces the C source's static initialization guard; no new
//! dependency (`once_cell`) is needed for a single process-wide singleton.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{ConduitError, Result};
use crate::handle::{next_handle, Handle};
use crate::machine::MachineDesc;

/// A named class of machines ("file", "ring_buffer", "udp", ...). The
/// original engine attached create/destroy/read/write/stop function
/// pointers here directly; those now live on the `Machine` trait impls
/// themselves, so `MachineKind` only needs to carry identity and a
/// default buffer-size hint used by segment workers picking a scratch
/// buffer size.
#[derive(Debug, Clone)]
pub struct MachineKind {
    pub name: String,
    pub default_buf_hint: usize,
}

struct KindTable {
    by_name: Mutex<HashMap<String, MachineKind>>,
    by_handle: Mutex<HashMap<Handle, String>>,
}

fn kinds() -> &'static KindTable {
    static KINDS: OnceLock<KindTable> = OnceLock::new();
    KINDS.get_or_init(|| KindTable {
        by_name: Mutex::new(HashMap::new()),
        by_handle: Mutex::new(HashMap::new()),
    })
}

fn descs() -> &'static DashMap<Handle, Arc<MachineDesc>> {
    static DESCS: OnceLock<DashMap<Handle, Arc<MachineDesc>>> = OnceLock::new();
    DESCS.get_or_init(DashMap::new)
}

/// `register_kind(name, default_buf_hint)`. Fails if `name` is already
/// registered, mirroring the engine's `AlreadyRegistered` behavior.
pub fn register_kind(name: impl Into<String>, default_buf_hint: usize) -> Result<MachineKind> {
    let name = name.into();
    let table = kinds();
    let mut by_name = table.by_name.lock();
    if by_name.contains_key(&name) {
        return Err(ConduitError::invalid_argument(format!(
            "machine kind already registered: {name}"
        )));
    }
    let kind = MachineKind {
        name: name.clone(),
        default_buf_hint,
    };
    by_name.insert(name, kind.clone());
    Ok(kind)
}

pub fn find_kind(name: &str) -> Option<MachineKind> {
    kinds().by_name.lock().get(name).cloned()
}

/// Issues the next monotonic handle and associates it with `kind`. The
/// kind must already be registered.
pub fn request_handle(kind: &str) -> Result<Handle> {
    find_kind(kind).ok_or_else(|| ConduitError::not_found(format!("machine kind: {kind}")))?;
    let handle = next_handle();
    kinds().by_handle.lock().insert(handle, kind.to_string());
    Ok(handle)
}

pub fn kind_of(handle: Handle) -> Option<MachineKind> {
    let name = kinds().by_handle.lock().get(&handle).cloned()?;
    find_kind(&name)
}

pub fn add_desc(desc: Arc<MachineDesc>) {
    descs().insert(desc.handle, desc);
}

pub fn find_desc(handle: Handle) -> Option<Arc<MachineDesc>> {
    descs().get(&handle).map(|entry| entry.value().clone())
}

/// Removes a descriptor from the registry. Does not itself wait for
/// `use_count() == 0` — callers that need that guarantee (e.g. a `destroy`
/// operation) must check it themselves before calling this; dropping the
/// last `Arc` here is what actually frees the machine.
pub fn remove_desc(handle: Handle) -> Option<Arc<MachineDesc>> {
    kinds().by_handle.lock().remove(&handle);
    descs().remove(&handle).map(|(_, desc)| desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::machine::null::NullMachine;

    fn unique_kind_name(tag: &str) -> String {
        format!("test-kind-{tag}-{}", next_handle().raw())
    }

    #[test]
    fn register_find_and_remove_round_trip() {
        let name = unique_kind_name("a");
        let kind = register_kind(&name, 4096).unwrap();
        assert_eq!(kind.name, name);
        assert!(find_kind(&name).is_some());

        let handle = request_handle(&name).unwrap();
        assert_eq!(kind_of(handle).unwrap().name, name);

        let desc = Arc::new(MachineDesc::new(
            handle,
            "null",
            Arena::root().child("test"),
            Box::new(NullMachine::new()),
        ));
        add_desc(desc.clone());
        assert!(find_desc(handle).is_some());

        let removed = remove_desc(handle);
        assert!(removed.is_some());
        assert!(find_desc(handle).is_none());
        assert!(kind_of(handle).is_none());
    }

    #[test]
    fn duplicate_kind_registration_fails() {
        let name = unique_kind_name("dup");
        register_kind(&name, 1024).unwrap();
        let err = register_kind(&name, 2048).unwrap_err();
        assert!(matches!(err, ConduitError::InvalidArgument(_)));
    }

    #[test]
    fn request_handle_for_unknown_kind_fails() {
        let err = request_handle("no-such-kind-ever").unwrap_err();
        assert!(matches!(err, ConduitError::NotFound(_)));
    }
}
