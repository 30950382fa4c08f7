//! Opaque, process-unique machine handles.

use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, strictly-monotonic identifier for a live machine instance.
///
/// Handles are never reused: the backing counter only ever increases, so a
/// handle value once issued will never again name a second, unrelated
/// machine even after the first is destroyed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub(crate) u64);

impl Handle {
    /// The handle value as a raw `u64`, for logging and FFI boundaries.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-wide monotonic handle counter. Starts at 1 so `0`/default can be
/// reserved as an explicit "no handle" sentinel the way the C source used it.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_handle() -> Handle {
    Handle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_strictly_monotonic() {
        let a = next_handle();
        let b = next_handle();
        assert!(b.raw() > a.raw());
    }
}
