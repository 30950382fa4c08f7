//! Lifetime-scoped naming tree.
//!
//! The original engine used a hierarchical memory pool: freeing a node freed
//! its entire subtree in one call. Rust's ownership model already gives us
//! that for free (a `Machine`/`Segment`/`Filter` is reclaimed when its last
//! `Arc` drops), so `Arena` is not a bump allocator here — it is a scope
//! tree used for two things the ownership model does *not* give us for
//! free: deterministic, depth-first teardown ordering, and scope-qualified
//! names for tracing/metrics (`stream0/seg3/ring_buf`).

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

struct ArenaNode {
    label: String,
    parent: Option<Arena>,
    children: Mutex<Vec<Arena>>,
}

/// A handle into the scope tree. Cloning is cheap (an `Arc` bump); dropping
/// the last clone of a node does not recurse into children — children keep
/// their own parent link alive independently, matching Rust's normal drop
/// order rather than the C source's explicit subtree free.
#[derive(Clone)]
pub struct Arena(Arc<ArenaNode>);

impl Arena {
    /// The single process-wide root scope every machine kind, stream and
    /// the global metrics list hang off of. Calling this repeatedly returns
    /// clones of the same node rather than minting a fresh, unshared root
    /// each time.
    pub fn root() -> Arena {
        static ROOT: OnceLock<Arena> = OnceLock::new();
        ROOT.get_or_init(|| {
            Arena(Arc::new(ArenaNode {
                label: "root".to_string(),
                parent: None,
                children: Mutex::new(Vec::new()),
            }))
        })
        .clone()
    }

    /// Create a named child scope under `self`.
    pub fn child(&self, label: impl Into<String>) -> Arena {
        let node = Arena(Arc::new(ArenaNode {
            label: label.into(),
            parent: Some(self.clone()),
            children: Mutex::new(Vec::new()),
        }));
        self.0.children.lock().push(node.clone());
        node
    }

    /// The fully qualified, `/`-joined path from the root to this scope,
    /// e.g. `root/stream0/seg3/ring_buf`. Used as a tracing span name and as
    /// the metric key prefix.
    pub fn path(&self) -> String {
        let mut segments = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(node) = cur {
            segments.push(node.0.label.clone());
            cur = node.0.parent.clone();
        }
        segments.reverse();
        segments.join("/")
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Arena({})", self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_through_children() {
        let root = Arena::root();
        let stream = root.child("stream0");
        let seg = stream.child("seg3");
        assert_eq!(seg.path(), "root/stream0/seg3");
    }
}
