//! The small status vocabulary threaded through every read/write/filter call.

/// Outcome of a read, write or filter-chain call.
///
/// This mirrors the original engine's `io_status` values one-for-one so the
/// segment worker's dispatch logic (§4.6 of the spec) reads the same way
/// regardless of which machine or filter produced the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The call completed; `len` bytes were transferred (may be zero).
    Success,
    /// Irrecoverable internal error; propagates up the chain unchanged.
    Error,
    /// The source has no more data to produce, or the sink is fully drained
    /// and flushed. Terminal for the direction it was returned on.
    Complete,
    /// Reserved for feedback-controller filters that want to re-drive the
    /// same downstream call with a controller-owned buffer. No built-in
    /// filter produces this (see SPEC_FULL.md §9).
    Continue,
    /// A gated write (low-water mark) or an empty non-blocking read: no
    /// bytes moved, try again later.
    NoData,
    /// A hardware source detected a timing gap. Segment workers treat this
    /// as `Success` unless overruns are explicitly disallowed.
    DataBreak,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::DataBreak)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Error)
    }
}

/// Whether a call should block waiting for data/space or return immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking {
    Block,
    NoBlock,
}
