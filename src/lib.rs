//! `conduit`: a composable streaming I/O engine.
//!
//! Pipelines are built from *machines* (file, UDP, ring buffer, fixed
//! buffer, handle queue, ...) wired into a DAG of *segments*, each driven by
//! a dedicated worker thread under a shared *stream* state machine. Every
//! machine's read and write side is guarded by a per-direction *filter
//! chain*; the ring buffer machine is the back-pressured FIFO most
//! multi-segment pipelines pass data through.
//!
//! See `SPEC_FULL.md` in the repository root for the full component design.

pub mod api;
pub mod arena;
pub mod buffer;
pub mod config;
pub mod error;
pub mod filter;
pub mod handle;
pub mod logging;
pub mod machine;
pub mod metrics;
pub mod registry;
pub mod segment;
pub mod status;
pub mod stream;

pub use error::{ConduitError, Result};
pub use handle::Handle;
pub use status::{Blocking, Status};
pub use stream::{new_stream, stop_all_streams, stream_cleanup, Stream, StreamState};
