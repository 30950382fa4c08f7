//! Stream state machine: owns a DAG of segments and drives them through
//! `INIT -> READY -> RUNNING -> {FINISHING, STOPPED, ERROR} -> {DONE,
//! STOPPED, ERROR}`.
//!
//! Grounded on `original_source/include/stream-state.h` for the state order
//! (`STREAM_IS_RUNNING`/`STREAM_IS_PROCESSING` become [`StreamState::is_running`]
//! and [`StreamState::is_processing`]) and on spec.md §4.7 for the driver
//! thread's loop shape.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{ConduitError, Result};
use crate::handle::Handle;
use crate::registry;
use crate::segment::Segment;

const DRIVER_POLL: Duration = Duration::from_millis(1);
const FINISHING_GRACE: Duration = Duration::from_millis(50);

/// Mirrors `enum stream_state_e` one-for-one; the discriminant order itself
/// carries the meaning behind `is_running`/`is_processing` below, so keep it
/// in sync with the C source if it's ever reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StreamState {
    Init = 0,
    Ready = 1,
    Running = 2,
    Finishing = 3,
    Done = 4,
    Stopped = 5,
    Error = 6,
}

impl StreamState {
    fn from_u8(v: u8) -> StreamState {
        match v {
            0 => StreamState::Init,
            1 => StreamState::Ready,
            2 => StreamState::Running,
            3 => StreamState::Finishing,
            4 => StreamState::Done,
            5 => StreamState::Stopped,
            _ => StreamState::Error,
        }
    }

    /// `STREAM_IS_RUNNING`: strictly between `Init` and `Done`.
    pub fn is_running(self) -> bool {
        self > StreamState::Init && self < StreamState::Done
    }

    /// `STREAM_IS_PROCESSING`: `Running` or `Finishing`.
    pub fn is_processing(self) -> bool {
        matches!(self, StreamState::Running | StreamState::Finishing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Done | StreamState::Stopped | StreamState::Error)
    }
}

/// The cell a [`Segment`] reads every loop iteration and a [`Stream`]
/// mutates from its driver thread or from a completion/error callback.
pub type SharedState = Arc<AtomicU8>;

pub fn load_state(cell: &SharedState) -> StreamState {
    StreamState::from_u8(cell.load(Ordering::Acquire))
}

fn store_state(cell: &SharedState, state: StreamState) {
    cell.store(state as u8, Ordering::Release);
}

struct StreamInner {
    id: u64,
    state: SharedState,
    segments: Mutex<Vec<Arc<Segment>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Stream(Arc<StreamInner>);

static STREAM_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn registry_list() -> &'static Mutex<Vec<Stream>> {
    static STREAMS: OnceLock<Mutex<Vec<Stream>>> = OnceLock::new();
    STREAMS.get_or_init(|| Mutex::new(Vec::new()))
}

/// `new_stream()`.
pub fn new_stream() -> Stream {
    let id = STREAM_COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
    let stream = Stream(Arc::new(StreamInner {
        id,
        state: Arc::new(AtomicU8::new(StreamState::Init as u8)),
        segments: Mutex::new(Vec::new()),
        driver: Mutex::new(None),
    }));
    registry_list().lock().push(stream.clone());
    stream
}

impl Stream {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn state(&self) -> StreamState {
        load_state(&self.0.state)
    }

    pub(crate) fn on_segment_complete(&self) {
        let state = self.state();
        match state {
            StreamState::Running => store_state(&self.0.state, StreamState::Finishing),
            StreamState::Init | StreamState::Ready => store_state(&self.0.state, StreamState::Done),
            _ => {}
        }
    }

    pub(crate) fn on_segment_error(&self) {
        if !self.state().is_terminal() {
            store_state(&self.0.state, StreamState::Error);
        }
    }

    /// `add_segment(in, out)`: a plain 1-in/1-out pump segment.
    pub fn add_segment(&self, input: Handle, output: Handle) -> Arc<Segment> {
        self.push_segment(Segment::new_pump(input, output, None, self.0.state.clone()))
    }

    /// `add_segment_tee(in, out0, out1)`: writes every chunk to both outputs.
    pub fn add_segment_tee(&self, input: Handle, output0: Handle, output1: Handle) -> Arc<Segment> {
        self.push_segment(Segment::new_pump(input, output0, Some(output1), self.0.state.clone()))
    }

    /// `add_source_segment(src, &buf_handle)`: pumps `src` into a freshly
    /// created ring-buffer machine via zero-copy write-block lending, and
    /// returns the new buffer's handle alongside the segment.
    pub fn add_source_segment(&self, src: Handle) -> Result<(Arc<Segment>, Handle)> {
        let buf_handle = crate::machine::new_ring_buffer_machine()?;
        let seg = Segment::new_source(src, buf_handle, self.0.state.clone());
        Ok((self.push_segment(seg), buf_handle))
    }

    fn push_segment(&self, seg: Arc<Segment>) -> Arc<Segment> {
        seg.set_callbacks(self.clone());
        self.0.segments.lock().push(seg.clone());
        seg
    }

    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.0.segments.lock().clone()
    }

    /// `start_stream`: spawns the driver thread described in spec.md §4.7.
    pub fn start_stream(&self) {
        let this = self.clone();
        let handle = thread::spawn(move || this.drive());
        *self.0.driver.lock() = Some(handle);
    }

    fn drive(&self) {
        store_state(&self.0.state, StreamState::Ready);
        for seg in self.segments() {
            seg.start();
        }
        store_state(&self.0.state, StreamState::Running);

        loop {
            let state = self.state();
            if state == StreamState::Running {
                thread::sleep(DRIVER_POLL);
                continue;
            }
            if state == StreamState::Finishing {
                thread::sleep(FINISHING_GRACE);
                for seg in self.segments() {
                    seg.request_stop();
                }
                store_state(&self.0.state, StreamState::Done);
                break;
            }
            // Error or an externally forced Stopped: segments already told
            // to stop by `stop_stream`/the error path; nothing left to wait
            // on but the join below.
            break;
        }

        for seg in self.segments() {
            seg.join();
        }
    }

    /// `stop_stream`: forces `RUNNING -> FINISHING` via the completion path.
    pub fn stop_stream(&self) {
        let state = self.state();
        if state == StreamState::Running {
            store_state(&self.0.state, StreamState::Finishing);
        } else if state.is_running() {
            store_state(&self.0.state, StreamState::Stopped);
            for seg in self.segments() {
                seg.request_stop();
            }
        }
    }

    /// `join_stream`: blocks until the driver thread has exited.
    pub fn join_stream(&self) {
        let handle = self.0.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// `stop_all_streams`.
pub fn stop_all_streams() {
    for stream in registry_list().lock().iter() {
        stream.stop_stream();
    }
}

/// `stream_cleanup`: stops every stream, joins its driver, and destroys
/// every machine referenced by each of its segments.
pub fn stream_cleanup() {
    let streams = std::mem::take(&mut *registry_list().lock());
    for stream in &streams {
        stream.stop_stream();
        stream.join_stream();
        for seg in stream.segments() {
            for handle in seg.handles() {
                if let Some(desc) = registry::find_desc(handle) {
                    desc.stop();
                }
                registry::remove_desc(handle);
            }
        }
    }
}

/// Rejects operations on a handle the registry has never heard of, matching
/// spec.md §4.1's "callers of read/write must treat absence as NotFound".
pub fn require_desc(handle: Handle) -> Result<Arc<crate::machine::MachineDesc>> {
    registry::find_desc(handle).ok_or_else(|| ConduitError::not_found(format!("handle {handle}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ordering_matches_c_semantics() {
        assert!(StreamState::Running.is_running());
        assert!(StreamState::Finishing.is_running());
        assert!(!StreamState::Done.is_running());
        assert!(!StreamState::Init.is_running());
        assert!(StreamState::Running.is_processing());
        assert!(!StreamState::Ready.is_processing());
    }

    #[test]
    fn new_stream_starts_in_init() {
        let s = new_stream();
        assert_eq!(s.state(), StreamState::Init);
    }
}
