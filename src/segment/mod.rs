//! Segment worker: a thread pumping bytes from one machine to one or two
//! others, honoring the stream state machine it belongs to.
//!
//! Grounded on `original_source/src/segment.c`: `segment_run`/
//! `segment_run_source` become [`Segment::run_pump`]/[`Segment::run_source`]
//! below, `stop_segment` becomes [`Segment::request_stop`], and the
//! `do_complete`/`running` flag pair is kept verbatim since it cleanly
//! separates "the source told us it's done" from "the loop should exit".

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::handle::Handle;
use crate::registry;
use crate::status::{Blocking, Status};
use crate::stream::{self, SharedState, Stream, StreamState};

const IDLE_SLEEP: Duration = Duration::from_millis(1);
const DEFAULT_BUF_LEN: usize = 10 * 1024 * 1024;

static SEGMENT_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct Segment {
    id: u64,
    name: Mutex<String>,
    input: Handle,
    output: Handle,
    output1: Option<Handle>,
    is_source: bool,
    default_buf_len: AtomicUsize,
    state: SharedState,
    running: AtomicBool,
    do_complete: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    owner: Mutex<Option<Stream>>,
}

impl Segment {
    fn new(input: Handle, output: Handle, output1: Option<Handle>, is_source: bool, state: SharedState) -> Arc<Segment> {
        let id = SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
        Arc::new(Segment {
            id,
            name: Mutex::new(format!("seg{id}")),
            input,
            output,
            output1,
            is_source,
            default_buf_len: AtomicUsize::new(DEFAULT_BUF_LEN),
            state,
            running: AtomicBool::new(false),
            do_complete: AtomicBool::new(false),
            thread: Mutex::new(None),
            owner: Mutex::new(None),
        })
    }

    /// `segment_create_1_1`/`segment_create_1_2`.
    pub fn new_pump(input: Handle, output: Handle, output1: Option<Handle>, state: SharedState) -> Arc<Segment> {
        Segment::new(input, output, output1, false, state)
    }

    /// `segment_create_src`: pumps into a ring buffer via zero-copy lending.
    pub fn new_source(input: Handle, ring_output: Handle, state: SharedState) -> Arc<Segment> {
        Segment::new(input, ring_output, None, true, state)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_default_buflen(&self, len: usize) {
        self.default_buf_len.store(len.max(1), Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn handles(&self) -> Vec<Handle> {
        let mut v = vec![self.input, self.output];
        if let Some(h) = self.output1 {
            v.push(h);
        }
        v
    }

    pub(crate) fn set_callbacks(&self, owner: Stream) {
        *self.owner.lock() = Some(owner);
    }

    fn complete(&self) {
        if let Some(owner) = self.owner.lock().as_ref() {
            owner.on_segment_complete();
        }
    }

    fn error(&self) {
        if let Some(owner) = self.owner.lock().as_ref() {
            owner.on_segment_error();
        }
    }

    /// `stop_segment`: stops every referenced machine and clears the run flag.
    pub fn request_stop(&self) {
        for handle in self.handles() {
            if let Some(desc) = registry::find_desc(handle) {
                desc.stop();
            }
        }
        tracing::trace!(segment = %self.name(), "stop command issued");
        self.running.store(false, Ordering::Release);
        self.do_complete.store(false, Ordering::Release);
    }

    pub fn start(self: &Arc<Self>) {
        let seg = self.clone();
        let handle = thread::spawn(move || {
            if seg.is_source {
                seg.run_source();
            } else {
                seg.run_pump();
            }
        });
        *self.thread.lock() = Some(handle);
    }

    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run_pump(&self) {
        let Ok(src) = stream::require_desc(self.input) else {
            self.error();
            return;
        };
        let Ok(dst) = stream::require_desc(self.output) else {
            self.error();
            return;
        };
        let dst1 = match self.output1 {
            Some(h) => match stream::require_desc(h) {
                Ok(d) => Some(d),
                Err(_) => {
                    self.error();
                    return;
                }
            },
            None => None,
        };

        let buflen = self.default_buf_len.load(Ordering::Relaxed);
        let mut buf = vec![0u8; buflen];

        self.running.store(true, Ordering::Release);
        while self.running.load(Ordering::Acquire) {
            let state = stream::load_state(&self.state);
            if state == StreamState::Ready {
                thread::sleep(IDLE_SLEEP);
                continue;
            }

            if self.do_complete.swap(false, Ordering::AcqRel) {
                self.complete();
                self.request_stop();
                continue;
            }

            if !state.is_running() {
                self.running.store(false, Ordering::Release);
                continue;
            }

            let bytes = self.read_from_source(&src, &mut buf);
            if bytes == 0 {
                thread::sleep(IDLE_SLEEP);
                continue;
            }

            let src_bytes = bytes;
            let written = self.write_to_dest(&dst, &buf[..bytes]);
            if written == 0 {
                continue;
            }
            if written != src_bytes {
                tracing::warn!(segment = %self.name(), written, src_bytes, "partial write");
            }

            if let Some(dst1) = &dst1 {
                self.write_to_dest(dst1, &buf[..src_bytes]);
            }
        }
    }

    fn run_source(&self) {
        let Ok(src) = stream::require_desc(self.input) else {
            self.error();
            return;
        };
        let Ok(dst) = stream::require_desc(self.output) else {
            self.error();
            return;
        };
        let buflen = self.default_buf_len.load(Ordering::Relaxed);

        self.running.store(true, Ordering::Release);
        while self.running.load(Ordering::Acquire) {
            let state = stream::load_state(&self.state);
            if state == StreamState::Ready {
                thread::sleep(IDLE_SLEEP);
                continue;
            }

            if self.do_complete.swap(false, Ordering::AcqRel) {
                self.complete();
                self.request_stop();
                continue;
            }

            if !state.is_running() {
                self.running.store(false, Ordering::Release);
                continue;
            }

            let Some(ring) = dst.as_ring_buf() else {
                tracing::error!(segment = %self.name(), "source segment output is not a ring buffer");
                self.error();
                self.request_stop();
                continue;
            };
            let Some(lease) = ring.acquire_write_block(buflen) else {
                thread::sleep(IDLE_SLEEP);
                continue;
            };
            let cap = lease.capacity();
            let mut scratch = vec![0u8; cap];
            let bytes = self.read_from_source(&src, &mut scratch);
            lease.fill(&scratch[..bytes]);
            lease.release(bytes);

            if bytes == 0 {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }

    fn read_from_source(&self, src: &crate::machine::MachineDesc, buf: &mut [u8]) -> usize {
        match src.read(buf, Blocking::NoBlock, 1) {
            Ok((n, Status::Complete)) => {
                tracing::info!(segment = %self.name(), "read complete");
                self.do_complete.store(true, Ordering::Release);
                n
            }
            Ok((n, Status::Error)) => {
                tracing::error!(segment = %self.name(), "read error");
                self.error();
                self.request_stop();
                let _ = n;
                0
            }
            Ok((n, _)) => n,
            Err(e) => {
                tracing::error!(segment = %self.name(), error = %e, "read failed");
                self.error();
                self.request_stop();
                0
            }
        }
    }

    fn write_to_dest(&self, dst: &crate::machine::MachineDesc, buf: &[u8]) -> usize {
        let mut remaining = buf.len();
        let mut written = 0usize;
        while remaining > 0 {
            let mut scratch = buf[written..].to_vec();
            match dst.write(&mut scratch, Blocking::Block, 1) {
                Ok((_, Status::Complete)) => {
                    tracing::info!(segment = %self.name(), "write complete");
                    self.do_complete.store(true, Ordering::Release);
                    break;
                }
                Ok((n, Status::Error)) => {
                    tracing::error!(segment = %self.name(), "write error");
                    self.error();
                    self.request_stop();
                    return 0;
                }
                Ok((n, _)) => {
                    if n == 0 {
                        break;
                    }
                    remaining -= n;
                    written += n;
                }
                Err(e) => {
                    tracing::error!(segment = %self.name(), error = %e, "write failed");
                    self.error();
                    self.request_stop();
                    return 0;
                }
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::next_handle;
    use std::sync::atomic::AtomicU8;

    #[test]
    fn segment_carries_its_handles() {
        let state: SharedState = Arc::new(AtomicU8::new(0));
        let seg = Segment::new_pump(next_handle(), next_handle(), None, state);
        assert_eq!(seg.handles().len(), 2);
    }

    #[test]
    fn tee_segment_carries_three_handles() {
        let state: SharedState = Arc::new(AtomicU8::new(0));
        let seg = Segment::new_pump(next_handle(), next_handle(), Some(next_handle()), state);
        assert_eq!(seg.handles().len(), 3);
    }
}
