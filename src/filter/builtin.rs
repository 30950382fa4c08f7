//! Concrete filters exercised by the test suite: byte counting, a
//! byte-count limiter, a wall-clock time limiter, and a numeric sample
//! format converter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Direction, Filter, FilterCtx, Next};
use crate::status::Status;

/// Counts bytes that pass through in either direction. Grounded on
/// `original_source/src/filter/filters.c`'s `byte_counter`.
pub struct ByteCounter {
    name: String,
    direction: Direction,
    total: Arc<AtomicU64>,
}

impl ByteCounter {
    pub fn new(name: impl Into<String>, direction: Direction) -> (Self, Arc<AtomicU64>) {
        let total = Arc::new(AtomicU64::new(0));
        (
            ByteCounter {
                name: name.into(),
                direction,
                total: total.clone(),
            },
            total,
        )
    }
}

impl Filter for ByteCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn call(&mut self, ctx: &mut FilterCtx<'_>, next: &mut Next<'_>) -> Status {
        let status = next.call(ctx);
        if status.is_success() {
            self.total.fetch_add(ctx.len as u64, Ordering::Relaxed);
        }
        status
    }
}

/// Caps the total number of bytes that may pass through before reporting
/// `Complete`, used by scenario S4 (a 1 MiB cap in front of a ring buffer).
pub struct ByteCountLimiter {
    name: String,
    direction: Direction,
    remaining: u64,
}

impl ByteCountLimiter {
    pub fn new(name: impl Into<String>, direction: Direction, byte_limit: u64) -> Self {
        ByteCountLimiter {
            name: name.into(),
            direction,
            remaining: byte_limit,
        }
    }
}

impl Filter for ByteCountLimiter {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn call(&mut self, ctx: &mut FilterCtx<'_>, next: &mut Next<'_>) -> Status {
        if self.remaining == 0 {
            ctx.len = 0;
            return Status::Complete;
        }

        if (ctx.len as u64) > self.remaining {
            ctx.len = self.remaining as usize;
        }

        let status = next.call(ctx);
        if status.is_success() {
            self.remaining = self.remaining.saturating_sub(ctx.len as u64);
        }
        status
    }
}

/// Turns elapsed wall-clock time into a `Complete` result once a deadline
/// passes, standing in for the "no wall-clock timeout on reads" gap the
/// spec calls out: callers that want one layer this filter in.
pub struct TimeLimiter {
    name: String,
    direction: Direction,
    deadline: Instant,
}

impl TimeLimiter {
    pub fn new(name: impl Into<String>, direction: Direction, limit: Duration) -> Self {
        TimeLimiter {
            name: name.into(),
            direction,
            deadline: Instant::now() + limit,
        }
    }
}

impl Filter for TimeLimiter {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn call(&mut self, ctx: &mut FilterCtx<'_>, next: &mut Next<'_>) -> Status {
        if Instant::now() >= self.deadline {
            ctx.len = 0;
            return Status::Complete;
        }
        next.call(ctx)
    }
}

/// Sample formats understood by [`Conversion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit float, one value per sample component.
    Fc32,
    /// 16-bit signed integer, one value per sample component.
    Sc16,
    /// 8-bit signed integer, one value per sample component.
    Sc8,
}

impl SampleFormat {
    fn bytes_per_value(self) -> usize {
        match self {
            SampleFormat::Fc32 => 4,
            SampleFormat::Sc16 => 2,
            SampleFormat::Sc8 => 1,
        }
    }
}

/// Converts a run of numeric samples from one on-the-wire width to another,
/// e.g. the float32 <-> int16 scaling a radio front end needs. Keeps a
/// scratch buffer sized to `max(in, out)`, reallocated in geometric steps,
/// rather than allocating per call on the hot path.
pub struct Conversion {
    name: String,
    direction: Direction,
    from: SampleFormat,
    to: SampleFormat,
    scratch: Vec<u8>,
}

impl Conversion {
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        from: SampleFormat,
        to: SampleFormat,
    ) -> Self {
        Conversion {
            name: name.into(),
            direction,
            from,
            to,
            scratch: Vec::new(),
        }
    }

    fn ensure_scratch(&mut self, needed: usize) {
        if self.scratch.len() < needed {
            let mut new_len = self.scratch.len().max(64);
            while new_len < needed {
                new_len *= 2;
            }
            self.scratch.resize(new_len, 0);
        }
    }

    fn convert_value(&self, raw: &[u8]) -> f32 {
        match self.from {
            SampleFormat::Fc32 => f32::from_le_bytes(raw.try_into().unwrap()),
            SampleFormat::Sc16 => i16::from_le_bytes(raw.try_into().unwrap()) as f32 / i16::MAX as f32,
            SampleFormat::Sc8 => raw[0] as i8 as f32 / i8::MAX as f32,
        }
    }

    fn write_value(to: SampleFormat, value: f32, out: &mut [u8]) {
        match to {
            SampleFormat::Fc32 => out.copy_from_slice(&value.to_le_bytes()),
            SampleFormat::Sc16 => {
                let scaled = (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.copy_from_slice(&scaled.to_le_bytes());
            }
            SampleFormat::Sc8 => {
                out[0] = (value.clamp(-1.0, 1.0) * i8::MAX as f32) as i8 as u8;
            }
        }
    }
}

impl Filter for Conversion {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn call(&mut self, ctx: &mut FilterCtx<'_>, next: &mut Next<'_>) -> Status {
        if self.from == self.to {
            return next.call(ctx);
        }

        let in_width = self.from.bytes_per_value();
        let out_width = self.to.bytes_per_value();
        let n_values = ctx.len / in_width;
        let out_len = n_values * out_width;

        self.ensure_scratch(out_len.max(ctx.len));
        for i in 0..n_values {
            let raw = &ctx.active()[i * in_width..(i + 1) * in_width];
            let value = self.convert_value(raw);
            Self::write_value(self.to, value, &mut self.scratch[i * out_width..(i + 1) * out_width]);
        }

        if out_len > ctx.buf.len() {
            // Caller's buffer cannot hold the converted payload; this is a
            // caller sizing bug, not a data-dependent failure.
            return Status::Error;
        }
        ctx.buf[..out_len].copy_from_slice(&self.scratch[..out_len]);
        ctx.len = out_len;
        ctx.alignment = out_width;

        next.call(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Blocking;

    #[test]
    fn byte_counter_accumulates_on_success() {
        let (mut filter, total) = ByteCounter::new("count", Direction::Read);
        let mut buf = [1u8; 8];
        let mut ctx = FilterCtx::new(&mut buf, 8, Blocking::NoBlock, 1);
        let mut terminal = |_: &mut FilterCtx<'_>| Status::Success;
        let mut next = Next {
            remaining: &mut [],
            terminal: &mut terminal,
        };
        let status = filter.call(&mut ctx, &mut next);
        assert_eq!(status, Status::Success);
        assert_eq!(total.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn byte_count_limiter_completes_at_zero() {
        let mut filter = ByteCountLimiter::new("lim", Direction::Write, 4);
        let mut buf = [0u8; 10];
        let mut ctx = FilterCtx::new(&mut buf, 10, Blocking::NoBlock, 1);
        let mut terminal = |ctx: &mut FilterCtx<'_>| {
            ctx.len = ctx.active().len();
            Status::Success
        };
        let mut next = Next {
            remaining: &mut [],
            terminal: &mut terminal,
        };
        let status = filter.call(&mut ctx, &mut next);
        assert_eq!(status, Status::Success);
        assert_eq!(ctx.len, 4);

        let mut ctx2 = FilterCtx::new(&mut buf, 10, Blocking::NoBlock, 1);
        let mut next2 = Next {
            remaining: &mut [],
            terminal: &mut terminal,
        };
        let status2 = filter.call(&mut ctx2, &mut next2);
        assert_eq!(status2, Status::Complete);
    }

    #[test]
    fn conversion_fc32_to_sc16_halves_width() {
        let mut filter = Conversion::new(
            "conv",
            Direction::Read,
            SampleFormat::Fc32,
            SampleFormat::Sc16,
        );
        let mut buf = vec![0u8; 16];
        buf[0..4].copy_from_slice(&1.0f32.to_le_bytes());
        buf[4..8].copy_from_slice(&(-1.0f32).to_le_bytes());
        let mut ctx = FilterCtx::new(&mut buf, 8, Blocking::NoBlock, 4);
        let mut terminal = |_: &mut FilterCtx<'_>| Status::Success;
        let mut next = Next {
            remaining: &mut [],
            terminal: &mut terminal,
        };
        let status = filter.call(&mut ctx, &mut next);
        assert_eq!(status, Status::Success);
        assert_eq!(ctx.len, 4);
        assert_eq!(i16::from_le_bytes([ctx.buf[0], ctx.buf[1]]), i16::MAX);
    }
}
