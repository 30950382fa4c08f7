//! Per-subsystem log-level control, built on `tracing_subscriber`'s
//! `EnvFilter` reload handle.
//!
//! Grounded on spec.md §6: "the logging package exposes a per-subsystem
//! log-level setter; the core only calls setters." `conduit` itself never
//! decides *what* gets logged beyond emitting `tracing` events/spans; a host
//! process installs a subscriber (commonly via [`init`]) and can later call
//! [`set_level`] to change a specific target's verbosity without restarting.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::{fmt, EnvFilter};

type ReloadHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

struct Directives {
    handle: ReloadHandle,
    default: String,
    per_target: Mutex<HashMap<String, String>>,
}

static DIRECTIVES: OnceLock<Directives> = OnceLock::new();

fn rebuild(directives: &Directives) {
    let per_target = directives.per_target.lock();
    let mut parts: Vec<String> = per_target.iter().map(|(t, l)| format!("{t}={l}")).collect();
    parts.push(directives.default.clone());
    let combined = parts.join(",");
    let _ = directives.handle.modify(|filter| {
        if let Ok(new_filter) = EnvFilter::try_new(&combined) {
            *filter = new_filter;
        }
    });
}

/// Installs a global `tracing` subscriber seeded from
/// [`crate::config::initial_log_directive`]. Safe to call more than once;
/// only the first call takes effect (`tracing`'s own global dispatcher is
/// itself set-once).
pub fn init() {
    let default = crate::config::initial_log_directive();
    let filter = EnvFilter::try_new(&default).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = tracing_subscriber::reload::Layer::new(filter);

    let _ = DIRECTIVES.set(Directives {
        handle,
        default,
        per_target: Mutex::new(HashMap::new()),
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt::layer());
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Sets a per-subsystem directive, e.g. `set_level("conduit::buffer::ring",
/// LevelFilter::DEBUG)`. No-op if [`init`] was never called.
pub fn set_level(target: impl Into<String>, level: LevelFilter) {
    let Some(directives) = DIRECTIVES.get() else {
        return;
    };
    directives.per_target.lock().insert(target.into(), level.to_string());
    rebuild(directives);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }

    #[test]
    fn set_level_before_init_is_a_harmless_no_op() {
        set_level("conduit::nonexistent", LevelFilter::TRACE);
    }

    #[test]
    fn set_level_after_init_does_not_panic() {
        init();
        set_level("conduit::buffer::ring", LevelFilter::DEBUG);
    }
}
