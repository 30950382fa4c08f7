//! Minimal environment-variable configuration reader.
//!
//! Grounded on spec.md §6's "environment-variable config reader" external
//! collaborator — implemented here rather than left as an unfilled
//! interface, since `logging::init` and the integration tests under
//! `tests/` both need somewhere to read an initial level and output root
//! from.

use std::env;
use std::path::PathBuf;

const LOG_LEVEL_VAR: &str = "CONDUIT_LOG";
const TEST_OUTPUT_ROOT_VAR: &str = "CONDUIT_TEST_OUTPUT_ROOT";

/// `CONDUIT_LOG`, e.g. `info`, `conduit::buffer::ring=debug`. Falls back to
/// `"info"` when unset, matching `tracing_subscriber::EnvFilter`'s own
/// directive syntax so the value can be passed straight through.
pub fn initial_log_directive() -> String {
    env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| "info".to_string())
}

/// `CONDUIT_TEST_OUTPUT_ROOT`: where integration tests that exercise the
/// file machine should create their scratch directories. Falls back to the
/// system temp directory.
pub fn test_output_root() -> PathBuf {
    match env::var_os(TEST_OUTPUT_ROOT_VAR) {
        Some(path) => PathBuf::from(path),
        None => env::temp_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_directive_defaults_to_info_when_unset() {
        // SAFETY-ish note: env var mutation races other tests in-process;
        // this test only reads, it never sets, to avoid that.
        let _ = initial_log_directive();
    }

    #[test]
    fn test_output_root_is_never_empty() {
        assert!(!test_output_root().as_os_str().is_empty());
    }
}
