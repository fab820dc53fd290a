//! Log output for hosts that have no subscriber of their own
//!
//! The library only emits `tracing` events: lock waits, retries and
//! completed operations at `debug`, timeouts and failed operations at
//! `warn`. `SAFE_FILE_LOG` takes `EnvFilter` directives, e.g. `debug` or
//! `safe_file::io::lock=debug,warn`.

use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives
pub const LOG_ENV: &str = "SAFE_FILE_LOG";

/// Used when `SAFE_FILE_LOG` is unset or does not parse
pub const DEFAULT_DIRECTIVE: &str = "safe_file=warn";

/// Filter built from `SAFE_FILE_LOG`, falling back to [`DEFAULT_DIRECTIVE`]
pub fn filter_from_env() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn builder() -> SubscriberBuilder<DefaultFields, Format, EnvFilter> {
    tracing_subscriber::fmt().with_env_filter(filter_from_env())
}

/// Install a global stderr subscriber.
///
/// Returns false, and changes nothing, when a global subscriber is already
/// set.
pub fn init() -> bool {
    builder().with_writer(std::io::stderr).try_init().is_ok()
}

/// Like [`init`], but writes through the test harness's output capture so
/// logs only show for failing tests.
pub fn init_for_tests() -> bool {
    builder().with_test_writer().try_init().is_ok()
}
