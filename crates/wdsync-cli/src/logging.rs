//! Tracing subscriber setup for the `wdsync` binary.
//!
//! - `--debug` → debug, `--verbose` → info, otherwise warn
//! - `RUST_LOG` directives take precedence when set
//! - JSON lines on stderr when `WDSYNC_LOG_FORMAT=json`

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn level_for(verbose: bool, debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let is_json = std::env::var("WDSYNC_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_wins_over_verbose() {
        assert_eq!(level_for(false, false), LevelFilter::WARN);
        assert_eq!(level_for(true, false), LevelFilter::INFO);
        assert_eq!(level_for(true, true), LevelFilter::DEBUG);
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(LevelFilter::WARN);
        init(LevelFilter::DEBUG);
    }
}
