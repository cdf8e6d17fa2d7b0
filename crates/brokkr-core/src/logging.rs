//! Tracing initialisation for hosts embedding the Brokkr crates

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the filter for a verbosity level.
///
/// `RUST_LOG` wins when set; otherwise quiet maps to `error` and each `-v`
/// step raises the level from `info` to `debug` to `trace`.
pub fn env_filter(verbose: u8, quiet: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if quiet {
        return EnvFilter::new("error");
    }

    match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, which is the
/// normal case for test binaries and hosts with their own logging.
pub fn init_tracing(verbose: u8, quiet: bool) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(env_filter(verbose, quiet))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_levels() {
        std::env::remove_var("RUST_LOG");
        assert_eq!(env_filter(0, true).to_string(), "error");
        assert_eq!(env_filter(0, false).to_string(), "info");
        assert_eq!(env_filter(1, false).to_string(), "debug");
        assert_eq!(env_filter(5, false).to_string(), "trace");
    }

    #[test]
    #[serial]
    fn test_rust_log_takes_precedence() {
        std::env::set_var("RUST_LOG", "warn");
        assert_eq!(env_filter(2, false).to_string(), "warn");
        std::env::remove_var("RUST_LOG");
    }

    #[test]
    #[serial]
    fn test_init_is_repeatable() {
        init_tracing(0, false);
        // second install is rejected, not a panic
        assert!(!init_tracing(0, false));
    }
}
