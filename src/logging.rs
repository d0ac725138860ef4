//! Tracing subscriber setup for embedding binaries

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when `RUST_LOG` is unset
pub fn default_level(verbose: bool, quiet: bool) -> &'static str {
    if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    }
}

/// Install the global fmt subscriber
///
/// `RUST_LOG` wins over the flags. Returns `false` when a global subscriber
/// was already installed.
pub fn init(verbose: bool, quiet: bool) -> bool {
    let level = default_level(verbose, quiet);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(true, false), "debug");
        assert_eq!(default_level(false, true), "error");
        assert_eq!(default_level(false, false), "info");
        assert_eq!(default_level(true, true), "debug");
    }
}
