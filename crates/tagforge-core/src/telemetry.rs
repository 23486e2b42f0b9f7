//! Log setup for the `tagforge` binary.
//!
//! Each `-v` on the command line raises tagforge's own log level one step;
//! dependencies stay at `warn` until the most verbose setting. `TAGFORGE_LOG`
//! overrides the computed filter with ordinary `EnvFilter` directives.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding explicit filter directives.
pub const LOG_ENV: &str = "TAGFORGE_LOG";

const CRATES: [&str; 2] = ["tagforge_core", "tagforge"];

/// Filter directives for a `-v` count.
pub fn directives_for(verbosity: u8) -> String {
    let (deps, ours) = match verbosity {
        0 => ("warn", "info"),
        1 => ("warn", "debug"),
        2 => ("info", "trace"),
        _ => return "trace".to_string(),
    };
    let mut directives = deps.to_string();
    for krate in CRATES {
        directives.push_str(&format!(",{krate}={ours}"));
    }
    directives
}

fn filter_for(verbosity: u8, from_env: Option<String>) -> EnvFilter {
    from_env
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(directives_for(verbosity)))
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// command output; `json` switches to one JSON object per line. Event targets
/// are shown from `-v` upwards. Only the first call in a process has effect.
pub fn init_tracing(json: bool, verbosity: u8) {
    let filter = filter_for(verbosity, std::env::var(LOG_ENV).ok());
    let layer = fmt::layer()
        .with_target(verbosity > 0)
        .with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_raises_only_our_crates_first() {
        assert_eq!(directives_for(0), "warn,tagforge_core=info,tagforge=info");
        assert_eq!(directives_for(1), "warn,tagforge_core=debug,tagforge=debug");
        assert_eq!(directives_for(2), "info,tagforge_core=trace,tagforge=trace");
        assert_eq!(directives_for(3), "trace");
        assert_eq!(directives_for(9), "trace");
    }

    #[test]
    fn test_every_verbosity_yields_a_valid_filter() {
        for verbosity in 0..=4 {
            assert!(EnvFilter::try_new(directives_for(verbosity)).is_ok());
        }
    }

    #[test]
    fn test_env_directives_override_verbosity() {
        let filter = filter_for(0, Some("tagforge_core=trace".to_string()));
        assert_eq!(filter.to_string(), "tagforge_core=trace");

        // Blank or malformed values fall back to the verbosity default.
        let filter = filter_for(1, Some("  ".to_string()));
        assert_eq!(filter.to_string(), EnvFilter::new(directives_for(1)).to_string());
        let filter = filter_for(0, Some("tagforge_core=loud".to_string()));
        assert_eq!(filter.to_string(), EnvFilter::new(directives_for(0)).to_string());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, 0);
        init_tracing(true, 2);
    }
}
