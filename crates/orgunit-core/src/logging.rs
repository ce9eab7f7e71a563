//! Tracing setup for binaries and tests embedding the engine.
//!
//! - `ORGUNIT_LOG` takes an `EnvFilter` directive string
//! - `DEBUG` (any value) raises the default filter to debug
//! - `ORGUNIT_LOG_FORMAT=json` switches to JSON lines, anything else is compact

use std::env;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "ORGUNIT_LOG";

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "ORGUNIT_LOG_FORMAT";

/// Output format of [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match env::var(LOG_FORMAT_ENV).as_deref() {
            Ok("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

fn default_directives(debug: bool) -> &'static str {
    if debug {
        "orgunit_core=debug,info"
    } else {
        "orgunit_core=info,warn"
    }
}

/// Install a global subscriber configured from the environment.
///
/// Returns `false` when a subscriber was already installed; the existing one
/// stays in place.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directives(env::var("DEBUG").is_ok())));

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_ansi(false))
            .try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        for debug in [false, true] {
            let directives = default_directives(debug);
            assert!(directives.parse::<EnvFilter>().is_ok(), "{directives}");
        }
    }

    #[test]
    fn second_init_is_harmless() {
        let _ = init_tracing();
        assert!(!init_tracing());
    }
}
