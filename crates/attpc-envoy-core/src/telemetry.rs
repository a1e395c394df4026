//! Tracing initialisation for the envoy binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored since
//! the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose logs drown out the envoys at debug level
const NOISY_DEPENDENCIES: [&str; 3] = ["hyper", "hyper_util", "reqwest"];

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `level` applies to everything except
/// the HTTP client stack, which stays at warn. With `json` every line is a
/// JSON object.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let (plain, structured) = if json {
        (None, Some(fmt::layer().with_target(false).json()))
    } else {
        (Some(fmt::layer().with_target(false)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init()
        .ok();
}

fn default_directives(level: Level) -> String {
    let mut directives = String::from(level.as_str());
    for name in NOISY_DEPENDENCIES {
        directives.push_str(&format!(",{name}=warn"));
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_http_stack() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "DEBUG,hyper=warn,hyper_util=warn,reqwest=warn"
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }
}
