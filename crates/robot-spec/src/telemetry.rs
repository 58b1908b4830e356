//! Tracing setup for the `robot` binary and ad-hoc test harnesses.
//!
//! [`init_tracing`] installs a global subscriber once. The filter comes from
//! `ROBOT_LOG`, then `RUST_LOG`; without either, the robot crates log at the
//! requested level and everything else (tokio, dependencies) at `warn`.
//! Later calls are ignored because the global subscriber can only be set once
//! per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Env var checked before `RUST_LOG`.
pub const LOG_ENV: &str = "ROBOT_LOG";

const ROBOT_TARGETS: [&str; 3] = ["robot", "robot_spec", "robot_control"];

/// Filter used when neither `ROBOT_LOG` nor `RUST_LOG` is set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = String::from("warn");
    for target in ROBOT_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Initialise the global tracing subscriber.
///
/// `json` switches to newline-delimited JSON, which keeps the span fields
/// (`run_id`) on every record.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_robot_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,robot=debug,robot_spec=debug,robot_control=debug"
        );
        assert!(default_directives(Level::INFO)
            .parse::<EnvFilter>()
            .is_ok());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
    }
}
