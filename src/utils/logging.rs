use std::str::FromStr;

use tracing::Level;

/// Overrides the level handed to [`init`] when set.
pub const LOG_LEVEL_VAR: &str = "RELAY_LOG";

/// Level for a name such as `debug` or `WARN`. `warning` is accepted as
/// well; anything unrecognised falls back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    let name = name.trim();
    if name.eq_ignore_ascii_case("warning") {
        return Level::WARN;
    }
    Level::from_str(name).unwrap_or(Level::INFO)
}

/// Level `init` would pick: `RELAY_LOG` first, then `default_level`.
pub fn effective_level(default_level: &str) -> Level {
    match std::env::var(LOG_LEVEL_VAR) {
        Ok(name) if !name.trim().is_empty() => parse_level(&name),
        _ => parse_level(default_level),
    }
}

/// Installs the fmt subscriber for the relay processes. Later calls keep
/// the subscriber that is already installed.
pub fn init(default_level: &str) {
    let level = effective_level(default_level);
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Subscriber already installed, keeping it");
    }
}
