// crates/timebuf-media/src/logging.rs
//
// MEDIA_LOG_LEVEL is the only environment knob this crate reads (spec §6).
// A library must never install a subscriber unconditionally — a host that
// has already set one up would have it silently replaced — so this is an
// opt-in helper a standalone host can call, not something invoked from
// anywhere else in this crate.

use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;

static INIT: OnceLock<()> = OnceLock::new();

fn level_from_env() -> LevelFilter {
    match std::env::var("MEDIA_LOG_LEVEL").ok().as_deref() {
        Some("0") => LevelFilter::ERROR,
        Some("1") => LevelFilter::INFO,
        Some("2") => LevelFilter::DEBUG,
        _ => LevelFilter::WARN,
    }
}

/// Install a default `tracing-subscriber` filtered by `MEDIA_LOG_LEVEL`
/// (`0`=error, `1`=info, `2`=debug; unset or anything else = warn).
///
/// Idempotent and safe to call from multiple threads; a no-op if a
/// subscriber is already installed (global or otherwise) by the host.
pub fn init_from_env() {
    INIT.get_or_init(|| {
        let filter = level_from_env();
        let _ = tracing_subscriber::fmt()
            .with_max_level(filter)
            .with_target(true)
            .try_init();
    });
}
