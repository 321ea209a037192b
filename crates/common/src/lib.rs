// # -----------------------------
// # crates/common/src/lib.rs
// # -----------------------------
pub mod day;
pub mod fifo;
pub mod logging;

use std::path::PathBuf;

/// Where producers and the daemon meet unless told otherwise.
pub const DEFAULT_CHANNEL: &str = "/tmp/djs_queue";

/// Environment override for the channel path, honoured by both sides.
pub const CHANNEL_ENV: &str = "DJS_CHANNEL";

pub const ENTRIES_DIR: &str = "entries";
pub const LOGS_DIR: &str = "logs";
pub const LOG_FILE: &str = "app.log";
pub const LOCK_FILE: &str = "djsd.lock";
pub const CONFIG_FILE: &str = "djs.toml";
pub const PUSH_SCRIPT: &str = "push.sh";

/// Resolve the channel path: explicit value, then `DJS_CHANNEL`, then the default.
pub fn resolve_channel(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            std::env::var(CHANNEL_ENV)
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHANNEL))
}
