//! Daily journal daemon
//!
//! Reads notes from a named pipe, queues them in-process and appends them
//! to `entries/YYYY-MM-DD.md` under the journal repo, handing a day file to
//! an external push script once it grows past a size threshold.

pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod entry_file;
pub mod listener;
pub mod push;
pub mod weather;
pub mod writer;

pub use config::{ConfigError, DaemonConfig, Overrides, PushPolicy, WeatherSettings};
pub use daemon::{shutdown_signal, Daemon};
