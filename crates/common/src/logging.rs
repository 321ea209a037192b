//! Log plumbing shared by the daemon and the CLI.
//!
//! Nothing here installs a global subscriber. Callers get a [`Dispatch`]
//! and hand it to whichever thread or task should log through it.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::LOG_FILE;

pub const DEFAULT_LOG_MAX_BYTES: u64 = 1_000_000;
pub const DEFAULT_LOG_BACKUPS: usize = 5;

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Filter directive such as `info` or `djsd=debug`; falls back to `RUST_LOG`.
    pub level: Option<String>,
    pub max_bytes: u64,
    pub backups: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: None,
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            backups: DEFAULT_LOG_BACKUPS,
        }
    }
}

/// Stderr plus `<log_dir>/app.log`, rotated by size.
pub fn daemon_dispatch(log_dir: &Path, settings: &LogSettings) -> io::Result<Dispatch> {
    fs::create_dir_all(log_dir)?;
    let file = RotatingFile::open(log_dir.join(LOG_FILE), settings.max_bytes, settings.backups)?;

    let subscriber = tracing_subscriber::registry()
        .with(env_filter(settings.level.as_deref()))
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_writer(file).with_ansi(false));

    Ok(Dispatch::new(subscriber))
}

/// Stderr only, for short-lived commands.
pub fn stderr_dispatch(level: Option<&str>) -> Dispatch {
    let subscriber = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(false).with_writer(io::stderr));
    Dispatch::new(subscriber)
}

fn env_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| {
            eprintln!("Warning: invalid log level '{}', using 'info'", directive);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Size-capped log file keeping `backups` older generations as
/// `app.log.1` (newest) through `app.log.N` (oldest).
#[derive(Clone)]
pub struct RotatingFile {
    state: Arc<Mutex<RotatingState>>,
}

struct RotatingState {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            state: Arc::new(Mutex::new(RotatingState {
                path,
                max_bytes,
                backups,
                file,
                written,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RotatingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RotatingState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for generation in (1..self.backups).rev() {
                let from = backup_path(&self.path, generation);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, generation + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
            self.file = open_append(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingState {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Holds the file lock for the duration of one formatted event.
pub struct RotatingFileGuard<'a> {
    state: MutexGuard<'a, RotatingState>,
}

impl Write for RotatingFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileGuard { state: self.lock() }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn backup_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", generation));
    PathBuf::from(name)
}
