//! Day identity and the per-day entry file location.

use chrono::{DateTime, Local, NaiveDate};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::ENTRIES_DIR;

/// Calendar date that selects which entry file a note lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn of(now: &DateTime<Local>) -> Self {
        Self(now.date_naive())
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Source of wall-clock time for anything that depends on "today".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// `<root>/entries/<day>.md`, without touching the filesystem.
pub fn day_file_path(root: &Path, day: DayKey) -> PathBuf {
    root.join(ENTRIES_DIR).join(format!("{}.md", day))
}

/// Maps a day to its entry file under a journal root and owns the
/// `entries/` directory.
#[derive(Debug, Clone)]
pub struct DayFileResolver {
    root: PathBuf,
}

impl DayFileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path for `day`, creating `entries/` if it is missing.
    pub fn resolve(&self, day: DayKey) -> io::Result<PathBuf> {
        fs::create_dir_all(self.root.join(ENTRIES_DIR))?;
        Ok(day_file_path(&self.root, day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_key_renders_iso_date() {
        let day = DayKey::new(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        assert_eq!(day.to_string(), "2024-03-07");
    }

    #[test]
    fn day_key_follows_local_date() {
        let late = Local.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        let early = Local.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_ne!(DayKey::of(&late), DayKey::of(&early));
        assert_eq!(DayKey::of(&early).to_string(), "2025-01-01");
    }

    #[test]
    fn resolve_creates_entries_dir() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let resolver = DayFileResolver::new(root.path());
        let day = DayKey::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

        let path = resolver.resolve(day)?;

        assert!(root.path().join(ENTRIES_DIR).is_dir());
        assert_eq!(path, root.path().join("entries/2024-05-01.md"));
        assert!(!path.exists(), "resolving must not create the file itself");
        Ok(())
    }
}
