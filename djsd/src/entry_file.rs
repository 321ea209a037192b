//! Per-day markdown file: header once, then one line per note.

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Timelike};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use djs_common::day::DayKey;

/// One note as it is rendered into the day file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    timestamp: NaiveDateTime,
    text: String,
}

impl JournalEntry {
    /// `None` when `text` is blank after trimming.
    pub fn new(at: DateTime<Local>, text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let local = at.naive_local();
        let minute = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)?;
        Some(Self {
            timestamp: NaiveDateTime::new(local.date(), minute),
            text: text.to_string(),
        })
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// `- HH:MM <text>` plus newline.
    pub fn render(&self) -> String {
        format!("- {} {}\n", self.timestamp.format("%H:%M"), self.text)
    }
}

/// Heading, optional weather line, blank line and rule.
pub fn render_header(day: DayKey, weather_line: Option<&str>) -> String {
    let mut header = format!("# {}\n", day);
    if let Some(line) = weather_line {
        header.push_str(line);
        header.push('\n');
    }
    header.push_str("\n---\n\n");
    header
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFile {
    day: DayKey,
    path: PathBuf,
}

impl EntryFile {
    pub fn new(day: DayKey, path: impl Into<PathBuf>) -> Self {
        Self {
            day,
            path: path.into(),
        }
    }

    pub fn day(&self) -> DayKey {
        self.day
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Current size in bytes; a missing file counts as empty.
    pub fn size(&self) -> io::Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// A missing or zero-byte file has not been initialised yet.
    pub fn needs_header(&self) -> io::Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Write the day header, replacing whatever zero-byte file is there.
    pub fn write_header(&self, weather_line: Option<&str>) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(render_header(self.day, weather_line).as_bytes())?;
        file.sync_all()
    }

    /// Append one rendered entry and sync it; returns the new file size.
    pub fn append(&self, entry: &JournalEntry) -> io::Result<u64> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(entry.render().as_bytes())?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }
}
