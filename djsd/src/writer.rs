//! The single consumer of the dispatcher.
//!
//! Owns the current day file, rolls over at local midnight, appends notes
//! and hands the file to the publisher once it grows past the threshold.
//! A failure on one message is logged and the next message is processed;
//! nothing is retried.

use anyhow::{Context, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use djs_common::day::{Clock, DayFileResolver, DayKey};

use crate::dispatcher::DispatchQueue;
use crate::entry_file::{EntryFile, JournalEntry};
use crate::push::{PushRule, Publisher};
use crate::weather::WeatherSource;

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriterState {
    Uninitialized,
    /// `pushed` is set once the file has been handed to the publisher.
    Ready { file: EntryFile, pushed: bool },
}

/// What happened to one dequeued line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped,
    Appended {
        path: PathBuf,
        size: u64,
        pushed: bool,
    },
}

pub struct Writer {
    resolver: DayFileResolver,
    clock: Arc<dyn Clock>,
    weather: Arc<dyn WeatherSource>,
    publisher: Arc<dyn Publisher>,
    push: PushRule,
    state: WriterState,
}

impl Writer {
    pub fn new(
        resolver: DayFileResolver,
        clock: Arc<dyn Clock>,
        weather: Arc<dyn WeatherSource>,
        publisher: Arc<dyn Publisher>,
        push: PushRule,
    ) -> Self {
        Self {
            resolver,
            clock,
            weather,
            publisher,
            push,
            state: WriterState::Uninitialized,
        }
    }

    /// The file currently written to, once initialised.
    pub fn current(&self) -> Option<&EntryFile> {
        match &self.state {
            WriterState::Ready { file, .. } => Some(file),
            WriterState::Uninitialized => None,
        }
    }

    /// Select today's file and make sure it has its header.
    pub async fn start(&mut self) -> Result<()> {
        let day = DayKey::of(&self.clock.now());
        let file = self.select(day).await?;
        info!(path = %file.path().display(), "writer started");
        Ok(())
    }

    /// Write the day header unless the file already has content.
    pub async fn ensure_header(&self, file: &EntryFile) -> Result<bool> {
        let probe = file.clone();
        let needs_header = blocking(move || probe.needs_header())
            .await
            .with_context(|| format!("failed to inspect {}", file.path().display()))?;
        if !needs_header {
            return Ok(false);
        }
        let report = self.weather.current().await;
        let weather_line = report.as_ref().and_then(|r| r.header_line());
        let has_weather = weather_line.is_some();
        let target = file.clone();
        blocking(move || target.write_header(weather_line.as_deref()))
            .await
            .with_context(|| format!("failed to write header to {}", file.path().display()))?;
        debug!(path = %file.path().display(), weather = has_weather, "header written");
        Ok(true)
    }

    /// Handle one line taken off the dispatcher.
    pub async fn process_line(&mut self, raw: &str) -> Result<Outcome> {
        let text = raw.trim();
        if text.is_empty() {
            return Ok(Outcome::Skipped);
        }

        let now = self.clock.now();
        let day = DayKey::of(&now);
        let current = match &self.state {
            WriterState::Ready { file, pushed } => Some((file.clone(), *pushed)),
            WriterState::Uninitialized => None,
        };
        let (file, already_pushed) = match current {
            Some((file, pushed)) if file.day() == day => (file, pushed),
            Some((previous, _)) => {
                let file = self.select(day).await?;
                info!(
                    from = %previous.path().display(),
                    to = %file.path().display(),
                    "new day, switching files"
                );
                (file, false)
            }
            None => (self.select(day).await?, false),
        };

        let already_pushed = if file.exists() {
            already_pushed
        } else {
            info!(path = %file.path().display(), "day file vanished, recreating");
            self.ensure_header(&file).await?;
            self.mark_pushed(false);
            false
        };

        let entry = JournalEntry::new(now, text).context("empty entry")?;
        let target = file.clone();
        let logged = entry.text().to_string();
        let size = blocking(move || target.append(&entry))
            .await
            .with_context(|| format!("failed to append to {}", file.path().display()))?;
        info!(entry = %logged, size, "appended entry");

        let pushed = self.push.fires(already_pushed, size);
        if pushed {
            self.mark_pushed(true);
            info!(
                file = %file.path().display(),
                size,
                threshold = self.push.threshold,
                "day file reached push threshold"
            );
            self.publisher.trigger(file.path());
        }

        Ok(Outcome::Appended {
            path: file.path().to_path_buf(),
            size,
            pushed,
        })
    }

    /// Consume the queue until it closes or `shutdown` flips.
    pub async fn run(mut self, mut queue: DispatchQueue, mut shutdown: watch::Receiver<bool>) {
        if let Err(err) = self.start().await {
            error!("writer start failed: {:#}", err);
        }

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("writer stopping");
                    break;
                }
                message = queue.dequeue() => message,
            };
            let Some(message) = message else {
                info!("dispatcher closed, writer exiting");
                break;
            };
            if let Err(err) = self.process_line(message.as_str()).await {
                error!("writer error: {:#}", err);
            }
        }
    }

    async fn select(&mut self, day: DayKey) -> Result<EntryFile> {
        let path = self
            .resolver
            .resolve(day)
            .with_context(|| format!("failed to prepare entries dir for {}", day))?;
        let file = EntryFile::new(day, path);
        self.state = WriterState::Ready {
            file: file.clone(),
            pushed: false,
        };
        self.ensure_header(&file).await?;
        Ok(file)
    }

    fn mark_pushed(&mut self, value: bool) {
        if let WriterState::Ready { pushed, .. } = &mut self.state {
            *pushed = value;
        }
    }
}

/// Run file I/O (including `sync_all`) off the async workers.
async fn blocking<T, F>(op: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
}
