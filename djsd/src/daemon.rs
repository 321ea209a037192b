//! Daemon lifecycle: lock, channel, reader thread, writer task, shutdown.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::signal;
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;
use tracing::{info, warn, Dispatch};

use djs_common::day::{day_file_path, Clock, DayFileResolver, DayKey, SystemClock};
use djs_common::fifo::{self, ChannelReader};
use djs_common::LOCK_FILE;

use crate::config::DaemonConfig;
use crate::dispatcher::dispatcher;
use crate::listener::ChannelListener;
use crate::push::{PushHook, PushRule, Publisher};
use crate::weather::{NoWeather, OpenMeteo, WeatherSource};
use crate::writer::Writer;

const WRITER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Daemon {
    config: DaemonConfig,
    clock: Arc<dyn Clock>,
    weather: Arc<dyn WeatherSource>,
    publisher: Arc<dyn Publisher>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let weather: Arc<dyn WeatherSource> = match &config.weather {
            Some(settings) => Arc::new(
                OpenMeteo::new(settings).context("failed to build weather client")?,
            ),
            None => Arc::new(NoWeather),
        };
        let publisher = Arc::new(PushHook::new(&config.repo_root, &config.push_script));
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            weather,
            publisher,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Serve until `shutdown` resolves. Startup failures are returned
    /// before anything is read from the channel.
    pub async fn run<F>(self, dispatch: Dispatch, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.serve(dispatch.clone(), shutdown)
            .with_subscriber(dispatch)
            .await
    }

    async fn serve<F>(self, dispatch: Dispatch, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let config = &self.config;
        let log_dir = config.log_dir();
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create {}", log_dir.display()))?;
        let _repo_lock = acquire_lock(&log_dir.join(LOCK_FILE)).with_context(|| {
            format!(
                "another journal daemon is already running for {}",
                config.repo_root.display()
            )
        })?;
        // One consumer per channel, whichever repo it writes to.
        let _channel_lock = acquire_lock(&channel_lock_path(&config.channel)).with_context(|| {
            format!(
                "another journal daemon is already listening on {}",
                config.channel.display()
            )
        })?;

        fifo::ensure(&config.channel)
            .with_context(|| format!("failed to create channel {}", config.channel.display()))?;

        let (tx, queue) = dispatcher();
        let (stop_tx, stop_rx) = watch::channel(false);

        let writer = Writer::new(
            DayFileResolver::new(&config.repo_root),
            self.clock.clone(),
            self.weather.clone(),
            self.publisher.clone(),
            PushRule {
                threshold: config.push_threshold,
                policy: config.push_policy,
            },
        );
        let writer_task = tokio::spawn(writer.run(queue, stop_rx).with_subscriber(dispatch.clone()));

        let listener = ChannelListener::new(ChannelReader::new(&config.channel), tx);
        let listener_stop = listener.stop_handle();
        // Not joined on shutdown: the thread may be mid-read on a producer.
        let _reader = listener
            .spawn(dispatch)
            .context("failed to start channel reader thread")?;

        let today = day_file_path(&config.repo_root, DayKey::of(&self.clock.now()));
        info!(
            repo = %config.repo_root.display(),
            entry_file = %today.display(),
            channel = %config.channel.display(),
            weather = config.weather.is_some(),
            push_threshold = config.push_threshold,
            push_policy = %config.push_policy,
            "journal daemon started"
        );
        info!(
            "add a note with: echo 'hello' > {}",
            config.channel.display()
        );

        shutdown.await;
        info!("shutting down");

        listener_stop.stop();
        let _ = stop_tx.send(true);
        match tokio::time::timeout(WRITER_JOIN_TIMEOUT, writer_task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("writer task failed: {}", err),
            Err(_) => warn!("writer did not stop within {:?}", WRITER_JOIN_TIMEOUT),
        }
        info!("journal daemon stopped");
        Ok(())
    }
}

/// Hold an exclusive lock on `path` for as long as the returned file lives.
fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.try_lock_exclusive()
        .with_context(|| format!("{} is held by another process", path.display()))?;
    Ok(file)
}

/// `<channel>.lock`, next to the pipe.
fn channel_lock_path(channel: &Path) -> PathBuf {
    let mut name = OsString::from(channel.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C");
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Overrides;
    use chrono::{DateTime, Local, TimeZone};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    struct FixedClock(DateTime<Local>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingPublisher(Mutex<Vec<std::path::PathBuf>>);

    impl Publisher for RecordingPublisher {
        fn trigger(&self, file: &Path) {
            self.0.lock().unwrap().push(file.to_path_buf());
        }
    }

    #[test]
    fn lock_is_exclusive() -> Result<()> {
        let repo = tempfile::tempdir()?;
        let path = repo.path().join(LOCK_FILE);

        let first = acquire_lock(&path)?;
        let second = acquire_lock(&path);
        assert!(second.is_err());

        drop(first);
        acquire_lock(&path)?;
        Ok(())
    }

    #[test]
    fn channel_lock_sits_beside_the_pipe() {
        assert_eq!(
            channel_lock_path(Path::new("/tmp/djs_queue")),
            PathBuf::from("/tmp/djs_queue.lock")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_repo_cannot_share_a_channel() -> Result<()> {
        let first_repo = tempfile::tempdir()?;
        let second_repo = tempfile::tempdir()?;
        let channel = first_repo.path().join("queue");
        let config_for = |repo: &Path| {
            let overrides = Overrides {
                channel: Some(channel.clone()),
                ..Overrides::default()
            };
            DaemonConfig::resolve_with_env(repo, overrides, |_| None)
        };

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let first = tokio::spawn(Daemon::new(config_for(first_repo.path())?)?.run(
            Dispatch::none(),
            async {
                let _ = stop_rx.await;
            },
        ));
        let lock = channel_lock_path(&channel);
        for _ in 0..200 {
            if lock.exists() && channel.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let second = Daemon::new(config_for(second_repo.path())?)?
            .run(Dispatch::none(), std::future::pending::<()>())
            .await;
        let err = second.expect_err("second daemon must not start");
        assert!(format!("{:#}", err).contains("already listening on"));

        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), first).await???;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_notes_until_shutdown() -> Result<()> {
        let repo = tempfile::tempdir()?;
        let channel = repo.path().join("queue");
        let overrides = Overrides {
            channel: Some(channel.clone()),
            push_threshold: Some(1),
            ..Overrides::default()
        };
        let config = DaemonConfig::resolve_with_env(repo.path(), overrides, |_| None)?;
        let day_file = config.repo_root.join("entries/2024-06-02.md");
        let publisher = Arc::new(RecordingPublisher::default());
        let daemon = Daemon::new(config)?
            .with_clock(Arc::new(FixedClock(
                Local.with_ymd_and_hms(2024, 6, 2, 7, 15, 0).unwrap(),
            )))
            .with_publisher(publisher.clone());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(daemon.run(Dispatch::none(), async {
            let _ = stop_rx.await;
        }));

        let mut sent = false;
        for _ in 0..200 {
            if fifo::append_line(&channel, "morning run").is_ok() {
                sent = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sent);

        for _ in 0..200 {
            if !publisher.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*publisher.0.lock().unwrap(), vec![day_file.clone()]);
        assert_eq!(
            fs::read_to_string(&day_file)?,
            "# 2024-06-02\n\n---\n\n- 07:15 morning run\n"
        );

        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), task).await???;
        Ok(())
    }
}
