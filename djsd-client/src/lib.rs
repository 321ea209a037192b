//! Journal client
//!
//! One-shot producer for the journal daemon: writes a single note into the
//! daemon's named pipe and returns. Never waits for a daemon to appear.

use std::path::{Path, PathBuf};

use djs_common::fifo::{self, ChannelError};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no journal daemon is listening: {0}")]
    DaemonUnavailable(#[source] ChannelError),
    #[error(transparent)]
    Channel(ChannelError),
}

impl ClientError {
    /// Process exit status for the `djs` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            ClientError::DaemonUnavailable(_) => 2,
            ClientError::Channel(_) => 1,
        }
    }
}

impl From<ChannelError> for ClientError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Missing(_) | ChannelError::NoReader(_) => {
                ClientError::DaemonUnavailable(err)
            }
            other => ClientError::Channel(other),
        }
    }
}

pub struct JournalClient {
    channel: PathBuf,
}

impl JournalClient {
    pub fn new(channel: impl Into<PathBuf>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &Path {
        &self.channel
    }

    /// Send one note. Line breaks inside `message` are folded to spaces; an
    /// empty message is still sent and dropped by the daemon.
    pub fn add(&self, message: &str) -> Result<(), ClientError> {
        fifo::append_line(&self.channel, message)?;
        debug!(channel = %self.channel.display(), bytes = message.len(), "note sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djs_common::fifo::ChannelReader;
    use std::fs;
    use std::thread;

    #[test]
    fn missing_channel_means_no_daemon() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let client = JournalClient::new(dir.path().join("queue"));

        let err = client.add("hello").unwrap_err();

        assert!(matches!(err, ClientError::DaemonUnavailable(_)));
        assert_eq!(err.exit_code(), 2);
        Ok(())
    }

    #[test]
    fn fifo_without_reader_means_no_daemon() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("queue");
        fifo::ensure(&path)?;

        let err = JournalClient::new(&path).add("hello").unwrap_err();

        assert_eq!(err.exit_code(), 2);
        Ok(())
    }

    #[test]
    fn regular_file_is_a_channel_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("queue");
        fs::write(&path, "")?;

        let err = JournalClient::new(&path).add("hello").unwrap_err();

        assert!(matches!(err, ClientError::Channel(ChannelError::NotAFifo(_))));
        assert_eq!(err.exit_code(), 1);
        Ok(())
    }

    #[test]
    fn multi_line_note_arrives_as_one_line() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("queue");
        fifo::ensure(&path)?;

        let reader = ChannelReader::new(&path);
        let handle = thread::spawn(move || -> anyhow::Result<Vec<Vec<u8>>> {
            let mut session = reader.open()?;
            let mut lines = Vec::new();
            while let Some(line) = session.next_line()? {
                lines.push(line);
            }
            Ok(lines)
        });

        let client = JournalClient::new(&path);
        let mut sent = false;
        for _ in 0..200 {
            match client.add("first line\nsecond line") {
                Ok(()) => {
                    sent = true;
                    break;
                }
                Err(ClientError::DaemonUnavailable(_)) => {
                    thread::sleep(std::time::Duration::from_millis(10))
                }
                Err(err) => return Err(err.into()),
            }
        }
        assert!(sent);

        let lines = handle.join().expect("reader thread")?;
        assert_eq!(lines, vec![b"first line second line".to_vec()]);
        Ok(())
    }
}
