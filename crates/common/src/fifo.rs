//! Named-pipe channel between `djs add` and the daemon.
//!
//! The daemon side opens the pipe for reading, drains lines until every
//! writer has gone, then opens it again. Producers open, write one line and
//! close. Writes up to `PIPE_BUF` bytes are atomic, so concurrent producers
//! never tear each other's short notes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} does not exist")]
    Missing(PathBuf),
    #[error("{0} exists but is not a named pipe")]
    NotAFifo(PathBuf),
    #[error("nobody is listening on {0}")]
    NoReader(PathBuf),
    #[error("channel {0} was removed or replaced while waiting for a producer")]
    Replaced(PathBuf),
    #[error("channel {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    fn io(path: &Path, source: impl Into<io::Error>) -> Self {
        ChannelError::Io {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}

/// Make sure a FIFO sits at `path`, replacing any stale regular file.
pub fn ensure(path: &Path) -> Result<(), ChannelError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(meta) if meta.is_dir() => return Err(ChannelError::NotAFifo(path.to_path_buf())),
        Ok(_) => {
            debug!(path = %path.display(), "replacing non-fifo at channel path");
            fs::remove_file(path).map_err(|err| ChannelError::io(path, err))?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(ChannelError::io(path, err)),
    }

    mkfifo(path, Mode::from_bits_truncate(0o666)).map_err(|errno| ChannelError::io(path, errno))
}

/// Read side of the channel.
#[derive(Debug, Clone)]
pub struct ChannelReader {
    path: PathBuf,
}

impl ChannelReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until a producer opens the pipe for writing.
    pub fn open(&self) -> Result<ChannelSession, ChannelError> {
        let file = File::open(&self.path).map_err(|err| ChannelError::io(&self.path, err))?;
        Ok(self.session(file))
    }

    /// Like [`open`](Self::open), but wakes every `tick` to ask
    /// `keep_waiting` whether to carry on. `Ok(None)` once it says no.
    ///
    /// Fails with [`ChannelError::Replaced`] when the path stops pointing
    /// at the pipe being waited on, since no producer could reach it.
    pub fn open_until(
        &self,
        tick: Duration,
        mut keep_waiting: impl FnMut() -> bool,
    ) -> Result<Option<ChannelSession>, ChannelError> {
        // A non-blocking read open never waits for a writer.
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|err| ChannelError::io(&self.path, err))?;
        let inode = file
            .metadata()
            .map_err(|err| ChannelError::io(&self.path, err))?
            .ino();

        loop {
            if wait_readable(&file, tick).map_err(|err| ChannelError::io(&self.path, err))? {
                set_blocking(&file, &self.path)?;
                return Ok(Some(self.session(file)));
            }
            if !keep_waiting() {
                return Ok(None);
            }
            match fs::symlink_metadata(&self.path) {
                Ok(meta) if meta.file_type().is_fifo() && meta.ino() == inode => {}
                _ => return Err(ChannelError::Replaced(self.path.clone())),
            }
        }
    }

    fn session(&self, file: File) -> ChannelSession {
        ChannelSession {
            path: self.path.clone(),
            reader: BufReader::new(file),
        }
    }
}

/// One open/drain cycle of the read side.
pub struct ChannelSession {
    path: PathBuf,
    reader: BufReader<File>,
}

impl ChannelSession {
    /// Next raw line without its terminator; `None` once every writer has
    /// closed its end.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut buf = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|err| ChannelError::io(&self.path, err))?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(Some(buf))
    }
}

/// Write one note into the channel as a single newline-terminated line.
///
/// Fails instead of blocking when no daemon holds the read side open.
pub fn append_line(path: &Path, line: &str) -> Result<(), ChannelError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => {}
        Ok(_) => return Err(ChannelError::NotAFifo(path.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ChannelError::Missing(path.to_path_buf()))
        }
        Err(err) => return Err(ChannelError::io(path, err)),
    }

    let mut pipe = open_nonblocking_writer(path)?;
    // The open only needed to be non-blocking; the write itself may wait for room.
    set_blocking(&pipe, path)?;

    let mut payload = single_line(line);
    payload.push('\n');
    pipe.write_all(payload.as_bytes())
        .and_then(|()| pipe.flush())
        .map_err(|err| ChannelError::io(path, err))
}

/// Open and immediately close the write side so a reader parked in
/// `open()` or `read()` wakes up. A missing reader is not an error here.
pub fn nudge(path: &Path) -> Result<(), ChannelError> {
    match open_nonblocking_writer(path) {
        Ok(_pipe) => Ok(()),
        Err(ChannelError::NoReader(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

fn open_nonblocking_writer(path: &Path) -> Result<File, ChannelError> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|err| match err.raw_os_error() {
            Some(libc::ENXIO) => ChannelError::NoReader(path.to_path_buf()),
            _ => ChannelError::io(path, err),
        })
}

fn set_blocking(file: &File, path: &Path) -> Result<(), ChannelError> {
    let fd = file.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|errno| ChannelError::io(path, errno))?;
    let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|errno| ChannelError::io(path, errno))?;
    Ok(())
}

/// Poll the read side for up to `timeout`. A pipe that has never had a
/// writer reports nothing; data or a writer hanging up reports ready.
fn wait_readable(file: &File, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: `pfd` is a single valid pollfd and the fd outlives the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && pfd.revents != 0)
}

/// Fold line breaks so one note is always one channel line.
fn single_line(text: &str) -> String {
    text.trim().replace(|c: char| c == '\n' || c == '\r', " ")
}
