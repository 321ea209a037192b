//! Channel reader: open, drain, reopen, forever.
//!
//! Runs on its own OS thread because waiting for a producer and reading the
//! pipe both block. Errors never end the loop; they are logged and the pipe
//! is reopened after a short pause. While idle the reader wakes every
//! [`WAIT_TICK`] to check the stop flag and that the pipe is still in place.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn, Dispatch};

use djs_common::fifo::{self, ChannelError, ChannelReader};

use crate::dispatcher::Dispatcher;

const REOPEN_BACKOFF: Duration = Duration::from_secs(1);
const WAIT_TICK: Duration = Duration::from_millis(250);

pub struct ChannelListener {
    reader: ChannelReader,
    dispatcher: Dispatcher,
    stop: Arc<AtomicBool>,
}

/// Asks a running listener to finish its current cycle and exit.
#[derive(Debug, Clone)]
pub struct ListenerStop {
    stop: Arc<AtomicBool>,
    path: PathBuf,
}

impl ListenerStop {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake an idle reader now instead of at its next tick.
        if let Err(err) = fifo::nudge(&self.path) {
            debug!("could not wake channel reader: {}", err);
        }
    }
}

impl ChannelListener {
    pub fn new(reader: ChannelReader, dispatcher: Dispatcher) -> Self {
        Self {
            reader,
            dispatcher,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> ListenerStop {
        ListenerStop {
            stop: self.stop.clone(),
            path: self.reader.path().to_path_buf(),
        }
    }

    /// Run on a dedicated thread, logging through `dispatch`.
    pub fn spawn(self, dispatch: Dispatch) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("channel-reader".into())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || self.run()))
    }

    pub fn run(&self) {
        info!(channel = %self.reader.path().display(), "channel reader started");
        while !self.stopped() {
            match self.drain_once() {
                Ok(Some(count)) => debug!(count, "all producers disconnected, reopening"),
                Ok(None) => {
                    info!("writer is gone, channel reader exiting");
                    break;
                }
                Err(err) => {
                    if self.stopped() {
                        break;
                    }
                    error!("fifo read error: {}", err);
                    thread::sleep(REOPEN_BACKOFF);
                }
            }
        }
        info!("channel reader stopped");
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// One open/drain cycle. `Ok(None)` once the dispatcher has closed.
    fn drain_once(&self) -> Result<Option<usize>, ChannelError> {
        // A removed or replaced pipe surfaces as an error from open_until;
        // the next cycle puts a fresh one in place.
        fifo::ensure(self.reader.path())?;
        let Some(mut session) = self.reader.open_until(WAIT_TICK, || !self.stopped())? else {
            return Ok(Some(0));
        };
        let mut queued = 0;
        while let Some(line) = session.next_line()? {
            match self.dispatcher.enqueue(line) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!("{}", err);
                    self.stop.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
        Ok(Some(queued))
    }
}
