//! In-daemon queue between the channel reader and the writer.
//!
//! Unbounded so a slow disk never pushes back on the pipe reader.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Raw note text as it came off the channel. Never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage(String);

impl QueuedMessage {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
#[error("dispatcher closed: writer is gone")]
pub struct DispatchClosed;

pub fn dispatcher() -> (Dispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Dispatcher { tx }, DispatchQueue { rx })
}

/// Producer half, owned by the channel reader.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<QueuedMessage>,
}

impl Dispatcher {
    /// Queue one raw channel line. Returns `Ok(false)` when the payload was
    /// discarded (not UTF-8, or blank).
    pub fn enqueue(&self, raw: Vec<u8>) -> Result<bool, DispatchClosed> {
        let text = match String::from_utf8(raw) {
            Ok(text) => text,
            Err(err) => {
                debug!(bytes = err.as_bytes().len(), "dropping non-utf8 payload");
                return Ok(false);
            }
        };
        if text.trim().is_empty() {
            return Ok(false);
        }
        self.tx.send(QueuedMessage(text)).map_err(|_| DispatchClosed)?;
        Ok(true)
    }
}

/// Consumer half, owned by the writer.
#[derive(Debug)]
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<QueuedMessage>,
}

impl DispatchQueue {
    /// Waits for the next message; `None` once every producer is dropped.
    pub async fn dequeue(&mut self) -> Option<QueuedMessage> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let (dispatcher, mut queue) = dispatcher();
        for note in ["one", "two", "three"] {
            assert!(dispatcher.enqueue(note.as_bytes().to_vec()).unwrap());
        }
        drop(dispatcher);

        let mut seen = Vec::new();
        while let Some(message) = queue.dequeue().await {
            seen.push(message.as_str().to_string());
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn blank_and_garbage_never_reach_the_queue() {
        let (dispatcher, mut queue) = dispatcher();

        assert!(!dispatcher.enqueue(Vec::new()).unwrap());
        assert!(!dispatcher.enqueue(b" \t ".to_vec()).unwrap());
        assert!(!dispatcher.enqueue(vec![0xff, 0xfe, b'x']).unwrap());
        assert!(dispatcher.enqueue(b"  kept  ".to_vec()).unwrap());
        drop(dispatcher);

        assert_eq!(queue.dequeue().await.unwrap().as_str(), "  kept  ");
        assert!(queue.dequeue().await.is_none());
    }

    #[test]
    fn enqueue_after_writer_gone_fails() {
        let (dispatcher, queue) = dispatcher();
        drop(queue);
        assert!(dispatcher.enqueue(b"late".to_vec()).is_err());
    }
}
