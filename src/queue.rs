//! The Event Queue: an unbounded FIFO handing [`NotificationEvent`]s from the
//! async listener to the blocking Dispatch Loop.
//!
//! `put` never blocks, so it is safe to call from inside a tokio task or a
//! notification callback.  `get` waits at most the given timeout, which is
//! how the Dispatch Loop idles.

use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;

use crate::types::NotificationEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The other half of the queue has been dropped.
    #[error("event queue closed")]
    Closed,
}

/// Create a connected sender / receiver pair.
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer half.  Cheap to clone; each listener task gets its own copy.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<NotificationEvent>,
}

impl EventSender {
    /// Enqueue without blocking.  Fails only when the receiver is gone.
    pub fn put(&self, event: NotificationEvent) -> Result<(), QueueError> {
        self.tx.send(event).map_err(|_| QueueError::Closed)
    }
}

/// Consumer half, owned by the Dispatch Loop.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<NotificationEvent>,
}

impl EventReceiver {
    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` means the wait elapsed with nothing queued.  Events still
    /// buffered when every sender has been dropped are returned before
    /// [`QueueError::Closed`] is reported.
    pub fn get(&self, timeout: Duration) -> Result<Option<NotificationEvent>, QueueError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Non-blocking variant of [`EventReceiver::get`].
    pub fn try_get(&self) -> Result<Option<NotificationEvent>, QueueError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }
}
