// SPDX-License-Identifier: Apache-2.0

//! Bounded MPSC conduit used for fan-in of log lines and discovery events.
//!
//! A capacity of zero gives rendezvous semantics: a send completes only once
//! the single consumer has taken the item, so a slow consumer throttles every
//! producer instead of letting lines pile up in memory.

use flume::{Receiver, Sender};
use std::fmt;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError {
    Full,
    Disconnected,
}

impl fmt::Display for TrySendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full => write!(f, "channel full"),
            TrySendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for TrySendError {}

impl<T> BoundedSender<T> {
    /// Waits until the consumer has room (or, at capacity zero, takes the item).
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected) // receiver dropped
    }

    /// Blocking send for producers living on plain OS threads (the fs watcher).
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError::Disconnected)
    }

    /// Send only if there is room right now.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError> {
        self.tx.try_send(item).map_err(|e| match e {
            flume::TrySendError::Full(_) => TrySendError::Full,
            flume::TrySendError::Disconnected(_) => TrySendError::Disconnected,
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_disconnected()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Returns `None` once every sender has been dropped.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, TrySendError, bounded};
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn rendezvous_send_waits_for_consumer() {
        let (tx, mut rx) = bounded(0);

        let mut send1 = spawn(async { tx.send("line").await });

        // nobody is receiving yet, so the producer is parked
        assert_pending!(send1.poll());

        let mut recv1 = spawn(async { rx.next().await });
        assert_eq!(Some("line"), assert_ready!(recv1.poll()));

        assert_ok!(assert_ready!(send1.poll()));
    }

    #[tokio::test]
    async fn buffered_send_blocks_when_full() {
        let (tx, mut rx) = bounded(1);

        let mut send1 = spawn(async { tx.send(1).await });
        assert_ok!(assert_ready!(send1.poll()));
        drop(send1);

        let mut send2 = spawn(async { tx.send(2).await });
        assert_pending!(send2.poll());

        let mut recv1 = spawn(async { rx.next().await });
        assert_eq!(Some(1), assert_ready!(recv1.poll()));
        drop(recv1);

        assert_ok!(assert_ready!(send2.poll()));
    }

    #[tokio::test]
    async fn next_returns_none_after_senders_drop() {
        let (tx, mut rx) = bounded::<u8>(1);
        let tx2 = tx.clone();

        drop(tx);
        drop(tx2);
        assert_eq!(None, rx.next().await);
    }

    #[tokio::test]
    async fn try_send_never_waits() {
        let (tx, mut rx) = bounded(1);

        assert_eq!(Ok(()), tx.try_send(1));
        assert_eq!(Err(TrySendError::Full), tx.try_send(2));
        assert_eq!(Some(1), rx.next().await);

        drop(rx);
        assert_eq!(Err(TrySendError::Disconnected), tx.try_send(3));
    }

    #[tokio::test]
    async fn send_fails_on_receiver_close() {
        let (tx, rx) = bounded(0);
        drop(rx);

        assert!(tx.is_disconnected());
        assert_eq!(Err(SendError::Disconnected), tx.send(10).await);
        assert_eq!(Err(SendError::Disconnected), tx.send_blocking(11));
    }
}
