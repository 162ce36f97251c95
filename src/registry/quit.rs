// SPDX-License-Identifier: Apache-2.0

//! Single-use quit handshake between whoever removes a source and its tailer.
//!
//! The initiator cancels and then waits for the tailer to acknowledge, so the
//! tailer's read handle is known to be released before the source ID is reused.
//! The wait is bounded; a tailer stuck in a non-cancellable call surfaces as
//! [`QuitError::Timeout`] instead of hanging the caller.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuitError {
    #[error("tailer did not acknowledge quit within {0:?}")]
    Timeout(Duration),
}

/// Initiator side, owned by the source descriptor.
#[derive(Debug)]
pub struct QuitSignal {
    cancel: CancellationToken,
    state: Mutex<QuitState>,
}

#[derive(Debug)]
struct QuitState {
    /// Handed to the tailer when it starts; still here if it never did.
    listener: Option<QuitListener>,
    /// Resolved by the tailer's acknowledgment (or its drop).
    ack: Option<oneshot::Receiver<()>>,
}

/// Tailer side of the handshake.
#[derive(Debug)]
pub struct QuitListener {
    cancel: CancellationToken,
    ack: oneshot::Sender<()>,
}

impl QuitSignal {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let (ack_tx, ack_rx) = oneshot::channel();

        Self {
            state: Mutex::new(QuitState {
                listener: Some(QuitListener {
                    cancel: cancel.clone(),
                    ack: ack_tx,
                }),
                ack: Some(ack_rx),
            }),
            cancel,
        }
    }

    /// Take the tailer side. Returns `None` after the first call.
    pub fn listen(&self) -> Option<QuitListener> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listener
            .take()
    }

    #[cfg(test)]
    fn is_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Request the tailer to stop and wait for its acknowledgment.
    ///
    /// Resolves immediately if no tailer ever took the listener, if the tailer
    /// already exited, or if quit was already requested by someone else.
    pub async fn quit(&self, timeout: Duration) -> Result<(), QuitError> {
        self.cancel.cancel();

        let ack = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            // dropping an untaken listener drops its sender, resolving `ack` below
            state.listener.take();
            state.ack.take()
        };

        let Some(ack) = ack else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, ack).await {
            // Err(RecvError) means the tailer dropped its side on the way out
            Ok(_) => Ok(()),
            Err(_) => Err(QuitError::Timeout(timeout)),
        }
    }
}

impl Default for QuitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl QuitListener {
    /// Completes once quit has been requested.
    pub async fn requested(&self) {
        self.cancel.cancelled().await
    }

    #[cfg(test)]
    fn is_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Must be called only after the tailer released its source handle.
    pub fn acknowledge(self) {
        let _ = self.ack.send(());
    }
}
