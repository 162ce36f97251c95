// SPDX-License-Identifier: Apache-2.0

//! Stream Tailer: one task per watched source, reading its output and feeding
//! the shared fan-in channel until the source ends or quit is requested.

pub mod error;
pub mod file;
mod file_id;
pub mod line;
pub mod parser;
pub mod stream;

pub use error::TailError;
pub use line::{LinePayload, LogLine, RawLine};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::registry::{QuitListener, SourceDescriptor, SourceLocation, StartAt};

#[async_trait]
pub trait SourceReader: Send {
    /// Next unit of output, waiting for it if necessary. `None` once the source
    /// has ended for good.
    async fn next_line(&mut self) -> Result<Option<RawLine>, TailError>;
}

/// Opens the live output of a source location.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(
        &self,
        location: &SourceLocation,
        start_at: StartAt,
    ) -> Result<Box<dyn SourceReader>, TailError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TailerOptions {
    /// Decode text lines as `{"log": .., "stream": ..}` entries.
    pub parse_structured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerExit {
    Quit,
    /// The source ended on its own (e.g. the container stopped).
    Exhausted,
    OpenFailed,
    ReadFailed,
    /// Nobody is consuming lines anymore.
    Closed,
}

impl TailerExit {
    /// Whether the descriptor should be dropped from the store by the tailer's owner.
    pub fn is_self_initiated(&self) -> bool {
        matches!(
            self,
            TailerExit::Exhausted | TailerExit::OpenFailed | TailerExit::ReadFailed
        )
    }
}

/// Run the tailer for `descriptor` to completion.
///
/// The descriptor's quit listener is taken on entry; when quit is requested the
/// reader is dropped before the acknowledgment is sent.
pub async fn run_tailer<O>(
    descriptor: Arc<SourceDescriptor>,
    opener: Arc<O>,
    lines: BoundedSender<LogLine>,
    options: TailerOptions,
) -> TailerExit
where
    O: SourceOpener + ?Sized,
{
    let Some(listener) = descriptor.quit_signal().listen() else {
        debug!(source_id = descriptor.id(), "Tailer already started");
        return TailerExit::Quit;
    };

    let exit = tail(&descriptor, opener.as_ref(), &lines, options, &listener).await;
    debug!(source_id = descriptor.id(), exit = ?exit, "Tailer finished");

    listener.acknowledge();
    exit
}

async fn tail<O>(
    descriptor: &SourceDescriptor,
    opener: &O,
    lines: &BoundedSender<LogLine>,
    options: TailerOptions,
    listener: &QuitListener,
) -> TailerExit
where
    O: SourceOpener + ?Sized,
{
    let opened = tokio::select! {
        biased;
        _ = listener.requested() => return TailerExit::Quit,
        opened = opener.open(descriptor.location(), descriptor.start_at()) => opened,
    };
    let mut reader = match opened {
        Ok(reader) => reader,
        Err(e) => {
            warn!(source_id = descriptor.id(), error = %e, "Unable to open source");
            return TailerExit::OpenFailed;
        }
    };

    info!(
        source_id = descriptor.id(),
        location = %descriptor.location(),
        "Watching source"
    );

    let token: Arc<str> = descriptor.token().into();
    let label: Arc<str> = descriptor.label().into();

    loop {
        let next = tokio::select! {
            biased;
            _ = listener.requested() => break TailerExit::Quit,
            next = reader.next_line() => next,
        };

        let raw = match next {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!(source_id = descriptor.id(), "Source stream ended");
                break TailerExit::Exhausted;
            }
            Err(e) => {
                warn!(source_id = descriptor.id(), error = %e, "Failed reading source");
                break TailerExit::ReadFailed;
            }
        };

        let Some(payload) = to_payload(descriptor, raw, options) else {
            continue;
        };
        let line = LogLine::new(token.clone(), label.clone(), payload);

        tokio::select! {
            biased;
            _ = listener.requested() => break TailerExit::Quit,
            sent = lines.send(line) => {
                if sent.is_err() {
                    break TailerExit::Closed;
                }
            }
        }
    }
}

fn to_payload(
    descriptor: &SourceDescriptor,
    raw: RawLine,
    options: TailerOptions,
) -> Option<LinePayload> {
    match raw {
        RawLine::Bytes(bytes) => Some(LinePayload::Raw(bytes)),
        RawLine::Text(text) if options.parse_structured => match parser::decode(&text) {
            Ok(entry) => Some(LinePayload::Decoded {
                stream: entry.stream,
                log: entry.log,
            }),
            Err(e) => {
                warn!(source_id = descriptor.id(), error = %e, "Dropping malformed line");
                None
            }
        },
        RawLine::Text(text) => Some(LinePayload::Text(text)),
    }
}
