// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tower::BoxError;

use super::SourceReader;
use super::error::TailError;
use super::line::RawLine;

pub type ByteStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Reader over an attached runtime log stream. The stream ending is how a
/// stopped container is noticed.
pub struct StreamTail {
    stream: ByteStream,
}

impl StreamTail {
    pub fn new(stream: ByteStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl SourceReader for StreamTail {
    async fn next_line(&mut self) -> Result<Option<RawLine>, TailError> {
        loop {
            match self.stream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return Ok(Some(RawLine::Bytes(chunk))),
                Some(Err(e)) => return Err(TailError::Stream(e)),
                None => return Ok(None),
            }
        }
    }
}
