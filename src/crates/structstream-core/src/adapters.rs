//! Stream adaptation layer
//!
//! Bridges between the engine's chunk-stream contract and the wider async
//! ecosystem: byte readers become chunk streams, chunk streams become byte
//! readers, and plain iterators become upstreams for tests and replays.
//! Backpressure is pull-driven end to end — nothing here buffers more than
//! one chunk — and cancellation propagates by dropping.

use crate::engine::InputChunk;
use crate::error::EngineError;
use futures::stream::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Wrap an iterator of chunks as an engine upstream.
///
/// Useful for tests and for replaying captured streams.
pub fn iter_chunks<I>(chunks: I) -> impl Stream<Item = Result<InputChunk, EngineError>> + Send
where
    I: IntoIterator,
    I::Item: Into<InputChunk>,
    I::IntoIter: Send + 'static,
{
    futures::stream::iter(chunks.into_iter().map(|c| Ok(c.into())))
}

/// Wrap an `mpsc` receiver as an engine upstream, for push-style
/// producers. The channel's bound is the only buffering between producer
/// and pipeline.
pub fn channel_chunks(
    rx: tokio::sync::mpsc::Receiver<InputChunk>,
) -> impl Stream<Item = Result<InputChunk, EngineError>> + Send {
    use futures::StreamExt;
    tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok)
}

/// Read an [`AsyncRead`] into an engine upstream of byte chunks.
///
/// Reads at most `capacity` bytes per pull; the consumer's pull rate
/// governs upstream reads.
pub fn reader_chunks<R>(
    mut reader: R,
    capacity: usize,
) -> impl Stream<Item = Result<InputChunk, EngineError>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async_stream::try_stream! {
        let mut buf = vec![0u8; capacity.max(1)];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| EngineError::Provider(e.to_string()))?;
            if n == 0 {
                break;
            }
            yield InputChunk::Bytes(buf[..n].to_vec());
        }
    }
}

/// Adapt a chunk stream into an [`AsyncRead`] of its bytes.
///
/// Dropping the reader drops the stream, which is how cancellation
/// propagates upstream.
#[derive(Debug)]
pub struct ByteStreamReader<S> {
    stream: S,
    buffer: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<S> ByteStreamReader<S>
where
    S: Stream<Item = Result<InputChunk, EngineError>> + Unpin,
{
    /// Wrap a chunk stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl<S> AsyncRead for ByteStreamReader<S>
where
    S: Stream<Item = Result<InputChunk, EngineError>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.buffer.len() {
                let available = &this.buffer[this.pos..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer = chunk.into_bytes();
                    this.pos = 0;
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_iter_chunks() {
        let chunks: Vec<_> = iter_chunks(vec!["a", "b"]).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0].as_ref().unwrap(),
            &InputChunk::Text("a".to_string())
        );
    }

    #[tokio::test]
    async fn test_reader_chunks_round_trip() {
        let data = b"hello world".to_vec();
        let reader = std::io::Cursor::new(data.clone());
        let stream = reader_chunks(reader, 4);
        let chunks: Vec<_> = stream.collect().await;

        let mut collected = Vec::new();
        for chunk in chunks {
            collected.extend(chunk.unwrap().into_bytes());
        }
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn test_byte_stream_reader() {
        let stream = iter_chunks(vec!["hel", "lo"]);
        futures::pin_mut!(stream);
        let mut reader = ByteStreamReader::new(stream);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_byte_stream_reader_propagates_errors() {
        let stream = futures::stream::iter(vec![
            Ok(InputChunk::from("ok")),
            Err(EngineError::Provider("boom".to_string())),
        ]);
        futures::pin_mut!(stream);
        let mut reader = ByteStreamReader::new(stream);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
