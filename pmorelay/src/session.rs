//! One listener connection
//!
//! A [`StreamSession`] owns a cursor into the broadcast buffer and hands
//! the chunks to a transport untouched. The cursor is released when the
//! session is dropped, whichever way the connection ended.

use std::io;

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{
    broadcast::{BroadcastBuffer, Chunk, ListenerCursor},
    error::{Error, Result},
};

pub struct StreamSession {
    buffer: BroadcastBuffer,
    cursor: ListenerCursor,
}

impl StreamSession {
    /// Attaches a new listener at the live point.
    pub fn attach(buffer: BroadcastBuffer) -> Self {
        let cursor = buffer.subscribe();
        debug!(listener = cursor.id(), "Listener attached");
        Self { buffer, cursor }
    }

    pub fn id(&self) -> u64 {
        self.cursor.id()
    }

    pub fn cursor(&self) -> &ListenerCursor {
        &self.cursor
    }

    /// Waits for the next chunk; [`Error::BufferClosed`] on shutdown.
    pub async fn next_chunk(&mut self) -> Result<Chunk> {
        self.buffer.read_next(&mut self.cursor).await
    }

    /// Copies the live feed into `writer` until the buffer closes or a
    /// write fails.
    ///
    /// Returns `Ok(())` on shutdown and [`Error::ListenerWrite`] when the
    /// client went away.
    pub async fn relay_to<W>(mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            let chunk = match self.next_chunk().await {
                Ok(chunk) => chunk,
                Err(Error::BufferClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            if let Err(e) = writer.write_all(&chunk.data).await {
                return Err(Error::ListenerWrite(e.to_string()));
            }
            if let Err(e) = writer.flush().await {
                return Err(Error::ListenerWrite(e.to_string()));
            }
        }
    }

    /// Byte stream for an HTTP response body. Dropping the stream (client
    /// disconnect) ends the session.
    pub fn into_byte_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let mut session = self;
        async_stream::stream! {
            loop {
                match session.next_chunk().await {
                    Ok(chunk) => yield Ok(chunk.data),
                    Err(Error::BufferClosed) => break,
                    Err(e) => {
                        yield Err(io::Error::other(e.to_string()));
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.buffer.unsubscribe(&mut self.cursor);
        debug!(
            listener = self.cursor.id(),
            delivered = self.cursor.delivered(),
            skipped = self.cursor.skipped(),
            "Listener detached"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_drop_releases_cursor() {
        let buffer = BroadcastBuffer::new(1024);
        let session = StreamSession::attach(buffer.clone());
        assert_eq!(buffer.listener_count(), 1);
        drop(session);
        assert_eq!(buffer.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_byte_stream_passes_chunks_through_and_ends_on_close() {
        let buffer = BroadcastBuffer::new(1024);
        let stream = StreamSession::attach(buffer.clone()).into_byte_stream();
        futures::pin_mut!(stream);

        buffer.publish(Bytes::from_static(b"ID3")).unwrap();
        buffer.publish(Bytes::from_static(b"\xff\xfb")).unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ID3"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"\xff\xfb"));

        buffer.close();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_detaches_listener() {
        let buffer = BroadcastBuffer::new(1024);
        let stream = StreamSession::attach(buffer.clone()).into_byte_stream();
        assert_eq!(buffer.listener_count(), 1);
        drop(stream);
        assert_eq!(buffer.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_to_writer() {
        let buffer = BroadcastBuffer::new(1024);
        let session = StreamSession::attach(buffer.clone());
        let (mut client, mut server) = tokio::io::duplex(64);

        let relay = tokio::spawn(async move { session.relay_to(&mut server).await });
        buffer.publish(Bytes::from_static(b"hello ")).unwrap();
        buffer.publish(Bytes::from_static(b"radio")).unwrap();

        let mut received = vec![0u8; 11];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut received)
            .await
            .unwrap();
        assert_eq!(&received, b"hello radio");

        buffer.close();
        let result = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(buffer.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_ends_session() {
        let buffer = BroadcastBuffer::new(1024);
        let session = StreamSession::attach(buffer.clone());
        buffer.publish(Bytes::from_static(b"x")).unwrap();

        let result = session.relay_to(&mut BrokenPipe).await;
        assert!(matches!(result, Err(Error::ListenerWrite(_))));
        assert_eq!(buffer.listener_count(), 0);
    }
}
