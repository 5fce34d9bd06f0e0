//! Relay Engine

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::session::{Direction, RelaySession, SessionStats};
use super::transform::{Transform, TransformPair};

/// Reference chunk size for one read
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Moves bytes between the two legs of a session, transforming every chunk
#[derive(Debug, Clone)]
pub struct RelayEngine {
    transforms: TransformPair,
    buffer_size: usize,
}

impl RelayEngine {
    /// Create a relay engine with the default buffer size
    pub fn new(transforms: TransformPair) -> Self {
        Self::with_buffer_size(transforms, DEFAULT_BUFFER_SIZE)
    }

    /// Create a relay engine with a custom per-direction buffer size
    pub fn with_buffer_size(transforms: TransformPair, buffer_size: usize) -> Self {
        Self {
            transforms,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Create a relay engine from configuration
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::with_buffer_size(
            TransformPair::new(config.relay.role, config.relay.mode),
            config.relay.buffer_size,
        )
    }

    /// Relay data bidirectionally until either direction ends.
    ///
    /// Both copy loops are polled concurrently. The first one to finish, on
    /// EOF or error, cancels the other, and both streams are then shut down
    /// and dropped. Errors are logged here and never returned.
    pub async fn relay<A, B>(&self, session: &RelaySession, inbound: A, outbound: B) -> SessionStats
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut inbound_read, mut inbound_write) = tokio::io::split(inbound);
        let (mut outbound_read, mut outbound_write) = tokio::io::split(outbound);

        debug!(
            session_id = %session.session_id,
            upstream = %self.transforms.upstream,
            downstream = %self.transforms.downstream,
            "Starting bidirectional relay"
        );

        let (closed_by, result) = {
            let upstream = transform_copy(
                &mut inbound_read,
                &mut outbound_write,
                self.transforms.upstream,
                self.buffer_size,
                |n| session.add_bytes(Direction::Upstream, n as u64),
            );
            let downstream = transform_copy(
                &mut outbound_read,
                &mut inbound_write,
                self.transforms.downstream,
                self.buffer_size,
                |n| session.add_bytes(Direction::Downstream, n as u64),
            );

            tokio::select! {
                result = upstream => (Direction::Upstream, result),
                result = downstream => (Direction::Downstream, result),
            }
        };

        close_quietly(&mut outbound_write, session, "outbound").await;
        close_quietly(&mut inbound_write, session, "inbound").await;

        let error = match result {
            Ok(bytes) => {
                debug!(
                    session_id = %session.session_id,
                    direction = %closed_by,
                    bytes,
                    "Copy loop reached end of stream"
                );
                None
            }
            Err(e) if is_teardown_error(&e) => {
                debug!(
                    session_id = %session.session_id,
                    direction = %closed_by,
                    "Connection already closed: {}",
                    e
                );
                None
            }
            Err(e) => {
                warn!(
                    session_id = %session.session_id,
                    direction = %closed_by,
                    "Error on forward: {}",
                    e
                );
                Some(e.to_string())
            }
        };

        session.log_stats(closed_by);
        session.to_stats(closed_by, error)
    }
}

/// Copy `reader` into `writer` chunk by chunk, transforming each chunk in place.
///
/// Only the bytes actually read are transformed and written. Returns the
/// number of bytes forwarded once the reader reaches end of stream. A write
/// that makes no progress fails with [`io::ErrorKind::WriteZero`] and is not
/// retried.
pub async fn transform_copy<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    transform: Transform,
    buffer_size: usize,
    mut on_chunk: F,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(usize),
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }

        let chunk = &mut buf[..n];
        transform.apply(chunk);
        writer.write_all(chunk).await?;
        writer.flush().await?;

        trace!(bytes = n, %transform, "Forwarded chunk");
        total += n as u64;
        on_chunk(n);
    }
}

/// Whether an I/O error only reports that the connection was already torn down
pub fn is_teardown_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::NotConnected
}

async fn close_quietly<W>(writer: &mut W, session: &RelaySession, side: &str)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = writer.shutdown().await {
        if !is_teardown_error(&e) {
            debug!(session_id = %session.session_id, "Failed to shut down {} side: {}", side, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::transform::{Role, TransformMode};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, ReadBuf};
    use tokio::time::timeout;
    use tokio_test::io::Builder;

    fn test_session() -> RelaySession {
        RelaySession::new(
            "127.0.0.1:40000".parse().unwrap(),
            "127.0.0.1:40001".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_partial_chunk_only_writes_bytes_read() {
        let mut reader = Builder::new().read(&[0x00, 0xFF, 0x7F]).build();
        let mut writer = Builder::new().write(&[0x01, 0x00, 0x80]).build();

        let copied = transform_copy(
            &mut reader,
            &mut writer,
            Transform::Increment,
            DEFAULT_BUFFER_SIZE,
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(copied, 3);
    }

    #[tokio::test]
    async fn test_chunks_keep_order_and_boundaries() {
        let mut reader = Builder::new().read(&[0x01, 0x02]).read(&[0x03]).build();
        let mut writer = Builder::new().write(&[0x00, 0x01]).write(&[0x02]).build();

        let mut chunks = Vec::new();
        let copied = transform_copy(&mut reader, &mut writer, Transform::Decrement, 4, |n| {
            chunks.push(n)
        })
        .await
        .unwrap();
        assert_eq!(copied, 3);
        assert_eq!(chunks, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_read_error_ends_copy() {
        let mut reader = Builder::new()
            .read(&[0xAA])
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut writer = Builder::new().write(&[0x55]).build();

        let err = transform_copy(&mut reader, &mut writer, Transform::Complement, 16, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_write_error_ends_copy() {
        let mut reader = Builder::new().read(&[0x10, 0x20]).build();
        let mut writer = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"))
            .build();

        let err = transform_copy(&mut reader, &mut writer, Transform::Increment, 16, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_relay_client_addition_scenario() {
        let engine = RelayEngine::new(TransformPair::new(Role::Client, TransformMode::Addition));
        let session = test_session();

        let (inbound, mut originator) = duplex(1024);
        let (outbound, mut target) = duplex(1024);

        let relay = tokio::spawn(async move { engine.relay(&session, inbound, outbound).await });

        originator.write_all(&[0x00, 0xFF, 0x7F]).await.unwrap();
        let mut received = [0u8; 3];
        target.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [0x01, 0x00, 0x80]);

        target.write_all(&[0x01, 0x00, 0x80]).await.unwrap();
        originator.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [0x00, 0xFF, 0x7F]);

        drop(originator);
        let stats = timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
        assert_eq!(stats.bytes_up, 3);
        assert_eq!(stats.bytes_down, 3);
        assert_eq!(stats.closed_by, Direction::Upstream);
        assert!(stats.error.is_none());
    }

    #[tokio::test]
    async fn test_relay_close_cascade() {
        let engine = RelayEngine::new(TransformPair::new(Role::Server, TransformMode::Bitwise));
        let session = test_session();

        let (inbound, mut originator) = duplex(64);
        let (outbound, target) = duplex(64);

        let relay = tokio::spawn(async move { engine.relay(&session, inbound, outbound).await });

        // The target going away must also end the inbound->outbound loop.
        drop(target);

        let stats = timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
        assert_eq!(stats.closed_by, Direction::Downstream);

        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(5), originator.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    /// Accepts nothing on write and never yields on read
    struct StalledSink {
        write_attempts: usize,
    }

    impl AsyncRead for StalledSink {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for StalledSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.write_attempts += 1;
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_without_progress_is_not_retried() {
        let mut reader = Builder::new().read(&[0x01, 0x02, 0x03]).build();
        let mut writer = StalledSink { write_attempts: 0 };

        let mut chunks = Vec::new();
        let err = transform_copy(&mut reader, &mut writer, Transform::Increment, 16, |n| {
            chunks.push(n)
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert_eq!(writer.write_attempts, 1);
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_relay_reports_write_without_progress() {
        let engine = RelayEngine::new(TransformPair::new(Role::Client, TransformMode::Addition));
        let session = test_session();

        let (inbound, mut originator) = duplex(64);
        let outbound = StalledSink { write_attempts: 0 };

        let relay = tokio::spawn(async move { engine.relay(&session, inbound, outbound).await });

        originator.write_all(&[0x01, 0x02, 0x03]).await.unwrap();

        let stats = timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
        assert_eq!(stats.closed_by, Direction::Upstream);
        assert_eq!(stats.bytes_up, 0);
        let error = stats.error.expect("stalled write should be reported");
        assert!(!error.is_empty());

        // The originator is closed along with the session.
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(5), originator.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_teardown_error_classification() {
        assert!(is_teardown_error(&io::Error::from(io::ErrorKind::NotConnected)));
        assert!(!is_teardown_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_teardown_error(&io::Error::from(io::ErrorKind::WriteZero)));
    }
}
