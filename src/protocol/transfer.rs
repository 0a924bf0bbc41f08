//! Raw payload transfer on an already-framed socket.
//!
//! After a node asks for a payload with `send|<jobId>`, the manager writes the
//! file bytes unframed and flushes. The node reads until the stream has been
//! idle for the configured timeout.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ClusterError, Result};

/// Streams the file at `path` to `writer` and flushes.
pub async fn send_file<W: AsyncWrite + Unpin>(writer: &mut W, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ClusterError::Payload(format!("cannot open {}: {}", path.display(), e)))?;
    let sent = tokio::io::copy(&mut file, writer).await?;
    writer.flush().await?;
    Ok(sent)
}

/// Writes `prefix` and then everything `reader` produces into `dest`.
///
/// `prefix` holds bytes the frame reader had already buffered past the last
/// message. Waits up to `start_timeout` for the first byte, then stops after
/// `idle_timeout` of silence or at end of stream.
pub async fn receive_file<R: AsyncRead + Unpin>(
    reader: &mut R,
    prefix: &[u8],
    dest: &Path,
    chunk_size: usize,
    start_timeout: Duration,
    idle_timeout: Duration,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut received = prefix.len() as u64;
    file.write_all(prefix).await?;

    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut wait = if prefix.is_empty() { start_timeout } else { idle_timeout };
    loop {
        match tokio::time::timeout(wait, reader.read(&mut chunk)).await {
            Err(_) if received == 0 => {
                return Err(ClusterError::Payload(format!(
                    "no payload bytes within {:?}",
                    start_timeout
                )));
            }
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                file.write_all(&chunk[..n]).await?;
                received += n as u64;
                wait = idle_timeout;
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    file.flush().await?;
    tracing::debug!(bytes = received, path = %dest.display(), "Payload received");
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const IDLE: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn transfers_file_and_stops_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.json");
        let dest = dir.path().join("dest.json");
        let content = "x".repeat(10_000);
        tokio::fs::write(&src, &content).await.unwrap();

        let (mut client, mut server) = duplex(64 * 1024);
        let sent = send_file(&mut server, &src).await.unwrap();
        assert_eq!(sent, 10_000);

        // The sender keeps the socket open; only the idle timeout ends the transfer.
        let received = receive_file(&mut client, b"", &dest, 1024, Duration::from_secs(1), IDLE)
            .await
            .unwrap();
        assert_eq!(received, 10_000);
        assert_eq!(tokio::fs::read_to_string(&dest).await.unwrap(), content);
        drop(server);
    }

    #[tokio::test]
    async fn prefix_bytes_come_first() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.json");
        let (mut client, mut server) = duplex(1024);
        server.write_all(b" world").await.unwrap();
        drop(server);

        let received = receive_file(&mut client, b"hello", &dest, 1024, IDLE, IDLE)
            .await
            .unwrap();
        assert_eq!(received, 11);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn silent_sender_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.json");
        let (mut client, _server) = duplex(1024);
        let err = receive_file(&mut client, b"", &dest, 1024, IDLE, IDLE)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Payload(_)));
    }
}
