//! Background reader turning a local socket into discrete chunks.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Chunks read from the local peer plus a signal for EOF or read error.
///
/// The chunk channel holds one chunk, so the reader stalls while the session
/// loop is busy with an exchange. Dropping this stops the reader task.
pub struct LocalReader {
    pub chunks: mpsc::Receiver<Bytes>,
    pub closed: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl Drop for LocalReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the reader task. Every chunk is sent before `closed` fires.
pub fn spawn<R>(mut reader: R, chunk_size: usize) -> LocalReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (chunk_tx, chunks) = mpsc::channel(1);
    let (closed_tx, closed) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; chunk_size];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if chunk_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Local read failed");
                    break;
                }
            }
        }
        let _ = closed_tx.send(());
    });

    LocalReader {
        chunks,
        closed,
        task,
    }
}
