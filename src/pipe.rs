use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Creates a bounded in-memory byte pipe.
///
/// Unlike a plain channel, the writer may close the pipe with an error that
/// the reader observes after consuming the buffered bytes. Dropping the
/// writer without an error produces a clean end of stream.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            pending: Bytes::new(),
            failed: None,
        },
    )
}

pub struct PipeWriter {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

impl PipeWriter {
    /// Queues a chunk for the reader. Fails once the read side is gone.
    pub async fn write(&self, data: Bytes) -> Result<(), io::Error> {
        self.tx
            .send(Ok(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))
    }

    /// Closes the pipe; the reader fails with `error` after draining.
    pub async fn close_with_error(self, error: io::Error) {
        let _ = self.tx.send(Err(error)).await;
    }
}

pub struct PipeReader {
    rx: mpsc::Receiver<Result<Bytes, io::Error>>,
    pending: Bytes,
    failed: Option<(io::ErrorKind, String)>,
}

impl PipeReader {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending.split_to(n));
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending.is_empty() {
            this.fill(buf);
            return Poll::Ready(Ok(()));
        }

        if let Some((kind, message)) = &this.failed {
            return Poll::Ready(Err(io::Error::new(*kind, message.clone())));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(data))) => {
                this.pending = data;
                this.fill(buf);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(error))) => {
                this.failed = Some((error.kind(), error.to_string()));
                Poll::Ready(Err(error))
            }
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}
