// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io;

use bytes::BytesMut;
use futures::future::BoxFuture;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipe::{pipe, PipeReader, PipeWriter};

use super::{sanitize, Addressable, Error, Snapshot, Zfs};

/// Frames buffered between the utility's stdout and the pipe reader.
const STREAM_FRAMES: usize = 16;

/// Read size for draining the utility's stdout.
const STREAM_CHUNK: usize = 128 * 1024;

/// Invoked once with the final command result, inside [`SendStream::wait`].
/// Cleanup failures are the hook's own concern.
pub type Completion = Box<dyn FnOnce(Option<&Error>) -> BoxFuture<'static, ()> + Send>;

/// Allows waiting for the send command after its stream has been consumed.
pub struct SendStream {
    handle: JoinHandle<Result<(), Error>>,
    completion: Option<Completion>,
}

impl SendStream {
    /// Waits for the send command, runs the completion hook with its result,
    /// and returns the command's final error, if any.
    pub async fn wait(mut self) -> Result<(), Error> {
        let cause = match self.handle.await {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(join) => Some(Error::Pipe(join.to_string())),
        };

        if let Some(completion) = self.completion.take() {
            completion(cause.as_ref()).await;
        }

        match cause {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}

impl Zfs {
    /// Emits a raw replication stream for `target`, incremental against
    /// `source` when given. The reader yields the stream; a command failure
    /// reaches the reader as an error, never as a clean end of stream.
    pub fn send(
        &self,
        source: Option<&Snapshot>,
        target: &Snapshot,
        completion: Completion,
    ) -> Result<(PipeReader, SendStream), Error> {
        let target_address = target.address();
        let mut args = vec!["send", "--raw", "--holds", "--replicate"];

        let source_address = source.map(|s| s.address());
        if let Some(source_address) = &source_address {
            args.push("-I");
            args.push(source_address);
        }
        args.push(&target_address);

        let child = self.command(&args).spawn()?;
        let (writer, reader) = pipe(STREAM_FRAMES);

        let handle = tokio::spawn(pump(child, writer, self.token().clone()));

        Ok((
            reader,
            SendStream {
                handle,
                completion: Some(completion),
            },
        ))
    }
}

/// Drains the command's stdout into the pipe and settles the command.
async fn pump(mut child: Child, writer: PipeWriter, token: CancellationToken) -> Result<(), Error> {
    let Some(mut stdout) = child.stdout.take() else {
        let cause = Error::Pipe("command has no stdout".to_string());
        writer
            .close_with_error(io::Error::new(io::ErrorKind::Other, cause.to_string()))
            .await;
        return Err(cause);
    };

    let mut buf = BytesMut::with_capacity(STREAM_CHUNK);
    loop {
        buf.reserve(STREAM_CHUNK);

        let read = tokio::select! {
            read = stdout.read_buf(&mut buf) => read,
            _ = token.cancelled() => {
                writer
                    .close_with_error(io::Error::new(io::ErrorKind::Interrupted, "operation cancelled"))
                    .await;
                return Err(Error::Cancelled);
            }
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                if writer.write(buf.split().freeze()).await.is_err() {
                    // Reader gone; the stream consumer failed on its own.
                    return Err(Error::Pipe("stream reader closed".to_string()));
                }
            }
            Err(error) => {
                let cause = Error::Pipe(error.to_string());
                writer
                    .close_with_error(io::Error::new(error.kind(), cause.to_string()))
                    .await;
                return Err(cause);
            }
        }
    }

    let output = tokio::select! {
        output = child.wait_with_output() => output,
        _ = token.cancelled() => {
            writer
                .close_with_error(io::Error::new(io::ErrorKind::Interrupted, "operation cancelled"))
                .await;
            return Err(Error::Cancelled);
        }
    };

    match output {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => {
            let cause = Error::Command {
                context: "command failed".to_string(),
                stderr: sanitize(&output.stderr),
            };
            writer
                .close_with_error(io::Error::new(io::ErrorKind::Other, cause.to_string()))
                .await;
            Err(cause)
        }
        Err(error) => {
            let cause = Error::Io(error);
            writer
                .close_with_error(io::Error::new(io::ErrorKind::Other, cause.to_string()))
                .await;
            Err(cause)
        }
    }
}
