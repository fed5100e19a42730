use tokio::process::{Child, ChildStdin};
use tokio_util::sync::CancellationToken;

use super::{sanitize, Error, Zfs};

/// A running receive command consuming a replication stream on stdin.
pub struct Receive {
    child: Child,
    stdin: Option<ChildStdin>,
    context: String,
    token: CancellationToken,
}

impl Zfs {
    /// Starts receiving a replication stream into `target`.
    pub fn receive(&self, target: &str) -> Result<Receive, Error> {
        let mut cmd = self.command(&["receive", "-d", target]);
        cmd.stdin(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();

        Ok(Receive {
            child,
            stdin,
            context: format!("could not receive stream to '{target}'"),
            token: self.token().clone(),
        })
    }
}

impl Receive {
    /// The write side of the stream. Present until taken; closing it (drop)
    /// ends the stream.
    pub fn stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Closes the stream and waits for the command to settle.
    pub async fn finish(mut self) -> Result<(), Error> {
        drop(self.stdin.take());

        let output = tokio::select! {
            output = self.child.wait_with_output() => output?,
            _ = self.token.cancelled() => return Err(Error::Cancelled),
        };

        if !output.status.success() {
            return Err(Error::Command {
                context: self.context.clone(),
                stderr: sanitize(&output.stderr),
            });
        }
        Ok(())
    }
}
