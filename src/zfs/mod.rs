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

use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub mod address;
pub mod bookmark;
mod receive;
mod send;
pub mod snapshot;

pub use address::{Address, Addressable, FileSystem};
pub use bookmark::{Bookmark, BookmarkListing};
pub use receive::Receive;
pub use send::{Completion, SendStream};
pub use snapshot::{Snapshot, SnapshotListing};

/// Creation time format emitted by the utility, interpreted in local time.
pub(crate) const CREATION_TIME: &str = "%a %b %e %H:%M %Y";

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not locate executable ({0})")]
    NotFound(String),

    #[error("{context}: {stderr}")]
    Command { context: String, stderr: String },

    #[error("{0}")]
    Parse(String),

    #[error("pipe failed: {0}")]
    Pipe(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Exposes ZFS operations by wrapping the command line 'zfs' utility.
#[derive(Debug, Clone)]
pub struct Zfs {
    path: PathBuf,
    token: CancellationToken,
}

impl Zfs {
    pub fn new(token: CancellationToken) -> Result<Self, Error> {
        Ok(Self {
            path: locate("zfs")?,
            token,
        })
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Runs the utility to completion and returns its stdout.
    pub(crate) async fn run(&self, args: &[&str], context: &str) -> Result<Vec<u8>, Error> {
        let child = self.command(args).spawn()?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = self.token.cancelled() => return Err(Error::Cancelled),
        };

        if !output.status.success() {
            return Err(Error::Command {
                context: context.to_string(),
                stderr: sanitize(&output.stderr),
            });
        }
        Ok(output.stdout)
    }
}

/// Collapses the utility's multi-line messages for embedding in errors.
pub(crate) fn sanitize(message: &[u8]) -> String {
    String::from_utf8_lossy(message)
        .replace("\r\n", " ")
        .replace('\n', " ")
        .trim()
        .to_string()
}

fn locate(name: &str) -> Result<PathBuf, Error> {
    let path = std::env::var_os("PATH")
        .ok_or_else(|| Error::NotFound("PATH is not set".to_string()))?;

    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(Error::NotFound(format!("no '{name}' in PATH")))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}
