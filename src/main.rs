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

use clap::Parser;
use snapr::{Settings, Snapr};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snapr")]
#[command(about = "Snapshots ZFS file systems and replicates them to S3 compatible storage")]
struct Args {
    /// Creates snapshots based on the configured file systems and intervals
    #[arg(long)]
    snap: bool,

    /// Sends new snapshots to the configured destinations
    #[arg(long)]
    send: bool,

    /// Restores a file system from a bucket
    #[arg(long)]
    restore: bool,

    /// A file system
    #[arg(long = "file-system")]
    file_system: Option<String>,

    /// Specify an alternate configuration file
    #[arg(long, default_value = "/etc/snapr.conf")]
    configuration: PathBuf,

    /// Sets log level to debug
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logger(args.debug);

    if let Err(error) = run(args).await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let token = cancellation();

    let settings = Settings::load(&args.configuration)?;
    let snapr = Snapr::new(settings, token)?;

    if args.snap && !(args.restore || args.send) {
        snapr.snap().await;
        return Ok(());
    }

    if args.send && !(args.restore || args.snap) {
        snapr.send().await;
        return Ok(());
    }

    if args.restore && !(args.snap || args.send) {
        let Some(file_system) = &args.file_system else {
            return Err("no file system specified".into());
        };
        return Ok(snapr.restore(file_system).await?);
    }

    Err("invalid argument combination".into())
}

fn logger(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "snapr=debug" } else { "snapr=info" })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if debug {
        debug!("debug logging enabled");
    }
}

/// A process wide token tripped by SIGINT or SIGTERM.
fn cancellation() -> CancellationToken {
    let token = CancellationToken::new();

    let tripped = token.clone();
    tokio::spawn(async move {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
        tripped.cancel();
    });

    token
}
