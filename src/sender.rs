use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::remote::{Remote, SendOutcome};
use crate::zfs::{FileSystem, Zfs};

/// Walks the configured sends; one failing file system never blocks the
/// others.
pub struct Sender<'a> {
    zfs: Zfs,
    settings: &'a Settings,
    token: CancellationToken,
}

impl<'a> Sender<'a> {
    pub fn new(zfs: Zfs, settings: &'a Settings, token: CancellationToken) -> Self {
        Self {
            zfs,
            settings,
            token,
        }
    }

    /// Performs uploads as per configuration.
    pub async fn send(&self) {
        for (target, file_system) in &self.settings.file_systems {
            if file_system.send.is_empty() {
                warn!("sending failed for {target}: no sends");
                continue;
            }

            let fs: FileSystem = match target.parse() {
                Ok(fs) => fs,
                Err(error) => {
                    warn!("sending failed for {target}: {error}");
                    continue;
                }
            };

            for entry in &file_system.send {
                let entry = entry.inherit(self.settings);

                let remote =
                    match Remote::connect(self.zfs.clone(), entry, self.token.clone()).await {
                        Ok(remote) => remote,
                        Err(error) => {
                            warn!("sending failed for {target}: {error}");
                            continue;
                        }
                    };

                match remote.refresh(&fs).await {
                    Ok(SendOutcome::Sent(details)) => {
                        info!("sent '{target}':\n{details}");
                    }
                    Ok(SendOutcome::UpToDate) => {
                        info!("remote is up to date for '{target}'");
                    }
                    Ok(SendOutcome::NoSnapshots) => {
                        warn!("sending skipped for '{target}': no snapshots exist");
                    }
                    Err(error) => {
                        warn!("sending failed for {target}: {error}");
                    }
                }
            }
        }
    }
}
