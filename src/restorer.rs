use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Settings;
use crate::remote::Remote;
use crate::zfs::{FileSystem, Zfs};
use crate::Error;

/// Restores a single file system from its last configured send target.
pub struct Restorer<'a> {
    zfs: Zfs,
    settings: &'a Settings,
    token: CancellationToken,
}

impl<'a> Restorer<'a> {
    pub fn new(zfs: Zfs, settings: &'a Settings, token: CancellationToken) -> Self {
        Self {
            zfs,
            settings,
            token,
        }
    }

    pub async fn restore(&self, target: &str) -> Result<(), Error> {
        let entries = self
            .settings
            .file_systems
            .get(target)
            .ok_or_else(|| Error::NotConfigured(target.to_string()))?;

        let Some(entry) = entries.send.last() else {
            return Err(Error::NoSendEntry(target.to_string()));
        };
        let entry = entry.inherit(self.settings);

        let fs: FileSystem = target.parse().map_err(|cause: crate::zfs::Error| {
            Error::Restore {
                target: target.to_string(),
                cause: Box::new(cause.into()),
            }
        })?;

        let remote = Remote::connect(self.zfs.clone(), entry, self.token.clone())
            .await
            .map_err(|cause| Error::Restore {
                target: target.to_string(),
                cause: Box::new(cause),
            })?;

        remote
            .restore(&fs)
            .await
            .map_err(|cause| Error::Restore {
                target: target.to_string(),
                cause: Box::new(cause),
            })?;

        info!("restored {target}");
        Ok(())
    }
}
