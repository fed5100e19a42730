pub mod catalogue;
pub mod config;
pub mod pipe;
pub mod remote;
pub mod restorer;
pub mod sender;
pub mod snapper;
pub mod store;
pub mod uploader;
pub mod zfs;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use catalogue::{ArchiveEntry, Catalogue};
pub use config::Settings;
pub use store::{ObjectStore, Store};
pub use uploader::SendDetails;

/// Number of bytes in a megabyte as used for configured sizes.
pub const MEGABYTE: u64 = 1_000_000;

/// Errors surfaced by the top level operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Zfs(#[from] zfs::Error),

    #[error(transparent)]
    Store(#[from] store::StoreError),

    #[error(transparent)]
    Catalogue(#[from] catalogue::CatalogueError),

    #[error(transparent)]
    Upload(#[from] uploader::UploadError),

    #[error("could not decode manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("no contents retained in {0}")]
    EmptyManifest(String),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),

    #[error("restore failed for '{target}': {cause}")]
    Restore {
        target: String,
        #[source]
        cause: Box<Error>,
    },

    #[error("restore failed for '{0}': not configured")]
    NotConfigured(String),

    #[error("restore failed for '{0}': at least one send entry required")]
    NoSendEntry(String),
}

/// Snapr will snap, send, and restore ZFS file systems.
pub struct Snapr {
    settings: Settings,
    zfs: zfs::Zfs,
    token: CancellationToken,
}

impl Snapr {
    pub fn new(settings: Settings, token: CancellationToken) -> Result<Self, Error> {
        let zfs = zfs::Zfs::new(token.clone())?;
        Ok(Self {
            settings,
            zfs,
            token,
        })
    }

    /// Creates snapshots according to the settings.
    pub async fn snap(&self) -> Vec<String> {
        snapper::Snapper::new(self.zfs.clone(), &self.settings)
            .snap()
            .await
    }

    /// Uploads a full or incremental stream per configured send entry.
    pub async fn send(&self) {
        sender::Sender::new(self.zfs.clone(), &self.settings, self.token.clone())
            .send()
            .await
    }

    /// Restores a file system from a bucket.
    pub async fn restore(&self, file_system: &str) -> Result<(), Error> {
        restorer::Restorer::new(self.zfs.clone(), &self.settings, self.token.clone())
            .restore(file_system)
            .await
    }
}
