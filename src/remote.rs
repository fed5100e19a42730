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

use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalogue::{pad_number, ArchiveEntry, Catalogue};
use crate::config::SendEntry;
use crate::store::{Credentials, ObjectStore, Provider, Store};
use crate::uploader::Upload;
use crate::zfs::{Completion, FileSystem, Snapshot, SnapshotListing, Zfs};
use crate::{Error, SendDetails, MEGABYTE};

/// What a refresh concluded for one send entry.
#[derive(Debug)]
pub enum SendOutcome {
    Sent(SendDetails),
    UpToDate,
    NoSnapshots,
}

/// One configured replication target for one file system: the catalogue of
/// what the bucket holds, plus the client to move bytes either way.
pub struct Remote {
    zfs: Zfs,
    store: Arc<dyn ObjectStore>,
    entry: SendEntry,
    catalogue: Catalogue,
    token: CancellationToken,
}

impl Remote {
    /// Connects to the entry's endpoint and catalogues the bucket.
    pub async fn connect(
        zfs: Zfs,
        entry: SendEntry,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        entry.validate()?;

        let store = Store::new(
            Provider {
                endpoint: entry.endpoint.clone(),
                region: entry.region.clone(),
            },
            Credentials {
                account: entry.account.clone(),
                secret: entry.secret.clone(),
            },
            token.clone(),
        )?;

        Self::with_store(zfs, Arc::new(store), entry, token).await
    }

    /// As `connect`, for any object store implementation.
    pub async fn with_store(
        zfs: Zfs,
        store: Arc<dyn ObjectStore>,
        entry: SendEntry,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        let listing = store.list_all_keys(&entry.bucket).await?;

        let mut catalogue = Catalogue::default();
        catalogue.load(&listing);

        Ok(Self {
            zfs,
            store,
            entry,
            catalogue,
            token,
        })
    }

    /// Restores a file system from the bucket, archive by archive.
    pub async fn restore(&self, fs: &FileSystem) -> Result<(), Error> {
        let archives = self.catalogue.verify(&fs.to_string())?;

        info!("restoring {fs} from {}", self.entry.bucket);

        for (index, volumes) in archives.iter().enumerate() {
            self.restore_archive(fs, index, volumes).await?;
        }
        Ok(())
    }

    /// Feeds one archive's volumes, in order, into a receive. Each archive
    /// is one self-contained replication stream.
    async fn restore_archive(
        &self,
        fs: &FileSystem,
        index: usize,
        volumes: &[String],
    ) -> Result<(), Error> {
        let mut receive = self.zfs.receive(&fs.pool)?;
        let Some(mut stdin) = receive.stdin() else {
            return Err(crate::zfs::Error::Pipe("receive has no stdin".to_string()).into());
        };

        debug!("restoring archive {index} to {}", fs.pool);

        for key in volumes {
            if let Err(error) = self.download(key, &mut stdin).await {
                warn!("restore failed for {}: archive {index} failed", fs.pool);
                drop(stdin);
                let _ = receive.finish().await;
                return Err(error);
            }
        }

        drop(stdin);
        receive.finish().await?;

        info!("archive {index} has been restored to {}", fs.pool);
        Ok(())
    }

    /// Streams one volume through ranged reads of part size windows.
    async fn download<W>(&self, key: &str, writer: &mut W) -> Result<(), Error>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let window = self.entry.part_size().max(1);
        let mut position = 0u64;

        for chunk in 1u64.. {
            let object = self
                .store
                .get_object(&self.entry.bucket, key, Some((position, position + window - 1)))
                .await?;

            writer
                .write_all(&object.content)
                .await
                .map_err(crate::zfs::Error::Io)?;

            if object.end + 1 >= object.size {
                info!("downloaded {key} ({} MB)", object.size / MEGABYTE);
                return Ok(());
            }

            debug!(
                "downloaded chunk {chunk} ({} MB) of {key}",
                object.content.len() as u64 / MEGABYTE
            );
            position = object.end + 1;
        }
        unreachable!("ranged reads terminate at end of object")
    }

    /// Replicates what the bucket is missing: a full stream for an empty
    /// catalogue, otherwise an increment on top of the last archive's
    /// manifest.
    pub async fn refresh(&self, fs: &FileSystem) -> Result<SendOutcome, Error> {
        let listing = self.zfs.list_snapshots(fs).await?;
        let archives = self.catalogue.verify(&fs.to_string())?;

        let sequence = archives.len();
        let path = format!("{fs}/{}", pad_number(sequence));

        if sequence == 0 {
            return self.full(&path, &listing).await;
        }

        let previous = format!("{fs}/{}/contents", pad_number(sequence - 1));
        let contents = self
            .store
            .get_object(&self.entry.bucket, &previous, None)
            .await?;

        let entries: Vec<ArchiveEntry> = serde_json::from_slice(&contents.content)?;
        let Some(last) = entries.last() else {
            return Err(Error::EmptyManifest(previous));
        };

        self.incremental(&path, &listing, &last.identity).await
    }

    async fn full(&self, path: &str, listing: &[SnapshotListing]) -> Result<SendOutcome, Error> {
        let Some(target) = listing.last() else {
            return Ok(SendOutcome::NoSnapshots);
        };
        self.send(path, None, &target.snapshot, listing).await
    }

    async fn incremental(
        &self,
        path: &str,
        listing: &[SnapshotListing],
        identity: &str,
    ) -> Result<SendOutcome, Error> {
        match locate_increment(listing, identity) {
            Increment::NotFound => Err(Error::SnapshotNotFound(identity.to_string())),
            Increment::UpToDate => Ok(SendOutcome::UpToDate),
            Increment::Slice { base, included } => {
                let target = &included[included.len() - 1];
                self.send(path, Some(&base.snapshot), &target.snapshot, included)
                    .await
            }
        }
    }

    /// Streams the replication into a new archive, commits its manifest, and
    /// lets the completion hook release superseded holds.
    async fn send(
        &self,
        path: &str,
        source: Option<&Snapshot>,
        target: &Snapshot,
        included: &[SnapshotListing],
    ) -> Result<SendOutcome, Error> {
        let completion = self.completion(included);
        let (reader, stream) = self.zfs.send(source, target, completion)?;

        let upload = Upload::new(
            Arc::clone(&self.store),
            &self.entry.bucket,
            path,
            self.entry.threads(),
            self.entry.part_size(),
            self.entry.volume_size(),
            self.token.clone(),
        );

        let details = upload.send(reader).await?;

        if let Err(error) = self.put_contents(&format!("{path}/contents"), included).await {
            self.discard_volumes(path, details.volumes).await;
            return Err(error);
        }

        stream.wait().await?;
        Ok(SendOutcome::Sent(details))
    }

    async fn put_contents(&self, path: &str, included: &[SnapshotListing]) -> Result<(), Error> {
        let contents: Vec<ArchiveEntry> = included
            .iter()
            .map(|item| ArchiveEntry {
                name: item.snapshot.addr.name.clone(),
                created: item.created,
                identity: item.identity.clone(),
            })
            .collect();

        let data = serde_json::to_vec(&contents)?;
        self.store
            .put_object(&self.entry.bucket, path, Bytes::from(data))
            .await?;
        Ok(())
    }

    /// Best effort removal of the volumes of an archive whose manifest never
    /// landed. Whatever remains is invisible to the next send anyway.
    async fn discard_volumes(&self, path: &str, volumes: usize) {
        for sequence in 0..volumes {
            let key = format!("{path}/{}", pad_number(sequence));
            if let Err(error) = self.store.delete_object(&self.entry.bucket, &key).await {
                warn!("could not discard volume '{key}': {error}");
            }
        }
    }

    /// Release the configured tags on every included snapshot except the
    /// newest, which stays held as the next incremental base. Runs only
    /// after a fully committed send.
    fn completion(&self, included: &[SnapshotListing]) -> Completion {
        let zfs = self.zfs.clone();
        let release = self.entry.release.clone();
        let superseded: Vec<Snapshot> = superseded(included)
            .iter()
            .map(|item| item.snapshot.clone())
            .collect();

        Box::new(move |cause| {
            let succeeded = cause.is_none();
            async move {
                if !succeeded {
                    return;
                }
                for snapshot in &superseded {
                    for tag in &release {
                        if let Err(error) = zfs.release_snapshot(snapshot, tag).await {
                            warn!("could not release '{tag}': {error}");
                        }
                    }
                }
            }
            .boxed()
        })
    }
}

/// The snapshots whose holds a successful send supersedes.
pub(crate) fn superseded(included: &[SnapshotListing]) -> &[SnapshotListing] {
    match included.len() {
        0 => included,
        n => &included[..n - 1],
    }
}

pub(crate) enum Increment<'a> {
    NotFound,
    UpToDate,
    Slice {
        base: &'a SnapshotListing,
        /// The base itself through the newest snapshot.
        included: &'a [SnapshotListing],
    },
}

/// Finds the incremental base by identity within a creation-ordered listing.
pub(crate) fn locate_increment<'a>(
    listing: &'a [SnapshotListing],
    identity: &str,
) -> Increment<'a> {
    for (index, item) in listing.iter().enumerate() {
        if item.identity == identity {
            if index == listing.len() - 1 {
                return Increment::UpToDate;
            }
            return Increment::Slice {
                base: item,
                included: &listing[index..],
            };
        }
    }
    Increment::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zfs::Address;
    use chrono::{TimeZone, Utc};

    fn listing(identities: &[&str]) -> Vec<SnapshotListing> {
        identities
            .iter()
            .enumerate()
            .map(|(index, identity)| SnapshotListing {
                snapshot: Snapshot {
                    addr: Address::parse(&format!("pool-0/test@daily-{index:05}"), '@').unwrap(),
                },
                created: Utc.with_ymd_and_hms(2021, 10, 1 + index as u32, 12, 0, 0).unwrap(),
                identity: identity.to_string(),
                transaction: index as u64,
                holds: vec!["backblaze".to_string()],
            })
            .collect()
    }

    #[test]
    fn increment_selects_from_the_base_to_the_newest() {
        let snapshots = listing(&["G1", "G2", "G3", "G4", "G5"]);

        match locate_increment(&snapshots, "G3") {
            Increment::Slice { base, included } => {
                assert_eq!(base.identity, "G3");
                let identities: Vec<&str> =
                    included.iter().map(|i| i.identity.as_str()).collect();
                assert_eq!(identities, vec!["G3", "G4", "G5"]);
            }
            _ => panic!("expected a slice"),
        }
    }

    #[test]
    fn increment_from_the_newest_is_up_to_date() {
        let snapshots = listing(&["G1", "G2", "G3"]);
        assert!(matches!(
            locate_increment(&snapshots, "G3"),
            Increment::UpToDate
        ));
    }

    #[test]
    fn increment_with_unknown_identity_is_not_found() {
        let snapshots = listing(&["G1", "G2"]);
        assert!(matches!(
            locate_increment(&snapshots, "GX"),
            Increment::NotFound
        ));
    }

    #[test]
    fn superseded_excludes_the_newest() {
        let snapshots = listing(&["G3", "G4", "G5"]);
        let kept: Vec<&str> = superseded(&snapshots)
            .iter()
            .map(|i| i.identity.as_str())
            .collect();
        assert_eq!(kept, vec!["G3", "G4"]);
    }

    #[test]
    fn superseded_of_one_is_empty() {
        let snapshots = listing(&["G1"]);
        assert!(superseded(&snapshots).is_empty());
    }
}
