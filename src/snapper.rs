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

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::catalogue::pad_number;
use crate::config::{Settings, SnapEntry};
use crate::zfs::{Address, Addressable, FileSystem, Snapshot, SnapshotListing, Zfs};
use crate::Error;

/// Mints scheduled snapshots, one schedule at a time.
pub struct Snapper<'a> {
    zfs: Zfs,
    settings: &'a Settings,
}

impl<'a> Snapper<'a> {
    pub fn new(zfs: Zfs, settings: &'a Settings) -> Self {
        Self { zfs, settings }
    }

    /// Creates whatever snapshots are due; returns the addresses created.
    pub async fn snap(&self) -> Vec<String> {
        let mut snapshots = Vec::new();

        for (target, file_system) in &self.settings.file_systems {
            if file_system.snap.is_empty() {
                info!("skipping snapshot on '{target}': no entries");
                continue;
            }

            let fs: FileSystem = match target.parse() {
                Ok(fs) => fs,
                Err(error) => {
                    warn!("skipping snapshot on '{target}': failed parsing file system ({error})");
                    continue;
                }
            };

            for entry in &file_system.snap {
                match self.snap_one(&fs, entry).await {
                    Ok(Some(snapshot)) => {
                        let address = snapshot.address();
                        info!("created snapshot '{address}' on '{target}'");
                        snapshots.push(address);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(
                            "failed creating snapshot '{}' on '{target}': {error}",
                            entry.prefix
                        );
                    }
                }
            }
        }
        snapshots
    }

    /// Creates a snapshot for one schedule if its newest prefixed snapshot
    /// has expired. Hold failures are logged and skipped; holds are
    /// advisory.
    async fn snap_one(
        &self,
        fs: &FileSystem,
        entry: &SnapEntry,
    ) -> Result<Option<Snapshot>, Error> {
        let interval = Duration::from_std(entry.interval()?).unwrap_or(Duration::MAX);

        let listing = self.zfs.list_snapshots(fs).await?;

        if !expired(&entry.prefix, interval, &listing, Utc::now()) {
            return Ok(None);
        }

        let snapshot = next_snap(fs, &entry.prefix, &listing);
        self.zfs.create_snapshot(&snapshot).await?;

        for tag in &entry.hold {
            if let Err(error) = self.zfs.hold_snapshot(&snapshot, tag).await {
                warn!(
                    "failed to apply hold '{tag}' to snapshot '{}': {error}",
                    snapshot.address()
                );
            }
        }
        Ok(Some(snapshot))
    }
}

/// The next snapshot name for a prefix: one past the highest existing
/// `prefix-<digits>` suffix, starting at 00000.
pub(crate) fn next_snap(
    fs: &FileSystem,
    prefix: &str,
    listing: &[SnapshotListing],
) -> Snapshot {
    let token = format!("{prefix}-");

    let mut last: i64 = -1;
    for item in listing {
        if item.snapshot.addr.file_system != *fs {
            continue;
        }
        let name = &item.snapshot.addr.name;
        if let Some((_, suffix)) = name.rsplit_once(&token) {
            if let Ok(sequence) = suffix.parse::<i64>() {
                if sequence > last {
                    last = sequence;
                }
            }
        }
    }

    Snapshot {
        addr: Address {
            file_system: fs.clone(),
            name: format!("{token}{}", pad_number((last + 1) as usize)),
        },
    }
}

/// A schedule has expired when no prefixed snapshot is younger than the
/// interval.
pub(crate) fn expired(
    prefix: &str,
    interval: Duration,
    listing: &[SnapshotListing],
    now: DateTime<Utc>,
) -> bool {
    let token = format!("{prefix}-");
    let cutoff = now - interval;

    !listing
        .iter()
        .any(|item| item.snapshot.addr.name.starts_with(&token) && item.created > cutoff)
}
