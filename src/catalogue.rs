use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static VOLUME_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<fs>[^/]+/[^/]+)/(?P<archive>\d+)/(?P<volume>\d+)$").unwrap()
});

static MANIFEST_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<fs>[^/]+/[^/]+)/(?P<archive>\d+)/contents$").unwrap());

/// Renders a sequence number the way object keys and snapshot names carry it.
pub fn pad_number(number: usize) -> String {
    format!("{:05}", number)
}

/// An item recorded in an archive manifest.
///
/// The last entry's identity is the incremental base for the next archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub created: DateTime<Utc>,
    pub identity: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogueError {
    #[error("missing archive {archive} for {file_system}")]
    MissingArchive {
        archive: usize,
        file_system: String,
    },

    #[error("missing volume {volume} for archive {archive} for {file_system}")]
    MissingVolume {
        volume: usize,
        archive: usize,
        file_system: String,
    },
}

/// The volume keys stored for a bucket, indexed per file system by archive
/// and volume sequence number.
#[derive(Debug, Default)]
pub struct Catalogue {
    volumes: HashMap<String, HashMap<usize, HashMap<usize, String>>>,
    manifests: HashMap<String, Vec<usize>>,
}

impl Catalogue {
    /// Classifies a full key listing. Keys that are not volumes or manifests
    /// are ignored.
    pub fn load<S: AsRef<str>>(&mut self, listing: &[S]) {
        for item in listing {
            let item = item.as_ref();
            if let Some(groups) = VOLUME_KEY.captures(item) {
                let archive = groups["archive"].parse::<usize>();
                let volume = groups["volume"].parse::<usize>();
                if let (Ok(archive), Ok(volume)) = (archive, volume) {
                    self.add(&groups["fs"], archive, volume, item);
                }
            } else if let Some(groups) = MANIFEST_KEY.captures(item) {
                if let Ok(archive) = groups["archive"].parse::<usize>() {
                    self.manifests
                        .entry(groups["fs"].to_string())
                        .or_default()
                        .push(archive);
                }
            }
        }
    }

    fn add(&mut self, file_system: &str, archive: usize, volume: usize, key: &str) {
        self.volumes
            .entry(file_system.to_string())
            .or_default()
            .entry(archive)
            .or_default()
            .insert(volume, key.to_string());
    }

    /// Returns the committed archives for a file system as ordered lists of
    /// volume keys, outer index = archive, inner order = volume.
    ///
    /// Archive and volume numbering must be dense. Trailing archives without
    /// a manifest are absent from the result: the manifest is the archive's
    /// commit record, so an interrupted send leaves volumes that the next
    /// send overwrites.
    pub fn verify(&self, file_system: &str) -> Result<Vec<Vec<String>>, CatalogueError> {
        let mut verified = Vec::new();

        let Some(archives) = self.volumes.get(file_system) else {
            return Ok(verified);
        };

        for archive in 0..archives.len() {
            let Some(volumes) = archives.get(&archive) else {
                return Err(CatalogueError::MissingArchive {
                    archive,
                    file_system: file_system.to_string(),
                });
            };

            let mut keys = Vec::with_capacity(volumes.len());
            for volume in 0..volumes.len() {
                match volumes.get(&volume) {
                    Some(key) => keys.push(key.clone()),
                    None => {
                        return Err(CatalogueError::MissingVolume {
                            volume,
                            archive,
                            file_system: file_system.to_string(),
                        })
                    }
                }
            }
            verified.push(keys);
        }

        let manifests = self.manifests.get(file_system);
        while !verified.is_empty() {
            let last = verified.len() - 1;
            let committed = manifests.map(|m| m.contains(&last)).unwrap_or(false);
            if committed {
                break;
            }
            verified.pop();
        }

        Ok(verified)
    }
}
