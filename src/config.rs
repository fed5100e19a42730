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

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default number of concurrent part uploads.
pub const THREADS: usize = 10;

/// Default volume size in megabytes.
pub const VOLUME_SIZE: u64 = 200;

/// Default part size in megabytes.
pub const PART_SIZE: u64 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to load settings from {path} ({source})")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("unable to unmarshal settings from {path} ({source})")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("could not parse interval '{interval}': {source}")]
    Interval {
        interval: String,
        source: humantime::DurationError,
    },

    #[error("missing {0}")]
    Missing(&'static str),
}

/// Settings represents the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub file_systems: HashMap<String, FileSystemSettings>,

    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default = "default_volume_size")]
    pub volume_size: u64,

    #[serde(default = "default_part_size")]
    pub part_size: u64,
}

/// Per file system settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemSettings {
    #[serde(default)]
    pub snap: Vec<SnapEntry>,

    #[serde(default)]
    pub send: Vec<SendEntry>,
}

/// Options for a snapshot schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapEntry {
    pub interval: String,
    pub prefix: String,

    #[serde(default)]
    pub hold: Vec<String>,
}

/// Options for a replication target.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEntry {
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub account: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub release: Vec<String>,

    pub threads: Option<usize>,
    pub volume_size: Option<u64>,
    pub part_size: Option<u64>,
}

fn default_threads() -> usize {
    THREADS
}

fn default_volume_size() -> u64 {
    VOLUME_SIZE
}

fn default_part_size() -> u64 {
    PART_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            file_systems: HashMap::new(),
            threads: THREADS,
            volume_size: VOLUME_SIZE,
            part_size: PART_SIZE,
        }
    }
}

impl Settings {
    /// Load settings from a JSON encoded configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

impl SnapEntry {
    /// The configured interval as a duration.
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.interval).map_err(|source| ConfigError::Interval {
            interval: self.interval.clone(),
            source,
        })
    }
}

impl SendEntry {
    /// Inherit unset values from the top level settings. Zero counts as
    /// unset.
    pub fn inherit(&self, settings: &Settings) -> SendEntry {
        let mut entry = self.clone();
        entry.threads = entry.threads.filter(|v| *v > 0).or(Some(settings.threads));
        entry.volume_size = entry
            .volume_size
            .filter(|v| *v > 0)
            .or(Some(settings.volume_size));
        entry.part_size = entry
            .part_size
            .filter(|v| *v > 0)
            .or(Some(settings.part_size));
        entry
    }

    /// Checks that the entry names everything a connection needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::Missing("endpoint"));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        if self.account.is_empty() {
            return Err(ConfigError::Missing("account"));
        }
        if self.secret.is_empty() {
            return Err(ConfigError::Missing("secret"));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::Missing("bucket name"));
        }
        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.threads.unwrap_or(THREADS)
    }

    /// Volume size in bytes.
    pub fn volume_size(&self) -> u64 {
        self.volume_size.unwrap_or(VOLUME_SIZE) * crate::MEGABYTE
    }

    /// Part size in bytes.
    pub fn part_size(&self) -> u64 {
        self.part_size.unwrap_or(PART_SIZE) * crate::MEGABYTE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = r#"
    {
        "fileSystems": {
            "pool-0/test": {
                "snap": [
                    {
                        "interval": "23h30m",
                        "prefix": "daily",
                        "hold": ["backblaze"]
                    },
                    {
                        "interval": "30m",
                        "prefix": "hourly"
                    }
                ],
                "send": [
                    {
                        "endpoint": "s3.eu-central-003.backblazeb2.com",
                        "region": "eu-central-003",
                        "account": "123456789",
                        "secret": "SSSSHH",
                        "bucket": "bucket",
                        "release": ["backblaze"]
                    }
                ]
            }
        },
        "threads": 20,
        "volumeSize": 150000,
        "partSize": 200
    }
    "#;

    #[test]
    fn read_settings() {
        let settings: Settings = serde_json::from_str(RAW).unwrap();

        assert_eq!(settings.threads, 20);
        assert_eq!(settings.volume_size, 150_000);
        assert_eq!(settings.part_size, 200);
        assert!(settings.file_systems.contains_key("pool-0/test"));

        let target = &settings.file_systems["pool-0/test"];

        assert_eq!(target.snap.len(), 2);
        assert_eq!(target.snap[0].prefix, "daily");
        assert_eq!(
            target.snap[0].interval().unwrap(),
            Duration::from_secs((23 * 60 + 30) * 60)
        );
        assert_eq!(target.snap[0].hold, vec!["backblaze"]);

        assert_eq!(target.snap[1].prefix, "hourly");
        assert_eq!(
            target.snap[1].interval().unwrap(),
            Duration::from_secs(30 * 60)
        );

        assert_eq!(target.send.len(), 1);
        assert_eq!(target.send[0].endpoint, "s3.eu-central-003.backblazeb2.com");
        assert_eq!(target.send[0].region, "eu-central-003");
        assert_eq!(target.send[0].account, "123456789");
        assert_eq!(target.send[0].secret, "SSSSHH");
        assert_eq!(target.send[0].bucket, "bucket");
        assert_eq!(target.send[0].release[0], "backblaze");
    }

    #[test]
    fn inherit_fills_unset_values() {
        let settings: Settings = serde_json::from_str(RAW).unwrap();
        let entry = settings.file_systems["pool-0/test"].send[0].inherit(&settings);

        assert_eq!(entry.threads(), 20);
        assert_eq!(entry.volume_size(), 150_000 * crate::MEGABYTE);
        assert_eq!(entry.part_size(), 200 * crate::MEGABYTE);
    }

    #[test]
    fn inherit_keeps_explicit_values() {
        let settings: Settings = serde_json::from_str(RAW).unwrap();
        let mut entry = settings.file_systems["pool-0/test"].send[0].clone();
        entry.threads = Some(3);

        let entry = entry.inherit(&settings);
        assert_eq!(entry.threads(), 3);
        assert_eq!(entry.volume_size(), 150_000 * crate::MEGABYTE);
    }

    #[test]
    fn validate_requires_connection_fields() {
        let mut entry = SendEntry::default();
        assert!(matches!(
            entry.validate(),
            Err(ConfigError::Missing("endpoint"))
        ));

        entry.endpoint = "s3.example.com".into();
        assert!(matches!(
            entry.validate(),
            Err(ConfigError::Missing("region"))
        ));

        entry.region = "eu-central-003".into();
        entry.account = "account".into();
        entry.secret = "secret".into();
        assert!(matches!(
            entry.validate(),
            Err(ConfigError::Missing("bucket name"))
        ));

        entry.bucket = "bucket".into();
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/snapr.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapr.conf");
        std::fs::write(&path, RAW).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.threads, 20);
    }
}
