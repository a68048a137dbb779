//! Content-addressed backup store
//!
//! Prior versions of a unit's source are kept as
//! `<dir>/<unit>_<yyyyMMdd_HHmmss>[_N].<ext>`, one file per distinct content
//! hash. Records are never deleted by the runtime.

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use hotswap_kernel::{HotswapResult, LoadOrigin, Namespace};

use crate::loader::{SourceImage, UnitLoaders};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Hex-encoded SHA-256 of some bytes
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// One stored version of a unit's source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Unit name
    pub unit: String,
    /// Content hash, `None` when the file could not be read
    pub hash: Option<String>,
    /// Storage location
    pub path: PathBuf,
    /// `yyyyMMdd_HHmmss` identifier
    pub stamp: String,
    /// Disambiguates versions saved within the same second
    pub sequence: u32,
    /// Creation time parsed from the identifier
    pub created_at: NaiveDateTime,
}

impl BackupRecord {
    fn order_key(&self) -> (&str, u32) {
        (&self.stamp, self.sequence)
    }
}

/// A unit namespace loaded from a backup record
pub struct RestoredUnit {
    pub record: BackupRecord,
    pub image: SourceImage,
    pub namespace: Arc<dyn Namespace>,
}

impl RestoredUnit {
    pub fn origin(&self) -> LoadOrigin {
        LoadOrigin::Backup
    }
}

/// Append-only, hash-deduplicated store of unit sources
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    /// Open the store, creating the directory if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!("Backup store opened at {:?}", dir);
        Ok(Self { dir })
    }

    /// Backup directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn name_pattern(unit: &str) -> io::Result<Regex> {
        let pattern = format!(
            r"^{}_(\d{{8}}_\d{{6}})(?:_(\d+))?\.([A-Za-z0-9]+)$",
            regex::escape(unit)
        );
        Regex::new(&pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    /// All records for a unit, oldest first
    pub fn records(&self, unit: &str) -> HotswapResult<Vec<BackupRecord>> {
        let pattern = Self::name_pattern(unit)?;
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(caps) = pattern.captures(file_name) else {
                continue;
            };

            let stamp = caps[1].to_string();
            let Ok(created_at) = NaiveDateTime::parse_from_str(&stamp, STAMP_FORMAT) else {
                continue;
            };
            let sequence = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);

            let path = entry.path();
            let hash = match fs::read(&path) {
                Ok(bytes) => Some(content_hash(&bytes)),
                Err(e) => {
                    warn!("Cannot hash backup {:?}: {}", path, e);
                    None
                }
            };

            records.push(BackupRecord {
                unit: unit.to_string(),
                hash,
                path,
                stamp,
                sequence,
                created_at,
            });
        }

        records.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Ok(records)
    }

    /// Most recent record for a unit
    pub fn latest(&self, unit: &str) -> HotswapResult<Option<BackupRecord>> {
        Ok(self.records(unit)?.pop())
    }

    /// Store `bytes` as a new version of `unit`, unless a record with the
    /// same content hash already exists, in which case that record is
    /// returned and nothing is written.
    pub fn save(&self, unit: &str, bytes: &[u8], extension: &str) -> HotswapResult<BackupRecord> {
        let hash = content_hash(bytes);
        let existing = self.records(unit)?;

        if let Some(record) = existing
            .iter()
            .find(|r| r.hash.as_deref() == Some(hash.as_str()))
        {
            debug!("Backup already exists with same hash for {}", unit);
            return Ok(record.clone());
        }

        let now = Local::now().naive_local();
        let stamp = now.format(STAMP_FORMAT).to_string();
        let sequence = existing
            .iter()
            .filter(|r| r.stamp == stamp)
            .map(|r| r.sequence + 1)
            .max()
            .unwrap_or(0);

        let extension = if extension.is_empty() { "src" } else { extension };
        let file_name = if sequence == 0 {
            format!("{}_{}.{}", unit, stamp, extension)
        } else {
            format!("{}_{}_{}.{}", unit, stamp, sequence, extension)
        };
        let path = self.dir.join(file_name);

        fs::write(&path, bytes)?;
        info!("Created new backup of {} at {:?}", unit, path);

        let created_at = NaiveDateTime::parse_from_str(&stamp, STAMP_FORMAT).unwrap_or(now);
        Ok(BackupRecord {
            unit: unit.to_string(),
            hash: Some(hash),
            path,
            stamp,
            sequence,
            created_at,
        })
    }

    /// Load the most recent backup of `unit` into a fresh namespace.
    ///
    /// Returns `None` when no record exists or the newest record fails to
    /// load; older records are not tried.
    pub fn load_latest(&self, unit: &str, loaders: &UnitLoaders) -> Option<RestoredUnit> {
        let record = match self.latest(unit) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No backup files found for {}", unit);
                return None;
            }
            Err(e) => {
                warn!("Cannot list backups for {}: {}", unit, e);
                return None;
            }
        };

        info!("Attempting to load {} from backup: {:?}", unit, record.path);
        match loaders.load_path(unit, &record.path) {
            Ok((image, namespace)) => Some(RestoredUnit {
                record,
                image,
                namespace,
            }),
            Err(e) => {
                warn!("Error loading {} from backup {:?}: {}", unit, record.path, e);
                None
            }
        }
    }
}
