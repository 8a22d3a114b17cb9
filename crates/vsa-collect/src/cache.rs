//! Raw per-source data cached between audit runs.
//!
//! Layout of the cache directory:
//! - `db.json`: joined database volume records
//! - `hv.json`: hypervisor inventories keyed by host
//! - `hv.hosts.json`: the host list `hv.json` was collected from
//! - `it.json`: target-daemon exports
//! - `.lock`: advisory lock held while an audit uses the cache

use crate::db::DbVolumeRecord;
use crate::inventory::HvInventory;
use crate::parse::TargetEntry;
use chrono::Utc;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DB_FILE: &str = "db.json";
pub const HV_FILE: &str = "hv.json";
pub const HV_HOSTS_FILE: &str = "hv.hosts.json";
pub const TARGETS_FILE: &str = "it.json";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache encode error at {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache at {0} is in use by another audit")]
    Busy(PathBuf),
}

/// Sources found in the cache; `None` means the source must be collected.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CachedSources {
    pub database: Option<Vec<DbVolumeRecord>>,
    pub hypervisors: Option<BTreeMap<String, HvInventory>>,
    pub targets: Option<Vec<TargetEntry>>,
}

/// Exclusive hold on a cache directory, released on drop.
pub struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Debug, Clone)]
pub struct AuditCache {
    dir: PathBuf,
}

impl AuditCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Takes the advisory lock, creating the cache directory if needed.
    pub fn lock(&self) -> Result<CacheLock, CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| self.io_error(&self.dir, source))?;
        let path = self.dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| self.io_error(&path, source))?;

        if file.try_lock_exclusive().is_err() {
            return Err(CacheError::Busy(self.dir.clone()));
        }

        let metadata = format!(
            "owner_pid={}\nacquired_at={}\n",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        file.set_len(0)
            .and_then(|_| file.write_all(metadata.as_bytes()))
            .and_then(|_| file.flush())
            .map_err(|source| self.io_error(&path, source))?;

        Ok(CacheLock { file })
    }

    /// Removes the cached source files. Other files in the directory stay.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for name in [DB_FILE, HV_FILE, HV_HOSTS_FILE, TARGETS_FILE] {
            let path = self.dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(self.io_error(&path, source)),
            }
        }
        info!(dir = %self.dir.display(), removed, "cleared cache");
        Ok(removed)
    }

    /// Loads whatever the cache can supply for `hosts`. When the cached host
    /// list does not cover every requested host, nothing is reused. The
    /// hypervisor data is only reused together with its host list and is
    /// narrowed to `hosts`.
    pub fn load(&self, hosts: &[String]) -> CachedSources {
        let cached_hosts: Option<Vec<String>> = self.read(HV_HOSTS_FILE);
        if let Some(cached_hosts) = &cached_hosts {
            let known = cached_hosts.iter().collect::<BTreeSet<_>>();
            if let Some(missing) = hosts.iter().find(|host| !known.contains(host)) {
                info!(host = %missing, "cached host list is stale; collecting everything");
                return CachedSources::default();
            }
        }

        let hypervisors = if cached_hosts.is_some() {
            self.read::<BTreeMap<String, HvInventory>>(HV_FILE)
                .map(|mut inventories| {
                    inventories.retain(|host, _| hosts.contains(host));
                    inventories
                })
        } else {
            None
        };

        CachedSources {
            database: self.read(DB_FILE),
            hypervisors,
            targets: self.read(TARGETS_FILE),
        }
    }

    pub fn store_database(&self, records: &[DbVolumeRecord]) -> Result<(), CacheError> {
        self.write(DB_FILE, &records)
    }

    pub fn store_hypervisors(
        &self,
        inventories: &BTreeMap<String, HvInventory>,
    ) -> Result<(), CacheError> {
        self.write(HV_FILE, inventories)
    }

    pub fn store_hosts(&self, hosts: &[String]) -> Result<(), CacheError> {
        self.write(HV_HOSTS_FILE, &hosts)
    }

    pub fn store_targets(&self, targets: &[TargetEntry]) -> Result<(), CacheError> {
        self.write(TARGETS_FILE, &targets)
    }

    // A missing or unreadable file is a cache miss, never an error.
    fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "cache miss");
                return None;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable cache file");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => {
                debug!(path = %path.display(), "cache hit");
                Some(value)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt cache file");
                None
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| self.io_error(&self.dir, source))?;
        let path = self.dir.join(name);
        let encoded = serde_json::to_string(value).map_err(|source| CacheError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, encoded).map_err(|source| self.io_error(&path, source))
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
