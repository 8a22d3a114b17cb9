//! Record suppliers for the audit: remote collection, vendor output parsing,
//! database joins, normalization and the on-disk cache of raw source data.

use std::path::PathBuf;
use thiserror::Error;

pub mod cache;
pub mod collector;
pub mod db;
pub mod hosts;
pub mod inventory;
pub mod normalize;
pub mod parse;
pub mod remote;

pub use cache::{AuditCache, CacheError, CacheLock, CachedSources};
pub use collector::{CollectSettings, Collector};
pub use db::{DbInstance, DbVolume, DbVolumeRecord};
pub use hosts::expand_hosts;
pub use inventory::{Domain, DomainVolume, HvInventory, IscsiSession};
pub use parse::TargetEntry;
pub use remote::{CommandOutput, RemoteExec, SystemExec};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to launch {program}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("invalid host expression {expr:?}: {reason}")]
    HostExpression { expr: String, reason: String },
    #[error("invalid inventory json from {host}")]
    InventoryJson {
        host: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("inventory agent not found at {0}")]
    MissingAgent(PathBuf),
}
