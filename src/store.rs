use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

pub use self::error::StoreError;
pub use self::models::AnnouncementRecord;

use crate::config::{Config, StoreBackendKind};

pub mod error;
pub mod models;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    File(PathBuf),
    Memory,
}

impl StoreBackend {
    pub fn from_config(config: &Config) -> Self {
        match config.store.backend {
            StoreBackendKind::File => Self::File(config.store_path()),
            StoreBackendKind::Memory => Self::Memory,
        }
    }
}

/// Channel id to message id of the most recent announcement in that channel.
pub struct AnnouncementStore {
    backend: StoreBackend,
    records: Mutex<BTreeMap<String, String>>,
}

impl AnnouncementStore {
    /// Never fails: unreadable or corrupt data starts an empty mapping.
    pub async fn load(backend: StoreBackend) -> Self {
        let records = match &backend {
            StoreBackend::File(path) => read_mapping(path).await,
            StoreBackend::Memory => BTreeMap::new(),
        };
        debug!("announcement store loaded with {} records", records.len());

        Self {
            backend,
            records: Mutex::new(records),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn lookup(&self, channel_id: &str) -> Option<String> {
        self.records.lock().get(channel_id).cloned()
    }

    /// The in-memory entry is updated even when persisting fails.
    pub async fn record(&self, channel_id: &str, message_id: &str) -> Result<(), StoreError> {
        let snapshot = {
            let mut records = self.records.lock();
            records.insert(channel_id.to_string(), message_id.to_string());
            records.clone()
        };

        match &self.backend {
            StoreBackend::File(path) => write_mapping(path, &snapshot).await,
            StoreBackend::Memory => Ok(()),
        }
    }

    pub fn records(&self) -> Vec<AnnouncementRecord> {
        self.records
            .lock()
            .iter()
            .map(|(channel_id, message_id)| AnnouncementRecord {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

async fn read_mapping(path: &Path) -> BTreeMap<String, String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) => {
            info!(
                "{} could not be read ({}), starting with an empty record set",
                path.display(),
                err
            );
            return BTreeMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(records) => records,
        Err(err) => {
            info!(
                "{} is not a valid record file ({}), it will be recreated",
                path.display(),
                err
            );
            BTreeMap::new()
        }
    }
}

async fn write_mapping(path: &Path, records: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let body = serde_json::to_string_pretty(records)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
