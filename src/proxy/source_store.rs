//! Process-wide registry of configured upstream data sources.
//!
//! The registry is the only cross-request mutable state besides the token
//! cache. It is constructed once at startup and handed by `Arc` to the
//! components that need it; when a data directory is supplied, every
//! mutation is mirrored to one JSON file per source.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modules::sources as fs_sources;
use crate::proxy::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Https => f.write_str("https"),
        }
    }
}

/// Public view of a configured source. Never carries the password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub platform: Platform,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: String,
    pub has_credentials: bool,
}

/// Persisted form of a source, including the credential needed to replay
/// the initial password grant after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub platform: Platform,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub created_at: i64,
}

impl SourceRecord {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn summary(&self) -> DataSource {
        DataSource {
            id: self.id.clone(),
            platform: self.platform,
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol,
            username: self.username.clone(),
            has_credentials: self.password.is_some(),
        }
    }
}

pub struct SourceStore {
    sources: DashMap<String, SourceRecord>,
    /// Insertion order; lookup helpers treat the first entry per platform
    /// as "the" active source.
    order: Mutex<Vec<String>>,
    data_dir: Option<PathBuf>,
}

impl SourceStore {
    /// `data_dir = None` keeps the registry purely in-memory (tests).
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Self {
            sources: DashMap::new(),
            order: Mutex::new(Vec::new()),
            data_dir,
        }
    }

    /// Populate the registry from disk. Returns the number of sources loaded.
    pub fn load(&self) -> Result<usize, String> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(0);
        };

        let records = fs_sources::load_sources(data_dir)?;
        let count = records.len();

        self.sources.clear();
        let mut order = self
            .order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        order.clear();

        for record in records {
            order.push(record.id.clone());
            self.sources.insert(record.id.clone(), record);
        }

        Ok(count)
    }

    /// Register a new source and persist it when a data directory is set.
    pub fn add(
        &self,
        platform: Platform,
        host: String,
        port: u16,
        protocol: Protocol,
        username: String,
        password: Option<String>,
    ) -> Result<SourceRecord, String> {
        let record = SourceRecord {
            id: Uuid::new_v4().to_string(),
            platform,
            host,
            port,
            protocol,
            username,
            password,
            created_at: chrono::Utc::now().timestamp(),
        };

        if let Some(data_dir) = &self.data_dir {
            fs_sources::save_source(data_dir, &record)?;
        }

        self.order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.id.clone());
        self.sources.insert(record.id.clone(), record.clone());

        tracing::info!(
            "configured {} source {} ({}://{}:{})",
            record.platform,
            record.id,
            record.protocol,
            record.host,
            record.port
        );

        Ok(record)
    }

    pub fn get(&self, source_id: &str) -> Option<SourceRecord> {
        self.sources.get(source_id).map(|entry| entry.value().clone())
    }

    /// First configured source for `platform`, in insertion order.
    pub fn find_by_platform(&self, platform: Platform) -> Option<SourceRecord> {
        let order = self
            .order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in order.iter() {
            if let Some(entry) = self.sources.get(id) {
                if entry.platform == platform {
                    return Some(entry.value().clone());
                }
            }
        }
        None
    }

    /// Public summaries in insertion order.
    pub fn list(&self) -> Vec<DataSource> {
        let order = self
            .order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        order
            .iter()
            .filter_map(|id| self.sources.get(id).map(|entry| entry.summary()))
            .collect()
    }

    pub fn remove(&self, source_id: &str) -> Result<(), String> {
        if self.sources.remove(source_id).is_none() {
            return Err(format!("source not found: {}", source_id));
        }

        self.order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|id| id != source_id);

        if let Some(data_dir) = &self.data_dir {
            fs_sources::delete_source(data_dir, source_id)?;
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
