//! On-disk session store.
//!
//! Keeps cookies per egress identity and the proxy health counters between
//! runs so a second run resumes with warm sessions instead of cold ones.
//! Browser profile directories live next to the database file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

use crate::modules::proxy::ProxyStats;

const COOKIES: TableDefinition<&str, &str> = TableDefinition::new("cookies");
const PROXY_HEALTH: TableDefinition<&str, &str> = TableDefinition::new("proxy_health");

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store database error: {0}")]
    Database(#[from] redb::Error),
    #[error("session store holds malformed proxy stats: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Cookie header value saved for one host under one egress identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookies {
    pub host: String,
    pub header: String,
}

pub struct SessionStore {
    path: PathBuf,
    db: Database,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("path", &self.path).finish()
    }
}

impl SessionStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(redb::Error::from)?;

        // Create both tables up front so read transactions never see a
        // missing table.
        let txn = db.begin_write().map_err(redb::Error::from)?;
        {
            txn.open_table(COOKIES).map_err(redb::Error::from)?;
            txn.open_table(PROXY_HEALTH).map_err(redb::Error::from)?;
        }
        txn.commit().map_err(redb::Error::from)?;

        log::debug!("session store opened at {}", path.display());
        Ok(Self { path, db })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding one browser profile per egress identity.
    pub fn profile_root(&self) -> PathBuf {
        let mut dir = self.path.clone().into_os_string();
        dir.push(".profiles");
        PathBuf::from(dir)
    }

    /// Browser profile directory for an egress identity.
    pub fn profile_dir(&self, identity: &str) -> PathBuf {
        self.profile_root().join(profile_dir_name(identity))
    }

    pub fn load_cookies(&self, identity: &str) -> Result<Vec<StoredCookies>, SessionStoreError> {
        let prefix = format!("{identity}|");
        let txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = txn.open_table(COOKIES).map_err(redb::Error::from)?;

        let mut stored = Vec::new();
        for item in table.iter().map_err(redb::Error::from)? {
            let (key, value) = item.map_err(redb::Error::from)?;
            if let Some(host) = key.value().strip_prefix(&prefix) {
                stored.push(StoredCookies {
                    host: host.to_string(),
                    header: value.value().to_string(),
                });
            }
        }
        Ok(stored)
    }

    pub fn save_cookies(
        &self,
        identity: &str,
        cookies: &[StoredCookies],
    ) -> Result<(), SessionStoreError> {
        let txn = self.db.begin_write().map_err(redb::Error::from)?;
        {
            let mut table = txn.open_table(COOKIES).map_err(redb::Error::from)?;
            for entry in cookies {
                let key = format!("{identity}|{}", entry.host);
                table
                    .insert(key.as_str(), entry.header.as_str())
                    .map_err(redb::Error::from)?;
            }
        }
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }

    pub fn load_proxy_stats(&self) -> Result<HashMap<String, ProxyStats>, SessionStoreError> {
        let txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = txn.open_table(PROXY_HEALTH).map_err(redb::Error::from)?;

        let mut stats = HashMap::new();
        for item in table.iter().map_err(redb::Error::from)? {
            let (key, value) = item.map_err(redb::Error::from)?;
            stats.insert(
                key.value().to_string(),
                serde_json::from_str(value.value())?,
            );
        }
        Ok(stats)
    }

    pub fn save_proxy_stats(&self, stats: &[(String, ProxyStats)]) -> Result<(), SessionStoreError> {
        let txn = self.db.begin_write().map_err(redb::Error::from)?;
        {
            let mut table = txn.open_table(PROXY_HEALTH).map_err(redb::Error::from)?;
            for (identity, entry) in stats {
                let encoded = serde_json::to_string(entry)?;
                table
                    .insert(identity.as_str(), encoded.as_str())
                    .map_err(redb::Error::from)?;
            }
        }
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }
}

/// File-system safe directory name for an egress identity.
pub fn profile_dir_name(identity: &str) -> String {
    identity
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}
