// SPDX-License-Identifier: AGPL-3.0-or-later
//! Edge-state tracker: the record of currently-raised (device, alarm) pairs.
//!
//! Keys are vendor-prefixed, comma-delimited composites; values carry
//! `<plantName>,<causeOrMessage>,<raiseTime>`. A record is written when an
//! active alarm is first observed and deleted when the evaluator sees the
//! device back to normal, at which instant exactly one CLEAR trap goes out.

use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{DataError, Result};

const SCAN_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub db: i64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        let auth = match (self.username.is_empty(), self.password.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!(":{}@", self.password),
            (false, _) => format!("{}:{}@", self.username, self.password),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }
}

/// The narrow key/value capability the evaluators need: set without expiry,
/// get, delete, and cursor-based scan. Any store providing these is
/// acceptable; production uses Redis.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn mark_active(&self, key: &str, value: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn forget(&self, key: &str) -> Result<()>;
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;
}

pub struct RedisTracker {
    conn: Mutex<ConnectionManager>,
}

impl RedisTracker {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = config.url();
        info!(host = %config.host, port = config.port, db = config.db, "connecting to redis");
        let client = redis::Client::open(url)
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisTracker {
    async fn mark_active(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        // The iteration is complete only once the cursor wraps back to 0.
        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_PAGE_SIZE)
                .query_async(&mut *conn)
                .await?;

            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

/// In-memory implementation for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Tracker patterns only use `*`; that is all this needs to support.
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn mark_active(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_includes_auth_and_db() {
        let config = RedisConfig {
            host: "cache.local".to_string(),
            port: 6379,
            username: String::new(),
            password: "secret".to_string(),
            db: 2,
        };
        assert_eq!(config.url(), "redis://:secret@cache.local:6379/2");

        let anon = RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: String::new(),
            password: String::new(),
            db: 0,
        };
        assert_eq!(anon.url(), "redis://localhost:6379/0");
    }

    #[tokio::test]
    async fn mark_then_scan_returns_key_exactly_once() {
        let store = MemoryStore::new();
        store
            .mark_active("Huawei,NE=101,SN1,INV-01,Disconnect", "P1,Disconnect,171000")
            .await
            .unwrap();

        let keys = store.scan("Huawei,NE=101,SN1,INV-01,*").await.unwrap();
        assert_eq!(keys, vec!["Huawei,NE=101,SN1,INV-01,Disconnect"]);

        for key in keys {
            store.forget(&key).await.unwrap();
        }
        assert!(store.scan("Huawei,*").await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn scan_is_scoped_to_the_pattern() {
        let store = MemoryStore::new();
        store.mark_active("Kstar,1,2,a,Fault", "P,t").await.unwrap();
        store.mark_active("Kstar,1,3,b,Fault", "P,t").await.unwrap();
        store
            .mark_active("Huawei,1,2,a,Fault", "P,c,t")
            .await
            .unwrap();

        let keys = store.scan("Kstar,1,2,a,*").await.unwrap();
        assert_eq!(keys, vec!["Kstar,1,2,a,Fault"]);

        let vendor_scoped = store.scan("Kstar,*").await.unwrap();
        assert_eq!(vendor_scoped.len(), 2);
    }

    #[test]
    fn glob_match_supports_middle_star() {
        assert!(glob_match("INVT-Ipanda,7,INVERTER,SN,9,*", "INVT-Ipanda,7,INVERTER,SN,9,Fault"));
        assert!(!glob_match("INVT-Ipanda,7,INVERTER,SN,9,*", "INVT-Ipanda,7,INVERTER,SN,8,Fault"));
        assert!(glob_match("*,Disconnect", "42,PlantA,INVERTER,Disconnect"));
    }
}
