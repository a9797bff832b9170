//! SQLite Lock Backend
//!
//! Persistent lock records backed by SQLite. Several replicas on one host may
//! open the same database file; the compare-and-swap is a single
//! `UPDATE ... WHERE version = ?` statement, so SQLite's write lock decides
//! every race.

use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::record::{LeaseKey, LeaseRecord, ResourceVersion, VersionedRecord};
use super::store::LeaseBackend;
use crate::error::{Error, Result};

/// Lock records in a SQLite database
pub struct SqliteBackend {
    /// Database connection
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Create or open the lock database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leases (
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                holder_identity TEXT NOT NULL,
                lease_duration_seconds INTEGER NOT NULL,
                acquire_time TEXT NOT NULL,
                renew_time TEXT NOT NULL,
                leader_transitions INTEGER NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, name)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Raw row before timestamp and version decoding
struct LeaseRow {
    namespace: String,
    name: String,
    holder_identity: String,
    lease_duration_seconds: i64,
    acquire_time: String,
    renew_time: String,
    leader_transitions: i64,
    version: i64,
}

impl LeaseRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            namespace: row.get(0)?,
            name: row.get(1)?,
            holder_identity: row.get(2)?,
            lease_duration_seconds: row.get(3)?,
            acquire_time: row.get(4)?,
            renew_time: row.get(5)?,
            leader_transitions: row.get(6)?,
            version: row.get(7)?,
        })
    }

    fn decode(self) -> Result<(LeaseKey, VersionedRecord)> {
        let key = LeaseKey::new(self.namespace, self.name);
        if self.lease_duration_seconds < 0 || self.leader_transitions < 0 {
            return Err(Error::StoreMalformedRecord(format!(
                "negative counters in lease {}",
                key
            )));
        }

        let record = LeaseRecord {
            holder_identity: self.holder_identity,
            lease_duration_seconds: self.lease_duration_seconds as u64,
            acquire_time: parse_time(&key, &self.acquire_time)?,
            renew_time: parse_time(&key, &self.renew_time)?,
            leader_transitions: self.leader_transitions as u64,
        };

        Ok((
            key,
            VersionedRecord {
                record,
                version: ResourceVersion::new(self.version.to_string()),
            },
        ))
    }
}

const SELECT_COLUMNS: &str = "SELECT namespace, name, holder_identity, lease_duration_seconds, \
     acquire_time, renew_time, leader_transitions, version FROM leases";

fn parse_time(key: &LeaseKey, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::StoreMalformedRecord(format!("bad timestamp in lease {}: {}", key, e)))
}

fn parse_version(expected: &ResourceVersion) -> Option<i64> {
    expected.as_str().parse().ok()
}

#[async_trait]
impl LeaseBackend for SqliteBackend {
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!("{} WHERE namespace = ?1 AND name = ?2", SELECT_COLUMNS),
                params![key.namespace, key.name],
                LeaseRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(row.decode()?.1)),
            None => Ok(None),
        }
    }

    async fn create(&self, key: &LeaseKey, record: &LeaseRecord) -> Result<ResourceVersion> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            r#"
            INSERT INTO leases (namespace, name, holder_identity, lease_duration_seconds,
                                acquire_time, renew_time, leader_transitions, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            ON CONFLICT(namespace, name) DO NOTHING
            "#,
            params![
                key.namespace,
                key.name,
                record.holder_identity,
                record.lease_duration_seconds as i64,
                record.acquire_time.to_rfc3339(),
                record.renew_time.to_rfc3339(),
                record.leader_transitions as i64,
            ],
        )?;

        if inserted == 0 {
            return Err(Error::Conflict);
        }
        Ok(ResourceVersion::new("1"))
    }

    async fn update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        // A token this backend never issued cannot match any row
        let Some(expected) = parse_version(expected) else {
            return Err(Error::Conflict);
        };

        let conn = self.conn.lock().await;
        let updated = conn.execute(
            r#"
            UPDATE leases SET
                holder_identity = ?3,
                lease_duration_seconds = ?4,
                acquire_time = ?5,
                renew_time = ?6,
                leader_transitions = ?7,
                version = version + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE namespace = ?1 AND name = ?2 AND version = ?8
            "#,
            params![
                key.namespace,
                key.name,
                record.holder_identity,
                record.lease_duration_seconds as i64,
                record.acquire_time.to_rfc3339(),
                record.renew_time.to_rfc3339(),
                record.leader_transitions as i64,
                expected,
            ],
        )?;

        if updated == 1 {
            return Ok(ResourceVersion::new((expected + 1).to_string()));
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM leases WHERE namespace = ?1 AND name = ?2)",
            params![key.namespace, key.name],
            |row| row.get(0),
        )?;
        if exists {
            Err(Error::Conflict)
        } else {
            Err(Error::NotFound)
        }
    }

    async fn list(&self) -> Result<Vec<(LeaseKey, VersionedRecord)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!("{} ORDER BY namespace, name", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], LeaseRow::from_row)?;

        let mut leases = Vec::new();
        for row in rows {
            leases.push(row?.decode()?);
        }

        Ok(leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(holder: &str) -> LeaseRecord {
        LeaseRecord::acquired(holder, Duration::from_secs(60), Utc::now())
    }

    #[tokio::test]
    async fn test_sqlite_backend_basic() {
        let dir = tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("leases.db")).unwrap();
        let key = LeaseKey::new("default", "example");

        assert!(backend.get(&key).await.unwrap().is_none());

        let v1 = backend.create(&key, &record("a")).await.unwrap();
        assert!(matches!(
            backend.create(&key, &record("b")).await,
            Err(Error::Conflict)
        ));

        let stored = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.record.holder_identity, "a");
        assert_eq!(stored.version, v1);
    }

    #[tokio::test]
    async fn test_sqlite_compare_and_swap() {
        let backend = SqliteBackend::in_memory().unwrap();
        let key = LeaseKey::new("default", "example");

        let v1 = backend.create(&key, &record("a")).await.unwrap();
        let v2 = backend.update(&key, &record("a"), &v1).await.unwrap();
        assert_ne!(v1, v2);

        // The holder's stale read loses against the newer write
        assert!(matches!(
            backend.update(&key, &record("b"), &v1).await,
            Err(Error::Conflict)
        ));
        assert!(matches!(
            backend.update(&key, &record("b"), &ResourceVersion::new("garbage")).await,
            Err(Error::Conflict)
        ));
        assert!(matches!(
            backend
                .update(&LeaseKey::new("default", "other"), &record("b"), &v1)
                .await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_sqlite_shared_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("leases.db");
        let first = SqliteBackend::open(&path).unwrap();
        let second = SqliteBackend::open(&path).unwrap();
        let key = LeaseKey::new("default", "example");

        let v1 = first.create(&key, &record("a")).await.unwrap();
        assert!(matches!(
            second.create(&key, &record("b")).await,
            Err(Error::Conflict)
        ));

        second.update(&key, &record("b"), &v1).await.unwrap();
        assert!(matches!(
            first.update(&key, &record("a"), &v1).await,
            Err(Error::Conflict)
        ));

        let leases = first.list().await.unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].1.record.holder_identity, "b");
    }

    #[tokio::test]
    async fn test_timestamps_survive_storage() {
        let backend = SqliteBackend::in_memory().unwrap();
        let key = LeaseKey::new("default", "example");
        let original = record("a");

        backend.create(&key, &original).await.unwrap();
        let stored = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.record, original);
    }
}
