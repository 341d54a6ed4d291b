//! A durable [`Store`] backed by a single SQLite file.
//!
//! Grounded in two corners of the retrieval pack: the schema-plus-indexed-
//! columns shape of `forge-context`'s `FactStore` (a `CREATE TABLE IF NOT
//! EXISTS` schema constant, a `PRAGMA journal_mode=WAL` preamble, and
//! transactions for multi-row writes) and the embedded-sqlite role
//! `components/net` plays in `servo`. Each row keeps a handful of indexed
//! columns for `WHERE`/`ORDER BY` alongside a `data` column holding the full
//! record as JSON — every persisted type here already derives
//! `Serialize`/`Deserialize`, so there is no separate column-mapping layer
//! to maintain by hand.
//!
//! `rusqlite` has no async story, so each operation takes a short-lived
//! `std::sync::Mutex` lock around a synchronous call; none of these calls
//! await anything else while the lock is held.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crawl_backend::{BackendError, BackendResult, HostGate, QueueSettlement, Store};
use crawl_core::{
    CachedPage, DecisionTrace, PageRecord, QueueEntry, QueueStatus, RequestId, RobotsPolicy,
};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS queue (
        id TEXT PRIMARY KEY,
        host TEXT NOT NULL,
        status TEXT NOT NULL,
        priority INTEGER NOT NULL,
        enqueued_at TEXT NOT NULL,
        next_eligible_at TEXT,
        done_at TEXT,
        data TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_queue_dequeue
        ON queue(status, priority, enqueued_at);

    CREATE TABLE IF NOT EXISTS cache (
        url TEXT PRIMARY KEY,
        fetched_at TEXT NOT NULL,
        body_size INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS robots (
        host TEXT PRIMARY KEY,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pages (
        url TEXT PRIMARY KEY,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS decisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        data TEXT NOT NULL
    );
";

fn to_conn_err(err: rusqlite::Error) -> BackendError {
    BackendError::Connection(Box::new(err))
}

fn to_ser_err(err: serde_json::Error) -> BackendError {
    BackendError::Serialization(Box::new(err))
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_rfc3339(s: &str) -> BackendResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BackendError::Internal(format!("bad timestamp {s:?}: {e}")))
}

/// Durable, SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if absent) a database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(to_conn_err)?;
        Self::initialize(conn)
    }

    /// Opens a private, process-local in-memory database — used by tests.
    pub fn open_in_memory() -> BackendResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_conn_err)?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> BackendResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(to_conn_err)?;
        conn.execute_batch(SCHEMA).map_err(to_conn_err)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite store mutex poisoned")
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn queue_lookup(&self, id: &RequestId) -> BackendResult<Option<QueueEntry>> {
        let conn = self.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM queue WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_conn_err)?;
        data.map(|json| serde_json::from_str(&json).map_err(to_ser_err))
            .transpose()
    }

    async fn queue_upsert(&self, entry: QueueEntry) -> BackendResult<()> {
        let conn = self.lock();
        let data = serde_json::to_string(&entry).map_err(to_ser_err)?;
        conn.execute(
            "INSERT INTO queue (id, host, status, priority, enqueued_at, next_eligible_at, done_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)
             ON CONFLICT(id) DO UPDATE SET
                host = excluded.host,
                status = excluded.status,
                priority = excluded.priority,
                enqueued_at = excluded.enqueued_at,
                next_eligible_at = excluded.next_eligible_at,
                data = excluded.data",
            params![
                entry.request.id.as_str(),
                entry.request.host,
                status_str(entry.status),
                entry.request.priority,
                rfc3339(entry.request.enqueued_at),
                entry.next_eligible_at.map(rfc3339),
                data,
            ],
        )
        .map_err(to_conn_err)?;
        Ok(())
    }

    async fn queue_pick_next(
        &self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
        gate: &dyn HostGate,
    ) -> BackendResult<Option<QueueEntry>> {
        let conn = self.lock();
        let now_str = rfc3339(now);
        let mut stmt = conn
            .prepare(
                "SELECT id, data FROM queue
                 WHERE status = 'queued' AND (next_eligible_at IS NULL OR next_eligible_at <= ?1)
                 ORDER BY priority ASC, enqueued_at ASC",
            )
            .map_err(to_conn_err)?;
        let rows = stmt
            .query_map(params![now_str], |row| {
                let id: String = row.get(0)?;
                let data: String = row.get(1)?;
                Ok((id, data))
            })
            .map_err(to_conn_err)?;

        let mut chosen: Option<QueueEntry> = None;
        for row in rows {
            let (_id, data) = row.map_err(to_conn_err)?;
            let entry: QueueEntry = serde_json::from_str(&data).map_err(to_ser_err)?;
            if gate.is_host_eligible(&entry.request.host) {
                chosen = Some(entry);
                break;
            }
        }
        drop(stmt);

        let Some(mut entry) = chosen else {
            return Ok(None);
        };
        entry.status = QueueStatus::InProgress;
        entry.leased_by = Some(worker_id.to_string());
        let expires = now
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(0));
        entry.lease_expires_at = Some(expires);

        let data = serde_json::to_string(&entry).map_err(to_ser_err)?;
        conn.execute(
            "UPDATE queue SET status = ?2, data = ?3 WHERE id = ?1",
            params![entry.request.id.as_str(), status_str(entry.status), data],
        )
        .map_err(to_conn_err)?;

        Ok(Some(entry))
    }

    async fn queue_settle(
        &self,
        id: &RequestId,
        settlement: QueueSettlement,
        now: DateTime<Utc>,
    ) -> BackendResult<()> {
        let conn = self.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM queue WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_conn_err)?;
        let Some(data) = data else {
            return Ok(());
        };
        let mut entry: QueueEntry = serde_json::from_str(&data).map_err(to_ser_err)?;
        entry.leased_by = None;
        entry.lease_expires_at = None;

        let mut done_at: Option<String> = None;
        match settlement {
            QueueSettlement::Done => {
                entry.status = QueueStatus::Done;
                entry.last_error = None;
                done_at = Some(rfc3339(now));
            }
            QueueSettlement::Retry {
                attempt,
                not_before,
                last_error,
            } => {
                entry.status = QueueStatus::Queued;
                entry.request.attempt = attempt;
                entry.next_eligible_at = Some(not_before);
                entry.last_error = Some(last_error);
            }
            QueueSettlement::Error { last_error } => {
                entry.status = QueueStatus::Error;
                entry.last_error = Some(last_error);
                done_at = Some(rfc3339(now));
            }
            QueueSettlement::Skipped { reason } => {
                entry.status = QueueStatus::Skipped;
                entry.last_error = Some(reason);
                done_at = Some(rfc3339(now));
            }
            QueueSettlement::Canceled => {
                entry.status = QueueStatus::Queued;
            }
        }

        let json = serde_json::to_string(&entry).map_err(to_ser_err)?;
        conn.execute(
            "UPDATE queue SET status = ?2, priority = ?3, next_eligible_at = ?4, done_at = COALESCE(?5, done_at), data = ?6
             WHERE id = ?1",
            params![
                id.as_str(),
                status_str(entry.status),
                entry.request.priority,
                entry.next_eligible_at.map(rfc3339),
                done_at,
                json,
            ],
        )
        .map_err(to_conn_err)?;
        Ok(())
    }

    async fn queue_reclaim_leases(&self, now: DateTime<Utc>) -> BackendResult<u64> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, data FROM queue WHERE status = 'in_progress'")
            .map_err(to_conn_err)?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(to_conn_err)?
            .collect::<Result<_, _>>()
            .map_err(to_conn_err)?;
        drop(stmt);

        let mut reclaimed = 0u64;
        for (id, data) in rows {
            let mut entry: QueueEntry = serde_json::from_str(&data).map_err(to_ser_err)?;
            let Some(expires) = entry.lease_expires_at else {
                continue;
            };
            if expires > now {
                continue;
            }
            entry.status = QueueStatus::Queued;
            entry.leased_by = None;
            entry.lease_expires_at = None;
            entry.request.attempt += 1;
            let json = serde_json::to_string(&entry).map_err(to_ser_err)?;
            conn.execute(
                "UPDATE queue SET status = ?2, data = ?3 WHERE id = ?1",
                params![id, status_str(entry.status), json],
            )
            .map_err(to_conn_err)?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    async fn queue_recently_done(
        &self,
        id: &RequestId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> BackendResult<bool> {
        let conn = self.lock();
        let done_at: Option<String> = conn
            .query_row(
                "SELECT done_at FROM queue WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_conn_err)?
            .flatten();
        let Some(done_at) = done_at else {
            return Ok(false);
        };
        let done_at = parse_rfc3339(&done_at)?;
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(now - done_at <= window)
    }

    async fn queue_active_len(&self) -> BackendResult<usize> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue WHERE status IN ('queued', 'in_progress')",
                [],
                |row| row.get(0),
            )
            .map_err(to_conn_err)?;
        Ok(count as usize)
    }

    async fn queue_lowest_priority_queued(&self) -> BackendResult<Option<RequestId>> {
        let conn = self.lock();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM queue WHERE status = 'queued'
                 ORDER BY priority DESC, enqueued_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_conn_err)?;
        Ok(id.map(RequestId::from_raw))
    }

    async fn queue_evict(&self, id: &RequestId) -> BackendResult<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM queue WHERE id = ?1", params![id.as_str()])
            .map_err(to_conn_err)?;
        Ok(())
    }

    async fn cache_get(
        &self,
        url: &str,
        max_age_ms: i64,
        now: DateTime<Utc>,
    ) -> BackendResult<Option<CachedPage>> {
        let page = self.cache_get_any(url).await?;
        Ok(page.filter(|p| p.age_ms(now) <= max_age_ms))
    }

    async fn cache_put(&self, page: CachedPage) -> BackendResult<()> {
        let conn = self.lock();
        let body_size = page.body_bytes.len() as i64;
        let data = serde_json::to_string(&page).map_err(to_ser_err)?;
        conn.execute(
            "INSERT INTO cache (url, fetched_at, body_size, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET fetched_at = excluded.fetched_at, body_size = excluded.body_size, data = excluded.data",
            params![page.url, rfc3339(page.fetched_at), body_size, data],
        )
        .map_err(to_conn_err)?;
        Ok(())
    }

    async fn cache_get_any(&self, url: &str) -> BackendResult<Option<CachedPage>> {
        let conn = self.lock();
        let data: Option<String> = conn
            .query_row("SELECT data FROM cache WHERE url = ?1", params![url], |row| {
                row.get(0)
            })
            .optional()
            .map_err(to_conn_err)?;
        data.map(|json| serde_json::from_str(&json).map_err(to_ser_err))
            .transpose()
    }

    async fn cache_evict_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        max_bytes: u64,
    ) -> BackendResult<u64> {
        let conn = self.lock();
        let cutoff = rfc3339(now - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()));
        let removed_by_ttl = conn
            .execute("DELETE FROM cache WHERE fetched_at < ?1", params![cutoff])
            .map_err(to_conn_err)? as u64;

        let total_bytes: i64 = conn
            .query_row("SELECT COALESCE(SUM(body_size), 0) FROM cache", [], |row| row.get(0))
            .map_err(to_conn_err)?;
        let mut removed_by_size = 0u64;
        if (total_bytes as u64) > max_bytes {
            let mut remaining = total_bytes as u64;
            let mut stmt = conn
                .prepare("SELECT url, body_size FROM cache ORDER BY fetched_at ASC")
                .map_err(to_conn_err)?;
            let rows: Vec<(String, i64)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(to_conn_err)?
                .collect::<Result<_, _>>()
                .map_err(to_conn_err)?;
            drop(stmt);
            for (url, size) in rows {
                if remaining <= max_bytes {
                    break;
                }
                conn.execute("DELETE FROM cache WHERE url = ?1", params![url]).map_err(to_conn_err)?;
                remaining = remaining.saturating_sub(size as u64);
                removed_by_size += 1;
            }
        }
        Ok(removed_by_ttl + removed_by_size)
    }

    async fn robots_get(&self, host: &str) -> BackendResult<Option<RobotsPolicy>> {
        let conn = self.lock();
        let data: Option<String> = conn
            .query_row("SELECT data FROM robots WHERE host = ?1", params![host], |row| {
                row.get(0)
            })
            .optional()
            .map_err(to_conn_err)?;
        data.map(|json| serde_json::from_str(&json).map_err(to_ser_err))
            .transpose()
    }

    async fn robots_put(&self, host: &str, policy: RobotsPolicy) -> BackendResult<()> {
        let conn = self.lock();
        let data = serde_json::to_string(&policy).map_err(to_ser_err)?;
        conn.execute(
            "INSERT INTO robots (host, data) VALUES (?1, ?2)
             ON CONFLICT(host) DO UPDATE SET data = excluded.data",
            params![host, data],
        )
        .map_err(to_conn_err)?;
        Ok(())
    }

    async fn page_put(&self, record: PageRecord) -> BackendResult<()> {
        let conn = self.lock();
        let data = serde_json::to_string(&record).map_err(to_ser_err)?;
        conn.execute(
            "INSERT INTO pages (url, data) VALUES (?1, ?2)
             ON CONFLICT(url) DO UPDATE SET data = excluded.data",
            params![record.url, data],
        )
        .map_err(to_conn_err)?;
        Ok(())
    }

    async fn decision_append(&self, trace: DecisionTrace) -> BackendResult<()> {
        let conn = self.lock();
        let data = serde_json::to_string(&trace).map_err(to_ser_err)?;
        conn.execute(
            "INSERT INTO decisions (ts, data) VALUES (?1, ?2)",
            params![rfc3339(trace.ts), data],
        )
        .map_err(to_conn_err)?;
        Ok(())
    }
}

fn status_str(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Queued => "queued",
        QueueStatus::InProgress => "in_progress",
        QueueStatus::Done => "done",
        QueueStatus::Error => "error",
        QueueStatus::Skipped => "skipped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_backend::AlwaysEligible;
    use crawl_core::{Origin, Request, RequestMeta};

    fn req(url: &str, host: &str, priority: i64, now: DateTime<Utc>) -> QueueEntry {
        let meta = RequestMeta::for_origin(Origin::Seed, 900_000);
        let mut request = Request::new(url.to_string(), host.to_string(), 0, meta, now);
        request = request.with_priority(priority);
        QueueEntry::new(request)
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.sqlite3");
        let now = Utc::now();

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .queue_upsert(req("https://a.example/", "a.example", 5, now))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let picked = store
            .queue_pick_next("w1", Duration::from_secs(60), now, &AlwaysEligible)
            .await
            .unwrap();
        assert!(picked.is_some());
    }

    #[tokio::test]
    async fn dequeue_orders_by_priority_then_enqueued_at() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .queue_upsert(req("https://a.example/", "a.example", 50, now))
            .await
            .unwrap();
        store
            .queue_upsert(req("https://b.example/", "b.example", 10, now))
            .await
            .unwrap();

        let picked = store
            .queue_pick_next("w1", Duration::from_secs(60), now, &AlwaysEligible)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.request.host, "b.example");
    }

    #[tokio::test]
    async fn cache_roundtrip_respects_max_age() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let page = CachedPage {
            url: "https://a.example/".to_string(),
            fetched_at: now - chrono::Duration::seconds(30),
            http_status: 200,
            headers: Default::default(),
            body_bytes: b"hello".to_vec(),
            content_type: Some("text/html".to_string()),
            etag: None,
            last_modified: None,
        };
        store.cache_put(page).await.unwrap();

        assert!(store
            .cache_get("https://a.example/", 10_000, now)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .cache_get("https://a.example/", 1_000, now)
            .await
            .unwrap()
            .is_none());
    }
}
