//! SQLite implementation of `RequestRepository`.
//!
//! Records are stored as JSON alongside the columns needed for lookups and
//! for the uniqueness constraints (one active record per requester, one
//! record per admin reference). Every write runs `check_put` inside an
//! `IMMEDIATE` transaction and appends to the audit trail in the same
//! transaction.
//!
//! # Schema Versioning
//!
//! The `schema_version` table tracks the schema version. To change the
//! schema, increment `CURRENT_SCHEMA_VERSION` and add a step to
//! `run_migrations()`; steps run in order from the stored version.

mod audit;
mod updates;


use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::warn;

use super::{
    check_put, RepositoryError, RequestRepository, TransitionLogEntry, UpdateClaim,
};
use crate::state_machine::state::{AdminRef, RequestId, RequestRecord, RequestState, RequesterId};

pub(crate) const CURRENT_SCHEMA_VERSION: i64 = 2;

/// SQLite-backed request repository.
///
/// Synchronous rusqlite calls run on `spawn_blocking` threads.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// The connection runs with `journal_mode = WAL`, `synchronous = FULL` and
    /// a 5 second busy timeout. On Unix the state directory is restricted to
    /// the owner and the database files to owner read/write.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // SQLite silently keeps the rollback journal on filesystems without
        // shared memory support, so check what we actually got.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned journal mode '{}' instead of 'wal'; \
                     the state directory must be on a filesystem with shared memory support",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        // After the first write, so the database and WAL files exist.
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            for suffix in ["", "-wal", "-shm"] {
                restrict_file_permissions(&path_str, suffix);
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "database schema version {} is newer than supported version {}; \
                     upgrade the application",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // v1: request records and their audit trail.
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS requests (
                    id TEXT PRIMARY KEY,
                    requester INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    admin_ref INTEGER,
                    version INTEGER NOT NULL,
                    record_json TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_one_active
                    ON requests(requester) WHERE state != 'closed';
                CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_admin_ref
                    ON requests(admin_ref) WHERE admin_ref IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_requests_state
                    ON requests(state);

                CREATE TABLE IF NOT EXISTS request_transitions (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    request_id TEXT NOT NULL,
                    requester INTEGER NOT NULL,
                    from_state TEXT,
                    to_state TEXT NOT NULL,
                    recorded_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_request_transitions_request
                    ON request_transitions(request_id, seq);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // v2: inbound update claims. claim_state 0 = in progress, 1 = completed.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS seen_updates (
                    update_id INTEGER PRIMARY KEY,
                    recorded_at INTEGER NOT NULL,
                    claim_state INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_seen_updates_recorded_at
                    ON seen_updates(recorded_at);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Run `f` against the connection on a blocking thread.
    pub(super) async fn with_conn<T, F>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

#[cfg(unix)]
fn restrict_file_permissions(db_path: &str, suffix: &str) {
    use std::os::unix::fs::PermissionsExt;
    let path = format!("{}{}", db_path, suffix);
    if !Path::new(&path).exists() {
        return;
    }
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
        warn!("Failed to set restrictive permissions on {}: {}", path, e);
    }
}

// =============================================================================
// Row helpers
// =============================================================================

fn decode_record(json: &str) -> Result<RequestRecord, RepositoryError> {
    serde_json::from_str(json).map_err(|e| RepositoryError::corruption("request record", e.to_string()))
}

fn query_records(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<RequestRecord>, RepositoryError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(args, |row| row.get::<_, String>(0))
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

    let mut records = Vec::new();
    for row in rows {
        let json = row.map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
        records.push(decode_record(&json)?);
    }
    Ok(records)
}

fn query_record(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Option<RequestRecord>, RepositoryError> {
    let json: Option<String> = conn
        .query_row(sql, args, |row| row.get(0))
        .optional()
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    json.as_deref().map(decode_record).transpose()
}

fn version_to_i64(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(|_| {
        RepositoryError::storage("put", format!("version {} exceeds storable range", version))
    })
}

fn put_sync(conn: &mut Connection, record: &RequestRecord) -> Result<(), RepositoryError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| RepositoryError::storage("put begin", e.to_string()))?;

    let id = record.id.to_string();
    let existing = query_record(
        &tx,
        "put load",
        "SELECT record_json FROM requests WHERE id = ?1",
        params![id],
    )?;
    let active = query_record(
        &tx,
        "put load active",
        "SELECT record_json FROM requests WHERE requester = ?1 AND state != 'closed'",
        params![record.requester.0],
    )?;
    let reference_owner = match record.admin_ref {
        Some(reference) => tx
            .query_row(
                "SELECT id FROM requests WHERE admin_ref = ?1",
                params![reference.0],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("put load reference", e.to_string()))?
            .map(|owner| {
                owner
                    .parse::<RequestId>()
                    .map_err(|e| RepositoryError::corruption("request id", e.to_string()))
            })
            .transpose()?,
        None => None,
    };

    check_put(existing.as_ref(), active.as_ref(), reference_owner, record)?;

    let json = serde_json::to_string(record)
        .map_err(|e| RepositoryError::storage("put serialize", e.to_string()))?;
    tx.execute(
        r#"
        INSERT INTO requests (id, requester, state, admin_ref, version, record_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            state = excluded.state,
            admin_ref = excluded.admin_ref,
            version = excluded.version,
            record_json = excluded.record_json
        "#,
        params![
            id,
            record.requester.0,
            record.state.as_str(),
            record.admin_ref.map(|r| r.0),
            version_to_i64(record.version)?,
            json,
        ],
    )
    .map_err(|e| RepositoryError::storage("put write", e.to_string()))?;

    if let Some(entry) = TransitionLogEntry::for_write(existing.as_ref(), record) {
        audit::append_sync(&tx, &entry)?;
    }

    tx.commit()
        .map_err(|e| RepositoryError::storage("put commit", e.to_string()))
}

#[async_trait]
impl RequestRepository for SqliteRepository {
    async fn get_active(
        &self,
        requester: RequesterId,
    ) -> Result<Option<RequestRecord>, RepositoryError> {
        self.with_conn("get_active", move |conn| {
            query_record(
                conn,
                "get_active",
                "SELECT record_json FROM requests WHERE requester = ?1 AND state != 'closed'",
                params![requester.0],
            )
        })
        .await
    }

    async fn get(&self, id: RequestId) -> Result<Option<RequestRecord>, RepositoryError> {
        self.with_conn("get", move |conn| {
            query_record(
                conn,
                "get",
                "SELECT record_json FROM requests WHERE id = ?1",
                params![id.to_string()],
            )
        })
        .await
    }

    async fn put(&self, record: &RequestRecord) -> Result<(), RepositoryError> {
        let record = record.clone();
        self.with_conn("put", move |conn| put_sync(conn, &record))
            .await
    }

    async fn find_by_admin_reference(
        &self,
        reference: AdminRef,
    ) -> Result<Option<RequestRecord>, RepositoryError> {
        self.with_conn("find_by_admin_reference", move |conn| {
            query_record(
                conn,
                "find_by_admin_reference",
                "SELECT record_json FROM requests WHERE admin_ref = ?1",
                params![reference.0],
            )
        })
        .await
    }

    async fn list_by_state(
        &self,
        state: RequestState,
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.with_conn("list_by_state", move |conn| {
            query_records(
                conn,
                "list_by_state",
                "SELECT record_json FROM requests WHERE state = ?1 ORDER BY rowid",
                params![state.as_str()],
            )
        })
        .await
    }

    async fn history(
        &self,
        requester: RequesterId,
    ) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.with_conn("history", move |conn| {
            query_records(
                conn,
                "history",
                "SELECT record_json FROM requests WHERE requester = ?1 ORDER BY rowid",
                params![requester.0],
            )
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<RequestRecord>, RepositoryError> {
        self.with_conn("list_all", |conn| {
            query_records(
                conn,
                "list_all",
                "SELECT record_json FROM requests ORDER BY rowid",
                [],
            )
        })
        .await
    }

    async fn transitions(
        &self,
        id: RequestId,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError> {
        self.with_conn("transitions", move |conn| audit::list_sync(conn, id))
            .await
    }

    async fn state_counts(
        &self,
    ) -> Result<std::collections::BTreeMap<RequestState, u64>, RepositoryError> {
        self.with_conn("state_counts", |conn| {
            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM requests GROUP BY state")
                .map_err(|e| RepositoryError::storage("state_counts", e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| RepositoryError::storage("state_counts", e.to_string()))?;

            let mut counts = super::empty_counts();
            for row in rows {
                let (state, count) =
                    row.map_err(|e| RepositoryError::storage("state_counts", e.to_string()))?;
                let state = state
                    .parse::<RequestState>()
                    .map_err(|e| RepositoryError::corruption("request state", e))?;
                counts.insert(state, u64::try_from(count).unwrap_or(0));
            }
            Ok(counts)
        })
        .await
    }

    async fn try_claim_update(&self, update_id: i64) -> Result<UpdateClaim, RepositoryError> {
        self.try_claim_update_impl(update_id).await
    }

    async fn complete_update_claim(&self, update_id: i64) -> Result<(), RepositoryError> {
        self.complete_update_claim_impl(update_id).await
    }

    async fn release_update_claim(&self, update_id: i64) -> Result<(), RepositoryError> {
        self.release_update_claim_impl(update_id).await
    }

    async fn cleanup_expired_updates(&self, ttl_seconds: i64) -> Result<usize, RepositoryError> {
        self.cleanup_expired_updates_impl(ttl_seconds).await
    }
}
