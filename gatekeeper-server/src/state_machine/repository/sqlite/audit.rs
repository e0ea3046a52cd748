//! Audit trail of state changes.
//!
//! Rows are appended by `put_sync` inside the same transaction as the record
//! write, so the trail and the records never disagree.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::super::{RepositoryError, TransitionLogEntry};
use crate::state_machine::state::{RequestId, RequestState, RequesterId};

pub(super) fn append_sync(
    conn: &Connection,
    entry: &TransitionLogEntry,
) -> Result<(), RepositoryError> {
    conn.execute(
        r#"
        INSERT INTO request_transitions (request_id, requester, from_state, to_state, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            entry.request_id.to_string(),
            entry.requester.0,
            entry.from_state.map(|s| s.as_str()),
            entry.to_state.as_str(),
            entry.recorded_at.to_rfc3339(),
        ],
    )
    .map_err(|e| RepositoryError::storage("append transition", e.to_string()))?;
    Ok(())
}

pub(super) fn list_sync(
    conn: &Connection,
    id: RequestId,
) -> Result<Vec<TransitionLogEntry>, RepositoryError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT requester, from_state, to_state, recorded_at
            FROM request_transitions
            WHERE request_id = ?1
            ORDER BY seq
            "#,
        )
        .map_err(|e| RepositoryError::storage("list transitions", e.to_string()))?;

    let rows = stmt
        .query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| RepositoryError::storage("list transitions", e.to_string()))?;

    let mut entries = Vec::new();
    for row in rows {
        let (requester, from_state, to_state, recorded_at) =
            row.map_err(|e| RepositoryError::storage("list transitions", e.to_string()))?;
        entries.push(TransitionLogEntry {
            request_id: id,
            requester: RequesterId(requester),
            from_state: from_state.as_deref().map(parse_state).transpose()?,
            to_state: parse_state(&to_state)?,
            recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| RepositoryError::corruption("transition timestamp", e.to_string()))?,
        });
    }
    Ok(entries)
}

fn parse_state(value: &str) -> Result<RequestState, RepositoryError> {
    value
        .parse()
        .map_err(|e: String| RepositoryError::corruption("transition state", e))
}
