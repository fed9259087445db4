use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row, params};

use docuhub_types::models::Activity;

use crate::models::NewActivity;
use crate::{Database, parse_column};

const ACTIVITY_COLUMNS: &str = "id, type, user_id, action, document_id, document_name, created_at";

impl Database {
    /// Append to the activity log. Actions without an actor are skipped and
    /// yield `None`.
    pub fn record_activity(&self, new: &NewActivity) -> Result<Option<Activity>> {
        self.with_conn(|conn| insert_activity(conn, new))
    }

    /// Most recent first. `limit` caps the result; `None` returns everything.
    pub fn list_activities(&self, limit: Option<u32>) -> Result<Vec<Activity>> {
        self.with_conn(|conn| {
            // SQLite treats a negative LIMIT as "no limit".
            let limit = limit.map_or(-1, i64::from);
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([limit], map_activity)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Shared with the transactional writers in `documents` and `ingestions`,
/// which append their activity inside the same transaction as the mutation.
pub(crate) fn insert_activity(conn: &Connection, new: &NewActivity) -> Result<Option<Activity>> {
    let Some(user_id) = new.user_id else {
        return Ok(None);
    };

    conn.execute(
        "INSERT INTO activities (type, user_id, action, document_id, document_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new.kind.as_str(),
            user_id,
            new.action,
            new.document_id,
            new.document_name,
            Utc::now()
        ],
    )?;

    let id = conn.last_insert_rowid();
    let activity = conn.query_row(
        &format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?1"),
        [id],
        map_activity,
    )?;
    Ok(Some(activity))
}

fn map_activity(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        kind: parse_column(row, 1)?,
        user_id: row.get(2)?,
        action: row.get(3)?,
        document_id: row.get(4)?,
        document_name: row.get(5)?,
        created_at: row.get(6)?,
    })
}
