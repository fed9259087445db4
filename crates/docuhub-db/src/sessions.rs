use anyhow::Result;
use chrono::Utc;
use rusqlite::params;

use crate::models::SessionRow;
use crate::{Database, OptionalExt};

impl Database {
    pub fn create_session(&self, token: &str, user_id: i64, expires_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, Utc::now(), expires_at],
            )?;
            Ok(())
        })
    }

    /// Look up a session that has not yet expired at `now` (unix seconds).
    pub fn get_session(&self, token: &str, now: i64) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1 AND expires_at > ?2",
                params![token, now],
                |row| {
                    Ok(SessionRow {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Slide a session's expiry forward.
    pub fn touch_session(&self, token: &str, expires_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET expires_at = ?2 WHERE token = ?1",
                params![token, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
            Ok(deleted > 0)
        })
    }

    /// Remove every session that expired at or before `now`. Returns how many.
    pub fn delete_expired_sessions(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?;
            Ok(deleted)
        })
    }
}
