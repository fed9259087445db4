use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row, params};

use docuhub_types::models::User;

use crate::models::{NewUser, UserChanges, UserRow};
use crate::{Database, OptionalExt, parse_column};

const USER_COLUMNS: &str = "id, username, password_hash, name, email, role, created_at";

/// Result of a write that can collide with the username constraint.
#[derive(Debug)]
pub enum UserWrite {
    Written(User),
    NotFound,
    UsernameTaken,
}

impl Database {
    /// Insert a user. Returns `None` when the username is already taken.
    pub fn create_user(&self, new: &NewUser<'_>) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, password_hash, name, email, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.username,
                    new.password_hash,
                    new.name,
                    new.email,
                    new.role.as_str(),
                    Utc::now()
                ],
            );

            match inserted {
                Ok(_) => {
                    let id = conn.last_insert_rowid();
                    Ok(query_user(conn, id)?.map(User::from))
                }
                Err(e) if is_unique_violation(&e) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| Ok(query_user(conn, id)?.map(User::from)))
    }

    /// Full row including the password hash, for credential checks.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                map_user_row,
            )
            .optional()
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .map(|row| row.map(User::from))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn user_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
        })
    }

    pub fn update_user(&self, id: i64, changes: &UserChanges<'_>) -> Result<UserWrite> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET
                    username = COALESCE(?2, username),
                    password_hash = COALESCE(?3, password_hash),
                    name = COALESCE(?4, name),
                    email = COALESCE(?5, email),
                    role = COALESCE(?6, role)
                 WHERE id = ?1",
                params![
                    id,
                    changes.username,
                    changes.password_hash,
                    changes.name,
                    changes.email,
                    changes.role.map(|r| r.as_str())
                ],
            );

            match updated {
                Ok(0) => Ok(UserWrite::NotFound),
                Ok(_) => match query_user(conn, id)? {
                    Some(row) => Ok(UserWrite::Written(row.into())),
                    None => Ok(UserWrite::NotFound),
                },
                Err(e) if is_unique_violation(&e) => Ok(UserWrite::UsernameTaken),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Delete a user together with their sessions, documents and the
    /// documents' ingestions (FK cascades). Returns false if no such user.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }
}

fn query_user(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        map_user_row,
    )
    .optional()
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        role: parse_column(row, 5)?,
        created_at: row.get(6)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
