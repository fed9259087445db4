//! Row types and insert/update parameters. Reads of documents, activities
//! and ingestions map straight onto the shared models; only users carry a
//! column (the password hash) that must never reach the API layer.

use chrono::{DateTime, Utc};
use docuhub_types::models::{ActivityType, Role, User};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            name: row.name,
            email: row.email,
            role: row.role,
            created_at: row.created_at,
        }
    }
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub role: Role,
}

/// `None` fields are left as they are.
#[derive(Default)]
pub struct UserChanges<'a> {
    pub username: Option<&'a str>,
    pub password_hash: Option<&'a str>,
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub role: Option<Role>,
}

#[derive(Default)]
pub struct DocumentChanges<'a> {
    pub name: Option<&'a str>,
    /// Outer `None` leaves metadata alone; `Some(None)` clears it.
    pub metadata: Option<Option<&'a serde_json::Value>>,
    pub starred: Option<bool>,
}

/// An activity about to be appended. `user_id` is optional because the log
/// silently skips actions without an actor.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub kind: ActivityType,
    pub user_id: Option<i64>,
    pub action: String,
    pub document_id: Option<i64>,
    pub document_name: Option<String>,
}

impl NewActivity {
    pub fn new(kind: ActivityType, user_id: i64, action: impl Into<String>) -> Self {
        Self {
            kind,
            user_id: Some(user_id),
            action: action.into(),
            document_id: None,
            document_name: None,
        }
    }

    pub fn document(mut self, id: i64, name: impl Into<String>) -> Self {
        self.document_id = Some(id);
        self.document_name = Some(name.into());
        self
    }
}

pub struct SessionRow {
    pub token: String,
    pub user_id: i64,
    pub expires_at: i64,
}
