use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row, params};

use docuhub_types::models::Document;

use crate::activities::insert_activity;
use crate::models::{DocumentChanges, NewActivity};
use crate::{Database, OptionalExt};

const DOCUMENT_COLUMNS: &str = "id, user_id, name, metadata, starred, created_at, updated_at";

impl Database {
    /// Insert a document and append the activity built by `log` in the same
    /// transaction.
    pub fn create_document<F>(
        &self,
        owner_id: i64,
        name: &str,
        metadata: Option<&serde_json::Value>,
        log: F,
    ) -> Result<Document>
    where
        F: FnOnce(&Document) -> NewActivity,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            tx.execute(
                "INSERT INTO documents (user_id, name, metadata, starred, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![owner_id, name, metadata, now],
            )?;

            let id = tx.last_insert_rowid();
            let document = query_document(&tx, id)?
                .ok_or_else(|| anyhow::anyhow!("document {} vanished after insert", id))?;

            insert_activity(&tx, &log(&document))?;
            tx.commit()?;
            Ok(document)
        })
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        self.with_conn(|conn| query_document(conn, id))
    }

    /// All documents, or only those owned by `owner_id`.
    pub fn list_documents(&self, owner_id: Option<i64>) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE ?1 IS NULL OR user_id = ?1
                 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([owner_id], map_document)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply a partial update and log it. `None` if the document is gone.
    pub fn update_document<F>(
        &self,
        id: i64,
        changes: &DocumentChanges<'_>,
        log: F,
    ) -> Result<Option<Document>>
    where
        F: FnOnce(&Document) -> NewActivity,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE documents SET
                    name = COALESCE(?2, name),
                    metadata = CASE WHEN ?3 THEN ?4 ELSE metadata END,
                    starred = COALESCE(?5, starred),
                    updated_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    changes.name,
                    changes.metadata.is_some(),
                    changes.metadata.flatten(),
                    changes.starred,
                    Utc::now()
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }

            let document = query_document(&tx, id)?;
            if let Some(document) = &document {
                insert_activity(&tx, &log(document))?;
            }
            tx.commit()?;
            Ok(document)
        })
    }

    pub fn set_document_starred(&self, id: i64, starred: bool) -> Result<Option<Document>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE documents SET starred = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, starred, Utc::now()],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_document(conn, id)
        })
    }

    /// Delete a document (its ingestions cascade) and log it. Returns the
    /// deleted record, or `None` if it did not exist.
    pub fn delete_document<F>(&self, id: i64, log: F) -> Result<Option<Document>>
    where
        F: FnOnce(&Document) -> NewActivity,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(document) = query_document(&tx, id)? else {
                return Ok(None);
            };

            tx.execute("DELETE FROM documents WHERE id = ?1", [id])?;
            insert_activity(&tx, &log(&document))?;
            tx.commit()?;
            Ok(Some(document))
        })
    }
}

pub(crate) fn query_document(conn: &Connection, id: i64) -> Result<Option<Document>> {
    conn.query_row(
        &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
        [id],
        map_document,
    )
    .optional()
}

fn map_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        metadata: row.get(3)?,
        starred: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use docuhub_types::models::{ActivityType, Role};
    use serde_json::json;

    fn db_with_owner() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let owner = db
            .create_user(&NewUser {
                username: "owner",
                password_hash: "x",
                name: "Owner",
                email: "owner@example.com",
                role: Role::User,
            })
            .unwrap()
            .unwrap();
        (db, owner.id)
    }

    fn upload(doc: &Document) -> NewActivity {
        NewActivity::new(ActivityType::Upload, doc.user_id, "Document uploaded").document(doc.id, &doc.name)
    }

    #[test]
    fn create_writes_document_and_activity_together() {
        let (db, owner) = db_with_owner();
        let meta = json!({"pages": 12});
        let doc = db.create_document(owner, "report.pdf", Some(&meta), upload).unwrap();

        assert_eq!(doc.user_id, owner);
        assert!(!doc.starred);
        assert_eq!(doc.metadata, Some(meta));

        let log = db.list_activities(None).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, ActivityType::Upload);
        assert_eq!(log[0].document_id, Some(doc.id));
    }

    #[test]
    fn list_filters_by_owner() {
        let (db, owner) = db_with_owner();
        let other = db
            .create_user(&NewUser {
                username: "other",
                password_hash: "x",
                name: "Other",
                email: "other@example.com",
                role: Role::User,
            })
            .unwrap()
            .unwrap();

        db.create_document(owner, "mine", None, upload).unwrap();
        db.create_document(other.id, "theirs", None, upload).unwrap();

        assert_eq!(db.list_documents(None).unwrap().len(), 2);
        let mine = db.list_documents(Some(owner)).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "mine");
    }

    #[test]
    fn update_missing_document_logs_nothing() {
        let (db, _) = db_with_owner();
        let changes = DocumentChanges {
            name: Some("renamed"),
            ..Default::default()
        };
        let result = db
            .update_document(7, &changes, |_| panic!("must not log a missing document"))
            .unwrap();
        assert!(result.is_none());
        assert!(db.list_activities(None).unwrap().is_empty());
    }

    #[test]
    fn star_and_partial_update() {
        let (db, owner) = db_with_owner();
        let doc = db.create_document(owner, "a.txt", None, upload).unwrap();

        let starred = db.set_document_starred(doc.id, true).unwrap().unwrap();
        assert!(starred.starred);

        let changes = DocumentChanges {
            name: Some("b.txt"),
            ..Default::default()
        };
        let updated = db
            .update_document(doc.id, &changes, |d| {
                NewActivity::new(ActivityType::Edit, owner, "Document edited").document(d.id, &d.name)
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "b.txt");
        assert!(updated.starred);
    }

    #[test]
    fn metadata_is_kept_replaced_or_cleared() {
        let (db, owner) = db_with_owner();
        let meta = json!({"pages": 3});
        let doc = db.create_document(owner, "m.txt", Some(&meta), upload).unwrap();
        let edit = |d: &Document| {
            NewActivity::new(ActivityType::Edit, owner, "Document edited").document(d.id, &d.name)
        };

        let renamed = DocumentChanges {
            name: Some("n.txt"),
            ..Default::default()
        };
        let kept = db.update_document(doc.id, &renamed, edit).unwrap().unwrap();
        assert_eq!(kept.metadata, Some(meta));

        let replacement = json!({"pages": 4});
        let replace = DocumentChanges {
            metadata: Some(Some(&replacement)),
            ..Default::default()
        };
        let replaced = db.update_document(doc.id, &replace, edit).unwrap().unwrap();
        assert_eq!(replaced.metadata, Some(replacement));

        let clear = DocumentChanges {
            metadata: Some(None),
            ..Default::default()
        };
        let cleared = db.update_document(doc.id, &clear, edit).unwrap().unwrap();
        assert_eq!(cleared.metadata, None);
    }

    #[test]
    fn delete_returns_removed_record_once() {
        let (db, owner) = db_with_owner();
        let doc = db.create_document(owner, "gone.txt", None, upload).unwrap();
        let delete = |d: &Document| {
            NewActivity::new(ActivityType::Delete, owner, "Document deleted").document(d.id, &d.name)
        };

        let removed = db.delete_document(doc.id, delete).unwrap().unwrap();
        assert_eq!(removed.name, "gone.txt");
        assert!(db.get_document(doc.id).unwrap().is_none());
        assert!(db.delete_document(doc.id, delete).unwrap().is_none());
    }

    #[test]
    fn deleting_owner_deletes_documents() {
        let (db, owner) = db_with_owner();
        let doc = db.create_document(owner, "orphan?", None, upload).unwrap();
        assert!(db.delete_user(owner).unwrap());
        assert!(db.get_document(doc.id).unwrap().is_none());
    }
}
