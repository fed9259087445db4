use anyhow::{Result, bail};
use chrono::Utc;
use rusqlite::{Connection, Row, params};

use docuhub_types::models::{ActivityType, Ingestion, IngestionStatus};

use crate::activities::insert_activity;
use crate::documents::query_document;
use crate::models::NewActivity;
use crate::{Database, OptionalExt, parse_column};

const INGESTION_COLUMNS: &str =
    "id, document_id, user_id, status, status_message, created_at, updated_at";

impl Database {
    /// Insert a new ingestion in `pending`.
    pub fn create_ingestion(
        &self,
        document_id: i64,
        user_id: i64,
        message: &str,
    ) -> Result<Ingestion> {
        self.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO ingestions (document_id, user_id, status, status_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![document_id, user_id, IngestionStatus::Pending.as_str(), message, now],
            )?;

            let id = conn.last_insert_rowid();
            query_ingestion(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("ingestion {} vanished after insert", id))
        })
    }

    pub fn get_ingestion(&self, id: i64) -> Result<Option<Ingestion>> {
        self.with_conn(|conn| query_ingestion(conn, id))
    }

    /// All ingestions, or only those submitted by `user_id`.
    pub fn list_ingestions(&self, user_id: Option<i64>) -> Result<Vec<Ingestion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INGESTION_COLUMNS} FROM ingestions
                 WHERE ?1 IS NULL OR user_id = ?1
                 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([user_id], map_ingestion)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn ingestion_ids_for_document(&self, document_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM ingestions WHERE document_id = ?1")?;
            let ids = stmt
                .query_map([document_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// Ingestions on the user's documents, which cascade away with them.
    /// Ingestions the user queued on someone else's document are not
    /// included; they outlive the user and run to completion.
    pub fn ingestion_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT i.id FROM ingestions i
                 JOIN documents d ON i.document_id = d.id
                 WHERE d.user_id = ?1",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// Compare-and-set transition: only applies while the ingestion is still
    /// in `from`. Returns the updated record, or `None` if it was deleted or
    /// has already moved on.
    pub fn advance_ingestion(
        &self,
        id: i64,
        from: IngestionStatus,
        to: IngestionStatus,
        message: &str,
    ) -> Result<Option<Ingestion>> {
        if !from.can_advance_to(to) {
            bail!("illegal ingestion transition {} -> {}", from, to);
        }

        self.with_conn(|conn| {
            let changed = transition(conn, id, from, to, message)?;
            if !changed {
                return Ok(None);
            }
            query_ingestion(conn, id)
        })
    }

    /// Final `processing -> completed` step plus the single terminal
    /// activity, atomically. A second call for the same ingestion is a no-op,
    /// so the activity can only ever be written once.
    pub fn complete_ingestion(&self, id: i64, message: &str) -> Result<Option<Ingestion>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = transition(
                &tx,
                id,
                IngestionStatus::Processing,
                IngestionStatus::Completed,
                message,
            )?;
            if !changed {
                return Ok(None);
            }

            let Some(ingestion) = query_ingestion(&tx, id)? else {
                return Ok(None);
            };

            let mut activity =
                NewActivity::new(ActivityType::Ingestion, ingestion.user_id, "Document ingested");
            activity.document_id = Some(ingestion.document_id);
            activity.document_name = query_document(&tx, ingestion.document_id)?.map(|d| d.name);
            insert_activity(&tx, &activity)?;

            tx.commit()?;
            Ok(Some(ingestion))
        })
    }

    pub fn delete_ingestion(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM ingestions WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }
}

fn transition(
    conn: &Connection,
    id: i64,
    from: IngestionStatus,
    to: IngestionStatus,
    message: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE ingestions SET status = ?3, status_message = ?4, updated_at = ?5
         WHERE id = ?1 AND status = ?2",
        params![id, from.as_str(), to.as_str(), message, Utc::now()],
    )?;
    Ok(changed > 0)
}

fn query_ingestion(conn: &Connection, id: i64) -> Result<Option<Ingestion>> {
    conn.query_row(
        &format!("SELECT {INGESTION_COLUMNS} FROM ingestions WHERE id = ?1"),
        [id],
        map_ingestion,
    )
    .optional()
}

fn map_ingestion(row: &Row<'_>) -> rusqlite::Result<Ingestion> {
    Ok(Ingestion {
        id: row.get(0)?,
        document_id: row.get(1)?,
        user_id: row.get(2)?,
        status: parse_column(row, 3)?,
        status_message: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use docuhub_types::models::{Document, Role};

    fn setup() -> (Database, Document) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(&NewUser {
                username: "u",
                password_hash: "x",
                name: "U",
                email: "u@example.com",
                role: Role::User,
            })
            .unwrap()
            .unwrap();
        let doc = db
            .create_document(user.id, "annual.pdf", None, |d| {
                NewActivity::new(ActivityType::Upload, d.user_id, "Document uploaded")
            })
            .unwrap();
        (db, doc)
    }

    fn ingestion_activities(db: &Database) -> usize {
        db.list_activities(None)
            .unwrap()
            .iter()
            .filter(|a| a.kind == ActivityType::Ingestion)
            .count()
    }

    #[test]
    fn full_lifecycle_writes_one_terminal_activity() {
        let (db, doc) = setup();
        let ing = db.create_ingestion(doc.id, doc.user_id, "queued").unwrap();
        assert_eq!(ing.status, IngestionStatus::Pending);

        let processing = db
            .advance_ingestion(ing.id, IngestionStatus::Pending, IngestionStatus::Processing, "working")
            .unwrap()
            .unwrap();
        assert_eq!(processing.status, IngestionStatus::Processing);
        assert_eq!(processing.status_message.as_deref(), Some("working"));

        let done = db.complete_ingestion(ing.id, "done").unwrap().unwrap();
        assert_eq!(done.status, IngestionStatus::Completed);
        assert!(db.complete_ingestion(ing.id, "done").unwrap().is_none());

        assert_eq!(ingestion_activities(&db), 1);
        let log = db.list_activities(Some(1)).unwrap();
        assert_eq!(log[0].document_id, Some(doc.id));
        assert_eq!(log[0].document_name.as_deref(), Some("annual.pdf"));
    }

    #[test]
    fn cannot_skip_or_regress() {
        let (db, doc) = setup();
        let ing = db.create_ingestion(doc.id, doc.user_id, "queued").unwrap();

        assert!(
            db.advance_ingestion(ing.id, IngestionStatus::Pending, IngestionStatus::Completed, "skip")
                .is_err()
        );
        // Not yet processing, so completion does not apply.
        assert!(db.complete_ingestion(ing.id, "early").unwrap().is_none());
        assert_eq!(ingestion_activities(&db), 0);

        db.advance_ingestion(ing.id, IngestionStatus::Pending, IngestionStatus::Processing, "go")
            .unwrap()
            .unwrap();
        assert!(
            db.advance_ingestion(ing.id, IngestionStatus::Pending, IngestionStatus::Processing, "again")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn transitions_on_deleted_ingestion_are_noops() {
        let (db, doc) = setup();
        let ing = db.create_ingestion(doc.id, doc.user_id, "queued").unwrap();
        assert_eq!(db.ingestion_ids_for_document(doc.id).unwrap(), vec![ing.id]);
        assert_eq!(db.ingestion_ids_for_user(doc.user_id).unwrap(), vec![ing.id]);

        db.delete_document(doc.id, |d| {
            NewActivity::new(ActivityType::Delete, d.user_id, "Document deleted")
        })
        .unwrap();

        assert!(db.get_ingestion(ing.id).unwrap().is_none());
        assert!(
            db.advance_ingestion(ing.id, IngestionStatus::Pending, IngestionStatus::Processing, "late")
                .unwrap()
                .is_none()
        );
        assert!(!db.delete_ingestion(ing.id).unwrap());
    }

    #[test]
    fn list_filters_by_submitter() {
        let (db, doc) = setup();
        db.create_ingestion(doc.id, doc.user_id, "queued").unwrap();
        assert_eq!(db.list_ingestions(Some(doc.user_id)).unwrap().len(), 1);
        assert!(db.list_ingestions(Some(doc.user_id + 1)).unwrap().is_empty());
        assert_eq!(db.list_ingestions(None).unwrap().len(), 1);
    }

    #[test]
    fn user_ids_cover_owned_documents_only() {
        let (db, doc) = setup();
        let queuer = db
            .create_user(&NewUser {
                username: "ops",
                password_hash: "x",
                name: "Ops",
                email: "ops@example.com",
                role: Role::Admin,
            })
            .unwrap()
            .unwrap();
        let ing = db.create_ingestion(doc.id, queuer.id, "queued").unwrap();

        assert!(db.ingestion_ids_for_user(queuer.id).unwrap().is_empty());
        assert_eq!(db.ingestion_ids_for_user(doc.user_id).unwrap(), vec![ing.id]);

        // The queuer going away leaves the record in place.
        assert!(db.delete_user(queuer.id).unwrap());
        assert!(db.get_ingestion(ing.id).unwrap().is_some());
    }
}
