//! Background ingestion worker.
//!
//! Each submitted ingestion gets its own task that walks it through
//! `pending -> processing -> completed` on two fixed delays. The task's
//! cancellation token lives in the job table, so deleting the ingestion,
//! its document or its owner stops the timers. Transitions are
//! compare-and-set in the store, which makes a late timer harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docuhub_db::Database;
use docuhub_types::models::{Ingestion, IngestionStatus};

pub const QUEUED_MESSAGE: &str = "Ingestion queued";
pub const PROCESSING_MESSAGE: &str = "Starting ingestion process...";
pub const COMPLETED_MESSAGE: &str = "Document successfully ingested";

/// Delays between the two transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// pending -> processing
    pub start_delay: Duration,
    /// processing -> completed
    pub process_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(1),
            process_delay: Duration::from_secs(5),
        }
    }
}

/// Handle to the ingestion worker. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    db: Arc<Database>,
    timings: Timings,

    /// In-flight jobs: ingestion_id -> job
    jobs: Mutex<HashMap<i64, Job>>,

    /// Parent of every job token; cancelled on shutdown.
    shutdown: CancellationToken,
}

struct Job {
    document_id: i64,
    cancel: CancellationToken,
}

/// How a job's task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
    /// The record was deleted or moved on without us.
    Superseded,
    Failed,
}

impl Pipeline {
    pub fn new(db: Arc<Database>, timings: Timings) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                db,
                timings,
                jobs: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Schedule the transitions for a freshly created ingestion.
    pub async fn submit(&self, ingestion: &Ingestion) {
        if ingestion.status != IngestionStatus::Pending {
            warn!(
                "Ingestion {} submitted in status {}, ignoring",
                ingestion.id, ingestion.status
            );
            return;
        }

        let id = ingestion.id;
        let cancel = self.inner.shutdown.child_token();

        // Register before spawning so a cancel issued right after submit
        // always finds the job.
        self.inner.jobs.lock().await.insert(
            id,
            Job {
                document_id: ingestion.document_id,
                cancel: cancel.clone(),
            },
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = inner.run_job(id, &cancel).await;
            debug!("Ingestion {} job finished: {:?}", id, outcome);
            inner.jobs.lock().await.remove(&id);
        });

        debug!("Ingestion {} scheduled for document {}", id, ingestion.document_id);
    }

    /// Stop the pending transitions of one ingestion. Returns whether a job
    /// was still in flight.
    pub async fn cancel(&self, ingestion_id: i64) -> bool {
        match self.inner.jobs.lock().await.remove(&ingestion_id) {
            Some(job) => {
                job.cancel.cancel();
                debug!("Ingestion {} cancelled", ingestion_id);
                true
            }
            None => false,
        }
    }

    pub async fn cancel_many(&self, ingestion_ids: &[i64]) -> usize {
        let mut jobs = self.inner.jobs.lock().await;
        let mut cancelled = 0;
        for id in ingestion_ids {
            if let Some(job) = jobs.remove(id) {
                job.cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Stop every in-flight job for a document. Returns how many.
    pub async fn cancel_document(&self, document_id: i64) -> usize {
        let mut jobs = self.inner.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            if job.document_id == document_id {
                job.cancel.cancel();
                false
            } else {
                true
            }
        });
        let cancelled = before - jobs.len();
        if cancelled > 0 {
            debug!("Cancelled {} ingestion(s) for document {}", cancelled, document_id);
        }
        cancelled
    }

    pub async fn in_flight(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    /// Cancel everything. Jobs not yet completed stay at their last status.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        info!("Ingestion pipeline shut down");
    }
}

impl PipelineInner {
    async fn run_job(&self, id: i64, cancel: &CancellationToken) -> Outcome {
        if !sleep_unless_cancelled(cancel, self.timings.start_delay).await {
            return Outcome::Cancelled;
        }

        match self.db.advance_ingestion(
            id,
            IngestionStatus::Pending,
            IngestionStatus::Processing,
            PROCESSING_MESSAGE,
        ) {
            Ok(Some(_)) => debug!("Ingestion {} processing", id),
            Ok(None) => return Outcome::Superseded,
            Err(e) => {
                warn!("Ingestion {} failed to start processing: {}", id, e);
                return Outcome::Failed;
            }
        }

        if !sleep_unless_cancelled(cancel, self.timings.process_delay).await {
            return Outcome::Cancelled;
        }

        match self.db.complete_ingestion(id, COMPLETED_MESSAGE) {
            Ok(Some(ingestion)) => {
                info!(
                    "Ingestion {} completed for document {}",
                    id, ingestion.document_id
                );
                Outcome::Completed
            }
            Ok(None) => Outcome::Superseded,
            Err(e) => {
                warn!("Ingestion {} failed to complete: {}", id, e);
                Outcome::Failed
            }
        }
    }
}

/// Returns false if the token fired first.
async fn sleep_unless_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docuhub_db::models::{NewActivity, NewUser};
    use docuhub_types::models::{ActivityType, Document, Role};

    fn setup() -> (Arc<Database>, Document) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = db
            .create_user(&NewUser {
                username: "ingester",
                password_hash: "x",
                name: "Ingester",
                email: "ingester@example.com",
                role: Role::User,
            })
            .unwrap()
            .unwrap();
        let doc = db
            .create_document(user.id, "q1.xlsx", None, |d| {
                NewActivity::new(ActivityType::Upload, d.user_id, "Document uploaded")
            })
            .unwrap();
        (db, doc)
    }

    fn status(db: &Database, id: i64) -> Option<IngestionStatus> {
        db.get_ingestion(id).unwrap().map(|i| i.status)
    }

    fn terminal_activities(db: &Database) -> Vec<i64> {
        db.list_activities(None)
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == ActivityType::Ingestion)
            .filter_map(|a| a.document_id)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn walks_pending_processing_completed() {
        let (db, doc) = setup();
        let pipeline = Pipeline::new(db.clone(), Timings::default());
        let ing = db.create_ingestion(doc.id, doc.user_id, QUEUED_MESSAGE).unwrap();

        pipeline.submit(&ing).await;
        assert_eq!(pipeline.in_flight().await, 1);
        assert_eq!(status(&db, ing.id), Some(IngestionStatus::Pending));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let current = db.get_ingestion(ing.id).unwrap().unwrap();
        assert_eq!(current.status, IngestionStatus::Processing);
        assert_eq!(current.status_message.as_deref(), Some(PROCESSING_MESSAGE));
        assert!(terminal_activities(&db).is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let current = db.get_ingestion(ing.id).unwrap().unwrap();
        assert_eq!(current.status, IngestionStatus::Completed);
        assert_eq!(current.status_message.as_deref(), Some(COMPLETED_MESSAGE));
        assert_eq!(terminal_activities(&db), vec![doc.id]);
        assert_eq!(pipeline.in_flight().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_start_leaves_pending() {
        let (db, doc) = setup();
        let pipeline = Pipeline::new(db.clone(), Timings::default());
        let ing = db.create_ingestion(doc.id, doc.user_id, QUEUED_MESSAGE).unwrap();

        pipeline.submit(&ing).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pipeline.cancel_document(doc.id).await, 1);
        assert!(!pipeline.cancel(ing.id).await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(status(&db, ing.id), Some(IngestionStatus::Pending));
        assert!(terminal_activities(&db).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_processing_writes_no_terminal_activity() {
        let (db, doc) = setup();
        let pipeline = Pipeline::new(db.clone(), Timings::default());
        let ing = db.create_ingestion(doc.id, doc.user_id, QUEUED_MESSAGE).unwrap();

        pipeline.submit(&ing).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(status(&db, ing.id), Some(IngestionStatus::Processing));

        assert!(pipeline.cancel(ing.id).await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(status(&db, ing.id), Some(IngestionStatus::Processing));
        assert!(terminal_activities(&db).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_record_stops_the_job() {
        let (db, doc) = setup();
        let pipeline = Pipeline::new(db.clone(), Timings::default());
        let ing = db.create_ingestion(doc.id, doc.user_id, QUEUED_MESSAGE).unwrap();

        pipeline.submit(&ing).await;
        // Deleted behind the pipeline's back: the CAS transition finds nothing.
        assert!(db.delete_ingestion(ing.id).unwrap());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(terminal_activities(&db).is_empty());
        assert_eq!(pipeline.in_flight().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_ingestion_completes_once() {
        let (db, doc) = setup();
        let pipeline = Pipeline::new(db.clone(), Timings::default());
        let first = db.create_ingestion(doc.id, doc.user_id, QUEUED_MESSAGE).unwrap();
        let second = db.create_ingestion(doc.id, doc.user_id, QUEUED_MESSAGE).unwrap();

        pipeline.submit(&first).await;
        pipeline.submit(&second).await;
        // Re-submitting a record that already left `pending` is ignored.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let stale = db.get_ingestion(first.id).unwrap().unwrap();
        pipeline.submit(&stale).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(status(&db, first.id), Some(IngestionStatus::Completed));
        assert_eq!(status(&db, second.id), Some(IngestionStatus::Completed));
        assert_eq!(terminal_activities(&db), vec![doc.id, doc.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let (db, doc) = setup();
        let pipeline = Pipeline::new(db.clone(), Timings::default());
        let ing = db.create_ingestion(doc.id, doc.user_id, QUEUED_MESSAGE).unwrap();

        pipeline.submit(&ing).await;
        pipeline.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(status(&db, ing.id), Some(IngestionStatus::Pending));
        assert_eq!(pipeline.in_flight().await, 0);
    }
}
