use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use docuhub_db::Database;

/// Background task that prunes sessions past their `expires_at`.
///
/// Expired sessions are already refused on lookup; this only keeps the
/// table from growing.
pub async fn run_session_sweep(db: Arc<Database>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        match sweep_expired(&db) {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: pruned {} expired sessions", count);
                }
            }
            Err(e) => {
                warn!("Cleanup error: {}", e);
            }
        }
    }
}

fn sweep_expired(db: &Database) -> anyhow::Result<usize> {
    db.delete_expired_sessions(Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docuhub_db::models::NewUser;

    fn user(db: &Database) -> i64 {
        db.create_user(&NewUser {
            username: "sweeper",
            password_hash: "x",
            name: "Sweeper",
            email: "s@example.com",
            role: Default::default(),
        })
        .unwrap()
        .unwrap()
        .id
    }

    #[test]
    fn sweep_only_removes_expired() {
        let db = Database::open_in_memory().unwrap();
        let id = user(&db);
        let now = Utc::now().timestamp();
        db.create_session("old", id, now - 10).unwrap();
        db.create_session("live", id, now + 3600).unwrap();

        assert_eq!(sweep_expired(&db).unwrap(), 1);
        assert!(db.get_session("live", now).unwrap().is_some());
        assert_eq!(sweep_expired(&db).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_sweeps_on_each_tick() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = user(&db);
        db.create_session("old", id, Utc::now().timestamp() - 10).unwrap();

        let task = tokio::spawn(run_session_sweep(db.clone(), 60));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(sweep_expired(&db).unwrap(), 0);
        task.abort();
    }
}
