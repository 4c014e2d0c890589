use crate::models::session::{SessionRecord, SweepReport};
use rusqlite::Connection;
use std::time::Duration;

pub trait SessionStore {
    fn list_sessions(&self) -> Result<Vec<SessionRecord>, String>;

    fn delete_session(&self, id: &str) -> Result<(), String>;
}

pub struct SqliteSessionStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSessionStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Records activity for an existing session, or opens a new one when
    /// `session_id` is `None`. Returns the session id.
    pub fn touch_session(&self, user_id: &str, session_id: Option<&str>, now: i64) -> Result<String, String> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let existing = crate::commands::db::find_session(self.conn, &id)
            .map_err(|e| format!("Session read error: {e}"))?;

        let record = SessionRecord {
            id: id.clone(),
            user_id: user_id.to_string(),
            created_at: existing.map(|s| s.created_at).unwrap_or(now),
            last_active_at: now,
        };
        crate::commands::db::insert_session(self.conn, &record)
            .map_err(|e| format!("Session write error: {e}"))?;

        Ok(id)
    }
}

impl SessionStore for SqliteSessionStore<'_> {
    fn list_sessions(&self) -> Result<Vec<SessionRecord>, String> {
        crate::commands::db::list_sessions(self.conn).map_err(|e| format!("Session read error: {e}"))
    }

    fn delete_session(&self, id: &str) -> Result<(), String> {
        crate::commands::db::delete_session(self.conn, id)
            .map(|_| ())
            .map_err(|e| format!("Session delete error: {e}"))
    }
}

/// Deletes sessions idle for longer than `max_age`. A failed delete is logged
/// and counted; the sweep carries on with the remaining sessions.
pub fn sweep_expired_sessions<S: SessionStore + ?Sized>(
    store: &S,
    now: i64,
    max_age: Duration,
) -> Result<SweepReport, String> {
    let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    let sessions = store.list_sessions()?;
    let mut report = SweepReport {
        examined: sessions.len(),
        ..SweepReport::default()
    };

    for session in sessions {
        if now.saturating_sub(session.last_active_at) <= max_age_secs {
            continue;
        }

        match store.delete_session(&session.id) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                log::warn!("failed to remove expired session {}: {e}", session.id);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const NOW: i64 = 1_750_000_000;
    const DAY: i64 = 86_400;

    struct FakeStore {
        sessions: Vec<SessionRecord>,
        broken: Vec<&'static str>,
        deleted: RefCell<Vec<String>>,
    }

    impl SessionStore for FakeStore {
        fn list_sessions(&self) -> Result<Vec<SessionRecord>, String> {
            Ok(self.sessions.clone())
        }

        fn delete_session(&self, id: &str) -> Result<(), String> {
            if self.broken.iter().any(|broken| *broken == id) {
                return Err("row locked".to_string());
            }
            self.deleted.borrow_mut().push(id.to_string());
            Ok(())
        }
    }

    fn session(id: &str, idle_days: i64) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            user_id: format!("user-{id}"),
            created_at: NOW - 400 * DAY,
            last_active_at: NOW - idle_days * DAY,
        }
    }

    #[test]
    fn removes_only_sessions_past_max_age() {
        let store = FakeStore {
            sessions: vec![session("fresh", 1), session("stale", 31), session("edge", 30)],
            broken: vec![],
            deleted: RefCell::new(vec![]),
        };

        let report = sweep_expired_sessions(&store, NOW, Duration::from_secs(30 * DAY as u64))
            .expect("sweep");

        assert_eq!(report, SweepReport { examined: 3, removed: 1, failed: 0 });
        assert_eq!(*store.deleted.borrow(), vec!["stale".to_string()]);
    }

    #[test]
    fn item_failures_do_not_abort_sweep() {
        let store = FakeStore {
            sessions: vec![session("a", 60), session("b", 60), session("c", 60)],
            broken: vec!["b"],
            deleted: RefCell::new(vec![]),
        };

        let report = sweep_expired_sessions(&store, NOW, Duration::from_secs(7 * DAY as u64))
            .expect("sweep");

        assert_eq!(report, SweepReport { examined: 3, removed: 2, failed: 1 });
        assert_eq!(*store.deleted.borrow(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn sqlite_store_touches_and_sweeps() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        crate::commands::db::initialize_schema(&conn).expect("schema init");
        let store = SqliteSessionStore::new(&conn);

        let old = store.touch_session("u1", None, NOW - 90 * DAY).expect("open old");
        let recent = store.touch_session("u2", None, NOW - 90 * DAY).expect("open recent");
        store.touch_session("u2", Some(&recent), NOW).expect("refresh");

        let report = sweep_expired_sessions(&store, NOW, Duration::from_secs(30 * DAY as u64))
            .expect("sweep");
        assert_eq!(report.removed, 1);

        let remaining = store.list_sessions().expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, recent);
        assert_eq!(remaining[0].created_at, NOW - 90 * DAY);
        assert_ne!(remaining[0].id, old);
    }

    #[test]
    fn touching_known_session_keeps_its_creation_time() {
        let conn = Connection::open_in_memory().expect("in-memory db");
        crate::commands::db::initialize_schema(&conn).expect("schema init");
        let store = SqliteSessionStore::new(&conn);

        let other = store.touch_session("u1", None, NOW - 5 * DAY).expect("open other");
        let id = store.touch_session("u2", Some("fixed-id"), NOW - 3 * DAY).expect("open");
        assert_eq!(id, "fixed-id");
        store.touch_session("u2", Some("fixed-id"), NOW).expect("refresh");

        let session = crate::commands::db::find_session(&conn, "fixed-id")
            .expect("find")
            .expect("session");
        assert_eq!(session.created_at, NOW - 3 * DAY);
        assert_eq!(session.last_active_at, NOW);

        let untouched = crate::commands::db::find_session(&conn, &other)
            .expect("find")
            .expect("session");
        assert_eq!(untouched.last_active_at, NOW - 5 * DAY);
    }
}
