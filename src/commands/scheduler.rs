use crate::analysis::aggregate::aggregate_source;
use crate::commands::db::{open_state_db, persist_snapshot};
use crate::commands::sessions::{sweep_expired_sessions, SqliteSessionStore};
use crate::commands::settings::EffectiveSettings;
use crate::commands::source::SqliteRowSource;
use crate::models::session::SweepReport;
use rusqlite::Connection;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub dataset: String,
    pub batch_size: usize,
    pub cooldown: Duration,
    pub session_max_age: Duration,
    pub fetch_timeout: Duration,
}

impl From<&EffectiveSettings> for SchedulerConfig {
    fn from(settings: &EffectiveSettings) -> Self {
        Self {
            dataset: settings.dataset.clone(),
            batch_size: settings.batch_size,
            cooldown: settings.cooldown,
            session_max_age: settings.session_max_age,
            fetch_timeout: settings.fetch_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    RunningCycle,
    Sleeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub snapshot_id: i64,
    pub rows_scanned: usize,
    pub fetches: usize,
    pub total_users: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub aggregation: Result<CycleReport, String>,
    pub sweep: Result<SweepReport, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
}

/// Scans the whole dataset and replaces the current snapshot. Nothing is
/// written when the scan fails.
pub fn run_aggregation_cycle(
    conn: &Connection,
    config: &SchedulerConfig,
    now: i64,
) -> Result<CycleReport, String> {
    let source = SqliteRowSource::new(conn);
    let (snapshot, stats) = aggregate_source(&source, &config.dataset, config.batch_size, now)?;
    let snapshot_id = persist_snapshot(conn, &snapshot).map_err(|e| format!("Persist error: {e}"))?;

    Ok(CycleReport {
        snapshot_id,
        rows_scanned: stats.rows,
        fetches: stats.fetches,
        total_users: snapshot.total_users,
    })
}

/// One aggregation cycle followed by the session sweep. The sweep runs even
/// when aggregation failed.
pub fn run_cycle_once(data_dir: &str, config: &SchedulerConfig) -> CycleOutcome {
    let conn = match open_state_db(data_dir, config.fetch_timeout) {
        Ok(conn) => conn,
        Err(message) => {
            return CycleOutcome {
                aggregation: Err(message.clone()),
                sweep: Err(message),
            };
        }
    };

    let started_at = chrono::Utc::now().timestamp();
    let aggregation = run_aggregation_cycle(&conn, config, started_at);

    let store = SqliteSessionStore::new(&conn);
    let sweep = sweep_expired_sessions(&store, chrono::Utc::now().timestamp(), config.session_max_age);

    CycleOutcome { aggregation, sweep }
}

/// Runs cycles back to back with a cooldown in between until `shutdown`
/// flips to true or its sender goes away. A cycle in flight always finishes.
pub struct AggregationScheduler {
    data_dir: String,
    config: SchedulerConfig,
    state: SchedulerState,
    summary: SchedulerSummary,
}

impl AggregationScheduler {
    pub fn new(data_dir: impl Into<String>, config: SchedulerConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            config,
            state: SchedulerState::RunningCycle,
            summary: SchedulerSummary::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerSummary {
        log::info!(
            "aggregation scheduler started (dataset={}, batch={}, cooldown={}s)",
            self.config.dataset,
            self.config.batch_size,
            self.config.cooldown.as_secs()
        );

        loop {
            match self.state {
                SchedulerState::RunningCycle => {
                    if *shutdown.borrow() {
                        break;
                    }
                    self.run_cycle().await;
                    self.state = SchedulerState::Sleeping;
                }
                SchedulerState::Sleeping => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.cooldown) => {
                            self.state = SchedulerState::RunningCycle;
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        log::info!(
            "aggregation scheduler stopped after {} cycles ({} failed)",
            self.summary.cycles,
            self.summary.failed_cycles
        );
        self.summary
    }

    async fn run_cycle(&mut self) {
        let data_dir = self.data_dir.clone();
        let config = self.config.clone();
        let started = std::time::Instant::now();
        log::info!("aggregation cycle starting");

        let outcome = tokio::task::spawn_blocking(move || run_cycle_once(&data_dir, &config)).await;
        self.summary.cycles += 1;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("aggregation cycle panicked: {e}");
                self.summary.failed_cycles += 1;
                return;
            }
        };

        match outcome.aggregation {
            Ok(report) => log::info!(
                "aggregation cycle finished in {}ms: {} rows over {} fetches, snapshot #{}",
                started.elapsed().as_millis(),
                report.rows_scanned,
                report.fetches,
                report.snapshot_id
            ),
            Err(e) => {
                self.summary.failed_cycles += 1;
                log::error!("aggregation cycle failed, keeping previous snapshot: {e}");
            }
        }

        match outcome.sweep {
            Ok(report) if report.removed > 0 || report.failed > 0 => log::info!(
                "session sweep removed {} of {} sessions ({} failed)",
                report.removed,
                report.examined,
                report.failed
            ),
            Ok(_) => {}
            Err(e) => log::error!("session sweep failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::db::{initialize_schema, load_latest_snapshot, upsert_members};
    use crate::models::user::UserRecord;

    fn config(dataset: &str) -> SchedulerConfig {
        SchedulerConfig {
            dataset: dataset.to_string(),
            batch_size: 2,
            cooldown: Duration::from_millis(10),
            session_max_age: Duration::from_secs(86_400),
            fetch_timeout: Duration::from_secs(1),
        }
    }

    fn seeded_conn(count: usize) -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        initialize_schema(&conn).expect("schema init");
        let members: Vec<UserRecord> = (0..count)
            .map(|i| UserRecord {
                id: format!("m{i}"),
                total_contributions: 10,
                ..UserRecord::default()
            })
            .collect();
        upsert_members(&conn, &members).expect("seed members");
        conn
    }

    #[test]
    fn cycle_persists_snapshot() {
        let conn = seeded_conn(5);
        let report = run_aggregation_cycle(&conn, &config("members"), 1_000).expect("cycle");

        assert_eq!(report.rows_scanned, 5);
        assert_eq!(report.fetches, 3);
        assert_eq!(report.total_users, 5);

        let stored = load_latest_snapshot(&conn).expect("load").expect("snapshot");
        assert_eq!(stored.id, report.snapshot_id);
        assert_eq!(stored.snapshot.total_contributions, 50);
        assert_eq!(stored.snapshot.computed_at, 1_000);
    }

    #[test]
    fn failed_scan_leaves_previous_snapshot() {
        let conn = seeded_conn(3);
        run_aggregation_cycle(&conn, &config("members"), 1_000).expect("first cycle");

        let err = run_aggregation_cycle(&conn, &config("missing_table"), 2_000)
            .expect_err("scan of unknown dataset fails");
        assert!(err.starts_with("Fetch error"));

        let stored = load_latest_snapshot(&conn).expect("load").expect("snapshot");
        assert_eq!(stored.snapshot.computed_at, 1_000);
        assert_eq!(stored.snapshot.total_users, 3);
    }

    #[test]
    fn failed_persist_leaves_previous_snapshot() {
        let conn = seeded_conn(3);
        run_aggregation_cycle(&conn, &config("members"), 1_000).expect("first cycle");
        upsert_members(
            &conn,
            &[UserRecord {
                id: "late".to_string(),
                total_contributions: 90,
                ..UserRecord::default()
            }],
        )
        .expect("add member");
        conn.execute_batch(
            "CREATE TRIGGER freeze_snapshots BEFORE UPDATE ON metrics_snapshots
             BEGIN SELECT RAISE(ABORT, 'snapshot store is read-only'); END;",
        )
        .expect("create trigger");

        let err = run_aggregation_cycle(&conn, &config("members"), 2_000)
            .expect_err("update is rejected");
        assert!(err.starts_with("Persist error"), "{err}");

        let stored = load_latest_snapshot(&conn).expect("load").expect("snapshot");
        assert_eq!(stored.snapshot.computed_at, 1_000);
        assert_eq!(stored.snapshot.total_users, 3);
        assert_eq!(stored.snapshot.total_contributions, 30);
    }

    #[test]
    fn failed_first_persist_stores_nothing() {
        let conn = seeded_conn(2);
        conn.execute_batch(
            "CREATE TRIGGER freeze_snapshots BEFORE UPDATE ON metrics_snapshots
             BEGIN SELECT RAISE(ABORT, 'snapshot store is read-only'); END;",
        )
        .expect("create trigger");

        assert!(run_aggregation_cycle(&conn, &config("members"), 1_000).is_err());
        assert!(load_latest_snapshot(&conn).expect("load").is_none());
    }

    #[test]
    fn config_follows_settings() {
        let settings = EffectiveSettings {
            dataset: "members".to_string(),
            batch_size: 500,
            cooldown: Duration::from_secs(60),
            session_max_age: Duration::from_secs(86_400),
            fetch_timeout: Duration::from_secs(3),
            log_level: "info".to_string(),
        };
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
    }

    #[test]
    fn scheduler_starts_in_running_state() {
        let scheduler = AggregationScheduler::new("/tmp", config("members"));
        assert_eq!(scheduler.state(), SchedulerState::RunningCycle);
    }
}
