use crate::models::session::SessionRecord;
use crate::models::snapshot::{MetricsSnapshot, StoredSnapshot};
use crate::models::user::UserRecord;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_SCHEMA_VERSION: i64 = 2;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        // Future schema; do not fail reads/writes for forward-compatible changes.
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS members (
            id TEXT PRIMARY KEY,
            handle TEXT NOT NULL DEFAULT '',
            total_contributions INTEGER NOT NULL DEFAULT 0,
            posts INTEGER NOT NULL DEFAULT 0,
            replies INTEGER NOT NULL DEFAULT 0,
            general_chat INTEGER NOT NULL DEFAULT 0,
            help_chat INTEGER NOT NULL DEFAULT 0,
            offtopic_chat INTEGER NOT NULL DEFAULT 0,
            account_created_at INTEGER,
            joined_at INTEGER,
            first_activity_at INTEGER,
            last_activity_at INTEGER,
            roles TEXT,
            region TEXT,
            is_bot INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS metrics_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            computed_at INTEGER NOT NULL,
            total_users INTEGER NOT NULL DEFAULT 0,
            human_users INTEGER NOT NULL DEFAULT 0,
            bot_users INTEGER NOT NULL DEFAULT 0,
            total_contributions INTEGER NOT NULL DEFAULT 0,
            total_posts INTEGER NOT NULL DEFAULT 0,
            total_replies INTEGER NOT NULL DEFAULT 0,
            total_chat INTEGER NOT NULL DEFAULT 0,
            active_users_7d INTEGER NOT NULL DEFAULT 0,
            active_users_30d INTEGER NOT NULL DEFAULT 0,
            avg_contributions_per_active_user REAL NOT NULL DEFAULT 0,
            region_breakdown_json TEXT NOT NULL DEFAULT '[]',
            role_breakdown_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_active_at INTEGER NOT NULL
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_members_total_contributions ON members(total_contributions);
        CREATE INDEX IF NOT EXISTS idx_members_posts ON members(posts);
        CREATE INDEX IF NOT EXISTS idx_members_replies ON members(replies);
        CREATE INDEX IF NOT EXISTS idx_sessions_last_active_at ON sessions(last_active_at);
        ",
    )
}

fn state_dir(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join(".communitylens")
}

pub fn db_path(data_dir: &str) -> PathBuf {
    state_dir(data_dir).join("state.db")
}

/// Opens the state database. `busy_timeout` bounds how long a read or write
/// waits on a locked store before failing. The state directory must exist.
pub fn get_db_connection(data_dir: &str, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(db_path(data_dir))?;
    conn.busy_timeout(busy_timeout)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

/// Creates the state directory when missing, then opens the database.
pub fn open_state_db(data_dir: &str, busy_timeout: Duration) -> std::result::Result<Connection, String> {
    let dir = state_dir(data_dir);
    std::fs::create_dir_all(&dir)
        .map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
    get_db_connection(data_dir, busy_timeout).map_err(|e| format!("DB error: {e}"))
}

fn sql_count(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Import path for member rows; the aggregation core only reads them.
pub fn upsert_members(conn: &Connection, members: &[UserRecord]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for member in members {
        upsert_member_with_conn(&tx, member)?;
    }
    tx.commit()
}

fn upsert_member_with_conn(conn: &Connection, member: &UserRecord) -> Result<()> {
    let roles_json = member
        .roles
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "
        INSERT INTO members (
            id,
            handle,
            total_contributions,
            posts,
            replies,
            general_chat,
            help_chat,
            offtopic_chat,
            account_created_at,
            joined_at,
            first_activity_at,
            last_activity_at,
            roles,
            region,
            is_bot
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(id) DO UPDATE SET
            handle = excluded.handle,
            total_contributions = excluded.total_contributions,
            posts = excluded.posts,
            replies = excluded.replies,
            general_chat = excluded.general_chat,
            help_chat = excluded.help_chat,
            offtopic_chat = excluded.offtopic_chat,
            account_created_at = excluded.account_created_at,
            joined_at = excluded.joined_at,
            first_activity_at = excluded.first_activity_at,
            last_activity_at = excluded.last_activity_at,
            roles = excluded.roles,
            region = excluded.region,
            is_bot = excluded.is_bot
        ",
        params![
            member.id,
            member.handle,
            sql_count(member.total_contributions)?,
            sql_count(member.posts)?,
            sql_count(member.replies)?,
            sql_count(member.general_chat)?,
            sql_count(member.help_chat)?,
            sql_count(member.offtopic_chat)?,
            member.account_created_at,
            member.joined_at,
            member.first_activity_at,
            member.last_activity_at,
            roles_json,
            member.region,
            member.is_bot as i64,
        ],
    )?;

    Ok(())
}

/// Writes `snapshot` as the single current record: the latest row (by id) is
/// overwritten in place, or the first row is inserted. Returns its id.
pub fn persist_snapshot(conn: &Connection, snapshot: &MetricsSnapshot) -> Result<i64> {
    let region_json = serde_json::to_string(&snapshot.region_breakdown)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let role_json = serde_json::to_string(&snapshot.role_breakdown)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let now = chrono::Utc::now().timestamp();

    let tx = conn.unchecked_transaction()?;
    let latest: Option<i64> = tx
        .query_row(
            "SELECT id FROM metrics_snapshots ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let id = match latest {
        Some(id) => id,
        None => {
            tx.execute(
                "INSERT INTO metrics_snapshots (computed_at) VALUES (?1)",
                params![snapshot.computed_at],
            )?;
            tx.last_insert_rowid()
        }
    };

    tx.execute(
        "UPDATE metrics_snapshots SET computed_at=?2, total_users=?3, human_users=?4, bot_users=?5, total_contributions=?6, total_posts=?7, total_replies=?8, total_chat=?9, active_users_7d=?10, active_users_30d=?11, avg_contributions_per_active_user=?12, region_breakdown_json=?13, role_breakdown_json=?14, updated_at=?15 WHERE id=?1",
        params![
            id,
            snapshot.computed_at,
            sql_count(snapshot.total_users)?,
            sql_count(snapshot.human_users)?,
            sql_count(snapshot.bot_users)?,
            sql_count(snapshot.total_contributions)?,
            sql_count(snapshot.total_posts)?,
            sql_count(snapshot.total_replies)?,
            sql_count(snapshot.total_chat)?,
            sql_count(snapshot.active_users_7d)?,
            sql_count(snapshot.active_users_30d)?,
            snapshot.avg_contributions_per_active_user,
            region_json,
            role_json,
            now,
        ],
    )?;

    tx.commit()?;
    Ok(id)
}

pub fn load_latest_snapshot(conn: &Connection) -> Result<Option<StoredSnapshot>> {
    conn.query_row(
        "SELECT id, updated_at, computed_at, total_users, human_users, bot_users, total_contributions, total_posts, total_replies, total_chat, active_users_7d, active_users_30d, avg_contributions_per_active_user, region_breakdown_json, role_breakdown_json FROM metrics_snapshots ORDER BY id DESC LIMIT 1",
        [],
        |row| {
            let count = |idx: usize| -> Result<u64> { Ok(row.get::<_, i64>(idx)?.max(0) as u64) };

            Ok(StoredSnapshot {
                id: row.get(0)?,
                updated_at: row.get(1)?,
                snapshot: MetricsSnapshot {
                    computed_at: row.get(2)?,
                    total_users: count(3)?,
                    human_users: count(4)?,
                    bot_users: count(5)?,
                    total_contributions: count(6)?,
                    total_posts: count(7)?,
                    total_replies: count(8)?,
                    total_chat: count(9)?,
                    active_users_7d: count(10)?,
                    active_users_30d: count(11)?,
                    avg_contributions_per_active_user: row.get(12)?,
                    region_breakdown: json_column(row, 13)?,
                    role_breakdown: json_column(row, 14)?,
                },
            })
        },
    )
    .optional()
}

pub fn insert_session(conn: &Connection, session: &SessionRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sessions (id, user_id, created_at, last_active_at) VALUES (?1, ?2, ?3, ?4)",
        params![session.id, session.user_id, session.created_at, session.last_active_at],
    )?;
    Ok(())
}

pub fn find_session(conn: &Connection, id: &str) -> Result<Option<SessionRecord>> {
    conn.query_row(
        "SELECT id, user_id, created_at, last_active_at FROM sessions WHERE id = ?1",
        params![id],
        read_session_row,
    )
    .optional()
}

pub fn list_sessions(conn: &Connection) -> Result<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, created_at, last_active_at FROM sessions ORDER BY last_active_at ASC",
    )?;
    let sessions = stmt
        .query_map([], read_session_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(sessions)
}

fn read_session_row(row: &rusqlite::Row<'_>) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        created_at: row.get(2)?,
        last_active_at: row.get(3)?,
    })
}

pub fn delete_session(conn: &Connection, id: &str) -> Result<usize> {
    conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])
}
