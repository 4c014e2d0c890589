use crate::analysis::badges::{build_badge_leaderboard, evaluate_badges, BadgeContext};
use crate::analysis::magnitude::{resolve_magnitude, tier_style, Magnitude, TierStyle};
use crate::analysis::rank::compute_rank_result;
use crate::commands::db::{load_latest_snapshot, open_state_db};
use crate::commands::settings::load_effective_settings;
use crate::commands::source::{scan_fold, RowSource, SqliteRowSource};
use crate::models::badge::{Badge, LeaderboardEntry};
use crate::models::query::{Column, Filter, FilterValue, RowQuery};
use crate::models::rank::{Metric, RankResult};
use crate::models::snapshot::StoredSnapshot;
use crate::models::user::UserRecord;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MemberProfile {
    pub user: UserRecord,
    pub magnitude: Option<Magnitude>,
    pub tier_style: Option<TierStyle>,
    pub ranks: RankResult,
    pub badges: Vec<Badge>,
}

struct ReadContext {
    conn: Connection,
    dataset: String,
    batch_size: usize,
}

fn open_read_context(data_dir: &str) -> Result<ReadContext, String> {
    let settings = load_effective_settings(data_dir)?;
    let conn = open_state_db(data_dir, settings.fetch_timeout)?;
    Ok(ReadContext {
        conn,
        dataset: settings.dataset,
        batch_size: settings.batch_size,
    })
}

pub fn get_latest_snapshot(data_dir: &str) -> Result<Option<StoredSnapshot>, String> {
    let ctx = open_read_context(data_dir)?;
    load_latest_snapshot(&ctx.conn).map_err(|e| format!("Snapshot read error: {e}"))
}

pub fn find_member<S: RowSource + ?Sized>(
    source: &S,
    dataset: &str,
    user_id: &str,
) -> Result<Option<UserRecord>, String> {
    let query = RowQuery::new(dataset).filter(Filter::eq(Column::Id, FilterValue::Text(user_id.to_string())));
    Ok(source.fetch_page(&query, 0, 1)?.into_iter().next())
}

/// Member row plus tier, ranks among non-bot peers, and badges.
pub fn build_member_profile<S: RowSource + ?Sized>(
    source: &S,
    dataset: &str,
    user_id: &str,
    now: i64,
) -> Result<MemberProfile, String> {
    let user = find_member(source, dataset, user_id)?
        .ok_or_else(|| format!("Member not found: {user_id}"))?;

    let ranks = compute_rank_result(source, dataset, &[Filter::not_bot()], &user, &Metric::ALL)?;
    let badges = evaluate_badges(
        &user,
        &BadgeContext {
            now,
            rank: Some(&ranks),
        },
    );
    let magnitude = resolve_magnitude(user.roles.as_deref());

    Ok(MemberProfile {
        tier_style: magnitude.and_then(|m| tier_style(m.tier())),
        magnitude,
        ranks,
        badges,
        user,
    })
}

pub fn get_member_profile(data_dir: &str, user_id: &str, now: i64) -> Result<MemberProfile, String> {
    let ctx = open_read_context(data_dir)?;
    let source = SqliteRowSource::new(&ctx.conn);
    build_member_profile(&source, &ctx.dataset, user_id, now)
}

pub fn get_badge_leaderboard(data_dir: &str, limit: usize, now: i64) -> Result<Vec<LeaderboardEntry>, String> {
    let ctx = open_read_context(data_dir)?;
    let source = SqliteRowSource::new(&ctx.conn);
    let query = RowQuery::new(ctx.dataset.as_str()).filter(Filter::not_bot());

    let (members, _) = scan_fold(&source, &query, ctx.batch_size, Vec::new(), |mut members, row| {
        members.push(row.clone());
        members
    })?;

    let mut board = build_badge_leaderboard(&members, now);
    board.truncate(limit);
    Ok(board)
}
