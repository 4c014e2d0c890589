use crate::analysis::magnitude::{
    has_base_tier, resolve_magnitude, tier_key, LEADERSHIP_TAG, VERIFIED_TAG,
};
use crate::commands::source::{scan_fold, RowSource, ScanStats};
use crate::models::query::{Column, RowQuery};
use crate::models::snapshot::{MetricsSnapshot, RegionStats};
use crate::models::user::UserRecord;
use std::collections::BTreeMap;

const DAY_SECS: i64 = 86_400;
const WEEK_WINDOW_SECS: i64 = 7 * DAY_SECS;
const MONTH_WINDOW_SECS: i64 = 30 * DAY_SECS;

/// Columns the accumulator reads from each row.
pub const AGGREGATION_COLUMNS: [Column; 11] = [
    Column::Id,
    Column::TotalContributions,
    Column::Posts,
    Column::Replies,
    Column::GeneralChat,
    Column::HelpChat,
    Column::OfftopicChat,
    Column::LastActivityAt,
    Column::Roles,
    Column::Region,
    Column::IsBot,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RegionTotals {
    user_count: u64,
    total_contributions: u64,
}

/// Running state for one scan. `now` is fixed when the cycle starts.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    now: i64,
    total_users: u64,
    human_users: u64,
    bot_users: u64,
    total_contributions: u64,
    total_posts: u64,
    total_replies: u64,
    total_chat: u64,
    active_contributors: u64,
    active_users_7d: u64,
    active_users_30d: u64,
    regions: BTreeMap<String, RegionTotals>,
    roles: BTreeMap<String, u64>,
}

impl MetricsAccumulator {
    pub fn new(now: i64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn observe(mut self, row: &UserRecord) -> Self {
        self.total_users += 1;

        let roles = row.roles.as_deref();
        if row.is_bot {
            self.bot_users += 1;
        } else if has_base_tier(roles) {
            self.human_users += 1;
        }

        self.total_contributions = self.total_contributions.saturating_add(row.total_contributions);
        self.total_posts = self.total_posts.saturating_add(row.posts);
        self.total_replies = self.total_replies.saturating_add(row.replies);
        self.total_chat = self.total_chat.saturating_add(row.total_chat());

        if row.total_contributions > 0 {
            self.active_contributors += 1;
        }

        if let Some(last) = row.last_activity_at {
            let elapsed = self.now - last;
            if elapsed <= WEEK_WINDOW_SECS {
                self.active_users_7d += 1;
            }
            if elapsed <= MONTH_WINDOW_SECS {
                self.active_users_30d += 1;
            }
        }

        if row.is_bot {
            return self;
        }

        if let Some(region) = row.region.as_deref() {
            let totals = self.regions.entry(region.to_string()).or_default();
            totals.user_count += 1;
            totals.total_contributions = totals.total_contributions.saturating_add(row.total_contributions);
        }

        if let Some(tags) = roles {
            for tag in [VERIFIED_TAG, LEADERSHIP_TAG] {
                if row.has_role(tag) {
                    *self.roles.entry(tag.to_string()).or_insert(0) += 1;
                }
            }

            // One tier entry per user, never one per matching tag. Tier 0 is no tier.
            if let Some(magnitude) = resolve_magnitude(Some(tags)).filter(|m| m.tier() >= 1) {
                *self.roles.entry(tier_key(magnitude)).or_insert(0) += 1;
            }
        }

        self
    }

    pub fn finish(self) -> MetricsSnapshot {
        let avg_contributions_per_active_user = if self.active_contributors == 0 {
            0.0
        } else {
            self.total_contributions as f64 / self.active_contributors as f64
        };

        let mut region_breakdown: Vec<RegionStats> = self
            .regions
            .into_iter()
            .map(|(region, totals)| RegionStats {
                region,
                user_count: totals.user_count,
                total_contributions: totals.total_contributions,
            })
            .collect();
        region_breakdown.sort_by(|a, b| {
            b.user_count
                .cmp(&a.user_count)
                .then_with(|| a.region.cmp(&b.region))
        });

        MetricsSnapshot {
            computed_at: self.now,
            total_users: self.total_users,
            human_users: self.human_users,
            bot_users: self.bot_users,
            total_contributions: self.total_contributions,
            total_posts: self.total_posts,
            total_replies: self.total_replies,
            total_chat: self.total_chat,
            active_users_7d: self.active_users_7d,
            active_users_30d: self.active_users_30d,
            avg_contributions_per_active_user,
            region_breakdown,
            role_breakdown: self.roles,
        }
    }
}

pub fn aggregate_rows<'a, I>(rows: I, now: i64) -> MetricsSnapshot
where
    I: IntoIterator<Item = &'a UserRecord>,
{
    rows.into_iter()
        .fold(MetricsAccumulator::new(now), MetricsAccumulator::observe)
        .finish()
}

/// One full pass over `dataset` through the paginated scanner.
pub fn aggregate_source<S: RowSource + ?Sized>(
    source: &S,
    dataset: &str,
    batch_size: usize,
    now: i64,
) -> Result<(MetricsSnapshot, ScanStats), String> {
    let query = RowQuery::new(dataset).project(&AGGREGATION_COLUMNS);
    let (accumulator, stats) = scan_fold(
        source,
        &query,
        batch_size,
        MetricsAccumulator::new(now),
        MetricsAccumulator::observe,
    )?;
    Ok((accumulator.finish(), stats))
}
