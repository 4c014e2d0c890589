use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStats {
    pub region: String,
    pub user_count: u64,
    pub total_contributions: u64,
}

/// Community-wide totals computed by one full scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub computed_at: i64,
    pub total_users: u64,
    pub human_users: u64,
    pub bot_users: u64,
    pub total_contributions: u64,
    pub total_posts: u64,
    pub total_replies: u64,
    pub total_chat: u64,
    pub active_users_7d: u64,
    pub active_users_30d: u64,
    pub avg_contributions_per_active_user: f64,
    pub region_breakdown: Vec<RegionStats>,
    pub role_breakdown: BTreeMap<String, u64>,
}

/// The persisted "latest" snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub id: i64,
    pub updated_at: i64,
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
}
