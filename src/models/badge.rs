use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTier {
    Bronze,
    Silver,
    Gold,
    Achievement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub color: &'static str,
    pub tier: BadgeTier,
    pub achieved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub position: usize,
    pub user_id: String,
    pub handle: String,
    pub badge_count: usize,
    pub total_contributions: u64,
    pub badges: Vec<&'static str>,
}
