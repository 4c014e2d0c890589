use crate::models::query::Column;
use crate::models::user::UserRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalContributions,
    Posts,
    Replies,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::TotalContributions, Metric::Posts, Metric::Replies];

    pub fn column(self) -> Column {
        match self {
            Metric::TotalContributions => Column::TotalContributions,
            Metric::Posts => Column::Posts,
            Metric::Replies => Column::Replies,
        }
    }

    pub fn value_of(self, user: &UserRecord) -> u64 {
        match self {
            Metric::TotalContributions => user.total_contributions,
            Metric::Posts => user.posts,
            Metric::Replies => user.replies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRank {
    pub metric: Metric,
    pub value: u64,
    pub rank: u64,
    pub percentile: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankResult {
    pub population: u64,
    pub metrics: Vec<MetricRank>,
}

impl RankResult {
    pub fn get(&self, metric: Metric) -> Option<&MetricRank> {
        self.metrics.iter().find(|entry| entry.metric == metric)
    }
}
