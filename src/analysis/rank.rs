use crate::commands::source::RowSource;
use crate::models::query::{Filter, RowQuery};
use crate::models::rank::{Metric, MetricRank, RankResult};
use crate::models::user::UserRecord;
use std::collections::HashMap;

/// Standard competition rank: peers strictly above, plus one. Ties share a rank.
pub fn rank_from_greater_count(greater: u64) -> u64 {
    greater + 1
}

/// `(population - rank) / population * 100`, clamped to [0, 100].
pub fn percentile(population: u64, rank: u64) -> f64 {
    if population == 0 {
        return 0.0;
    }
    let raw = (population as f64 - rank as f64) / population as f64 * 100.0;
    raw.clamp(0.0, 100.0)
}

/// Whether `rank` falls inside the top `percent` of `population`.
pub fn within_top_percent(rank: u64, population: u64, percent: u64) -> bool {
    if population == 0 || rank == 0 {
        return false;
    }
    let cutoff = (population * percent).div_ceil(100);
    rank <= cutoff
}

/// Ranks `user` against the filtered population of `dataset`, one
/// greater-than count per metric.
pub fn compute_rank_result<S: RowSource + ?Sized>(
    source: &S,
    dataset: &str,
    population_filters: &[Filter],
    user: &UserRecord,
    metrics: &[Metric],
) -> Result<RankResult, String> {
    let population_query = RowQuery::new(dataset).with_filters(population_filters);
    let population = source.count_where(&population_query)?;

    let mut ranks = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let value = metric.value_of(user);
        let threshold = i64::try_from(value).unwrap_or(i64::MAX);
        let query = population_query
            .clone()
            .filter(Filter::greater_than(metric.column(), threshold));
        let rank = rank_from_greater_count(source.count_where(&query)?);

        ranks.push(MetricRank {
            metric: *metric,
            value,
            rank,
            percentile: percentile(population, rank),
        });
    }

    Ok(RankResult {
        population,
        metrics: ranks,
    })
}

/// In-memory ranking over a population already held by the caller.
#[derive(Debug, Clone, Default)]
pub struct PeerRanking {
    population: u64,
    sorted: HashMap<Metric, Vec<u64>>,
}

impl PeerRanking {
    pub fn new(users: &[UserRecord], metrics: &[Metric]) -> Self {
        let sorted = metrics
            .iter()
            .map(|metric| {
                let mut values: Vec<u64> = users.iter().map(|u| metric.value_of(u)).collect();
                values.sort_unstable();
                (*metric, values)
            })
            .collect();

        Self {
            population: users.len() as u64,
            sorted,
        }
    }

    pub fn population(&self) -> u64 {
        self.population
    }

    pub fn rank_of(&self, metric: Metric, value: u64) -> Option<u64> {
        let values = self.sorted.get(&metric)?;
        let not_greater = values.partition_point(|v| *v <= value);
        Some(rank_from_greater_count((values.len() - not_greater) as u64))
    }

    pub fn rank_user(&self, user: &UserRecord) -> RankResult {
        let metrics: Vec<MetricRank> = Metric::ALL
            .iter()
            .filter_map(|metric| {
                let value = metric.value_of(user);
                let rank = self.rank_of(*metric, value)?;
                Some(MetricRank {
                    metric: *metric,
                    value,
                    rank,
                    percentile: percentile(self.population, rank),
                })
            })
            .collect();

        RankResult {
            population: self.population,
            metrics,
        }
    }
}
