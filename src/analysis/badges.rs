use crate::analysis::rank::{within_top_percent, PeerRanking};
use crate::models::badge::{Badge, BadgeTier, LeaderboardEntry};
use crate::models::rank::{Metric, RankResult};
use crate::models::user::UserRecord;
use std::cmp::Ordering;

const DAY_SECS: i64 = 86_400;

/// 2023-01-01T00:00:00Z
const EARLY_MEMBER_CUTOFF: i64 = 1_672_531_200;

const BRONZE: &str = "#cd7f32";
const SILVER: &str = "#c0c0c0";
const GOLD: &str = "#ffd700";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatChannel {
    General,
    Help,
    Offtopic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Rule {
    ChatVolume { channel: ChatChannel, min: u64 },
    JoinedBefore { cutoff: i64 },
    ActiveSpan { min_days: i64 },
    Contributions { min: u64 },
    Posts { min: u64 },
    Replies { min: u64 },
    Balanced { min_share: f64, floor: u64 },
    TopPercent { percent: u64, excluding: Option<u64> },
    Momentum { per_day: f64 },
    RisingStar { joined_within_days: i64, min_contributions: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct BadgeDefinition {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub color: &'static str,
    pub tier: BadgeTier,
    rule: Rule,
}

const fn badge(
    id: &'static str,
    label: &'static str,
    description: &'static str,
    color: &'static str,
    tier: BadgeTier,
    rule: Rule,
) -> BadgeDefinition {
    BadgeDefinition {
        id,
        label,
        description,
        color,
        tier,
        rule,
    }
}

const fn chat(channel: ChatChannel, min: u64) -> Rule {
    Rule::ChatVolume { channel, min }
}

/// Evaluation order is display order.
pub const CATALOGUE: [BadgeDefinition; 21] = [
    badge("general_chat_bronze", "Chatterbox", "100 messages in general chat", BRONZE, BadgeTier::Bronze, chat(ChatChannel::General, 100)),
    badge("general_chat_silver", "Town Crier", "1,000 messages in general chat", SILVER, BadgeTier::Silver, chat(ChatChannel::General, 1_000)),
    badge("general_chat_gold", "Voice of the Square", "5,000 messages in general chat", GOLD, BadgeTier::Gold, chat(ChatChannel::General, 5_000)),
    badge("help_chat_bronze", "Helping Hand", "100 messages in help chat", BRONZE, BadgeTier::Bronze, chat(ChatChannel::Help, 100)),
    badge("help_chat_silver", "Problem Solver", "1,000 messages in help chat", SILVER, BadgeTier::Silver, chat(ChatChannel::Help, 1_000)),
    badge("help_chat_gold", "Oracle", "5,000 messages in help chat", GOLD, BadgeTier::Gold, chat(ChatChannel::Help, 5_000)),
    badge("offtopic_chat_bronze", "Wanderer", "100 messages in off-topic chat", BRONZE, BadgeTier::Bronze, chat(ChatChannel::Offtopic, 100)),
    badge("offtopic_chat_silver", "Storyteller", "1,000 messages in off-topic chat", SILVER, BadgeTier::Silver, chat(ChatChannel::Offtopic, 1_000)),
    badge("offtopic_chat_gold", "Lorekeeper", "5,000 messages in off-topic chat", GOLD, BadgeTier::Gold, chat(ChatChannel::Offtopic, 5_000)),
    badge("early_member", "Early Member", "Joined before 2023", "#14b8a6", BadgeTier::Achievement, Rule::JoinedBefore { cutoff: EARLY_MEMBER_CUTOFF }),
    badge("consistent", "Consistent", "Active across at least 30 days", SILVER, BadgeTier::Silver, Rule::ActiveSpan { min_days: 30 }),
    badge("veteran", "Veteran", "Active across at least 90 days", GOLD, BadgeTier::Gold, Rule::ActiveSpan { min_days: 90 }),
    badge("contributor", "Contributor", "100 contributions", SILVER, BadgeTier::Silver, Rule::Contributions { min: 100 }),
    badge("prolific", "Prolific", "1,000 contributions", GOLD, BadgeTier::Gold, Rule::Contributions { min: 1_000 }),
    badge("author", "Author", "500 original posts", "#6366f1", BadgeTier::Achievement, Rule::Posts { min: 500 }),
    badge("responder", "Responder", "500 replies", "#0ea5e9", BadgeTier::Achievement, Rule::Replies { min: 500 }),
    badge("balanced", "Balanced", "Posts and replies each at least 40% of over 50 contributions", "#10b981", BadgeTier::Achievement, Rule::Balanced { min_share: 0.4, floor: 50 }),
    badge("top_1_percent", "Top 1%", "Among the top 1% of contributors", "#e11d48", BadgeTier::Achievement, Rule::TopPercent { percent: 1, excluding: None }),
    badge("top_10_percent", "Top 10%", "Among the top 10% of contributors", "#f43f5e", BadgeTier::Achievement, Rule::TopPercent { percent: 10, excluding: Some(1) }),
    badge("on_fire", "On Fire", "More than 25 contributions per active day", "#f97316", BadgeTier::Achievement, Rule::Momentum { per_day: 25.0 }),
    badge("rising_star", "Rising Star", "Over 500 contributions within 30 days of joining", "#a855f7", BadgeTier::Achievement, Rule::RisingStar { joined_within_days: 30, min_contributions: 500 }),
];

/// Inputs beyond the member row itself.
#[derive(Debug, Clone, Copy)]
pub struct BadgeContext<'a> {
    pub now: i64,
    pub rank: Option<&'a RankResult>,
}

impl Rule {
    fn holds(&self, user: &UserRecord, ctx: &BadgeContext<'_>) -> bool {
        match *self {
            Rule::ChatVolume { channel, min } => {
                let count = match channel {
                    ChatChannel::General => user.general_chat,
                    ChatChannel::Help => user.help_chat,
                    ChatChannel::Offtopic => user.offtopic_chat,
                };
                count >= min
            }
            Rule::JoinedBefore { cutoff } => user.joined_at.is_some_and(|joined| joined < cutoff),
            Rule::ActiveSpan { min_days } => user.active_span_days().is_some_and(|days| days >= min_days),
            Rule::Contributions { min } => user.total_contributions >= min,
            Rule::Posts { min } => user.posts >= min,
            Rule::Replies { min } => user.replies >= min,
            Rule::Balanced { min_share, floor } => {
                let total = user.total_contributions;
                total > floor
                    && user.posts as f64 / total as f64 >= min_share
                    && user.replies as f64 / total as f64 >= min_share
            }
            Rule::TopPercent { percent, excluding } => {
                let Some(rank) = ctx.rank else {
                    return false;
                };
                let Some(position) = rank.get(Metric::TotalContributions) else {
                    return false;
                };
                let within = |p: u64| within_top_percent(position.rank, rank.population, p);
                within(percent) && !excluding.is_some_and(within)
            }
            Rule::Momentum { per_day } => user
                .active_span_days()
                .is_some_and(|days| user.total_contributions as f64 / days.max(1) as f64 > per_day),
            Rule::RisingStar {
                joined_within_days,
                min_contributions,
            } => {
                user.joined_at
                    .is_some_and(|joined| ctx.now - joined < joined_within_days * DAY_SECS)
                    && user.total_contributions > min_contributions
            }
        }
    }
}

/// Evaluates the whole catalogue. Tiers are independent: a gold holder also
/// holds silver and bronze for the same category.
pub fn evaluate_badges(user: &UserRecord, ctx: &BadgeContext<'_>) -> Vec<Badge> {
    CATALOGUE
        .iter()
        .map(|def| Badge {
            id: def.id,
            label: def.label,
            description: def.description,
            color: def.color,
            tier: def.tier,
            achieved: def.rule.holds(user, ctx),
        })
        .collect()
}

pub fn achieved_ids(badges: &[Badge]) -> Vec<&'static str> {
    badges.iter().filter(|b| b.achieved).map(|b| b.id).collect()
}

/// More badges first, then more contributions, then user id.
pub fn compare_leaderboard(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.badge_count
        .cmp(&a.badge_count)
        .then_with(|| b.total_contributions.cmp(&a.total_contributions))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Sorts entries and assigns 1-based positions.
pub fn rank_leaderboard(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    entries.sort_by(compare_leaderboard);
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.position = index + 1;
    }
    entries
}

pub fn build_badge_leaderboard(users: &[UserRecord], now: i64) -> Vec<LeaderboardEntry> {
    let ranking = PeerRanking::new(users, &[Metric::TotalContributions]);

    let entries = users
        .iter()
        .map(|user| {
            let rank = ranking.rank_user(user);
            let ctx = BadgeContext {
                now,
                rank: Some(&rank),
            };
            let badges = achieved_ids(&evaluate_badges(user, &ctx));
            LeaderboardEntry {
                position: 0,
                user_id: user.id.clone(),
                handle: user.handle.clone(),
                badge_count: badges.len(),
                total_contributions: user.total_contributions,
                badges,
            }
        })
        .collect();

    rank_leaderboard(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rank::MetricRank;

    const NOW: i64 = 1_750_000_000;

    fn achieved(user: &UserRecord, ctx: &BadgeContext<'_>) -> Vec<&'static str> {
        achieved_ids(&evaluate_badges(user, ctx))
    }

    fn no_rank() -> BadgeContext<'static> {
        BadgeContext { now: NOW, rank: None }
    }

    fn rank_context(rank: u64, population: u64) -> RankResult {
        RankResult {
            population,
            metrics: vec![MetricRank {
                metric: Metric::TotalContributions,
                value: 0,
                rank,
                percentile: 0.0,
            }],
        }
    }

    fn entry(id: &str, badge_count: usize, total_contributions: u64) -> LeaderboardEntry {
        LeaderboardEntry {
            position: 0,
            user_id: id.to_string(),
            handle: id.to_string(),
            badge_count,
            total_contributions,
            badges: Vec::new(),
        }
    }

    #[test]
    fn catalogue_ids_are_unique() {
        let mut ids: Vec<&str> = CATALOGUE.iter().map(|b| b.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CATALOGUE.len());
    }

    #[test]
    fn chat_tiers_stack_per_channel() {
        let user = UserRecord {
            general_chat: 5_000,
            help_chat: 999,
            offtopic_chat: 99,
            ..UserRecord::default()
        };
        let ids = achieved(&user, &no_rank());

        assert!(ids.contains(&"general_chat_bronze"));
        assert!(ids.contains(&"general_chat_silver"));
        assert!(ids.contains(&"general_chat_gold"));
        assert!(ids.contains(&"help_chat_bronze"));
        assert!(!ids.contains(&"help_chat_silver"));
        assert!(!ids.contains(&"offtopic_chat_bronze"));
    }

    #[test]
    fn veteran_does_not_suppress_consistent() {
        let user = UserRecord {
            joined_at: Some(EARLY_MEMBER_CUTOFF - 1),
            first_activity_at: Some(NOW - 120 * DAY_SECS),
            last_activity_at: Some(NOW),
            ..UserRecord::default()
        };
        let ids = achieved(&user, &no_rank());

        assert!(ids.contains(&"early_member"));
        assert!(ids.contains(&"consistent"));
        assert!(ids.contains(&"veteran"));
    }

    #[test]
    fn missing_timestamps_never_earn_tenure() {
        let ids = achieved(&UserRecord::default(), &no_rank());
        assert!(ids.is_empty());
    }

    #[test]
    fn volume_and_specialization_thresholds() {
        let user = UserRecord {
            total_contributions: 1_000,
            posts: 500,
            replies: 500,
            ..UserRecord::default()
        };
        let ids = achieved(&user, &no_rank());
        assert!(ids.contains(&"contributor"));
        assert!(ids.contains(&"prolific"));
        assert!(ids.contains(&"author"));
        assert!(ids.contains(&"responder"));
        assert!(ids.contains(&"balanced"));

        let lopsided = UserRecord {
            total_contributions: 100,
            posts: 70,
            replies: 30,
            ..UserRecord::default()
        };
        assert!(!achieved(&lopsided, &no_rank()).contains(&"balanced"));

        let at_floor = UserRecord {
            total_contributions: 50,
            posts: 25,
            replies: 25,
            ..UserRecord::default()
        };
        assert!(!achieved(&at_floor, &no_rank()).contains(&"balanced"));
    }

    #[test]
    fn rank_badges_are_mutually_exclusive() {
        let top = rank_context(1, 200);
        let ids = achieved(&UserRecord::default(), &BadgeContext { now: NOW, rank: Some(&top) });
        assert!(ids.contains(&"top_1_percent"));
        assert!(!ids.contains(&"top_10_percent"));

        let near_top = rank_context(15, 200);
        let ids = achieved(&UserRecord::default(), &BadgeContext { now: NOW, rank: Some(&near_top) });
        assert!(!ids.contains(&"top_1_percent"));
        assert!(ids.contains(&"top_10_percent"));

        let middle = rank_context(100, 200);
        let ids = achieved(&UserRecord::default(), &BadgeContext { now: NOW, rank: Some(&middle) });
        assert!(!ids.contains(&"top_1_percent"));
        assert!(!ids.contains(&"top_10_percent"));
    }

    #[test]
    fn momentum_and_rising_star() {
        let newcomer = UserRecord {
            total_contributions: 600,
            joined_at: Some(NOW - 10 * DAY_SECS),
            first_activity_at: Some(NOW - 10 * DAY_SECS),
            last_activity_at: Some(NOW),
            ..UserRecord::default()
        };
        let ids = achieved(&newcomer, &no_rank());
        assert!(ids.contains(&"on_fire"));
        assert!(ids.contains(&"rising_star"));

        let old_timer = UserRecord {
            joined_at: Some(NOW - 400 * DAY_SECS),
            first_activity_at: Some(NOW - 400 * DAY_SECS),
            ..newcomer
        };
        let ids = achieved(&old_timer, &no_rank());
        assert!(!ids.contains(&"on_fire"));
        assert!(!ids.contains(&"rising_star"));
    }

    #[test]
    fn contributions_break_badge_ties() {
        let ranked = rank_leaderboard(vec![entry("a", 3, 100), entry("b", 3, 200)]);
        assert_eq!(ranked[0].user_id, "b");
        assert_eq!(ranked[0].position, 1);
        assert_eq!(ranked[1].user_id, "a");
        assert_eq!(ranked[1].position, 2);
    }

    #[test]
    fn badge_count_outranks_contributions() {
        let ranked = rank_leaderboard(vec![entry("b", 3, 1_000), entry("a", 4, 50)]);
        assert_eq!(ranked[0].user_id, "a");
        assert_eq!(ranked[1].user_id, "b");
    }

    #[test]
    fn full_ties_fall_back_to_user_id() {
        let ranked = rank_leaderboard(vec![entry("z", 1, 10), entry("m", 1, 10)]);
        let ids: Vec<&str> = ranked.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, vec!["m", "z"]);
    }

    #[test]
    fn leaderboard_counts_rank_badges() {
        let users: Vec<UserRecord> = (0..20)
            .map(|i| UserRecord {
                id: format!("u{i:02}"),
                handle: format!("member{i}"),
                total_contributions: i * 10,
                ..UserRecord::default()
            })
            .collect();

        let board = build_badge_leaderboard(&users, NOW);
        assert_eq!(board.len(), 20);
        assert_eq!(board[0].user_id, "u19");
        assert!(board[0].badges.contains(&"top_1_percent"));
        assert!(board[0].badges.contains(&"contributor"));
        assert!(board[1].badges.contains(&"top_10_percent"));
        assert!(board.windows(2).all(|w| compare_leaderboard(&w[0], &w[1]) != Ordering::Greater));
        assert_eq!(board.last().map(|e| e.position), Some(20));
    }
}
