use serde::{Deserialize, Serialize};

/// One member row as read from the row store. Counters are never negative;
/// timestamps are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub handle: String,
    pub total_contributions: u64,
    pub posts: u64,
    pub replies: u64,
    pub general_chat: u64,
    pub help_chat: u64,
    pub offtopic_chat: u64,
    pub account_created_at: Option<i64>,
    pub joined_at: Option<i64>,
    pub first_activity_at: Option<i64>,
    pub last_activity_at: Option<i64>,
    pub roles: Option<Vec<String>>,
    pub region: Option<String>,
    pub is_bot: bool,
}

impl UserRecord {
    pub fn total_chat(&self) -> u64 {
        self.general_chat
            .saturating_add(self.help_chat)
            .saturating_add(self.offtopic_chat)
    }

    pub fn has_role(&self, tag: &str) -> bool {
        self.roles
            .as_deref()
            .is_some_and(|roles| roles.iter().any(|role| role == tag))
    }

    /// Whole days between first and last recorded activity.
    pub fn active_span_days(&self) -> Option<i64> {
        match (self.first_activity_at, self.last_activity_at) {
            (Some(first), Some(last)) if last >= first => Some((last - first) / 86_400),
            _ => None,
        }
    }
}
