use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Id,
    Handle,
    TotalContributions,
    Posts,
    Replies,
    GeneralChat,
    HelpChat,
    OfftopicChat,
    AccountCreatedAt,
    JoinedAt,
    FirstActivityAt,
    LastActivityAt,
    Roles,
    Region,
    IsBot,
}

impl Column {
    pub const ALL: [Column; 15] = [
        Column::Id,
        Column::Handle,
        Column::TotalContributions,
        Column::Posts,
        Column::Replies,
        Column::GeneralChat,
        Column::HelpChat,
        Column::OfftopicChat,
        Column::AccountCreatedAt,
        Column::JoinedAt,
        Column::FirstActivityAt,
        Column::LastActivityAt,
        Column::Roles,
        Column::Region,
        Column::IsBot,
    ];

    pub fn sql_name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Handle => "handle",
            Column::TotalContributions => "total_contributions",
            Column::Posts => "posts",
            Column::Replies => "replies",
            Column::GeneralChat => "general_chat",
            Column::HelpChat => "help_chat",
            Column::OfftopicChat => "offtopic_chat",
            Column::AccountCreatedAt => "account_created_at",
            Column::JoinedAt => "joined_at",
            Column::FirstActivityAt => "first_activity_at",
            Column::LastActivityAt => "last_activity_at",
            Column::Roles => "roles",
            Column::Region => "region",
            Column::IsBot => "is_bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: Column, value: FilterValue },
    NotNull { column: Column },
    ContainsTag { column: Column, tag: String },
    GreaterThan { column: Column, value: i64 },
}

impl Filter {
    pub fn eq(column: Column, value: FilterValue) -> Self {
        Filter::Eq { column, value }
    }

    pub fn greater_than(column: Column, value: i64) -> Self {
        Filter::GreaterThan { column, value }
    }

    pub fn not_bot() -> Self {
        Filter::eq(Column::IsBot, FilterValue::Bool(false))
    }
}

/// Dataset name, projection and filters for one paginated read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    pub dataset: String,
    pub columns: Vec<Column>,
    pub filters: Vec<Filter>,
}

impl RowQuery {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            columns: Column::ALL.to_vec(),
            filters: Vec::new(),
        }
    }

    pub fn project(mut self, columns: &[Column]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: &[Filter]) -> Self {
        self.filters.extend_from_slice(filters);
        self
    }
}
