use crate::models::query::{Column, Filter, FilterValue, RowQuery};
use crate::models::user::UserRecord;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};

/// A paginated, filterable collection of member rows.
pub trait RowSource {
    fn fetch_page(&self, query: &RowQuery, offset: usize, limit: usize) -> Result<Vec<UserRecord>, String>;

    fn count_where(&self, query: &RowQuery) -> Result<u64, String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub fetches: usize,
    pub rows: usize,
}

/// Walks a row source from offset 0 in fixed-size batches. Stops after a
/// short or empty batch, or after the first fetch error.
pub struct Scanner<'a, S: RowSource + ?Sized> {
    source: &'a S,
    query: &'a RowQuery,
    batch_size: usize,
    offset: usize,
    fetches: usize,
    finished: bool,
}

impl<'a, S: RowSource + ?Sized> Scanner<'a, S> {
    pub fn new(source: &'a S, query: &'a RowQuery, batch_size: usize) -> Self {
        Self {
            source,
            query,
            batch_size: batch_size.max(1),
            offset: 0,
            fetches: 0,
            finished: false,
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches
    }
}

impl<S: RowSource + ?Sized> Iterator for Scanner<'_, S> {
    type Item = Result<Vec<UserRecord>, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        self.fetches += 1;
        let batch = match self.source.fetch_page(self.query, self.offset, self.batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        log::debug!(
            "fetched {} rows from {} at offset {}",
            batch.len(),
            self.query.dataset,
            self.offset
        );

        if batch.len() < self.batch_size {
            self.finished = true;
        }
        if batch.is_empty() {
            return None;
        }

        self.offset += self.batch_size;
        Some(Ok(batch))
    }
}

/// Folds every row of the dataset through `f`. The first fetch error aborts
/// the fold and is returned as-is.
pub fn scan_fold<S, T, F>(
    source: &S,
    query: &RowQuery,
    batch_size: usize,
    init: T,
    mut f: F,
) -> Result<(T, ScanStats), String>
where
    S: RowSource + ?Sized,
    F: FnMut(T, &UserRecord) -> T,
{
    let mut scanner = Scanner::new(source, query, batch_size);
    let mut acc = init;
    let mut rows = 0;

    for batch in scanner.by_ref() {
        let batch = batch?;
        rows += batch.len();
        acc = batch.iter().fold(acc, &mut f);
    }

    Ok((
        acc,
        ScanStats {
            fetches: scanner.fetches(),
            rows,
        },
    ))
}

/// Table-backed row source. The dataset name is the table name.
pub struct SqliteRowSource<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteRowSource<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl RowSource for SqliteRowSource<'_> {
    fn fetch_page(&self, query: &RowQuery, offset: usize, limit: usize) -> Result<Vec<UserRecord>, String> {
        let table = validate_dataset(&query.dataset)?;
        let columns = if query.columns.is_empty() {
            Column::ALL.to_vec()
        } else {
            query.columns.clone()
        };
        let projection = columns
            .iter()
            .map(|c| c.sql_name())
            .collect::<Vec<_>>()
            .join(", ");
        let (clause, mut values) = where_clause(&query.filters);
        values.push(SqlValue::Integer(limit as i64));
        values.push(SqlValue::Integer(offset as i64));

        let sql = format!("SELECT {projection} FROM {table}{clause} ORDER BY rowid LIMIT ? OFFSET ?");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| format!("Fetch error: {e}"))?;

        let rows = stmt
            .query_map(params_from_iter(values), |row| read_user_row(row, &columns))
            .map_err(|e| format!("Fetch error: {e}"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| format!("Fetch error: {e}"))?;

        Ok(rows)
    }

    fn count_where(&self, query: &RowQuery) -> Result<u64, String> {
        let table = validate_dataset(&query.dataset)?;
        let (clause, values) = where_clause(&query.filters);
        let sql = format!("SELECT COUNT(*) FROM {table}{clause}");

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))
            .map_err(|e| format!("Count error: {e}"))?;
        Ok(count.max(0) as u64)
    }
}

/// Dataset names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_dataset_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_dataset(dataset: &str) -> Result<&str, String> {
    if is_valid_dataset_name(dataset) {
        Ok(dataset)
    } else {
        Err(format!("Invalid dataset name: {dataset}"))
    }
}

fn where_clause(filters: &[Filter]) -> (String, Vec<SqlValue>) {
    if filters.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut values = Vec::new();
    let conditions: Vec<String> = filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq { column, value } => {
                values.push(filter_value_to_sql(value));
                format!("{} = ?", column.sql_name())
            }
            Filter::NotNull { column: Column::Roles } => when_string_list(Column::Roles.sql_name(), "1"),
            Filter::NotNull { column } => format!("{} IS NOT NULL", column.sql_name()),
            Filter::ContainsTag { column, tag } => {
                values.push(SqlValue::Text(tag.clone()));
                let name = column.sql_name();
                when_string_list(
                    name,
                    &format!("EXISTS (SELECT 1 FROM json_each({name}) WHERE json_each.value = ?)"),
                )
            }
            Filter::GreaterThan { column, value } => {
                values.push(SqlValue::Integer(*value));
                format!("{} > ?", column.sql_name())
            }
        })
        .collect();

    (format!(" WHERE {}", conditions.join(" AND ")), values)
}

/// Evaluates `condition` only for rows whose `name` column holds a JSON list of
/// strings; anything else reads as an absent role list.
fn when_string_list(name: &str, condition: &str) -> String {
    format!(
        "(CASE WHEN json_valid({name}) THEN (CASE WHEN json_type({name}) = 'array' AND NOT EXISTS (SELECT 1 FROM json_each({name}) WHERE json_each.type != 'text') THEN {condition} ELSE 0 END) ELSE 0 END)"
    )
}

fn filter_value_to_sql(value: &FilterValue) -> SqlValue {
    match value {
        FilterValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        FilterValue::Int(i) => SqlValue::Integer(*i),
        FilterValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn read_user_row(row: &Row<'_>, columns: &[Column]) -> rusqlite::Result<UserRecord> {
    let mut user = UserRecord::default();

    for column in columns {
        let name = column.sql_name();
        match column {
            Column::Id => user.id = row.get(name)?,
            Column::Handle => user.handle = row.get::<_, Option<String>>(name)?.unwrap_or_default(),
            Column::TotalContributions => user.total_contributions = read_counter(row, name)?,
            Column::Posts => user.posts = read_counter(row, name)?,
            Column::Replies => user.replies = read_counter(row, name)?,
            Column::GeneralChat => user.general_chat = read_counter(row, name)?,
            Column::HelpChat => user.help_chat = read_counter(row, name)?,
            Column::OfftopicChat => user.offtopic_chat = read_counter(row, name)?,
            Column::AccountCreatedAt => user.account_created_at = row.get(name)?,
            Column::JoinedAt => user.joined_at = row.get(name)?,
            Column::FirstActivityAt => user.first_activity_at = row.get(name)?,
            Column::LastActivityAt => user.last_activity_at = row.get(name)?,
            Column::Roles => {
                let raw: Option<String> = row.get(name)?;
                // Unparseable role lists read as absent.
                user.roles = raw.and_then(|json| serde_json::from_str::<Vec<String>>(&json).ok());
            }
            Column::Region => user.region = row.get(name)?,
            Column::IsBot => user.is_bot = row.get::<_, Option<i64>>(name)?.unwrap_or(0) != 0,
        }
    }

    Ok(user)
}

fn read_counter(row: &Row<'_>, name: &str) -> rusqlite::Result<u64> {
    Ok(row.get::<_, Option<i64>>(name)?.unwrap_or(0).max(0) as u64)
}

/// In-process row source with the same filter semantics as the table-backed one.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowSource {
    rows: Vec<UserRecord>,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<UserRecord>) -> Self {
        Self { rows }
    }

    fn matching<'a>(&'a self, query: &'a RowQuery) -> impl Iterator<Item = &'a UserRecord> + 'a {
        self.rows
            .iter()
            .filter(move |row| query.filters.iter().all(|filter| matches_filter(row, filter)))
    }
}

impl RowSource for MemoryRowSource {
    fn fetch_page(&self, query: &RowQuery, offset: usize, limit: usize) -> Result<Vec<UserRecord>, String> {
        Ok(self
            .matching(query)
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect())
    }

    fn count_where(&self, query: &RowQuery) -> Result<u64, String> {
        Ok(self.matching(query).count() as u64)
    }
}

enum Cell<'a> {
    Int(Option<i64>),
    Text(Option<&'a str>),
    Tags(Option<&'a [String]>),
}

fn cell(row: &UserRecord, column: Column) -> Cell<'_> {
    let counter = |value: u64| Cell::Int(Some(i64::try_from(value).unwrap_or(i64::MAX)));
    match column {
        Column::Id => Cell::Text(Some(&row.id)),
        Column::Handle => Cell::Text(Some(&row.handle)),
        Column::TotalContributions => counter(row.total_contributions),
        Column::Posts => counter(row.posts),
        Column::Replies => counter(row.replies),
        Column::GeneralChat => counter(row.general_chat),
        Column::HelpChat => counter(row.help_chat),
        Column::OfftopicChat => counter(row.offtopic_chat),
        Column::AccountCreatedAt => Cell::Int(row.account_created_at),
        Column::JoinedAt => Cell::Int(row.joined_at),
        Column::FirstActivityAt => Cell::Int(row.first_activity_at),
        Column::LastActivityAt => Cell::Int(row.last_activity_at),
        Column::Roles => Cell::Tags(row.roles.as_deref()),
        Column::Region => Cell::Text(row.region.as_deref()),
        Column::IsBot => Cell::Int(Some(i64::from(row.is_bot))),
    }
}

fn matches_filter(row: &UserRecord, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { column, value } => match (cell(row, *column), value) {
            (Cell::Int(Some(actual)), FilterValue::Int(expected)) => actual == *expected,
            (Cell::Int(Some(actual)), FilterValue::Bool(expected)) => actual == i64::from(*expected),
            (Cell::Text(Some(actual)), FilterValue::Text(expected)) => actual == expected,
            _ => false,
        },
        Filter::NotNull { column } => match cell(row, *column) {
            Cell::Int(v) => v.is_some(),
            Cell::Text(v) => v.is_some(),
            Cell::Tags(v) => v.is_some(),
        },
        Filter::ContainsTag { column, tag } => match cell(row, *column) {
            Cell::Tags(Some(tags)) => tags.iter().any(|t| t == tag),
            _ => false,
        },
        Filter::GreaterThan { column, value } => match cell(row, *column) {
            Cell::Int(Some(actual)) => actual > *value,
            _ => false,
        },
    }
}

fn project(row: &UserRecord, columns: &[Column]) -> UserRecord {
    if columns.is_empty() || columns.len() == Column::ALL.len() {
        return row.clone();
    }

    let mut out = UserRecord::default();
    for column in columns {
        match column {
            Column::Id => out.id = row.id.clone(),
            Column::Handle => out.handle = row.handle.clone(),
            Column::TotalContributions => out.total_contributions = row.total_contributions,
            Column::Posts => out.posts = row.posts,
            Column::Replies => out.replies = row.replies,
            Column::GeneralChat => out.general_chat = row.general_chat,
            Column::HelpChat => out.help_chat = row.help_chat,
            Column::OfftopicChat => out.offtopic_chat = row.offtopic_chat,
            Column::AccountCreatedAt => out.account_created_at = row.account_created_at,
            Column::JoinedAt => out.joined_at = row.joined_at,
            Column::FirstActivityAt => out.first_activity_at = row.first_activity_at,
            Column::LastActivityAt => out.last_activity_at = row.last_activity_at,
            Column::Roles => out.roles = row.roles.clone(),
            Column::Region => out.region = row.region.clone(),
            Column::IsBot => out.is_bot = row.is_bot,
        }
    }
    out
}
