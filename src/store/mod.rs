//! Record store seam: keyed and filtered lookup plus combined append/set
//! updates. Soft-deleted records (`deletedAt` present) are never returned.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{now_millis, EventKind, StatusEvent};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("record serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Trainees,
    Contributors,
    Tasks,
    GroupTasks,
    Groups,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Trainees => "trainees",
            Table::Contributors => "contributors",
            Table::Tasks => "tasks",
            Table::GroupTasks => "groupTasks",
            Table::Groups => "groups",
        }
    }
}

/// Equality and membership predicates. Field names may be dotted paths into
/// embedded objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq(String, Value),
    In(String, Vec<Value>),
    AnyOf(Vec<Clause>),
}

impl Clause {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Clause::Eq(field.to_string(), value.into())
    }

    fn matches(&self, record: &Value) -> bool {
        match self {
            Clause::Eq(field, expected) => lookup(record, field) == Some(expected),
            Clause::In(field, candidates) => lookup(record, field)
                .map(|value| candidates.contains(value))
                .unwrap_or(false),
            Clause::AnyOf(clauses) => clauses.iter().any(|clause| clause.matches(record)),
        }
    }
}

/// Conjunction of clauses; an empty filter matches every live record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::all().eq("id", id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::eq(field, value));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.clauses.push(Clause::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn any_of(mut self, clauses: Vec<Clause>) -> Self {
        self.clauses.push(Clause::AnyOf(clauses));
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }
}

pub(crate) fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, key| current.get(key))
}

pub(crate) fn is_deleted(record: &Value) -> bool {
    record
        .get("deletedAt")
        .map(|value| !value.is_null())
        .unwrap_or(false)
}

/// A single combined write: list appends, set additions and field sets land
/// together or not at all. `updatedAt` is always refreshed.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub push: Vec<(String, Vec<Value>)>,
    pub add_to_set: Vec<(String, Vec<Value>)>,
    pub set: Vec<(String, Value)>,
    /// Only apply when the named list still has this many entries.
    pub expect_len: Option<(String, usize)>,
}

impl Default for Update {
    fn default() -> Self {
        Self::new()
    }
}

impl Update {
    pub fn new() -> Self {
        Self {
            push: Vec::new(),
            add_to_set: Vec::new(),
            set: vec![("updatedAt".to_string(), Value::from(now_millis()))],
            expect_len: None,
        }
    }

    pub fn push(mut self, field: &str, values: Vec<Value>) -> Self {
        self.push.push((field.to_string(), values));
        self
    }

    pub fn add_to_set<V: Into<Value>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.add_to_set.push((
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.push((field.to_string(), value.into()));
        self
    }

    pub fn expect_len(mut self, field: &str, len: usize) -> Self {
        self.expect_len = Some((field.to_string(), len));
        self
    }

    /// Appends status events and moves `currentStatus` in the same write.
    pub fn transition(self, events: &[StatusEvent], current: EventKind) -> StoreResult<Self> {
        let values = events
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self
            .push("statuses", values)
            .set("currentStatus", current.as_str()))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, table: Table, filter: &Filter) -> StoreResult<Vec<Value>>;

    async fn find_one(&self, table: Table, filter: &Filter) -> StoreResult<Option<Value>>;

    async fn insert(&self, table: Table, record: Value) -> StoreResult<()>;

    /// Returns false when no live record with this id satisfied the update's
    /// precondition.
    async fn update(&self, table: Table, id: &str, update: &Update) -> StoreResult<bool>;
}

pub async fn find_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    filter: &Filter,
) -> StoreResult<Vec<T>> {
    store
        .find(table, filter)
        .await?
        .into_iter()
        .map(|record| serde_json::from_value(record).map_err(StoreError::from))
        .collect()
}

pub async fn find_one_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    filter: &Filter,
) -> StoreResult<Option<T>> {
    match store.find_one(table, filter).await? {
        Some(record) => Ok(Some(serde_json::from_value(record)?)),
        None => Ok(None),
    }
}

pub async fn insert_as<T: Serialize + Sync>(
    store: &dyn RecordStore,
    table: Table,
    record: &T,
) -> StoreResult<()> {
    store.insert(table, serde_json::to_value(record)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_nested_and_alternatives() {
        let record = json!({
            "id": "t-1",
            "email": "a@b.co",
            "mobile": "+1",
            "assignedTo": { "id": "tr-1" }
        });
        assert!(Filter::by_id("t-1").matches(&record));
        assert!(Filter::all().eq("assignedTo.id", "tr-1").matches(&record));
        assert!(Filter::all()
            .any_of(vec![Clause::eq("email", "x@y.co"), Clause::eq("mobile", "+1")])
            .matches(&record));
        assert!(!Filter::all()
            .is_in("id", ["t-2", "t-3"])
            .matches(&record));
    }

    #[test]
    fn transition_pushes_events_and_sets_current_status() {
        let update = Update::new()
            .transition(&[StatusEvent::new(EventKind::Sent)], EventKind::Sent)
            .unwrap();
        assert_eq!(update.push.len(), 1);
        assert_eq!(update.push[0].0, "statuses");
        assert!(update
            .set
            .iter()
            .any(|(field, value)| field == "currentStatus" && value == "sent"));
        assert!(update.set.iter().any(|(field, _)| field == "updatedAt"));
    }
}
