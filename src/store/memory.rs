use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{is_deleted, lookup, Filter, RecordStore, StoreError, StoreResult, Table, Update};

/// Process-local store for development runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply(record: &mut Value, update: &Update) -> StoreResult<()> {
    let fields = record
        .as_object_mut()
        .ok_or_else(|| StoreError::Backend("record is not an object".to_string()))?;

    for (field, values) in &update.push {
        let list = fields
            .entry(field.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        match list.as_array_mut() {
            Some(items) => items.extend(values.iter().cloned()),
            None => return Err(StoreError::Backend(format!("{field} is not a list"))),
        }
    }
    for (field, values) in &update.add_to_set {
        let list = fields
            .entry(field.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        let items = list
            .as_array_mut()
            .ok_or_else(|| StoreError::Backend(format!("{field} is not a list")))?;
        for value in values {
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
    }
    for (field, value) in &update.set {
        fields.insert(field.clone(), value.clone());
    }
    Ok(())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(&self, table: Table, filter: &Filter) -> StoreResult<Vec<Value>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&table)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| !is_deleted(record) && filter.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_one(&self, table: Table, filter: &Filter) -> StoreResult<Option<Value>> {
        Ok(self.find(table, filter).await?.into_iter().next())
    }

    async fn insert(&self, table: Table, record: Value) -> StoreResult<()> {
        if !record.is_object() {
            return Err(StoreError::Backend("record is not an object".to_string()));
        }
        self.tables.write().await.entry(table).or_default().push(record);
        Ok(())
    }

    async fn update(&self, table: Table, id: &str, update: &Update) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(records) = tables.get_mut(&table) else {
            return Ok(false);
        };
        let Some(record) = records.iter_mut().find(|record| {
            !is_deleted(record) && record.get("id").and_then(Value::as_str) == Some(id)
        }) else {
            return Ok(false);
        };

        if let Some((field, expected)) = &update.expect_len {
            let len = lookup(record, field)
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            if len != *expected {
                return Ok(false);
            }
        }

        apply(record, update)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn soft_deleted_records_are_invisible() {
        let store = MemoryStore::new();
        store
            .insert(Table::Trainees, json!({ "id": "a", "email": "x@y.co" }))
            .await
            .unwrap();
        store
            .insert(
                Table::Trainees,
                json!({ "id": "b", "email": "x@y.co", "deletedAt": 1 }),
            )
            .await
            .unwrap();

        let found = store
            .find(Table::Trainees, &Filter::all().eq("email", "x@y.co"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "a");
        assert!(!store.update(Table::Trainees, "b", &Update::new()).await.unwrap());
    }

    #[tokio::test]
    async fn null_deleted_at_is_live() {
        let store = MemoryStore::new();
        store
            .insert(Table::Trainees, json!({ "id": "a", "deletedAt": null }))
            .await
            .unwrap();
        let found = store.find(Table::Trainees, &Filter::all()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.update(Table::Trainees, "a", &Update::new()).await.unwrap());
    }

    #[tokio::test]
    async fn add_to_set_keeps_values_unique() {
        let store = MemoryStore::new();
        store
            .insert(Table::Trainees, json!({ "id": "a", "skills": ["rust"] }))
            .await
            .unwrap();
        let update = Update::new().add_to_set("skills", ["rust", "sql"]);
        assert!(store.update(Table::Trainees, "a", &update).await.unwrap());

        let record = store
            .find_one(Table::Trainees, &Filter::by_id("a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["skills"], json!(["rust", "sql"]));
    }

    #[tokio::test]
    async fn length_precondition_rejects_stale_writes() {
        let store = MemoryStore::new();
        store
            .insert(Table::Trainees, json!({ "id": "a", "statuses": [1] }))
            .await
            .unwrap();

        let stale = Update::new()
            .push("statuses", vec![json!(2)])
            .expect_len("statuses", 0);
        assert!(!store.update(Table::Trainees, "a", &stale).await.unwrap());

        let fresh = Update::new()
            .push("statuses", vec![json!(2)])
            .expect_len("statuses", 1);
        assert!(store.update(Table::Trainees, "a", &fresh).await.unwrap());
    }
}
