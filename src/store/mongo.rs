use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, from_document, to_bson, Bson, Document};
use mongodb::{options::ClientOptions, Client, Database};
use serde_json::Value;

use super::{Clause, Filter, RecordStore, StoreError, StoreResult, Table, Update};

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn init(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client_options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StoreError::Backend(format!("invalid MongoDB connection string: {e}")))?;
        let client = Client::with_options(client_options)
            .map_err(|e| StoreError::Backend(format!("failed to initialize client: {e}")))?;
        let db = client.database(db_name);
        Ok(MongoStore { db })
    }

    fn collection(&self, table: Table) -> mongodb::Collection<Document> {
        self.db.collection::<Document>(table.name())
    }
}

fn bson(value: &Value) -> StoreResult<Bson> {
    to_bson(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn clause_document(clause: &Clause) -> StoreResult<Document> {
    let mut document = Document::new();
    match clause {
        Clause::Eq(field, value) => {
            document.insert(field.as_str(), bson(value)?);
        }
        Clause::In(field, values) => {
            let values = values.iter().map(bson).collect::<StoreResult<Vec<_>>>()?;
            document.insert(field.as_str(), doc! { "$in": values });
        }
        Clause::AnyOf(clauses) => {
            let alternatives = clauses
                .iter()
                .map(clause_document)
                .collect::<StoreResult<Vec<_>>>()?;
            document.insert("$or", alternatives);
        }
    }
    Ok(document)
}

// `deletedAt: null` matches both a missing field and an explicit null.
fn live(mut conditions: Vec<Document>) -> Document {
    conditions.push(doc! { "deletedAt": Bson::Null });
    doc! { "$and": conditions }
}

fn filter_document(filter: &Filter) -> StoreResult<Document> {
    let conditions = filter
        .clauses
        .iter()
        .map(clause_document)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(live(conditions))
}

fn update_document(update: &Update) -> StoreResult<Document> {
    let mut push = Document::new();
    for (field, values) in &update.push {
        let values = values.iter().map(bson).collect::<StoreResult<Vec<_>>>()?;
        push.insert(field.as_str(), doc! { "$each": values });
    }
    let mut add_to_set = Document::new();
    for (field, values) in &update.add_to_set {
        let values = values.iter().map(bson).collect::<StoreResult<Vec<_>>>()?;
        add_to_set.insert(field.as_str(), doc! { "$each": values });
    }
    let mut set = Document::new();
    for (field, value) in &update.set {
        set.insert(field.as_str(), bson(value)?);
    }

    let mut update_doc = Document::new();
    if !push.is_empty() {
        update_doc.insert("$push", push);
    }
    if !add_to_set.is_empty() {
        update_doc.insert("$addToSet", add_to_set);
    }
    if !set.is_empty() {
        update_doc.insert("$set", set);
    }
    Ok(update_doc)
}

fn into_record(mut document: Document) -> StoreResult<Value> {
    document.remove("_id");
    from_document::<Value>(document).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn find(&self, table: Table, filter: &Filter) -> StoreResult<Vec<Value>> {
        let documents: Vec<Document> = self
            .collection(table)
            .find(filter_document(filter)?)
            .await
            .map_err(|e| StoreError::Backend(format!("error fetching {}: {e}", table.name())))?
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(format!("error iterating {}: {e}", table.name())))?;
        documents.into_iter().map(into_record).collect()
    }

    async fn find_one(&self, table: Table, filter: &Filter) -> StoreResult<Option<Value>> {
        let found = self
            .collection(table)
            .find_one(filter_document(filter)?)
            .await
            .map_err(|e| StoreError::Backend(format!("error fetching {}: {e}", table.name())))?;
        found.map(into_record).transpose()
    }

    async fn insert(&self, table: Table, record: Value) -> StoreResult<()> {
        let document = match bson(&record)? {
            Bson::Document(document) => document,
            _ => return Err(StoreError::Serialization("record is not an object".to_string())),
        };
        self.collection(table)
            .insert_one(document)
            .await
            .map_err(|e| {
                StoreError::Backend(format!("error inserting into {}: {e}", table.name()))
            })?;
        Ok(())
    }

    async fn update(&self, table: Table, id: &str, update: &Update) -> StoreResult<bool> {
        let mut conditions = vec![doc! { "id": id }];
        if let Some((field, len)) = &update.expect_len {
            let mut size = Document::new();
            size.insert(field.as_str(), doc! { "$size": *len as i64 });
            conditions.push(size);
        }
        let result = self
            .collection(table)
            .update_one(live(conditions), update_document(update)?)
            .await
            .map_err(|e| StoreError::Backend(format!("error updating {}: {e}", table.name())))?;
        Ok(result.matched_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn alternatives_become_or_inside_and() {
        let filter = Filter::all()
            .eq("program", "summer")
            .any_of(vec![Clause::eq("email", "a@b.co"), Clause::eq("mobile", "+1")]);
        let document = filter_document(&filter).unwrap();
        let conditions = document.get_array("$and").unwrap();
        assert_eq!(conditions.len(), 3);
        assert_eq!(
            conditions[1].as_document().unwrap().get_array("$or").unwrap().len(),
            2
        );
    }

    #[test]
    fn live_records_include_a_null_deleted_at() {
        let document = filter_document(&Filter::all()).unwrap();
        let conditions = document.get_array("$and").unwrap();
        let deleted_at = conditions[0].as_document().unwrap().get("deletedAt");
        assert_eq!(deleted_at, Some(&Bson::Null));
    }

    #[test]
    fn update_combines_operators() {
        let update = Update::new()
            .push("statuses", vec![json!({ "event": "sent" })])
            .add_to_set("skills", ["rust"])
            .set("currentStatus", "sent");
        let document = update_document(&update).unwrap();
        assert!(document.get_document("$push").unwrap().contains_key("statuses"));
        assert!(document.get_document("$addToSet").unwrap().contains_key("skills"));
        let set = document.get_document("$set").unwrap();
        assert_eq!(set.get_str("currentStatus").unwrap(), "sent");
        assert!(set.contains_key("updatedAt"));
    }
}
