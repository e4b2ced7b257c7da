use crate::migrations::IndexSpec;
use crate::store::{IndexInfo, SchemaStore, StoreError};
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

const ID_INDEX: &str = "_id_";

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl MemoryCollection {
    fn index_entries<'a>(&'a self, spec: &'a IndexSpec) -> impl Iterator<Item = Vec<Bson>> + 'a {
        self.documents.iter().filter_map(move |d| index_key(d, spec))
    }
}

/// Key a document contributes to an index. Missing fields index as null,
/// unless the index is sparse and every field is missing.
fn index_key(document: &Document, spec: &IndexSpec) -> Option<Vec<Bson>> {
    let values: Vec<Option<&Bson>> = spec.fields().map(|f| document.get(f)).collect();
    if spec.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(|v| v.cloned().unwrap_or(Bson::Null))
            .collect(),
    )
}

fn duplicate(collection: &str, index: &str, key: &[Bson]) -> StoreError {
    StoreError::UniqueConstraintViolation {
        index: Some(index.to_string()),
        message: format!(
            "E11000 duplicate key error collection: {} index: {} dup key: {:?}",
            collection, index, key
        ),
    }
}

/// In-process backend with the same unique, compound and sparse index
/// semantics as the server. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<HashMap<String, MemoryCollection>>>,
}

impl MemoryStore {
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .await
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Number of entries held by the named index, `None` if there is no such index.
    pub async fn index_entries(&self, collection: &str, index: &str) -> Option<usize> {
        let state = self.state.lock().await;
        let collection = state.get(collection)?;
        if index == ID_INDEX {
            return Some(collection.documents.len());
        }
        let spec = collection.indexes.iter().find(|s| s.name == index)?;
        Some(collection.index_entries(spec).count())
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn ensure_collection(&self, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.contains_key(name) {
            return Ok(false);
        }
        state.insert(name.to_string(), MemoryCollection::default());
        Ok(true)
    }

    async fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let coll = state.entry(collection.to_string()).or_default();

        let conflict = || StoreError::IndexConflict {
            collection: collection.to_string(),
            name: spec.name.to_string(),
        };

        if let Some(existing) = coll
            .indexes
            .iter()
            .find(|s| s.name == spec.name || s.keys == spec.keys)
        {
            return if existing == spec {
                Ok(())
            } else {
                Err(conflict())
            };
        }

        if spec.unique {
            let mut seen: Vec<Vec<Bson>> = vec![];
            for key in coll.index_entries(spec) {
                if seen.contains(&key) {
                    return Err(duplicate(collection, spec.name, &key));
                }
                seen.push(key);
            }
        }

        coll.indexes.push(*spec);
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError> {
        let state = self.state.lock().await;
        let Some(coll) = state.get(collection) else {
            return Ok(vec![]);
        };

        let mut indexes = vec![IndexInfo {
            name: ID_INDEX.to_string(),
            keys: doc! { "_id": 1 },
        }];
        indexes.extend(coll.indexes.iter().map(|s| IndexInfo {
            name: s.name.to_string(),
            keys: s.key_document(),
        }));
        Ok(indexes)
    }

    async fn insert(&self, collection: &str, mut document: Document) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let coll = state.entry(collection.to_string()).or_default();

        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        if coll.documents.iter().any(|d| d.get("_id") == Some(&id)) {
            return Err(duplicate(collection, ID_INDEX, &[id]));
        }

        for spec in coll.indexes.iter().filter(|s| s.unique) {
            let Some(key) = index_key(&document, spec) else {
                continue;
            };
            if coll.index_entries(spec).any(|existing| existing == key) {
                return Err(duplicate(collection, spec.name, &key));
            }
        }

        coll.documents.push(document);
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .get(collection)
            .map(|c| c.documents.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::migrations::{
        IndexSpec, EVENT_INDEXES, EXTRACTED_EVENTS, TENANT_CONFIGURATIONS, TENANT_INDEXES,
    };
    use crate::model::{ExtractedEvent, TenantConfiguration};
    use crate::store::{SchemaStore, StoreError};

    async fn provisioned() -> anyhow::Result<MemoryStore> {
        let store = MemoryStore::default();
        for spec in &TENANT_INDEXES {
            store.ensure_index(TENANT_CONFIGURATIONS, spec).await?;
        }
        for spec in &EVENT_INDEXES {
            store.ensure_index(EXTRACTED_EVENTS, spec).await?;
        }
        Ok(store)
    }

    async fn insert_event(store: &MemoryStore, event: &ExtractedEvent) -> Result<(), StoreError> {
        store
            .insert(EXTRACTED_EVENTS, bson::to_document(event)?)
            .await
    }

    #[tokio::test]
    async fn test_ensure_collection_twice() -> anyhow::Result<()> {
        let store = MemoryStore::default();
        assert!(store.ensure_collection(TENANT_CONFIGURATIONS).await?);
        assert!(!store.ensure_collection(TENANT_CONFIGURATIONS).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_tenant_rejected() -> anyhow::Result<()> {
        let store = provisioned().await?;
        let demo = bson::to_document(&TenantConfiguration::demo())?;

        store.insert(TENANT_CONFIGURATIONS, demo.clone()).await?;
        let err = store
            .insert(TENANT_CONFIGURATIONS, demo)
            .await
            .unwrap_err();

        match err {
            StoreError::UniqueConstraintViolation { index, .. } => {
                assert_eq!(index.as_deref(), Some("idx_tenant_id_unique"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count(TENANT_CONFIGURATIONS).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_pair_uniqueness() -> anyhow::Result<()> {
        let store = provisioned().await?;

        insert_event(&store, &ExtractedEvent::new("t1", "e1", "CUSTOM", "signup")).await?;

        // other fields differ, pair is the same
        let mut again = ExtractedEvent::new("t1", "e1", "STANDARD", "login");
        again.retry_count = 4;
        let err = insert_event(&store, &again).await.unwrap_err();
        assert!(err.is_unique_violation());

        // same event id under another tenant is fine
        insert_event(&store, &ExtractedEvent::new("t2", "e1", "CUSTOM", "signup")).await?;
        assert_eq!(store.count(EXTRACTED_EVENTS).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_sparse_error_index() -> anyhow::Result<()> {
        let store = provisioned().await?;

        for i in 0..5 {
            let mut tenant = TenantConfiguration::new(
                format!("tenant-{i}"),
                "Company".into(),
                "key".into(),
                "url".into(),
            );
            if i == 0 {
                tenant.last_extraction_error = Some("401 Unauthorized".into());
            }
            store
                .insert(TENANT_CONFIGURATIONS, bson::to_document(&tenant)?)
                .await?;
        }

        assert_eq!(
            store
                .index_entries(TENANT_CONFIGURATIONS, "idx_extraction_error")
                .await,
            Some(1)
        );
        // non sparse indexes cover every document
        assert_eq!(
            store.index_entries(TENANT_CONFIGURATIONS, "idx_active").await,
            Some(5)
        );
        assert_eq!(
            store
                .index_entries(TENANT_CONFIGURATIONS, "idx_active_last_attempted")
                .await,
            Some(5)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_index_is_idempotent() -> anyhow::Result<()> {
        let store = provisioned().await?;
        for spec in &TENANT_INDEXES {
            store.ensure_index(TENANT_CONFIGURATIONS, spec).await?;
        }
        // _id_ plus the declared ones
        assert_eq!(store.list_indexes(TENANT_CONFIGURATIONS).await?.len(), 5);
        assert_eq!(store.list_indexes(EXTRACTED_EVENTS).await?.len(), 8);
        Ok(())
    }

    #[tokio::test]
    async fn test_conflicting_index_definition() -> anyhow::Result<()> {
        let store = provisioned().await?;
        let changed = IndexSpec {
            unique: true,
            ..TENANT_INDEXES[1]
        };

        let err = store
            .ensure_index(TENANT_CONFIGURATIONS, &changed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IndexConflict { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_unique_index_over_existing_duplicates() -> anyhow::Result<()> {
        let store = MemoryStore::default();
        let demo = bson::to_document(&TenantConfiguration::demo())?;
        store.insert(TENANT_CONFIGURATIONS, demo.clone()).await?;
        store.insert(TENANT_CONFIGURATIONS, demo).await?;

        let err = store
            .ensure_index(TENANT_CONFIGURATIONS, &TENANT_INDEXES[0])
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(store
            .index_entries(TENANT_CONFIGURATIONS, "idx_tenant_id_unique")
            .await
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_indexes_on_missing_collection() -> anyhow::Result<()> {
        let store = MemoryStore::default();
        assert!(store.list_indexes("nope").await?.is_empty());
        assert_eq!(store.count("nope").await?, 0);
        Ok(())
    }
}
