use crate::migrations::IndexSpec;
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use lazy_static::lazy_static;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    Database,
};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Server code for a duplicate key on a unique index.
const DUPLICATE_KEY: i32 = 11000;
/// Server code returned by `create` for an existing collection.
const NAMESPACE_EXISTS: i32 = 48;
/// Same name or same keys as an existing index, but different options or keys.
const INDEX_CONFLICT_CODES: [i32; 2] = [85, 86];

lazy_static! {
    static ref DUP_KEY_INDEX: Regex = Regex::new(r"index: (\S+) dup key").unwrap();
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A write (or a unique index build) collided with an existing key.
    #[error("duplicate key on index {}: {message}", .index.as_deref().unwrap_or("<unknown>"))]
    UniqueConstraintViolation {
        index: Option<String>,
        message: String,
    },

    /// An index with the same name or keys exists with a different definition
    /// (server codes 85 and 86).
    #[error("index {name} on {collection} conflicts with an existing index")]
    IndexConflict { collection: String, name: String },

    #[error(transparent)]
    Serialization(#[from] bson::ser::Error),

    #[error(transparent)]
    Mongo(mongodb::error::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueConstraintViolation { .. })
    }

    /// Unique violation reported on `index`. A violation whose index could not
    /// be told from the server message counts as a match.
    pub fn is_unique_violation_on(&self, index: &str) -> bool {
        match self {
            Self::UniqueConstraintViolation { index: found, .. } => {
                found.as_deref().map_or(true, |found| found == index)
            }
            _ => false,
        }
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        let message = match *err.kind {
            ErrorKind::Write(WriteFailure::WriteError(ref e)) if e.code == DUPLICATE_KEY => {
                Some(e.message.clone())
            }
            // unique index build over existing duplicates
            ErrorKind::Command(ref e) if e.code == DUPLICATE_KEY => Some(e.message.clone()),
            _ => None,
        };

        match message {
            Some(message) => Self::UniqueConstraintViolation {
                index: dup_key_index(&message),
                message,
            },
            None => Self::Mongo(err),
        }
    }
}

/// Pulls the index name out of an E11000 server message.
fn dup_key_index(message: &str) -> Option<String> {
    DUP_KEY_INDEX
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    matches!(*err.kind, ErrorKind::Command(ref e) if e.code == NAMESPACE_EXISTS)
}

/// Maps a failed `createIndexes` for the index `name` on `collection`.
fn index_error(err: mongodb::error::Error, collection: &str, name: &str) -> StoreError {
    let conflict = matches!(
        *err.kind,
        ErrorKind::Command(ref e) if INDEX_CONFLICT_CODES.contains(&e.code)
    );
    if conflict {
        return StoreError::IndexConflict {
            collection: collection.to_string(),
            name: name.to_string(),
        };
    }
    err.into()
}

/// `JSON.stringify` prints whole doubles without a fraction, so `1.0` renders as `1`.
fn integral(value: Bson) -> Bson {
    match value {
        Bson::Double(d) if d.is_finite() && d.fract() == 0.0 && d.abs() < i64::MAX as f64 => {
            Bson::Int64(d as i64)
        }
        Bson::Document(doc) => Bson::Document(
            doc.into_iter()
                .map(|(key, value)| (key, integral(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Index as currently present in a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
}

impl IndexInfo {
    /// Compact JSON of the key spec, in declared field order.
    pub fn keys_json(&self) -> String {
        integral(Bson::Document(self.keys.clone()))
            .into_relaxed_extjson()
            .to_string()
    }
}

/// Backend the provisioner talks to. Every operation is idempotent except `insert`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Returns true if the collection was created, false if it already existed.
    async fn ensure_collection(&self, name: &str) -> Result<bool, StoreError>;

    /// Creates the index unless one with the same name and definition exists.
    async fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StoreError>;

    /// All indexes present in the collection, including the primary key index.
    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError>;

    async fn insert(&self, collection: &str, document: Document) -> Result<(), StoreError>;

    async fn count(&self, collection: &str) -> Result<u64, StoreError>;
}

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SchemaStore for MongoStore {
    async fn ensure_collection(&self, name: &str) -> Result<bool, StoreError> {
        match self.db.create_collection(name, None).await {
            Ok(_) => Ok(true),
            Err(err) if is_namespace_exists(&err) => {
                debug!(collection = name, "collection already exists");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StoreError> {
        let result = self
            .db
            .collection::<Document>(collection)
            .create_index(spec.to_index_model(), None)
            .await
            .map_err(|err| index_error(err, collection, spec.name))?;
        debug!(
            collection = collection,
            index = result.index_name,
            "index ensured"
        );
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError> {
        let mut cursor = self
            .db
            .collection::<Document>(collection)
            .list_indexes(None)
            .await?;

        let mut indexes = vec![];
        while let Some(model) = cursor.try_next().await? {
            let name = model
                .options
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_default();
            indexes.push(IndexInfo {
                name,
                keys: model.keys,
            });
        }
        Ok(indexes)
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        self.db
            .collection::<Document>(collection)
            .insert_one(document, None)
            .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self
            .db
            .collection::<Document>(collection)
            .count_documents(None, None)
            .await?)
    }
}
