use crate::model::Entity;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown schema: {0}")]
    UnknownSchema(String),
    #[error("record not found in {schema}")]
    NotFound { schema: String },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Backend-neutral persistence contract. One implementation per backend;
/// the dispatcher only ever talks through this trait.
///
/// Keyed operations (`find_one`, `update`, `delete_one`) expect exactly
/// one matching record; zero matches is `StoreError::NotFound`, never an
/// empty success. An unknown schema name is a hard error on every method.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Establish the backend connection. Idempotent.
    async fn connect(&self) -> StoreResult<()>;

    /// Exact-match filter over declared fields. `order_by` tokens are
    /// `"field"` optionally followed by `asc` or `desc`.
    async fn find(
        &self,
        schema: &str,
        filter: &Entity,
        order_by: &[String],
    ) -> StoreResult<Vec<Entity>>;

    async fn find_one(&self, schema: &str, key: &Entity) -> StoreResult<Entity>;

    /// Insert, assigning a generated identity value when the schema
    /// declares identity generation on the primary key. Returns the
    /// stored form so generated fields are visible to the caller.
    async fn insert(&self, schema: &str, obj: &Entity) -> StoreResult<Entity>;

    /// Full replace of the record matched by `key`.
    async fn update(&self, schema: &str, key: &Entity, obj: &Entity) -> StoreResult<Entity>;

    async fn delete_one(&self, schema: &str, key: &Entity) -> StoreResult<()>;
}
