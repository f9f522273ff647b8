//! File-backed storage: one JSON array file per schema under a data
//! directory, mirrored in memory and rewritten on every mutation.
//! Intended for development and tests, not concurrent production load.

use crate::logic::filter;
use crate::model::{Document, Entity};
use crate::store::{EntityStore, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FileStore {
    document: Arc<Document>,
    dir: PathBuf,
    tables: RwLock<HashMap<String, Vec<Entity>>>,
}

impl FileStore {
    pub fn new(document: Arc<Document>, dir: impl AsRef<Path>) -> Self {
        Self {
            document,
            dir: dir.as_ref().to_path_buf(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table_path(&self, schema: &str) -> PathBuf {
        self.dir.join(format!("{schema}.json"))
    }

    fn check_schema(&self, schema: &str) -> StoreResult<()> {
        if self.document.get_schema(schema).is_none() {
            return Err(StoreError::UnknownSchema(schema.to_string()));
        }

        Ok(())
    }

    fn load_table(&self, schema: &str) -> StoreResult<Vec<Entity>> {
        if let Some(table) = self.tables.read().get(schema) {
            return Ok(table.clone());
        }

        let path = self.table_path(schema);
        let table: Vec<Entity> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };

        self.tables
            .write()
            .insert(schema.to_string(), table.clone());
        Ok(table)
    }

    fn persist_table(&self, schema: &str, table: Vec<Entity>) -> StoreResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(
            self.table_path(schema),
            serde_json::to_string_pretty(&table)?,
        )?;
        self.tables.write().insert(schema.to_string(), table);
        Ok(())
    }

    /// Next identity value for a generated integer primary key: the
    /// current maximum plus one, starting at 1 on an empty table.
    fn next_identity(table: &[Entity], field: &str) -> i64 {
        table
            .iter()
            .filter_map(|entity| entity.get(field).and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[async_trait]
impl EntityStore for FileStore {
    async fn connect(&self) -> StoreResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    async fn find(
        &self,
        schema: &str,
        filter_fields: &Entity,
        order_by: &[String],
    ) -> StoreResult<Vec<Entity>> {
        self.check_schema(schema)?;
        let table = self.load_table(schema)?;

        let mut found: Vec<Entity> = filter::find(&table, filter_fields)
            .into_iter()
            .cloned()
            .collect();
        filter::sort_by_order(&mut found, order_by);
        Ok(found)
    }

    async fn find_one(&self, schema: &str, key: &Entity) -> StoreResult<Entity> {
        self.check_schema(schema)?;
        let table = self.load_table(schema)?;

        filter::find(&table, key)
            .into_iter()
            .next()
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                schema: schema.to_string(),
            })
    }

    async fn insert(&self, schema: &str, obj: &Entity) -> StoreResult<Entity> {
        self.check_schema(schema)?;
        let mut table = self.load_table(schema)?;
        let mut stored = obj.clone();

        if let Some(definition) = self.document.get_schema(schema) {
            for key in &definition.primary_keys {
                let generated = definition
                    .properties
                    .get(key)
                    .is_some_and(|p| p.identity_generation.is_some());

                if generated && stored.get(key).filter(|v| !v.is_null()).is_none() {
                    stored.insert(key.clone(), Value::from(Self::next_identity(&table, key)));
                }
            }
        }

        table.push(stored.clone());
        self.persist_table(schema, table)?;
        Ok(stored)
    }

    async fn update(&self, schema: &str, key: &Entity, obj: &Entity) -> StoreResult<Entity> {
        self.check_schema(schema)?;
        let mut table = self.load_table(schema)?;

        let index = filter::find_index(&table, key).ok_or_else(|| StoreError::NotFound {
            schema: schema.to_string(),
        })?;

        table[index] = obj.clone();
        let stored = table[index].clone();
        self.persist_table(schema, table)?;
        Ok(stored)
    }

    async fn delete_one(&self, schema: &str, key: &Entity) -> StoreResult<()> {
        self.check_schema(schema)?;
        let mut table = self.load_table(schema)?;

        let index = filter::find_index(&table, key).ok_or_else(|| StoreError::NotFound {
            schema: schema.to_string(),
        })?;

        table.remove(index);
        self.persist_table(schema, table)?;
        Ok(())
    }
}
