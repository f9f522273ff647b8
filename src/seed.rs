//! Bootstrap data. A seed file maps schema names to row arrays; each
//! table is populated only when currently empty, so restarts never
//! duplicate rows. When no user exists at all, a default admin is
//! created so the instance is reachable.

use crate::model::{Document, Entity, Role};
use crate::store::{EntityStore, StoreResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct SeedData {
    pub tables: BTreeMap<String, Vec<Entity>>,
}

impl SeedData {
    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Insert the seed rows for every table that is still empty.
    pub async fn apply(&self, store: &dyn EntityStore) -> StoreResult<()> {
        for (schema, rows) in &self.tables {
            let existing = store.find(schema, &Entity::new(), &[]).await?;

            if !existing.is_empty() {
                log::debug!("seed for {schema} skipped, table already populated");
                continue;
            }

            for row in rows {
                store.insert(schema, row).await?;
            }

            log::info!("seeded {} row(s) into {schema}", rows.len());
        }

        Ok(())
    }
}

/// Create the superuser tenant and an `admin` user holding full-mask
/// roles for every declared route, unless a user already exists.
pub async fn ensure_admin(store: &dyn EntityStore, document: &Document) -> StoreResult<()> {
    let users = store.find("user", &Entity::new(), &[]).await?;

    if !users.is_empty() {
        return Ok(());
    }

    let owners = store.find("groupOwner", &Entity::new(), &[]).await?;

    if owners.is_empty() {
        let owner: Entity =
            serde_json::from_value(json!({"id": 1, "name": "admin"})).unwrap_or_default();
        store.insert("groupOwner", &owner).await?;
    }

    let roles: Vec<Role> = document
        .paths
        .keys()
        .map(|path| Role {
            path: path.clone(),
            mask: 0b11111,
        })
        .collect();

    let mut admin = Entity::new();
    admin.insert("name".to_string(), Value::String("admin".to_string()));
    admin.insert("password".to_string(), Value::String("admin".to_string()));
    admin.insert("groupOwner".to_string(), Value::from(1));
    admin.insert(
        "roles".to_string(),
        serde_json::to_value(&roles).unwrap_or(Value::Null),
    );

    store.insert("user", &admin).await?;
    log::warn!("created default admin user with default password; change it");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::framework;
    use crate::store::FileStore;
    use std::sync::Arc;
    use uuid::Uuid;

    fn document() -> Arc<Document> {
        let mut document = Document::default();
        framework::merge_into(&mut document);
        document.generate_paths();
        Arc::new(document)
    }

    fn temp_store(document: Arc<Document>) -> FileStore {
        let dir = std::env::temp_dir().join(format!("crudcast-test-{}", Uuid::new_v4()));
        FileStore::new(document, dir)
    }

    #[tokio::test]
    async fn seed_applies_once_and_skips_populated_tables() {
        let document = document();
        let store = temp_store(document);
        store.connect().await.unwrap();

        let seed: SeedData = serde_json::from_value(json!({
            "group": [{"name": "first"}]
        }))
        .unwrap();

        seed.apply(&store).await.unwrap();
        seed.apply(&store).await.unwrap();

        let rows = store.find("group", &Entity::new(), &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn ensure_admin_creates_superuser_tenant_and_roles() {
        let document = document();
        let store = temp_store(document.clone());
        store.connect().await.unwrap();

        ensure_admin(&store, &document).await.unwrap();
        ensure_admin(&store, &document).await.unwrap();

        let users = store.find("user", &Entity::new(), &[]).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].get("groupOwner"), Some(&json!(1)));

        let roles: Vec<Role> =
            serde_json::from_value(users[0].get("roles").cloned().unwrap()).unwrap();
        assert!(roles.iter().any(|r| r.path == "/user" && r.mask == 31));
    }
}
