//! Request dispatcher: resolves path and method against the schema
//! document, authorizes the caller, binds and coerces parameters, runs
//! the storage operation and fans out change notifications. This is the
//! single place where errors are mapped to HTTP status codes; no layer
//! below it knows about transport concerns.

use crate::logic::coerce::{copy_fields, CoerceError};
use crate::logic::foreign_key::{primary_key_foreign, ForeignKeyError};
use crate::model::{mask_allows, Document, Entity, Principal, Schema, SchemaType, MASK_GET};
use crate::notify::{ConnectionRegistry, NotifyAction, NotifyMessage};
use crate::store::{EntityStore, StoreError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub const GROUP_OWNER_SCHEMA: &str = "groupOwner";
pub const GROUP_SCHEMA: &str = "group";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::BadRequest(_) => 400,
            DispatchError::Unauthorized(_) => 401,
            DispatchError::NotFound(_) => 404,
            DispatchError::Internal(_) => 500,
        }
    }
}

impl From<CoerceError> for DispatchError {
    fn from(err: CoerceError) -> Self {
        DispatchError::BadRequest(err.to_string())
    }
}

impl From<ForeignKeyError> for DispatchError {
    fn from(err: ForeignKeyError) -> Self {
        DispatchError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { schema } => {
                DispatchError::NotFound(format!("no matching record in {schema}"))
            }
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

/// One inbound request, already stripped of transport framing: the
/// entity path (no API base prefix), the lowercase method, decoded query
/// parameters, the optional JSON body and the authenticated principal.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub path: String,
    pub method: String,
    pub params: Entity,
    pub body: Option<Entity>,
    pub principal: Principal,
}

pub struct Dispatcher {
    document: Arc<Document>,
    store: Arc<dyn EntityStore>,
    registry: Arc<ConnectionRegistry>,
}

/// Default ordering for array queries: integer and date-valued fields
/// sort descending so recent records surface first.
pub fn default_order(schema: &Schema) -> Vec<String> {
    schema
        .properties
        .iter()
        .filter(|(_, property)| {
            matches!(
                property.semantic_type(),
                SchemaType::Integer | SchemaType::Date | SchemaType::DateTime
            )
        })
        .map(|(name, _)| format!("{name} desc"))
        .collect()
}

impl Dispatcher {
    pub fn new(
        document: Arc<Document>,
        store: Arc<dyn EntityStore>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            document,
            store,
            registry,
        }
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Role-mask gate: the principal must hold a role entry for the
    /// resolved route with the bit for this method set.
    fn check_authorization(
        &self,
        principal: &Principal,
        pattern: &str,
        method: &str,
    ) -> Result<(), DispatchError> {
        let Some(role) = principal.role_for(pattern) else {
            return Err(DispatchError::Unauthorized(format!(
                "no role grants access to {pattern}"
            )));
        };

        if !mask_allows(role.mask, method) {
            return Err(DispatchError::Unauthorized(format!(
                "method {method} not granted on {pattern}"
            )));
        }

        Ok(())
    }

    /// Tenant isolation on writes, expressed purely through foreign-key
    /// shape. When the target schema references the group-owner concept
    /// and the caller is not the superuser, the object must carry the
    /// caller's own group-owner (injected when absent) and any group
    /// reference must be one of the caller's groups.
    fn check_object_access(
        &self,
        schema: &Schema,
        principal: &Principal,
        obj: &mut Entity,
    ) -> Result<(), DispatchError> {
        if principal.is_superuser() {
            return Ok(());
        }

        for (field, _) in self
            .document
            .get_properties_with_ref(&schema.name, GROUP_OWNER_SCHEMA)
        {
            let resolved = primary_key_foreign(&self.document, &schema.name, field, obj)?;

            let inject = match &resolved {
                Some(resolved) => !resolved.valid,
                None => true,
            };

            if inject {
                obj.insert(field.clone(), Value::from(principal.group_owner));
                continue;
            }

            let Some(resolved) = resolved else { continue };
            let owner = resolved
                .primary_key
                .values()
                .next()
                .and_then(Value::as_i64);

            if owner != Some(principal.group_owner) {
                return Err(DispatchError::Unauthorized(format!(
                    "object group-owner is outside the caller's tenant on {}",
                    schema.name
                )));
            }
        }

        for (field, _) in self
            .document
            .get_properties_with_ref(&schema.name, GROUP_SCHEMA)
        {
            let Some(resolved) = primary_key_foreign(&self.document, &schema.name, field, obj)?
            else {
                continue;
            };

            if !resolved.valid {
                continue;
            }

            let group = resolved
                .primary_key
                .values()
                .next()
                .and_then(Value::as_i64);

            if !group.is_some_and(|g| principal.groups.contains(&g)) {
                return Err(DispatchError::Unauthorized(format!(
                    "object group is outside the caller's memberships on {}",
                    schema.name
                )));
            }
        }

        Ok(())
    }

    fn bind_primary_key(&self, schema: &Schema, params: &Entity) -> Result<Entity, DispatchError> {
        let key = copy_fields(schema, params, false, false, true)?;

        for pk in &schema.primary_keys {
            if key.get(pk).filter(|v| !v.is_null()).is_none() {
                return Err(DispatchError::BadRequest(format!(
                    "missing primary-key parameter {pk} for {}",
                    schema.name
                )));
            }
        }

        Ok(key)
    }

    fn has_full_key(&self, schema: &Schema, params: &Entity) -> bool {
        !schema.primary_keys.is_empty()
            && schema.primary_keys.iter().all(|pk| {
                params
                    .get(pk)
                    .or_else(|| {
                        schema
                            .properties
                            .get(pk)
                            .and_then(|p| p.internal_name.as_deref())
                            .and_then(|internal| params.get(internal))
                    })
                    .is_some_and(|v| !v.is_null())
            })
    }

    /// Tenant-scope visibility of a stored object for one principal,
    /// shared by notification fan-out.
    fn object_visible(&self, schema: &Schema, principal: &Principal, obj: &Entity) -> bool {
        if principal.is_superuser() {
            return true;
        }

        for (field, _) in self
            .document
            .get_properties_with_ref(&schema.name, GROUP_OWNER_SCHEMA)
        {
            match primary_key_foreign(&self.document, &schema.name, field, obj) {
                Ok(Some(resolved)) if resolved.valid => {
                    let owner = resolved
                        .primary_key
                        .values()
                        .next()
                        .and_then(Value::as_i64);

                    if owner != Some(principal.group_owner) {
                        return false;
                    }
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }

        for (field, _) in self
            .document
            .get_properties_with_ref(&schema.name, GROUP_SCHEMA)
        {
            match primary_key_foreign(&self.document, &schema.name, field, obj) {
                Ok(Some(resolved)) if resolved.valid => {
                    let group = resolved
                        .primary_key
                        .values()
                        .next()
                        .and_then(Value::as_i64);

                    if !group.is_some_and(|g| principal.groups.contains(&g)) {
                        return false;
                    }
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }

        true
    }

    /// Push a change event to every live connection allowed to see it: the
    /// object must be within the connection's tenant scope and the
    /// connection's principal must hold read permission on the route.
    /// Fan-out failure never fails the request; the mutation already
    /// happened.
    fn notify(&self, schema: &Schema, pattern: &str, action: NotifyAction, stored: &Entity) {
        let primary_key = match copy_fields(schema, stored, false, false, true) {
            Ok(primary_key) => primary_key,
            Err(err) => {
                log::error!("notification for {} skipped: {err}", schema.name);
                return;
            }
        };

        let message = NotifyMessage {
            service: schema.name.clone(),
            action,
            primary_key,
        };

        let delivered = self.registry.broadcast(&message, |principal| {
            let readable = principal
                .role_for(pattern)
                .is_some_and(|role| role.mask & MASK_GET != 0);

            readable && self.object_visible(schema, principal, stored)
        });

        log::debug!(
            "notified {delivered} connection(s) of {:?} on {}",
            message.action,
            schema.name
        );
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<Value, DispatchError> {
        let mut raw_params = request.params.clone();

        let pattern = self
            .document
            .match_path(&request.path, &mut raw_params)
            .ok_or_else(|| {
                DispatchError::BadRequest(format!("no route matches {}", request.path))
            })?
            .to_string();

        let operation = self
            .document
            .operation(&pattern, &request.method)
            .ok_or_else(|| {
                DispatchError::BadRequest(format!(
                    "method {} not declared on {pattern}",
                    request.method
                ))
            })?
            .clone();

        self.check_authorization(&request.principal, &pattern, &request.method)?;

        let schema = self
            .document
            .get_schema(&operation.schema)
            .ok_or_else(|| {
                DispatchError::Internal(format!("route {pattern} names unknown schema"))
            })?
            .clone();

        let params = copy_fields(&schema, &raw_params, true, false, false)?;

        match request.method.as_str() {
            "get" => {
                if self.has_full_key(&schema, &params) {
                    let key = self.bind_primary_key(&schema, &params)?;
                    let entity = self.store.find_one(&schema.name, &key).await?;
                    Ok(Value::Object(entity))
                } else {
                    let found = self
                        .store
                        .find(&schema.name, &params, &default_order(&schema))
                        .await?;
                    Ok(Value::Array(found.into_iter().map(Value::Object).collect()))
                }
            }
            "post" => {
                let body = request
                    .body
                    .ok_or_else(|| DispatchError::BadRequest("missing request body".into()))?;
                let mut obj = copy_fields(&schema, &body, false, false, false)?;

                self.check_object_access(&schema, &request.principal, &mut obj)?;

                let stored = self.store.insert(&schema.name, &obj).await?;
                self.notify(&schema, &pattern, NotifyAction::Notify, &stored);
                Ok(Value::Object(stored))
            }
            "put" => {
                let body = request
                    .body
                    .ok_or_else(|| DispatchError::BadRequest("missing request body".into()))?;
                let key = self.bind_primary_key(&schema, &params)?;

                self.store.find_one(&schema.name, &key).await?;

                let mut obj = copy_fields(&schema, &body, false, false, false)?;
                self.check_object_access(&schema, &request.principal, &mut obj)?;

                for (pk, value) in &key {
                    obj.insert(pk.clone(), value.clone());
                }

                let stored = self.store.update(&schema.name, &key, &obj).await?;
                self.notify(&schema, &pattern, NotifyAction::Notify, &stored);
                Ok(Value::Object(stored))
            }
            "delete" => {
                let key = self.bind_primary_key(&schema, &params)?;
                let pre_image = self.store.find_one(&schema.name, &key).await?;

                self.store.delete_one(&schema.name, &key).await?;
                self.notify(&schema, &pattern, NotifyAction::Delete, &pre_image);
                Ok(Value::Object(Entity::new()))
            }
            // TODO: merge-style partial update once the storage contract
            // grows a read-modify-write primitive
            "patch" => Err(DispatchError::Internal(
                "patch is not supported".to_string(),
            )),
            other => Err(DispatchError::BadRequest(format!(
                "unsupported method {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{framework, Role};
    use crate::store::FileStore;
    use serde_json::json;
    use uuid::Uuid;

    fn document() -> Arc<Document> {
        let raw = json!({
            "schemas": {
                "request": {
                    "x-primaryKeys": ["id"],
                    "properties": {
                        "id": {"type": "integer", "x-identityGeneration": "BY DEFAULT"},
                        "groupOwner": {
                            "type": "integer",
                            "$ref": "#/components/schemas/groupOwner"
                        },
                        "amount": {"type": "number"},
                        "issuedAt": {"type": "string", "format": "date"},
                        "comment": {"type": "string"}
                    }
                }
            }
        })
        .to_string();

        let mut document = Document::parse(&raw).unwrap();
        framework::merge_into(&mut document);
        document.generate_paths();
        Arc::new(document)
    }

    fn dispatcher(document: Arc<Document>) -> Dispatcher {
        let dir = std::env::temp_dir().join(format!("crudcast-test-{}", Uuid::new_v4()));
        let store = Arc::new(FileStore::new(document.clone(), dir));
        Dispatcher::new(document, store, Arc::new(ConnectionRegistry::new()))
    }

    fn principal(group_owner: i64, mask: u32) -> Principal {
        Principal {
            id: 10,
            name: "tester".to_string(),
            group_owner,
            groups: vec![],
            roles: vec![Role {
                path: "/request".to_string(),
                mask,
            }],
        }
    }

    fn request(method: &str, params: Value, body: Option<Value>, p: Principal) -> DispatchRequest {
        DispatchRequest {
            path: "/request".to_string(),
            method: method.to_string(),
            params: serde_json::from_value(params).unwrap(),
            body: body.map(|b| serde_json::from_value(b).unwrap()),
            principal: p,
        }
    }

    #[test]
    fn default_order_sorts_numeric_and_date_fields_descending() {
        let document = document();
        let schema = document.get_schema("request").unwrap();

        let order = default_order(schema);
        assert!(order.contains(&"id desc".to_string()));
        assert!(order.contains(&"issuedAt desc".to_string()));
        assert!(!order.iter().any(|t| t.starts_with("comment")));
    }

    #[tokio::test]
    async fn role_mask_gates_each_method() {
        let dispatcher = dispatcher(document());

        // read-only principal may query but not create
        let read_only = principal(2, 0b00001);
        let ok = dispatcher
            .dispatch(request("get", json!({}), None, read_only.clone()))
            .await;
        assert!(ok.is_ok());

        let denied = dispatcher
            .dispatch(request(
                "post",
                json!({}),
                Some(json!({"amount": 1.0})),
                read_only,
            ))
            .await;
        assert!(matches!(denied, Err(DispatchError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn create_injects_the_callers_group_owner() {
        let dispatcher = dispatcher(document());

        let stored = dispatcher
            .dispatch(request(
                "post",
                json!({}),
                Some(json!({"amount": 12.5})),
                principal(2, 63),
            ))
            .await
            .unwrap();

        assert_eq!(stored.get("groupOwner"), Some(&json!(2)));
        assert_eq!(stored.get("id"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn create_rejects_a_foreign_tenant_without_writing() {
        let dispatcher = dispatcher(document());

        let denied = dispatcher
            .dispatch(request(
                "post",
                json!({}),
                Some(json!({"amount": 1.0, "groupOwner": 3})),
                principal(2, 63),
            ))
            .await;
        assert!(matches!(denied, Err(DispatchError::Unauthorized(_))));

        // nothing was written
        let rows = dispatcher
            .dispatch(request("get", json!({}), None, principal(2, 63)))
            .await
            .unwrap();
        assert_eq!(rows, json!([]));
    }

    #[tokio::test]
    async fn keyed_get_reads_and_missing_key_is_not_found() {
        let dispatcher = dispatcher(document());
        let admin = principal(2, 63);

        dispatcher
            .dispatch(request(
                "post",
                json!({}),
                Some(json!({"amount": 7.0})),
                admin.clone(),
            ))
            .await
            .unwrap();

        let read = dispatcher
            .dispatch(request("get", json!({"id": "1"}), None, admin.clone()))
            .await
            .unwrap();
        assert_eq!(read.get("amount"), Some(&json!(7.0)));

        let missing = dispatcher
            .dispatch(request("delete", json!({"id": "99"}), None, admin))
            .await;
        assert!(matches!(missing, Err(DispatchError::NotFound(_))));
    }

    #[tokio::test]
    async fn patch_is_reported_as_a_server_error() {
        let dispatcher = dispatcher(document());
        let err = dispatcher
            .dispatch(request("patch", json!({}), Some(json!({})), principal(2, 63)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
    }
}
