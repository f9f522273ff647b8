//! Foreign-key resolution. A property's `$ref` marker is turned into a
//! column mapping on demand, then applied to a concrete data object to
//! produce the primary-key tuple of the referenced collection.

use crate::model::{schema_name_of_ref, Document, Entity};
use crate::logic::coerce::get_value_from_schema;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForeignKeyError {
    #[error("unknown schema {0}")]
    UnknownSchema(String),
    #[error("unknown property {schema}.{field}")]
    UnknownProperty { schema: String, field: String },
    #[error("foreign key on {schema}.{field}: referenced column {column} of {target} cannot be paired")]
    UnpairedColumn {
        schema: String,
        field: String,
        target: String,
        column: String,
    },
}

/// Column mapping derived from a `$ref` marker: referenced-column name
/// paired with the local column it reads from, or a `*literal` constant.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDescription {
    pub table_ref: String,
    /// referenced column -> local column name or `*literal`
    pub fields_ref: Vec<(String, String)>,
    pub is_unique_key: bool,
}

/// A resolved reference: the target collection plus the concrete key
/// tuple. `valid` is false when any resolved value was absent.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyForeign {
    pub table: String,
    pub primary_key: Entity,
    pub valid: bool,
    pub is_unique_key: bool,
}

/// Compute the column mapping for a reference-carrying property. Returns
/// `Ok(None)` when the property carries no reference marker.
///
/// A single-column referenced key maps directly to the local field. For
/// composite keys each referenced column is paired with the same-named
/// property of the current schema; a column literally named `id` with no
/// same-named counterpart falls back to the local field itself. An
/// explicit `?refCol=localCol` query suffix on the marker overrides the
/// pairing, and a local part prefixed with `*` denotes a constant.
pub fn foreign_key_description(
    document: &Document,
    schema_name: &str,
    field_name: &str,
) -> Result<Option<ForeignKeyDescription>, ForeignKeyError> {
    let schema = document
        .get_schema(schema_name)
        .ok_or_else(|| ForeignKeyError::UnknownSchema(schema_name.to_string()))?;

    let property =
        schema
            .get_property(field_name)
            .ok_or_else(|| ForeignKeyError::UnknownProperty {
                schema: schema_name.to_string(),
                field: field_name.to_string(),
            })?;

    let Some(reference) = &property.reference else {
        return Ok(None);
    };

    let target_name = schema_name_of_ref(reference);
    let target = document
        .get_schema(target_name)
        .ok_or_else(|| ForeignKeyError::UnknownSchema(target_name.to_string()))?;

    // explicit ?refCol=localCol overrides from the marker's query suffix
    let mut overrides: Vec<(String, String)> = Vec::new();

    if let Some(pos) = reference.find('?') {
        for pair in reference[pos + 1..].split('&') {
            if let Some((ref_col, local)) = pair.split_once('=') {
                overrides.push((ref_col.to_string(), local.to_string()));
            }
        }
    }

    let mut fields_ref = Vec::new();

    if target.primary_keys.len() == 1 {
        let column = target.primary_keys[0].clone();
        let local = overrides
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, l)| l.clone())
            .unwrap_or_else(|| field_name.to_string());
        fields_ref.push((column, local));
    } else {
        for column in &target.primary_keys {
            if let Some((_, local)) = overrides.iter().find(|(c, _)| c == column) {
                fields_ref.push((column.clone(), local.clone()));
            } else if schema.get_property(column).is_some() {
                fields_ref.push((column.clone(), column.clone()));
            } else if column == "id" {
                // common dangling-column case: "foo" references a
                // composite key whose "id" part lives in "foo" itself
                fields_ref.push((column.clone(), field_name.to_string()));
            } else {
                return Err(ForeignKeyError::UnpairedColumn {
                    schema: schema_name.to_string(),
                    field: field_name.to_string(),
                    target: target_name.to_string(),
                    column: column.clone(),
                });
            }
        }
    }

    Ok(Some(ForeignKeyDescription {
        table_ref: target_name.to_string(),
        fields_ref,
        is_unique_key: target.primary_keys.len() > 1,
    }))
}

/// Apply the foreign-key description of `schema_name.field_name` to a
/// data object, producing the referenced key tuple. Returns `Ok(None)`
/// for non-reference properties.
pub fn primary_key_foreign(
    document: &Document,
    schema_name: &str,
    field_name: &str,
    obj: &Entity,
) -> Result<Option<PrimaryKeyForeign>, ForeignKeyError> {
    let Some(description) = foreign_key_description(document, schema_name, field_name)? else {
        return Ok(None);
    };

    let schema = document
        .get_schema(schema_name)
        .ok_or_else(|| ForeignKeyError::UnknownSchema(schema_name.to_string()))?;

    let mut primary_key = Entity::new();
    let mut valid = true;

    for (ref_column, local) in &description.fields_ref {
        let value = if let Some(literal) = local.strip_prefix('*') {
            Some(Value::String(literal.to_string()))
        } else {
            get_value_from_schema(schema, local, obj)
        };

        match value {
            Some(value) if !value.is_null() => {
                primary_key.insert(ref_column.clone(), value);
            }
            _ => {
                valid = false;
                primary_key.insert(ref_column.clone(), Value::Null);
            }
        }
    }

    Ok(Some(PrimaryKeyForeign {
        table: description.table_ref,
        primary_key,
        valid,
        is_unique_key: description.is_unique_key,
    }))
}
