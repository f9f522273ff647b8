//! Value coercion: converts untyped input (query-parameter strings,
//! JSON-decoded values) into the schema-declared types, applying length
//! truncation, default substitution and internal-name aliasing.

use crate::model::{Entity, Property, Schema, SchemaType};
use chrono::{DateTime, NaiveDate};
use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoerceError {
    #[error("invalid integer literal {0:?}")]
    InvalidInteger(String),
    #[error("invalid number literal {0:?}")]
    InvalidNumber(String),
    #[error("invalid date value {0:?}")]
    InvalidDate(String),
    #[error("field {field}: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<CoerceError>,
    },
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Coerce one raw value against a property declaration.
///
/// An absent value on a required non-nullable property is substituted
/// with the single-member enum value, else the declared default, before
/// coercion runs. Type-mismatched parses fail loudly; string overflow is
/// truncated, not rejected.
pub fn copy_value(property: &Property, value: Option<&Value>) -> Result<Value, CoerceError> {
    let mut value = value.cloned().filter(|v| !v.is_null());

    if value.is_none() && property.essential && !property.nullable {
        if property.enum_values.len() == 1 {
            value = Some(property.enum_values[0].clone());
        } else if let Some(default) = &property.default {
            value = Some(Value::String(default.clone()));
        }
    }

    let Some(value) = value else {
        return Ok(Value::Null);
    };

    let coerced = match property.semantic_type() {
        SchemaType::String => match &value {
            Value::String(s) => match property.max_length {
                Some(max) if s.chars().count() > max => Value::String(truncate_chars(s, max)),
                _ => value,
            },
            _ => value,
        },
        SchemaType::Integer => match &value {
            Value::String(s) => {
                let parsed: i64 = s
                    .trim()
                    .parse()
                    .map_err(|_| CoerceError::InvalidInteger(s.clone()))?;
                Value::Number(parsed.into())
            }
            _ => value,
        },
        SchemaType::Number => match &value {
            Value::String(s) => {
                let parsed: f64 = s
                    .trim()
                    .parse()
                    .map_err(|_| CoerceError::InvalidNumber(s.clone()))?;
                Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| CoerceError::InvalidNumber(s.clone()))?
            }
            _ => value,
        },
        SchemaType::Boolean => match &value {
            Value::Bool(_) => value,
            Value::String(s) => Value::Bool(s == "true"),
            _ => Value::Null,
        },
        // Legacy behavior kept on purpose: a date-time string on a
        // property carrying maxLength is truncated raw instead of parsed
        // (display-formatted date strings depend on it).
        SchemaType::DateTime => match &value {
            Value::String(s) => match property.max_length {
                Some(max) if !s.is_empty() => Value::String(truncate_chars(s, max)),
                _ => {
                    let parsed = DateTime::parse_from_rfc3339(s)
                        .map_err(|_| CoerceError::InvalidDate(s.clone()))?;
                    Value::String(parsed.to_rfc3339())
                }
            },
            _ => value,
        },
        SchemaType::Date => match &value {
            Value::String(s) => match property.max_length {
                Some(_) if !s.is_empty() => Value::String(truncate_chars(s, 10)),
                _ => {
                    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .or_else(|_| {
                            DateTime::parse_from_rfc3339(s).map(|dt| dt.date_naive())
                        })
                        .map_err(|_| CoerceError::InvalidDate(s.clone()))?;
                    Value::String(date.format("%Y-%m-%d").to_string())
                }
            },
            _ => value,
        },
        SchemaType::Object | SchemaType::Array => value,
    };

    Ok(coerced)
}

/// Resolve the value for `property_name` from a data object, honoring the
/// internal-name aliasing in both directions and normalizing integral
/// floats on integer properties.
pub fn get_value_from_schema(schema: &Schema, property_name: &str, obj: &Entity) -> Option<Value> {
    let mut property = schema.properties.get(property_name);
    let mut found = None;

    if let Some(p) = property {
        if let Some(value) = obj.get(property_name) {
            found = Some(value.clone());
        } else if let Some(internal) = &p.internal_name {
            found = obj.get(internal).cloned();
        }
    }

    if found.is_none() {
        // the requested name may itself be a storage-level name
        for (field_name, field) in &schema.properties {
            if field.internal_name.as_deref() == Some(property_name) {
                property = Some(field);
                found = obj.get(field_name).cloned();
                break;
            }
        }
    }

    if let (Some(p), Some(Value::Number(n))) = (property, &found) {
        if p.semantic_type() == SchemaType::Integer {
            if let Some(f) = n.as_f64() {
                if n.as_i64().is_none() && f.fract() == 0.0 {
                    found = Some(Value::Number((f as i64).into()));
                }
            }
        }
    }

    found
}

/// Copy a data object through a schema, field by field.
///
/// Iterates the declared properties, never the input keys, so unknown
/// input is dropped (allow-list policy). `ignore_missing` skips fields
/// absent from the input, `ignore_hidden` drops hidden fields, and
/// `only_primary_keys` restricts the copy to the key tuple (parameter
/// binding).
pub fn copy_fields(
    schema: &Schema,
    data_in: &Entity,
    ignore_missing: bool,
    ignore_hidden: bool,
    only_primary_keys: bool,
) -> Result<Entity, CoerceError> {
    let mut out = Entity::new();

    for (field_name, property) in &schema.properties {
        if ignore_hidden && property.hidden {
            continue;
        }

        if ignore_missing && !data_in.contains_key(field_name) {
            continue;
        }

        if only_primary_keys && !schema.primary_keys.iter().any(|k| k == field_name) {
            continue;
        }

        let value = get_value_from_schema(schema, field_name, data_in);

        match value {
            Some(Value::Null) | None if property.nullable => {
                out.insert(field_name.clone(), Value::Null);
            }
            None if property.essential => {
                // let copy_value materialize the default or enum singleton
                let coerced = copy_value(property, None).map_err(|source| CoerceError::Field {
                    field: field_name.clone(),
                    source: Box::new(source),
                })?;

                if !coerced.is_null() {
                    out.insert(field_name.clone(), coerced);
                }
            }
            Some(value) if !value.is_null() => {
                let coerced =
                    copy_value(property, Some(&value)).map_err(|source| CoerceError::Field {
                        field: field_name.clone(),
                        source: Box::new(source),
                    })?;
                out.insert(field_name.clone(), coerced);
            }
            _ => {}
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Property;
    use serde_json::json;

    fn string_prop(max_length: Option<usize>) -> Property {
        Property {
            max_length,
            ..Property::typed(SchemaType::String)
        }
    }

    #[test]
    fn truncation_law_yields_exactly_max_length() {
        let property = string_prop(Some(5));

        let out = copy_value(&property, Some(&json!("abcdefgh"))).unwrap();
        assert_eq!(out, json!("abcde"));

        let short = copy_value(&property, Some(&json!("ab"))).unwrap();
        assert_eq!(short, json!("ab"));
    }

    #[test]
    fn coercion_is_idempotent_for_well_typed_values() {
        let cases = vec![
            (string_prop(Some(4)), json!("abcdef")),
            (Property::typed(SchemaType::Integer), json!("42")),
            (Property::typed(SchemaType::Number), json!("3.5")),
            (Property::typed(SchemaType::Boolean), json!("true")),
            (
                Property::typed(SchemaType::DateTime),
                json!("2024-05-01T10:30:00+00:00"),
            ),
            (Property::typed(SchemaType::Date), json!("2024-05-01")),
        ];

        for (property, raw) in cases {
            let once = copy_value(&property, Some(&raw)).unwrap();
            let twice = copy_value(&property, Some(&once)).unwrap();
            assert_eq!(once, twice, "re-coercing {raw} must be a no-op");
        }
    }

    #[test]
    fn integer_parse_failure_is_an_error_not_zero() {
        let property = Property::typed(SchemaType::Integer);
        assert!(copy_value(&property, Some(&json!("not-a-number"))).is_err());

        // native numbers pass through unchanged
        let out = copy_value(&property, Some(&json!(7))).unwrap();
        assert_eq!(out, json!(7));
    }

    #[test]
    fn absent_required_value_uses_enum_singleton_then_default() {
        let singleton = Property {
            essential: true,
            enum_values: vec![json!("only")],
            ..Property::typed(SchemaType::String)
        };
        assert_eq!(copy_value(&singleton, None).unwrap(), json!("only"));

        let defaulted = Property {
            essential: true,
            default: Some("7".to_string()),
            ..Property::typed(SchemaType::Integer)
        };
        assert_eq!(copy_value(&defaulted, None).unwrap(), json!(7));

        let nullable = Property {
            essential: true,
            nullable: true,
            default: Some("7".to_string()),
            ..Property::typed(SchemaType::Integer)
        };
        assert_eq!(copy_value(&nullable, None).unwrap(), Value::Null);
    }

    #[test]
    fn date_time_with_max_length_truncates_instead_of_parsing() {
        let property = Property {
            max_length: Some(10),
            ..Property::typed(SchemaType::DateTime)
        };

        let out = copy_value(&property, Some(&json!("2024-05-01T10:30:00Z"))).unwrap();
        assert_eq!(out, json!("2024-05-01"));

        // without maxLength, a malformed date is rejected
        let strict = Property::typed(SchemaType::DateTime);
        assert!(copy_value(&strict, Some(&json!("yesterday"))).is_err());
    }

    fn sample_schema() -> Schema {
        let mut schema = Schema {
            name: "sample".to_string(),
            primary_keys: vec!["id".to_string()],
            ..Schema::default()
        };
        schema
            .properties
            .insert("id".to_string(), Property::typed(SchemaType::Integer));
        schema
            .properties
            .insert("knownField".to_string(), string_prop(None));
        schema.properties.insert(
            "secret".to_string(),
            Property {
                hidden: true,
                ..Property::typed(SchemaType::String)
            },
        );
        schema.properties.insert(
            "fullName".to_string(),
            Property {
                internal_name: Some("full_name".to_string()),
                ..Property::typed(SchemaType::String)
            },
        );
        schema
    }

    #[test]
    fn copy_fields_drops_unknown_input_keys() {
        let schema = sample_schema();
        let input: Entity = serde_json::from_value(json!({
            "unknownField": 1,
            "knownField": "x"
        }))
        .unwrap();

        let out = copy_fields(&schema, &input, true, false, false).unwrap();
        assert!(!out.contains_key("unknownField"));
        assert_eq!(out.get("knownField"), Some(&json!("x")));
    }

    #[test]
    fn copy_fields_resolves_internal_name_aliases() {
        let schema = sample_schema();
        let input: Entity = serde_json::from_value(json!({"full_name": "Ada"})).unwrap();

        let out = copy_fields(&schema, &input, true, false, false).unwrap();
        // value resolution sees through the alias, presence does not
        assert_eq!(
            get_value_from_schema(&schema, "fullName", &input),
            Some(json!("Ada"))
        );
        assert!(!out.contains_key("full_name"));
    }

    #[test]
    fn copy_fields_can_restrict_to_primary_keys_and_skip_hidden() {
        let schema = sample_schema();
        let input: Entity = serde_json::from_value(json!({
            "id": "9",
            "knownField": "x",
            "secret": "s"
        }))
        .unwrap();

        let keys = copy_fields(&schema, &input, false, false, true).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("id"), Some(&json!(9)));

        let visible = copy_fields(&schema, &input, true, true, false).unwrap();
        assert!(!visible.contains_key("secret"));
    }
}
