//! Built-in schemas backing authentication and tenant scoping. They are
//! structural (the dispatcher and login flow depend on their shape), so
//! they live in code; the bootstrap rows for them come from seed data
//! supplied at startup.

use crate::model::{Document, Property, Schema, SchemaType};
use std::collections::BTreeMap;

fn identity_integer() -> Property {
    Property {
        identity_generation: Some("BY DEFAULT".to_string()),
        ..Property::typed(SchemaType::Integer)
    }
}

fn reference_to(schema: &str) -> Property {
    Property {
        reference: Some(format!("#/components/schemas/{schema}")),
        ..Property::typed(SchemaType::Integer)
    }
}

fn named_schema(name: &str, primary_keys: &[&str], properties: Vec<(&str, Property)>) -> Schema {
    Schema {
        name: name.to_string(),
        primary_keys: primary_keys.iter().map(|k| k.to_string()).collect(),
        properties: properties
            .into_iter()
            .map(|(n, p)| (n.to_string(), p))
            .collect(),
        ..Schema::default()
    }
}

/// The `groupOwner`, `group`, `groupUser` and `user` schemas.
pub fn framework_schemas() -> BTreeMap<String, Schema> {
    let mut schemas = BTreeMap::new();

    schemas.insert(
        "groupOwner".to_string(),
        named_schema(
            "groupOwner",
            &["id"],
            vec![
                ("id", identity_integer()),
                ("name", Property::typed(SchemaType::String)),
            ],
        ),
    );

    schemas.insert(
        "group".to_string(),
        named_schema(
            "group",
            &["id"],
            vec![
                ("id", identity_integer()),
                ("name", Property::typed(SchemaType::String)),
            ],
        ),
    );

    schemas.insert(
        "groupUser".to_string(),
        named_schema(
            "groupUser",
            &["user", "group"],
            vec![
                ("user", reference_to("user")),
                ("group", reference_to("group")),
            ],
        ),
    );

    schemas.insert(
        "user".to_string(),
        named_schema(
            "user",
            &["id"],
            vec![
                ("id", identity_integer()),
                ("groupOwner", reference_to("groupOwner")),
                (
                    "name",
                    Property {
                        max_length: Some(32),
                        ..Property::typed(SchemaType::String)
                    },
                ),
                ("password", Property::typed(SchemaType::String)),
                ("roles", Property::typed(SchemaType::Array)),
            ],
        ),
    );

    schemas
}

/// Merge the framework schemas into a loaded document, keeping any
/// overriding definitions the document already carries, then re-run
/// normalization so names and reference pruning stay consistent.
pub fn merge_into(document: &mut Document) {
    for (name, schema) in framework_schemas() {
        document.schemas.entry(name).or_insert(schema);
    }

    document.normalize();
}
