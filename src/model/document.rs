use crate::model::{camel_to_snake, Entity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Semantic type of a property. `date` and `date-time` are promoted from
/// the standard `type: string` + `format` pair during normalization so the
/// coercion layer can dispatch on a single discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    #[serde(rename = "date-time")]
    DateTime,
    Object,
    Array,
}

/// One field definition within a `Schema`.
///
/// The `x-` attributes mirror the extension vocabulary of the consumed
/// schema document; `x-hiden` keeps the document's historical spelling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    /// Required on input ("essential"). Populated from the schema's
    /// `required` list or from `x-required` directly.
    #[serde(rename = "x-required", default, skip_serializing_if = "std::ops::Not::not")]
    pub essential: bool,
    /// Excluded from client-visible payloads.
    #[serde(rename = "x-hiden", default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// Storage-level column name when it differs from the API-level name.
    #[serde(rename = "x-internalName", default, skip_serializing_if = "Option::is_none")]
    pub internal_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Foreign-key marker: reference to another schema, optionally with a
    /// `?refColumn=localColumn` query suffix mapping referenced columns to
    /// local columns or `*literal` constants.
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "x-identityGeneration", default, skip_serializing_if = "Option::is_none")]
    pub identity_generation: Option<String>,
    #[serde(rename = "x-updatable", default, skip_serializing_if = "Option::is_none")]
    pub updatable: Option<bool>,
    #[serde(rename = "x-scale", default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(rename = "x-precision", default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Property>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Property>>,
}

impl Property {
    pub fn typed(kind: SchemaType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Effective semantic type: the `format` override wins for date kinds,
    /// untyped properties default to string.
    pub fn semantic_type(&self) -> SchemaType {
        match self.format.as_deref() {
            Some("date") => return SchemaType::Date,
            Some("date-time") => return SchemaType::DateTime,
            _ => {}
        }

        self.kind.unwrap_or(SchemaType::String)
    }
}

/// A declared foreign-key constraint: local columns paired positionally
/// with columns of the referenced schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    #[serde(rename = "tableRef")]
    pub table_ref: String,
    pub fields: Vec<String>,
    #[serde(rename = "fieldsRef")]
    pub fields_ref: Vec<String>,
}

/// Typed description of one entity collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "x-primaryKeys", default, skip_serializing_if = "Vec::is_empty")]
    pub primary_keys: Vec<String>,
    #[serde(rename = "x-uniqueKeys", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unique_keys: BTreeMap<String, Vec<String>>,
    #[serde(rename = "x-foreignKeys", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub foreign_keys: BTreeMap<String, ForeignKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

impl Schema {
    /// Look up a property by API name, falling back to a match by
    /// internal (storage-level) name.
    pub fn get_property(&self, name: &str) -> Option<&Property> {
        if let Some(property) = self.properties.get(name) {
            return Some(property);
        }

        self.properties
            .values()
            .find(|p| p.internal_name.as_deref() == Some(name))
    }
}

/// One CRUD operation bound to a path: which schema it targets and
/// whether a bare GET yields an array of entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub schema: String,
    #[serde(rename = "responseList", default, skip_serializing_if = "std::ops::Not::not")]
    pub response_list: bool,
}

/// Lowercase HTTP method -> operation.
pub type PathItem = BTreeMap<String, Operation>;

pub const CRUD_METHODS: [&str; 5] = ["get", "post", "put", "delete", "patch"];

/// In-memory representation of the entity-collection document: named
/// schemas plus the declared route table. Constructed once per process
/// and read-only during request processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub schemas: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, PathItem>,
}

/// Strip a `#/components/schemas/` style prefix and any query suffix,
/// leaving the bare schema name.
pub fn schema_name_of_ref(reference: &str) -> &str {
    let mut name = reference;

    if let Some(pos) = name.rfind('/') {
        name = &name[pos + 1..];
    }

    if let Some(pos) = name.find('?') {
        name = &name[..pos];
    }

    name
}

impl Document {
    /// Parse a schema document from JSON without normalizing. Callers
    /// that merge additional schemas in (see `framework::merge_into`)
    /// must parse first so references between the two sets survive the
    /// pruning pass.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Parse a self-contained schema document from JSON and normalize it.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut document = Self::parse(raw)?;
        document.normalize();
        Ok(document)
    }

    /// Post-load fixups: stamp schema names, promote `required` entries to
    /// essential, fold date formats into the semantic type, hide
    /// identity-generated columns, and prune unresolvable references.
    pub fn normalize(&mut self) {
        let known: Vec<String> = self.schemas.keys().cloned().collect();

        for (name, schema) in &mut self.schemas {
            schema.name = name.clone();
            let required = schema.required.clone();

            for (field_name, property) in &mut schema.properties {
                if required.iter().any(|r| r == field_name) {
                    property.essential = true;
                }

                match property.format.as_deref() {
                    Some("date") => property.kind = Some(SchemaType::Date),
                    Some("date-time") => property.kind = Some(SchemaType::DateTime),
                    _ => {}
                }

                if property.identity_generation.is_some() {
                    property.hidden = true;
                }

                if let Some(reference) = &property.reference {
                    let target = schema_name_of_ref(reference);

                    if !known.iter().any(|k| k == target) {
                        log::warn!(
                            "pruning unresolvable reference {} on {}.{}",
                            reference,
                            name,
                            field_name
                        );
                        property.reference = None;
                    }
                }
            }
        }
    }

    /// Declare the `/{snake_case_name}` route for every schema that does
    /// not already carry one.
    pub fn generate_paths(&mut self) {
        let names: Vec<String> = self.schemas.keys().cloned().collect();

        for name in names {
            let path = format!("/{}", camel_to_snake(&name));

            self.paths.entry(path).or_insert_with(|| {
                let mut item = PathItem::new();

                for method in CRUD_METHODS {
                    item.insert(
                        method.to_string(),
                        Operation {
                            schema: name.clone(),
                            response_list: method == "get",
                        },
                    );
                }

                item
            });
        }
    }

    pub fn get_schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(schema_name_of_ref(name))
    }

    /// Property lookup with internal-name aliasing, keyed by schema name
    /// or schema reference.
    pub fn get_property(&self, schema_name: &str, property_name: &str) -> Option<&Property> {
        self.get_schema(schema_name)
            .and_then(|schema| schema.get_property(property_name))
    }

    /// Every property of `schema_name` that foreign-keys to `target`.
    /// Used to discover belongs-to-tenant and belongs-to-group
    /// relationships without hardcoding field names.
    pub fn get_properties_with_ref<'a>(
        &'a self,
        schema_name: &str,
        target: &str,
    ) -> Vec<(&'a String, &'a Property)> {
        let target = schema_name_of_ref(target);

        let Some(schema) = self.get_schema(schema_name) else {
            return Vec::new();
        };

        schema
            .properties
            .iter()
            .filter(|(_, property)| {
                property
                    .reference
                    .as_deref()
                    .map(schema_name_of_ref)
                    .is_some_and(|r| r == target)
            })
            .collect()
    }

    /// Match a request path against the declared path templates,
    /// supporting `{param}` segments. Extracted parameters are added to
    /// `params` as strings; returns the matched pattern.
    pub fn match_path(&self, uri: &str, params: &mut Entity) -> Option<&str> {
        let uri_segments: Vec<&str> = uri.split('/').collect();

        for pattern in self.paths.keys() {
            let pattern_segments: Vec<&str> = pattern.split('/').collect();

            if pattern_segments.len() != uri_segments.len() {
                continue;
            }

            let mut extracted = Vec::new();
            let matched = pattern_segments.iter().zip(&uri_segments).all(|(p, u)| {
                if p.starts_with('{') && p.ends_with('}') {
                    extracted.push((p[1..p.len() - 1].to_string(), (*u).to_string()));
                    true
                } else {
                    p == u
                }
            });

            if matched {
                for (name, value) in extracted {
                    params.insert(name, Value::String(value));
                }

                return Some(pattern);
            }
        }

        None
    }

    /// The operation declared for a resolved route pattern and lowercase
    /// method, if any.
    pub fn operation(&self, pattern: &str, method: &str) -> Option<&Operation> {
        self.paths.get(pattern).and_then(|item| item.get(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> Document {
        let raw = json!({
            "schemas": {
                "account": {
                    "x-primaryKeys": ["id"],
                    "required": ["name"],
                    "properties": {
                        "id": {"type": "integer", "x-identityGeneration": "BY DEFAULT"},
                        "name": {"maxLength": 32},
                        "openedAt": {"type": "string", "format": "date-time"},
                        "owner": {"type": "integer", "$ref": "#/components/schemas/person"},
                        "broken": {"type": "integer", "$ref": "#/components/schemas/missing"}
                    }
                },
                "person": {
                    "x-primaryKeys": ["id"],
                    "properties": {
                        "id": {"type": "integer"},
                        "fullName": {"x-internalName": "full_name"}
                    }
                }
            }
        })
        .to_string();

        let mut document = Document::from_json(&raw).unwrap();
        document.generate_paths();
        document
    }

    #[test]
    fn normalize_promotes_required_and_date_formats() {
        let document = sample_document();
        let account = document.get_schema("account").unwrap();

        assert!(account.get_property("name").unwrap().essential);
        assert_eq!(
            account.get_property("openedAt").unwrap().semantic_type(),
            SchemaType::DateTime
        );
        assert!(account.get_property("id").unwrap().hidden);
    }

    #[test]
    fn normalize_prunes_unresolvable_references() {
        let document = sample_document();
        let account = document.get_schema("account").unwrap();

        assert!(account.get_property("broken").unwrap().reference.is_none());
        assert!(account.get_property("owner").unwrap().reference.is_some());
    }

    #[test]
    fn property_lookup_falls_back_to_internal_name() {
        let document = sample_document();

        let by_api = document.get_property("person", "fullName").unwrap();
        let by_internal = document.get_property("person", "full_name").unwrap();
        assert_eq!(by_api, by_internal);
    }

    #[test]
    fn properties_with_ref_finds_foreign_keys_generically() {
        let document = sample_document();

        let refs = document.get_properties_with_ref("account", "person");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, "owner");

        assert!(document.get_properties_with_ref("person", "account").is_empty());
    }

    #[test]
    fn match_path_resolves_templates_and_extracts_params() {
        let mut document = sample_document();
        document.paths.insert("/account/{id}".to_string(), PathItem::new());

        let mut params = Entity::new();
        assert_eq!(document.match_path("/account", &mut params), Some("/account"));
        assert!(params.is_empty());

        assert_eq!(
            document.match_path("/account/7", &mut params),
            Some("/account/{id}")
        );
        assert_eq!(params.get("id"), Some(&Value::String("7".to_string())));

        assert_eq!(document.match_path("/nowhere", &mut params), None);
    }

    #[test]
    fn generated_paths_cover_crud_methods() {
        let document = sample_document();
        let item = document.paths.get("/account").unwrap();

        assert!(item.get("get").unwrap().response_list);
        assert!(!item.get("post").unwrap().response_list);
        assert_eq!(item.get("delete").unwrap().schema, "account");
    }
}
