//! Relational storage on PostgreSQL. SQL is built dynamically from the
//! schema document, with API-level property names mapped to columns via
//! the internal name when declared, else by snake_casing.

use crate::model::{camel_to_snake, Document, Entity, Schema};
use crate::store::{EntityStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Postgres, QueryBuilder, Row, TypeInfo};
use std::sync::Arc;

pub struct PostgresStore {
    document: Arc<Document>,
    pool: PgPool,
}

fn column_name(schema: &Schema, field: &str) -> String {
    schema
        .properties
        .get(field)
        .and_then(|p| p.internal_name.clone())
        .unwrap_or_else(|| camel_to_snake(field))
}

fn table_name(schema: &Schema) -> String {
    camel_to_snake(&schema.name)
}

fn push_bind_value(builder: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => {
            builder.push_bind(None::<i64>);
        }
        Value::Bool(b) => {
            builder.push_bind(*b);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else {
                builder.push_bind(n.as_f64().unwrap_or(0.0));
            }
        }
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        other => {
            builder.push_bind(sqlx::types::Json(other.clone()));
        }
    }
}

/// Decode one row into an API-shaped entity: column values back under
/// the API-level property names.
fn decode_row(schema: &Schema, row: &PgRow) -> StoreResult<Entity> {
    let mut entity = Entity::new();

    for (field, property) in &schema.properties {
        let column = property
            .internal_name
            .clone()
            .unwrap_or_else(|| camel_to_snake(field));

        let Some(col) = row.columns().iter().find(|c| c.name() == column) else {
            continue;
        };

        let index = col.ordinal();
        let value = match col.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(index)?
                .map(|v| Value::from(v as i64)),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)?
                .map(|v| Value::from(v as i64)),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)?
                .map(|v| Value::from(v as f64)),
            "FLOAT8" | "NUMERIC" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(index)?
                .map(|v| Value::from(v.format("%Y-%m-%d").to_string())),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|v| Value::from(v.and_utc().to_rfc3339())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(|v| Value::from(v.to_rfc3339())),
            "JSON" | "JSONB" => row
                .try_get::<Option<sqlx::types::Json<Value>>, _>(index)?
                .map(|v| v.0),
            "UUID" => row
                .try_get::<Option<sqlx::types::Uuid>, _>(index)?
                .map(|v| Value::from(v.to_string())),
            _ => row.try_get::<Option<String>, _>(index)?.map(Value::from),
        };

        entity.insert(field.clone(), value.unwrap_or(Value::Null));
    }

    Ok(entity)
}

impl PostgresStore {
    pub async fn new(document: Arc<Document>, database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { document, pool })
    }

    fn schema(&self, name: &str) -> StoreResult<&Schema> {
        self.document
            .get_schema(name)
            .ok_or_else(|| StoreError::UnknownSchema(name.to_string()))
    }

    fn push_where(builder: &mut QueryBuilder<'_, Postgres>, schema: &Schema, filter: &Entity) {
        if filter.is_empty() {
            return;
        }

        builder.push(" WHERE ");
        let mut first = true;

        for (field, value) in filter {
            if !first {
                builder.push(" AND ");
            }
            first = false;

            builder.push(format!("\"{}\" = ", column_name(schema, field)));
            push_bind_value(builder, value);
        }
    }
}

#[async_trait]
impl EntityStore for PostgresStore {
    async fn connect(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find(
        &self,
        schema_name: &str,
        filter: &Entity,
        order_by: &[String],
    ) -> StoreResult<Vec<Entity>> {
        let schema = self.schema(schema_name)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM \"{}\"", table_name(schema)));
        Self::push_where(&mut builder, schema, filter);

        if !order_by.is_empty() {
            builder.push(" ORDER BY ");
            let mut first = true;

            for token in order_by {
                if !first {
                    builder.push(", ");
                }
                first = false;

                let mut parts = token.split_whitespace();
                let field = parts.next().unwrap_or_default();
                let direction = match parts.next() {
                    Some("desc") => "DESC",
                    _ => "ASC",
                };
                builder.push(format!("\"{}\" {}", column_name(schema, field), direction));
            }
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_row(schema, row)).collect()
    }

    async fn find_one(&self, schema_name: &str, key: &Entity) -> StoreResult<Entity> {
        let schema = self.schema(schema_name)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT * FROM \"{}\"", table_name(schema)));
        Self::push_where(&mut builder, schema, key);

        let row = builder.build().fetch_optional(&self.pool).await?;
        let row = row.ok_or_else(|| StoreError::NotFound {
            schema: schema_name.to_string(),
        })?;

        decode_row(schema, &row)
    }

    async fn insert(&self, schema_name: &str, obj: &Entity) -> StoreResult<Entity> {
        let schema = self.schema(schema_name)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO \"{}\" (", table_name(schema)));

        let fields: Vec<&String> = obj.keys().collect();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(format!("\"{}\"", column_name(schema, field)));
        }

        builder.push(") VALUES (");
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            push_bind_value(&mut builder, &obj[field.as_str()]);
        }
        builder.push(") RETURNING *");

        let row = builder.build().fetch_one(&self.pool).await?;
        decode_row(schema, &row)
    }

    async fn update(&self, schema_name: &str, key: &Entity, obj: &Entity) -> StoreResult<Entity> {
        let schema = self.schema(schema_name)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("UPDATE \"{}\" SET ", table_name(schema)));

        let mut first = true;
        for (field, value) in obj {
            if !first {
                builder.push(", ");
            }
            first = false;

            builder.push(format!("\"{}\" = ", column_name(schema, field)));
            push_bind_value(&mut builder, value);
        }

        Self::push_where(&mut builder, schema, key);
        builder.push(" RETURNING *");

        let row = builder.build().fetch_optional(&self.pool).await?;
        let row = row.ok_or_else(|| StoreError::NotFound {
            schema: schema_name.to_string(),
        })?;

        decode_row(schema, &row)
    }

    async fn delete_one(&self, schema_name: &str, key: &Entity) -> StoreResult<()> {
        let schema = self.schema(schema_name)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("DELETE FROM \"{}\"", table_name(schema)));
        Self::push_where(&mut builder, schema, key);

        let result = builder.build().execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                schema: schema_name.to_string(),
            });
        }

        Ok(())
    }
}
