//! PostgreSQL relation store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{validate_identifier, ColumnType, InferredSchema, RelationState, RelationStore, SqlValue};
use crate::error::{PipelineError, PipelineResult};

/// Maximum bind parameters PostgreSQL accepts in one statement
pub const PG_BIND_LIMIT: usize = 65_535;

pub struct PgRelationStore {
    pool: PgPool,
}

impl PgRelationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn relation_exists(&self, name: &str) -> PipelineResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn relation_columns(&self, name: &str) -> PipelineResult<Vec<(String, ColumnType)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(column, data_type)| (column, column_type_from_pg(&data_type)))
            .collect())
    }
}

/// Map an `information_schema.columns.data_type` value
fn column_type_from_pg(data_type: &str) -> ColumnType {
    match data_type {
        "integer" | "bigint" | "smallint" => ColumnType::Integer,
        "real" | "double precision" | "numeric" => ColumnType::Real,
        "boolean" => ColumnType::Boolean,
        _ => ColumnType::Text,
    }
}

fn quote(identifier: &str) -> PipelineResult<String> {
    if validate_identifier(identifier) {
        Ok(format!("\"{}\"", identifier))
    } else {
        Err(PipelineError::persistence(
            identifier,
            "identifier must match [a-z0-9_]",
        ))
    }
}

/// `CREATE TABLE IF NOT EXISTS` for an inferred schema
pub fn create_relation_sql(name: &str, schema: &InferredSchema) -> PipelineResult<String> {
    let columns = schema
        .columns
        .iter()
        .map(|(column, column_type)| Ok(format!("{} {}", quote(column)?, column_type.as_sql())))
        .collect::<PipelineResult<Vec<String>>>()?;

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(name)?,
        columns.join(", ")
    ))
}

/// Rows per statement that keep the bind count under the limit
pub fn rows_per_statement(column_count: usize) -> usize {
    (PG_BIND_LIMIT / column_count.max(1)).max(1)
}

#[async_trait]
impl RelationStore for PgRelationStore {
    async fn ensure_relation(&self, name: &str, schema: &InferredSchema) -> PipelineResult<RelationState> {
        let existed = self.relation_exists(name).await?;

        if !existed {
            let ddl = create_relation_sql(name, schema)?;
            sqlx::query(&ddl).execute(&self.pool).await?;
            debug!(relation = %name, "relation ensured");
        }

        Ok(RelationState {
            created: !existed,
            columns: self.relation_columns(name).await?,
        })
    }

    async fn insert_rows(
        &self,
        name: &str,
        columns: &[String],
        rows: Vec<Vec<SqlValue>>,
    ) -> PipelineResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let column_list = columns
            .iter()
            .map(|c| quote(c))
            .collect::<PipelineResult<Vec<String>>>()?
            .join(", ");
        let prefix = format!("INSERT INTO {} ({}) ", quote(name)?, column_list);

        let mut inserted = 0u64;
        for chunk in rows.chunks(rows_per_statement(columns.len())) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
            query_builder.push_values(chunk, |mut b, row| {
                for value in row {
                    match value {
                        SqlValue::Integer(v) => b.push_bind(*v),
                        SqlValue::Real(v) => b.push_bind(*v),
                        SqlValue::Text(v) => b.push_bind(v.clone()),
                        SqlValue::Boolean(v) => b.push_bind(*v),
                    };
                }
            });

            let result = query_builder.build().execute(&self.pool).await?;
            inserted += result.rows_affected();
        }

        debug!(relation = %name, inserted, "rows inserted");
        Ok(inserted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sql_quotes_identifiers() {
        let schema = InferredSchema {
            columns: vec![
                ("trip_id".to_string(), ColumnType::Text),
                ("fare".to_string(), ColumnType::Real),
            ],
        };
        assert_eq!(
            create_relation_sql("taxi_trips", &schema).unwrap(),
            r#"CREATE TABLE IF NOT EXISTS "taxi_trips" ("trip_id" TEXT, "fare" REAL)"#
        );
    }

    #[test]
    fn test_create_sql_rejects_unsafe_names() {
        let schema = InferredSchema {
            columns: vec![("x\"; DROP".to_string(), ColumnType::Text)],
        };
        assert!(create_relation_sql("t", &schema).is_err());
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(9), 7281);
        assert_eq!(rows_per_statement(1), PG_BIND_LIMIT);
        assert_eq!(rows_per_statement(0), PG_BIND_LIMIT);
        assert_eq!(rows_per_statement(100_000), 1);
    }

    #[test]
    fn test_integer_and_real_are_the_narrow_pg_types() {
        let schema = InferredSchema {
            columns: vec![
                ("count".to_string(), ColumnType::Integer),
                ("latitude".to_string(), ColumnType::Real),
            ],
        };
        let ddl = create_relation_sql("points", &schema).unwrap();
        assert!(ddl.contains(r#""count" INTEGER"#));
        assert!(ddl.contains(r#""latitude" REAL"#));
        assert!(!ddl.contains("BIGINT") && !ddl.contains("DOUBLE PRECISION"));
    }

    #[test]
    fn test_pg_type_mapping() {
        assert_eq!(column_type_from_pg("integer"), ColumnType::Integer);
        assert_eq!(column_type_from_pg("real"), ColumnType::Real);
        assert_eq!(column_type_from_pg("boolean"), ColumnType::Boolean);
        assert_eq!(column_type_from_pg("timestamp with time zone"), ColumnType::Text);
    }
}
