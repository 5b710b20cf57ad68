//! Store de documentos sobre PostgreSQL
//!
//! Cada documento vive como una fila JSONB de la tabla `documents`, con clave
//! primaria `(collection, id)`. Las actualizaciones son una única sentencia
//! `UPDATE ... SET data = data || $changes`, atómica por fila; la escritura
//! condicional añade `data @> $expected` al `WHERE`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::document_store::{
    Collection, ConditionalUpdate, Document, DocumentStore, FindQuery, SortOrder, StoreError,
    StoreResult,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (collection, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS documents_data_gin ON documents USING GIN (data jsonb_path_ops)",
];

#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Crear la tabla de documentos si no existe
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("✅ Esquema de documentos verificado");
        Ok(())
    }
}

fn into_document(value: Value) -> StoreResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected a JSON object, found {}",
            other
        ))),
    }
}

/// Filtros de igualdad como un objeto JSON para el operador `@>`
fn containment(filters: &[(String, Value)]) -> Value {
    Value::Object(filters.iter().cloned().collect())
}

/// El operador `@>` exige que la clave exista; un `null` esperado también
/// tiene que aceptar documentos donde el campo falta.
fn null_guards(expected: &Document, first_param: usize) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut binds = Vec::new();
    for (field, value) in expected {
        if value.is_null() {
            let index = first_param + binds.len();
            sql.push_str(&format!(
                " AND ((data->${}) = 'null'::jsonb OR NOT data ? ${})",
                index, index
            ));
            binds.push(field.clone());
        }
    }
    (sql, binds)
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, collection: Collection, mut document: Document) -> StoreResult<Document> {
        let id = Uuid::new_v4().to_string();
        document.insert("id".to_string(), Value::String(id.clone()));

        let data: Value = sqlx::query_scalar(
            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) RETURNING data",
        )
        .bind(collection.as_str())
        .bind(&id)
        .bind(Value::Object(document))
        .fetch_one(&self.pool)
        .await?;

        debug!("📝 [pg] insert {}/{}", collection, id);
        into_document(data)
    }

    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let data: Option<Value> =
            sqlx::query_scalar("SELECT data FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        data.map(into_document).transpose()
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        mut changes: Document,
    ) -> StoreResult<Option<Document>> {
        changes.remove("id");
        let data: Option<Value> = sqlx::query_scalar(
            r#"
            UPDATE documents
            SET data = data || $3, updated_at = now()
            WHERE collection = $1 AND id = $2
            RETURNING data
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(Value::Object(changes))
        .fetch_optional(&self.pool)
        .await?;

        data.map(into_document).transpose()
    }

    async fn update_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &Document,
        mut changes: Document,
    ) -> StoreResult<ConditionalUpdate> {
        changes.remove("id");

        let non_null: Document = expected
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let (guards, null_fields) = null_guards(expected, 5);

        let sql = format!(
            r#"
            UPDATE documents
            SET data = data || $3, updated_at = now()
            WHERE collection = $1 AND id = $2 AND data @> $4{}
            RETURNING data
            "#,
            guards
        );

        let mut query = sqlx::query_scalar::<_, Value>(&sql)
            .bind(collection.as_str())
            .bind(id)
            .bind(Value::Object(changes))
            .bind(Value::Object(non_null));
        for field in &null_fields {
            query = query.bind(field);
        }

        if let Some(data) = query.fetch_optional(&self.pool).await? {
            return Ok(ConditionalUpdate::Applied(into_document(data)?));
        }

        // Distinguir documento inexistente de precondición fallida
        match self.get(collection, id).await? {
            Some(current) => Ok(ConditionalUpdate::PreconditionFailed(current)),
            None => Ok(ConditionalUpdate::Missing),
        }
    }

    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &Document,
    ) -> StoreResult<ConditionalUpdate> {
        let non_null: Document = expected
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let (guards, null_fields) = null_guards(expected, 4);

        let sql = format!(
            "DELETE FROM documents WHERE collection = $1 AND id = $2 AND data @> $3{} RETURNING data",
            guards
        );

        let mut query = sqlx::query_scalar::<_, Value>(&sql)
            .bind(collection.as_str())
            .bind(id)
            .bind(Value::Object(non_null));
        for field in &null_fields {
            query = query.bind(field);
        }

        if let Some(data) = query.fetch_optional(&self.pool).await? {
            return Ok(ConditionalUpdate::Applied(into_document(data)?));
        }

        match self.get(collection, id).await? {
            Some(current) => Ok(ConditionalUpdate::PreconditionFailed(current)),
            None => Ok(ConditionalUpdate::Missing),
        }
    }

    async fn find(&self, collection: Collection, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let direction = match &query.order_by {
            Some((_, SortOrder::Desc)) => "DESC",
            _ => "ASC",
        };
        let sql = format!(
            "SELECT data FROM documents WHERE collection = $1 AND data @> $2 \
             ORDER BY data->>$3 {dir}, created_at {dir} OFFSET $4 LIMIT $5",
            dir = direction
        );

        let order_field = query
            .order_by
            .as_ref()
            .map(|(field, _)| field.clone())
            .unwrap_or_default();
        let limit = query.limit.map(|l| l as i64);

        let rows: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(collection.as_str())
            .bind(containment(&query.filters))
            .bind(order_field)
            .bind(query.offset as i64)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(into_document).collect()
    }

    async fn count(&self, collection: Collection, filters: &[(String, Value)]) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE collection = $1 AND data @> $2",
        )
        .bind(collection.as_str())
        .bind(containment(filters))
        .fetch_one(&self.pool)
        .await?;

        Ok(total.max(0) as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
