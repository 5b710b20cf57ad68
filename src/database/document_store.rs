//! Gateway de documentos
//!
//! Interfaz abstracta sobre colecciones de documentos JSON indexados por id.
//! No contiene lógica de invariantes: sólo las primitivas CRUD, la escritura
//! condicional (compare-and-swap por campos) y los escaneos filtrados que usan
//! los repositorios.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Un documento almacenado. Siempre incluye el campo `id`.
pub type Document = Map<String, Value>;

/// Colecciones conocidas por el back office
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Riders,
    Vehicles,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Riders => "riders",
            Collection::Vehicles => "vehicles",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errores del gateway
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("document serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// El store no respondió (pool agotado, conexión caída, timeout)
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Dirección de ordenamiento de un escaneo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Consulta por igualdad de campos con orden y ventana offset/limit
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, SortOrder)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by = Some((field.to_string(), order));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Resultado de una escritura condicional
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate {
    /// La precondición se cumplió y el documento quedó actualizado
    Applied(Document),
    /// El documento existe pero sus campos no coinciden con lo esperado
    PreconditionFailed(Document),
    /// No existe documento con ese id
    Missing,
}

impl ConditionalUpdate {
    pub fn is_applied(&self) -> bool {
        matches!(self, ConditionalUpdate::Applied(_))
    }
}

/// Interfaz de almacenamiento de documentos.
///
/// Cada operación es atómica sobre un único documento; no existe ninguna
/// transacción que abarque varios documentos.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Inserta un documento nuevo. El store asigna el `id`.
    async fn insert(&self, collection: Collection, document: Document) -> StoreResult<Document>;

    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>>;

    /// Fusiona `changes` sobre el documento. Devuelve `None` si no existe.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        changes: Document,
    ) -> StoreResult<Option<Document>>;

    /// Fusiona `changes` sólo si cada campo de `expected` tiene exactamente el
    /// valor indicado (un campo ausente cuenta como `null`).
    async fn update_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &Document,
        changes: Document,
    ) -> StoreResult<ConditionalUpdate>;

    /// Borrado físico. Devuelve `false` si el documento no existía.
    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool>;

    /// Borra sólo si se cumple `expected`, con la misma semántica que
    /// `update_if`. `Applied` trae el documento borrado.
    async fn delete_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &Document,
    ) -> StoreResult<ConditionalUpdate>;

    async fn find(&self, collection: Collection, query: &FindQuery) -> StoreResult<Vec<Document>>;

    async fn count(&self, collection: Collection, filters: &[(String, Value)]) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Construye un documento a partir de pares campo/valor
pub fn fields<I, K>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Comprueba si un documento cumple todos los filtros de igualdad
pub fn matches_fields<'a, I>(document: &Document, expected: I) -> bool
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    expected
        .into_iter()
        .all(|(field, value)| document.get(field).unwrap_or(&Value::Null) == value)
}
