//! Store de documentos en memoria
//!
//! Implementación de `DocumentStore` para desarrollo local y tests. Cada
//! colección es un mapa protegido por un `RwLock`; las escrituras toman el
//! lock exclusivo, así que `update_if` es atómico respecto de otras escrituras.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::document_store::{
    matches_fields, Collection, ConditionalUpdate, Document, DocumentStore, FindQuery, SortOrder,
    StoreResult,
};

#[derive(Debug, Clone)]
struct StoredDocument {
    sequence: u64,
    data: Document,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<Collection, HashMap<String, StoredDocument>>,
    next_sequence: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta un documento con un id fijo (fixtures de tests y seeds)
    pub async fn insert_with_id(&self, collection: Collection, id: &str, mut document: Document) -> Document {
        document.insert("id".to_string(), Value::String(id.to_string()));
        let mut inner = self.inner.write().await;
        inner.next_sequence += 1;
        let sequence = inner.next_sequence;
        inner.collections.entry(collection).or_default().insert(
            id.to_string(),
            StoredDocument {
                sequence,
                data: document.clone(),
            },
        );
        document
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, collection: Collection, document: Document) -> StoreResult<Document> {
        let id = Uuid::new_v4().to_string();
        debug!("📝 [memory] insert {}/{}", collection, id);
        Ok(self.insert_with_id(collection, &id, document).await)
    }

    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| stored.data.clone()))
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        changes: Document,
    ) -> StoreResult<Option<Document>> {
        let mut inner = self.inner.write().await;
        let Some(stored) = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.get_mut(id))
        else {
            return Ok(None);
        };

        for (field, value) in changes {
            if field != "id" {
                stored.data.insert(field, value);
            }
        }
        Ok(Some(stored.data.clone()))
    }

    async fn update_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &Document,
        changes: Document,
    ) -> StoreResult<ConditionalUpdate> {
        let mut inner = self.inner.write().await;
        let Some(stored) = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.get_mut(id))
        else {
            return Ok(ConditionalUpdate::Missing);
        };

        if !matches_fields(&stored.data, expected) {
            debug!("⚖️ [memory] precondición fallida en {}/{}", collection, id);
            return Ok(ConditionalUpdate::PreconditionFailed(stored.data.clone()));
        }

        for (field, value) in changes {
            if field != "id" {
                stored.data.insert(field, value);
            }
        }
        Ok(ConditionalUpdate::Applied(stored.data.clone()))
    }

    async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .collections
            .get_mut(&collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn delete_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &Document,
    ) -> StoreResult<ConditionalUpdate> {
        let mut inner = self.inner.write().await;
        let Some(docs) = inner.collections.get_mut(&collection) else {
            return Ok(ConditionalUpdate::Missing);
        };
        let Some(stored) = docs.get(id) else {
            return Ok(ConditionalUpdate::Missing);
        };

        if !matches_fields(&stored.data, expected) {
            debug!("⚖️ [memory] precondición de borrado fallida en {}/{}", collection, id);
            return Ok(ConditionalUpdate::PreconditionFailed(stored.data.clone()));
        }

        Ok(docs
            .remove(id)
            .map(|stored| ConditionalUpdate::Applied(stored.data))
            .unwrap_or(ConditionalUpdate::Missing))
    }

    async fn find(&self, collection: Collection, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let inner = self.inner.read().await;
        let Some(docs) = inner.collections.get(&collection) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&StoredDocument> = docs
            .values()
            .filter(|stored| matches_fields(&stored.data, query.filters.iter().map(|(k, v)| (k, v))))
            .collect();

        // Orden estable: campo pedido y, a igualdad, orden de inserción
        matching.sort_by(|a, b| {
            let by_field = match &query.order_by {
                Some((field, order)) => {
                    let ordering = compare_values(
                        a.data.get(field).unwrap_or(&Value::Null),
                        b.data.get(field).unwrap_or(&Value::Null),
                    );
                    match order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    }
                }
                None => Ordering::Equal,
            };
            let by_sequence = match query.order_by {
                Some((_, SortOrder::Desc)) => b.sequence.cmp(&a.sequence),
                _ => a.sequence.cmp(&b.sequence),
            };
            by_field.then(by_sequence)
        });

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .map(|stored| stored.data.clone())
            .collect())
    }

    async fn count(&self, collection: Collection, filters: &[(String, Value)]) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(&collection)
            .map(|docs| {
                docs.values()
                    .filter(|stored| matches_fields(&stored.data, filters.iter().map(|(k, v)| (k, v))))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
