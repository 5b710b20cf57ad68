//! Módulo de base de datos
//!
//! Gateway de documentos y sus implementaciones (PostgreSQL y memoria)

pub mod connection;
pub mod document_store;
pub mod memory_store;
pub mod postgres_store;

pub use connection::DatabaseConnection;
pub use document_store::{
    Collection, ConditionalUpdate, Document, DocumentStore, FindQuery, SortOrder, StoreError,
    StoreResult,
};
pub use memory_store::MemoryDocumentStore;
pub use postgres_store::PgDocumentStore;
