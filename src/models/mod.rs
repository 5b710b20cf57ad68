//! Modelos del sistema
//!
//! Este módulo contiene los documentos persistidos y los modelos de
//! autenticación.

pub mod auth;
pub mod rider;
pub mod vehicle;
