//! DTOs de la API
//!
//! Requests validados con `validator` y respuestas serializadas.

pub mod common_dto;
pub mod rider_dto;
pub mod vehicle_dto;
