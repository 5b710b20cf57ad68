//! Services module
//!
//! Este módulo contiene la lógica de negocio de la aplicación. Los servicios
//! encapsulan operaciones que involucran a riders y vehículos a la vez.

pub mod assignment_engine;
pub mod authorization_service;
pub mod consistency_sweep;

pub use assignment_engine::{
    AssignmentEngine, AssignmentError, AssignmentOutcome, AssignmentResult, ClaimPolicy,
    DesiredAssignment,
};
pub use authorization_service::AuthorizationService;
pub use consistency_sweep::{ConsistencySweep, ReconcileReport};
