//! Shared application state
//!
//! Este módulo define el estado compartido de la aplicación que se pasa
//! a través del router de Axum.

use std::sync::Arc;

use crate::config::environment::EnvironmentConfig;
use crate::database::DocumentStore;
use crate::repositories::rider_repository::RiderRepository;
use crate::repositories::vehicle_repository::VehicleRepository;
use crate::services::assignment_engine::AssignmentEngine;
use crate::services::consistency_sweep::ConsistencySweep;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: EnvironmentConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: EnvironmentConfig) -> Self {
        Self { store, config }
    }

    pub fn riders(&self) -> RiderRepository {
        RiderRepository::new(self.store.clone())
    }

    pub fn vehicles(&self) -> VehicleRepository {
        VehicleRepository::new(self.store.clone())
    }

    pub fn assignment_engine(&self) -> AssignmentEngine {
        AssignmentEngine::new(self.riders(), self.vehicles())
    }

    pub fn consistency_sweep(&self) -> ConsistencySweep {
        ConsistencySweep::new(self.riders(), self.vehicles())
    }
}
