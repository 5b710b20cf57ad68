use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::database::Document;
use crate::models::vehicle::{VehicleStatus, VehicleType};
use crate::utils::validation::{normalize_license_plate, validate_license_plate, validate_not_empty};

// Request para crear un vehículo
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateVehicleRequest {
    #[serde(default)]
    #[validate(custom = "validate_license_plate")]
    pub license_plate: String,
    pub internal_number: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_not_empty")]
    pub manufacturer: String,
    #[serde(default)]
    #[validate(custom = "validate_not_empty")]
    pub model: String,
    #[validate(range(min = 1950, max = 2100))]
    pub year: Option<i32>,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
    pub status: Option<VehicleStatus>,
    #[validate(range(min = 0.0))]
    pub current_kilometers: Option<f64>,
    /// Campos de asignación: se aceptan en el payload pero se ignoran
    pub assigned_to: Option<Value>,
    pub assigned_at: Option<Value>,
}

impl CreateVehicleRequest {
    pub fn submitted_assignment(&self) -> bool {
        self.assigned_to.is_some() || self.assigned_at.is_some()
    }
}

// Request para actualizar un vehículo
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVehicleRequest {
    #[validate(custom = "validate_license_plate")]
    pub license_plate: Option<String>,
    pub internal_number: Option<String>,
    #[validate(custom = "validate_not_empty")]
    pub manufacturer: Option<String>,
    #[validate(custom = "validate_not_empty")]
    pub model: Option<String>,
    #[validate(range(min = 1950, max = 2100))]
    pub year: Option<i32>,
    #[serde(rename = "type")]
    pub vehicle_type: Option<VehicleType>,
    pub status: Option<VehicleStatus>,
    #[validate(range(min = 0.0))]
    pub current_kilometers: Option<f64>,
    pub assigned_to: Option<Value>,
    pub assigned_at: Option<Value>,
}

impl UpdateVehicleRequest {
    pub fn submitted_assignment(&self) -> bool {
        self.assigned_to.is_some() || self.assigned_at.is_some()
    }

    /// Campos propios presentes en el payload; nunca `assignedTo`/`assignedAt`
    pub fn vehicle_changes(&self) -> Document {
        let mut changes = Document::new();
        if let Some(plate) = &self.license_plate {
            changes.insert("licensePlate".to_string(), json!(normalize_license_plate(plate)));
        }
        if let Some(internal_number) = &self.internal_number {
            changes.insert("internalNumber".to_string(), json!(internal_number.trim()));
        }
        if let Some(manufacturer) = &self.manufacturer {
            changes.insert("manufacturer".to_string(), json!(manufacturer.trim()));
        }
        if let Some(model) = &self.model {
            changes.insert("model".to_string(), json!(model.trim()));
        }
        if let Some(year) = self.year {
            changes.insert("year".to_string(), json!(year));
        }
        if let Some(vehicle_type) = self.vehicle_type {
            changes.insert("type".to_string(), json!(vehicle_type.as_str()));
        }
        if let Some(status) = self.status {
            changes.insert("status".to_string(), json!(status.as_str()));
        }
        if let Some(km) = self.current_kilometers {
            changes.insert("currentKilometers".to_string(), json!(km));
        }
        changes
    }
}

// Filtros del listado de vehículos
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<VehicleStatus>,
    #[serde(rename = "type")]
    pub vehicle_type: Option<VehicleType>,
}
