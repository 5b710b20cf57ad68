//! Modelo de Vehicle
//!
//! Documento de la colección `vehicles`. `assignedTo`/`assignedAt` son la
//! referencia inversa al rider y sólo cambian como efecto de una mutación de
//! rider pasada por el motor de asignaciones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{Document, StoreError, StoreResult};

pub const ASSIGNED_TO: &str = "assignedTo";
pub const ASSIGNED_AT: &str = "assignedAt";
pub const LICENSE_PLATE: &str = "licensePlate";
pub const STATUS: &str = "status";
pub const TYPE: &str = "type";

/// Estado del vehículo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Active,
    #[default]
    WaitingForRider,
    Faulty,
    Unfit,
    StolenLost,
    Decommissioned,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Active => "active",
            VehicleStatus::WaitingForRider => "waiting_for_rider",
            VehicleStatus::Faulty => "faulty",
            VehicleStatus::Unfit => "unfit",
            VehicleStatus::StolenLost => "stolen_lost",
            VehicleStatus::Decommissioned => "decommissioned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Motorcycle,
    Scooter,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Scooter => "scooter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub license_plate: String,
    pub internal_number: Option<String>,
    pub manufacturer: String,
    pub model: String,
    pub year: Option<i32>,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub status: VehicleStatus,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_kilometers: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Vehicle {
    pub fn from_document(document: Document) -> StoreResult<Self> {
        serde_json::from_value(Value::Object(document)).map_err(StoreError::from)
    }

    pub fn to_document(&self) -> StoreResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::Serialization("vehicle is not a JSON object".to_string())),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some()
    }
}
