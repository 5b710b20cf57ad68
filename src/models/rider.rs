//! Modelo de Rider
//!
//! Documento de la colección `riders`. Los campos de asignación
//! (`assignmentStatus`, `assignedVehicleId`) sólo los escribe el motor de
//! asignaciones, nunca se copian tal cual desde el cliente.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{Document, StoreError, StoreResult};

pub const ASSIGNMENT_STATUS: &str = "assignmentStatus";
pub const ASSIGNED_VEHICLE_ID: &str = "assignedVehicleId";
pub const ID_NUMBER: &str = "idNumber";
pub const RIDER_STATUS: &str = "riderStatus";

/// Estado operativo del rider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiderStatus {
    #[default]
    Active,
    Inactive,
    Frozen,
}

impl RiderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiderStatus::Active => "active",
            RiderStatus::Inactive => "inactive",
            RiderStatus::Frozen => "frozen",
        }
    }
}

/// Estado de asignación, derivado y mantenido por el motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    #[default]
    Unassigned,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Unassigned => "unassigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rider {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub id_number: String,
    pub phone: String,
    pub email: Option<String>,
    #[serde(default)]
    pub rider_status: RiderStatus,
    #[serde(default)]
    pub assignment_status: AssignmentStatus,
    pub assigned_vehicle_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Rider {
    pub fn from_document(document: Document) -> StoreResult<Self> {
        serde_json::from_value(Value::Object(document)).map_err(StoreError::from)
    }

    /// Documento completo; los campos opcionales se guardan como `null`
    pub fn to_document(&self) -> StoreResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::Serialization("rider is not a JSON object".to_string())),
        }
    }

    /// Vehículo asignado efectivo: sólo cuenta si el estado es `assigned`
    pub fn current_vehicle(&self) -> Option<&str> {
        match self.assignment_status {
            AssignmentStatus::Assigned => self.assigned_vehicle_id.as_deref(),
            AssignmentStatus::Unassigned => None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
