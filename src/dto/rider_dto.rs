use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use validator::Validate;

use crate::database::Document;
use crate::models::rider::{AssignmentStatus, Rider, RiderStatus};
use crate::services::assignment_engine::DesiredAssignment;
use crate::utils::validation::{
    normalize_optional_id, validate_not_empty, ID_NUMBER_REGEX, PHONE_REGEX,
};

/// Distingue un campo ausente (`None`) de uno enviado como `null` (`Some(None)`)
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// Request para crear un rider
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRiderRequest {
    #[serde(default)]
    #[validate(custom = "validate_not_empty")]
    pub first_name: String,
    #[serde(default)]
    #[validate(custom = "validate_not_empty")]
    pub last_name: String,
    #[serde(default)]
    #[validate(regex = "ID_NUMBER_REGEX")]
    pub id_number: String,
    #[serde(default)]
    #[validate(regex = "PHONE_REGEX")]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub rider_status: Option<RiderStatus>,
    pub assignment_status: Option<AssignmentStatus>,
    pub assigned_vehicle_id: Option<String>,
}

impl CreateRiderRequest {
    /// Sin `assignmentStatus` explícito, un id no vacío pide asignación
    pub fn desired_assignment(&self) -> DesiredAssignment {
        let vehicle_id = self.assigned_vehicle_id.as_deref();
        let status = self.assignment_status.unwrap_or_else(|| {
            if normalize_optional_id(vehicle_id).is_some() {
                AssignmentStatus::Assigned
            } else {
                AssignmentStatus::Unassigned
            }
        });
        DesiredAssignment::normalize(status, vehicle_id)
    }
}

// Request para actualizar un rider: sólo se valida lo que llega
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRiderRequest {
    #[validate(custom = "validate_not_empty")]
    pub first_name: Option<String>,
    #[validate(custom = "validate_not_empty")]
    pub last_name: Option<String>,
    #[validate(regex = "ID_NUMBER_REGEX")]
    pub id_number: Option<String>,
    #[validate(regex = "PHONE_REGEX")]
    pub phone: Option<String>,
    /// `null` borra el email; ausente lo deja como está
    #[serde(default, deserialize_with = "deserialize_present")]
    #[validate(email)]
    pub email: Option<Option<String>>,
    pub rider_status: Option<RiderStatus>,
    pub assignment_status: Option<AssignmentStatus>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub assigned_vehicle_id: Option<Option<String>>,
}

impl UpdateRiderRequest {
    pub fn desired_assignment(&self, current: &Rider) -> DesiredAssignment {
        match (self.assignment_status, &self.assigned_vehicle_id) {
            (None, None) => DesiredAssignment::keep(current),
            (None, Some(vehicle_id)) => {
                let vehicle_id = vehicle_id.as_deref();
                let status = if normalize_optional_id(vehicle_id).is_some() {
                    AssignmentStatus::Assigned
                } else {
                    AssignmentStatus::Unassigned
                };
                DesiredAssignment::normalize(status, vehicle_id)
            }
            (Some(status), vehicle_id) => {
                DesiredAssignment::normalize(status, vehicle_id.as_ref().and_then(|id| id.as_deref()))
            }
        }
    }

    /// Campos propios del rider presentes en el payload. Los de asignación
    /// nunca se copian: los escribe el motor.
    pub fn rider_changes(&self) -> Document {
        let mut changes = Document::new();
        let mut put = |field: &str, value: Option<&String>| {
            if let Some(value) = value {
                changes.insert(field.to_string(), json!(value.trim()));
            }
        };
        put("firstName", self.first_name.as_ref());
        put("lastName", self.last_name.as_ref());
        put("idNumber", self.id_number.as_ref());
        put("phone", self.phone.as_ref());

        match &self.email {
            Some(Some(email)) => {
                changes.insert("email".to_string(), json!(email.trim()));
            }
            Some(None) => {
                changes.insert("email".to_string(), Value::Null);
            }
            None => {}
        }

        if let Some(status) = self.rider_status {
            changes.insert("riderStatus".to_string(), json!(status.as_str()));
        }
        changes
    }
}

// Filtros del listado de riders
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub rider_status: Option<RiderStatus>,
    pub assignment_status: Option<AssignmentStatus>,
}
