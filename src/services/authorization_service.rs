use crate::models::auth::{Principal, UserRole};
use crate::models::vehicle::Vehicle;
use crate::utils::errors::AppError;

/// Guardia de autorización sobre el principal ya normalizado
pub struct AuthorizationService;

impl AuthorizationService {
    /// Falla con 403 si el principal no tiene ninguno de los roles permitidos
    pub fn assert_any_role(principal: &Principal, allowed: &[UserRole]) -> Result<(), AppError> {
        if principal.has_any_role(allowed) {
            return Ok(());
        }

        let required: Vec<&str> = allowed.iter().map(|r| r.as_str()).collect();
        let current = principal.role_names();
        Err(AppError::Forbidden(format!(
            "Permisos insuficientes: roles del usuario [{}], se requiere uno de [{}]",
            if current.is_empty() { "ninguno".to_string() } else { current.join(", ") },
            required.join(", ")
        )))
    }

    /// Un rider sólo puede ver su propio registro
    pub fn can_access_rider(principal: &Principal, rider_id: &str) -> bool {
        if !principal.is_rider_only() {
            return true;
        }
        principal.rider_id.as_deref() == Some(rider_id)
    }

    /// Un rider sólo puede ver el vehículo que tiene asignado
    pub fn can_access_vehicle(principal: &Principal, vehicle: &Vehicle) -> bool {
        if !principal.is_rider_only() {
            return true;
        }
        match (principal.rider_id.as_deref(), vehicle.assigned_to.as_deref()) {
            (Some(rider_id), Some(holder)) => rider_id == holder,
            _ => false,
        }
    }
}
