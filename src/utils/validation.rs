//! Utilidades de validación
//!
//! Patrones y validadores custom que usan los DTOs con `#[derive(Validate)]`.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

lazy_static! {
    /// Número de identidad: exactamente 9 dígitos
    pub static ref ID_NUMBER_REGEX: Regex = Regex::new(r"^\d{9}$").unwrap();

    /// Teléfono local: prefijo de 2 o 3 dígitos empezando por 0, guion opcional y 7 dígitos
    pub static ref PHONE_REGEX: Regex = Regex::new(r"^0\d{1,2}-?\d{7}$").unwrap();
}

/// Validar que un string no esté vacío
pub fn validate_not_empty(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("not_empty");
        error.add_param("value".into(), &value.to_string());
        return Err(error);
    }
    Ok(())
}

/// Matrícula sin espacios ni guiones, en mayúsculas
pub fn normalize_license_plate(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

/// Validar formato de matrícula de vehículo: 5 a 10 alfanuméricos
pub fn validate_license_plate(value: &str) -> Result<(), ValidationError> {
    let clean_plate = normalize_license_plate(value);
    let len = clean_plate.chars().count();
    if !(5..=10).contains(&len) || !clean_plate.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut error = ValidationError::new("license_plate");
        error.add_param("value".into(), &value.to_string());
        error.add_param("format".into(), &"5-10 alphanumeric characters".to_string());
        return Err(error);
    }
    Ok(())
}

/// Id de vehículo opcional: vacío o en blanco equivale a ninguno
pub fn normalize_optional_id(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
}
