//! Modelos de autenticación y roles
//!
//! El token puede traer el rol como `role` (escalar, formato antiguo) o como
//! `roles` (lista). Aquí se normaliza todo a un único `HashSet<UserRole>`
//! antes de que llegue a cualquier servicio.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Roles del sistema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Manager,
    Secretary,
    Rider,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SuperAdmin => "super_admin",
            UserRole::Manager => "manager",
            UserRole::Secretary => "secretary",
            UserRole::Rider => "rider",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "super_admin" | "superadmin" => Some(UserRole::SuperAdmin),
            "manager" => Some(UserRole::Manager),
            "secretary" => Some(UserRole::Secretary),
            "rider" => Some(UserRole::Rider),
            _ => None,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles que pueden crear y editar riders y vehículos
pub const STAFF_ROLES: &[UserRole] = &[UserRole::SuperAdmin, UserRole::Manager, UserRole::Secretary];

/// Cualquier rol reconocido (lecturas)
pub const ANY_ROLE: &[UserRole] = &[
    UserRole::SuperAdmin,
    UserRole::Manager,
    UserRole::Secretary,
    UserRole::Rider,
];

/// Roles que pueden borrar y ejecutar mantenimiento
pub const SUPER_ADMIN_ONLY: &[UserRole] = &[UserRole::SuperAdmin];

/// Claims del JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String, // user_id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(rename = "riderId", default, skip_serializing_if = "Option::is_none")]
    pub rider_id: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

/// Usuario autenticado que se inyecta en los handlers
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_id: String,
    pub roles: HashSet<UserRole>,
    /// Rider vinculado a la cuenta (sólo para usuarios con rol `rider`)
    pub rider_id: Option<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, roles: impl IntoIterator<Item = UserRole>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().collect(),
            rider_id: None,
        }
    }

    pub fn with_rider(mut self, rider_id: impl Into<String>) -> Self {
        self.rider_id = Some(rider_id.into());
        self
    }

    /// Construir el principal desde los claims, unificando `role` y `roles`
    pub fn from_claims(claims: JwtClaims) -> Self {
        let raw = claims
            .roles
            .unwrap_or_default()
            .into_iter()
            .chain(claims.role);

        let mut roles = HashSet::new();
        for name in raw {
            match UserRole::parse(&name) {
                Some(role) => {
                    roles.insert(role);
                }
                None => warn!("⚠️ Rol desconocido '{}' ignorado para usuario {}", name, claims.sub),
            }
        }

        Self {
            user_id: claims.sub,
            roles,
            rider_id: claims.rider_id.filter(|id| !id.trim().is_empty()),
        }
    }

    pub fn has_any_role(&self, allowed: &[UserRole]) -> bool {
        allowed.iter().any(|role| self.roles.contains(role))
    }

    /// Un usuario cuyo único rol es `rider` sólo ve sus propios datos
    pub fn is_rider_only(&self) -> bool {
        !self.roles.is_empty() && self.roles.iter().all(|role| *role == UserRole::Rider)
    }

    /// Roles ordenados, para mensajes de error
    pub fn role_names(&self) -> Vec<&'static str> {
        let mut roles: Vec<UserRole> = self.roles.iter().copied().collect();
        roles.sort();
        roles.into_iter().map(|r| r.as_str()).collect()
    }
}
