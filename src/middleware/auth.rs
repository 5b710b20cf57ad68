//! Autenticación JWT
//!
//! Extrae el bearer token, lo verifica y normaliza sus claims en un
//! `Principal` con un conjunto canónico de roles. Los handlers lo reciben
//! como extractor; un token ausente o inválido corta la request con 401.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use tracing::debug;

use crate::{
    models::auth::Principal,
    state::AppState,
    utils::{
        errors::AppError,
        jwt::{extract_token_from_header, verify_token, JwtConfig},
    },
};

/// Usuario autenticado que se inyecta en los handlers
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Token de autorización requerido".to_string()))?;

        let token = extract_token_from_header(auth_header)?;
        let claims = verify_token(token, &JwtConfig::from(&state.config))?;
        let principal = Principal::from_claims(claims);

        debug!(
            "🔑 Usuario {} autenticado con roles {:?}",
            principal.user_id,
            principal.role_names()
        );
        Ok(AuthenticatedUser(principal))
    }
}
