//! Identificação do chamador por bearer JWT (HS256)
//!
//! A emissão dos tokens acontece fora deste serviço.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use common_db::models::Role;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

/// `state` do fluxo OAuth: identifica quem iniciou a vinculação da agenda
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkState {
    pub sub: Uuid,
    pub exp: usize,
}

const LINK_STATE_TTL_MINUTES: i64 = 10;

/// Chaves compartilhadas pelo estado da aplicação
///
/// O `state` da vinculação usa uma chave própria derivada do segredo, de
/// modo que não serve como bearer token e vice-versa.
#[derive(Clone)]
pub struct AuthKeys {
    decoding: Arc<DecodingKey>,
    link_encoding: Arc<EncodingKey>,
    link_decoding: Arc<DecodingKey>,
}

impl AuthKeys {
    pub fn new(secret: &str) -> Self {
        let link_secret = format!("{}:calendar-link", secret);
        Self {
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            link_encoding: Arc::new(EncodingKey::from_secret(link_secret.as_bytes())),
            link_decoding: Arc::new(DecodingKey::from_secret(link_secret.as_bytes())),
        }
    }

    /// Emite o `state` de curta duração para a vinculação da agenda
    pub fn issue_link_state(&self, user_id: Uuid) -> Result<String, ApiError> {
        let claims = LinkState {
            sub: user_id,
            exp: (Utc::now() + Duration::minutes(LINK_STATE_TTL_MINUTES)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.link_encoding).map_err(|e| {
            error!(error = %e, "Falha ao assinar state de vinculação");
            ApiError::internal("Erro interno")
        })
    }

    pub fn verify_link_state(&self, state: &str) -> Result<LinkState, ApiError> {
        decode::<LinkState>(state, &self.link_decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "State de vinculação rejeitado");
                ApiError::bad_request("State de vinculação inválido ou expirado")
            })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token rejeitado");
                ApiError::unauthorized("Token inválido")
            })
    }
}

/// Chamador autenticado
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("Acesso restrito ao papel {}", role)))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Cabeçalho Authorization obrigatório"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Esperado token Bearer"))?;

        let claims = AuthKeys::from_ref(state).verify(token)?;
        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
        })
    }
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, user_id: Uuid, role: Role) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: user_id,
        role,
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_round_trip() {
        let keys = AuthKeys::new("segredo");
        let id = Uuid::new_v4();
        let claims = keys.verify(&issue_token("segredo", id, Role::Patient)).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Patient);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let keys = AuthKeys::new("segredo");
        let token = issue_token("outro", Uuid::new_v4(), Role::Doctor);
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn test_link_state_round_trip() {
        let keys = AuthKeys::new("segredo");
        let id = Uuid::new_v4();
        let state = keys.issue_link_state(id).unwrap();
        assert_eq!(keys.verify_link_state(&state).unwrap().sub, id);
        assert!(AuthKeys::new("outro").verify_link_state(&state).is_err());
    }

    #[test]
    fn test_link_state_and_bearer_token_are_not_interchangeable() {
        let keys = AuthKeys::new("segredo");
        let id = Uuid::new_v4();

        let state = keys.issue_link_state(id).unwrap();
        assert!(keys.verify(&state).is_err());

        let bearer = issue_token("segredo", id, Role::Patient);
        assert!(keys.verify_link_state(&bearer).is_err());
    }

    #[test]
    fn test_require_role() {
        let user = AuthUser { id: Uuid::new_v4(), role: Role::Doctor };
        assert!(user.require(Role::Doctor).is_ok());
        assert!(user.require(Role::Patient).is_err());
    }
}
