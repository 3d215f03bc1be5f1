use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

/// The authenticated caller, inserted into request extensions. Entitlement
/// to the course is checked upstream before a token is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub is_admin: bool,
}

pub async fn require_learner(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&req, &state.jwt_secret) {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(rejection) => rejection,
    }
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&req, &state.jwt_secret) {
        Ok(principal) if principal.is_admin => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Ok(principal) => {
            tracing::warn!(subject = %principal.id, "non-admin hit an admin route");
            (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden"}))).into_response()
        }
        Err(rejection) => rejection,
    }
}

fn authenticate(req: &Request, secret: &str) -> Result<Principal, Response> {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return Err(unauthorized("missing_authorization"));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err(unauthorized("bad_authorization"));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(unauthorized("unsupported_scheme"));
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| unauthorized("invalid_token"))?;

    let id = Uuid::parse_str(&data.claims.sub).map_err(|_| unauthorized("invalid_subject"))?;
    let is_admin = data
        .claims
        .role
        .as_deref()
        .is_some_and(|r| r.eq_ignore_ascii_case(ADMIN_ROLE));
    Ok(Principal { id, is_admin })
}

fn unauthorized(code: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": code }))).into_response()
}
