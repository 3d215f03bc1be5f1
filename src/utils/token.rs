use chrono::Duration;
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::middleware::auth::Claims;

/// Issues an HS256 bearer token for `subject`. Used by the identity provider
/// side and by tests; the engine itself only verifies.
pub fn issue_token(secret: &str, subject: Uuid, role: Option<&str>, ttl: Duration) -> Result<String> {
    let exp = (super::time::now() + ttl).timestamp();
    let claims = Claims {
        sub: subject.to_string(),
        exp: usize::try_from(exp)
            .map_err(|_| Error::Internal("token expiry before the epoch".to_string()))?,
        role: role.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("failed to sign token: {}", e)))
}
