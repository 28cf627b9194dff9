//! Authentication module for Parley.
//!
//! JWT bearer tokens with in-memory revocation for logout.

use anyhow::Result;
use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Token ID, used for revocation
    pub jti: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

/// Authentication state shared across requests.
#[derive(Clone)]
pub struct AuthState {
    jwt_secret: Arc<String>,
    pub token_expiry_secs: u64,
    // Revoked token IDs; held until process restart, bounded by token expiry.
    revoked: Arc<RwLock<HashSet<String>>>,
}

impl AuthState {
    /// Create a new auth state with the given JWT secret.
    pub fn new(jwt_secret: impl Into<String>, token_expiry_secs: u64) -> Self {
        Self {
            jwt_secret: Arc::new(jwt_secret.into()),
            token_expiry_secs,
            revoked: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Generate a new JWT token for a user.
    pub fn generate_token(&self, user_id: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp() as usize;
        let exp = now + self.token_expiry_secs as usize;

        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp,
            iat: now,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Validate a JWT token and return the claims.
    ///
    /// Revoked tokens fail validation even before their expiry.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;

        let revoked = self
            .revoked
            .read()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        if revoked.contains(&token_data.claims.jti) {
            anyhow::bail!("Token has been revoked");
        }

        Ok(token_data.claims)
    }

    /// Revoke a token by its token ID (logout).
    pub fn revoke(&self, jti: &str) -> Result<()> {
        let mut revoked = self
            .revoked
            .write()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        revoked.insert(jti.to_string());
        Ok(())
    }
}

/// User info extracted from authentication.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub jti: String,
}

/// Authentication middleware.
pub async fn auth_middleware(
    auth_state: axum::extract::State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Extract token from Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let token = match auth_header.as_deref() {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    match auth_state.validate_token(token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthUser {
                user_id: claims.sub,
                jti: claims.jti,
            });
            Ok(next.run(request).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}
