//! JWT authentication middleware.
//!
//! The identity collaborator issues HS256 tokens carrying the authenticated
//! user id (`sub`) and the active alumni profile id (`profile_id`). This
//! module validates the token and exposes the resolved pair to handlers via
//! request extensions as [`AuthContext`].

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use error_types::{error_codes, error_types as error_families, ErrorResponse};
use futures::future::LocalBoxFuture;
use jsonwebtoken::{decode, DecodingKey, Validation};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use thiserror::Error as ThisError;
use uuid::Uuid;

static DECODING_KEY: OnceCell<DecodingKey> = OnceCell::new();

/// Paths served without a token (health probes and the WebSocket upgrade,
/// which authenticates during its own handshake).
const PUBLIC_PATHS: &[&str] = &["/health", "/ws"];

#[derive(Debug, ThisError)]
pub enum JwtError {
    #[error("token missing")]
    Missing,
    #[error("token invalid")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("token claims malformed")]
    MalformedClaims,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id.
    sub: String,
    /// Active alumni profile id.
    profile_id: String,
    /// Expiry, unix seconds.
    exp: i64,
}

/// Verified identity pair resolved from the connection credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub profile_id: Uuid,
}

/// Install the shared HS256 validation key. Idempotent; later calls are
/// ignored so tests can initialize freely.
pub fn init_hs256(secret: &[u8]) {
    let _ = DECODING_KEY.set(DecodingKey::from_secret(secret));
}

/// Validate a token and resolve the `(user_id, profile_id)` pair.
pub fn verify_token(token: &str) -> Result<AuthContext, JwtError> {
    let key = DECODING_KEY.get().ok_or(JwtError::Invalid)?;

    let data = decode::<Claims>(token, key, &Validation::default()).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid,
        }
    })?;

    let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| JwtError::MalformedClaims)?;
    let profile_id =
        Uuid::parse_str(&data.claims.profile_id).map_err(|_| JwtError::MalformedClaims)?;

    Ok(AuthContext {
        user_id,
        profile_id,
    })
}

fn unauthorized_body(err: &JwtError) -> ErrorResponse {
    let code = match err {
        JwtError::Missing => error_codes::TOKEN_MISSING,
        JwtError::Expired => error_codes::TOKEN_EXPIRED,
        _ => error_codes::TOKEN_INVALID,
    };
    ErrorResponse::new(
        "Unauthorized",
        &err.to_string(),
        401,
        error_families::AUTHENTICATION_ERROR,
        code,
    )
}

/// Middleware enforcing bearer authentication on every non-public route.
#[derive(Clone, Default)]
pub struct JwtAuth;

impl JwtAuth {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthService { service }))
    }
}

pub struct JwtAuthService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for JwtAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if PUBLIC_PATHS.contains(&req.path()) {
            let fut = self.service.call(req);
            return Box::pin(async move { Ok(fut.await?.map_into_left_body()) });
        }

        let token = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string());

        let verified = match token {
            None => Err(JwtError::Missing),
            Some(t) => verify_token(&t),
        };

        match verified {
            Ok(ctx) => {
                req.extensions_mut().insert(ctx);
                let fut = self.service.call(req);
                Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
            }
            Err(err) => {
                let response = HttpResponse::Unauthorized().json(unauthorized_body(&err));
                Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn token_for(sub: &str, profile_id: &str, exp: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            profile_id: profile_id.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_round_trip() {
        init_hs256(SECRET);
        let user = Uuid::new_v4();
        let profile = Uuid::new_v4();
        let exp = chrono::Utc::now().timestamp() + 600;

        let token = token_for(&user.to_string(), &profile.to_string(), exp);
        let ctx = verify_token(&token).unwrap();

        assert_eq!(ctx.user_id, user);
        assert_eq!(ctx.profile_id, profile);
    }

    #[test]
    fn test_verify_rejects_expired() {
        init_hs256(SECRET);
        let token = token_for(
            &Uuid::new_v4().to_string(),
            &Uuid::new_v4().to_string(),
            chrono::Utc::now().timestamp() - 600,
        );

        assert!(matches!(verify_token(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_verify_rejects_malformed_claims() {
        init_hs256(SECRET);
        let token = token_for(
            "not-a-uuid",
            &Uuid::new_v4().to_string(),
            chrono::Utc::now().timestamp() + 600,
        );

        assert!(matches!(
            verify_token(&token),
            Err(JwtError::MalformedClaims)
        ));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        init_hs256(SECRET);
        assert!(matches!(
            verify_token("not.a.token"),
            Err(JwtError::Invalid)
        ));
    }
}
