//! WebSocket handshake endpoint.
//!
//! Authentication happens here, before the upgrade completes: the credential
//! comes from the `token` query parameter (browsers cannot set headers on
//! WebSocket requests) or an `Authorization: Bearer` header. A connection
//! that cannot resolve a verified `(user_id, profile_id)` pair receives an
//! explicit structured auth-failure response and never reaches the session
//! actor.

use crate::state::AppState;
use crate::websocket::session::WsSession;
use actix_middleware::{verify_token, AuthContext, JwtError};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use error_types::{error_codes, error_types as error_families, ErrorResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

fn auth_failure(err: &JwtError) -> HttpResponse {
    let code = match err {
        JwtError::Missing => error_codes::TOKEN_MISSING,
        JwtError::Expired => error_codes::TOKEN_EXPIRED,
        _ => error_codes::TOKEN_INVALID,
    };
    HttpResponse::Unauthorized().json(ErrorResponse::new(
        "Unauthorized",
        &err.to_string(),
        401,
        error_families::AUTHENTICATION_ERROR,
        code,
    ))
}

fn resolve_auth(params: &WsParams, req: &HttpRequest) -> Result<AuthContext, JwtError> {
    let token = params.token.clone().or_else(|| {
        req.headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    });

    match token {
        None => Err(JwtError::Missing),
        Some(t) => verify_token(&t),
    }
}

/// GET /ws
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();

    let auth = match resolve_auth(&params, &req) {
        Ok(auth) => auth,
        Err(e) => {
            tracing::warn!(error = %e, "websocket connection rejected");
            return Ok(auth_failure(&e));
        }
    };

    let (connection_id, rx) = state.registry.register(auth.user_id).await;
    let session = WsSession::new(connection_id, auth, state.as_ref().clone(), rx);

    match ws::start(session, &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            // Upgrade failed; do not leave a dangling registry entry.
            let registry = state.registry.clone();
            actix::spawn(async move {
                registry.unregister(connection_id).await;
            });
            Err(e)
        }
    }
}
