//! Actix middleware shared by the alumni platform services:
//! request ids, request logging, and JWT authentication.

mod jwt;
mod logging;
mod request_id;

pub use jwt::{init_hs256, verify_token, AuthContext, JwtAuth, JwtError};
pub use logging::Logging;
pub use request_id::{RequestId, RequestIdValue};
