// HTTP API over the credential store and resolver

pub mod credentials;
pub mod error;
pub mod health;

pub use credentials::{create_credential_router, CredentialAppState};
pub use error::{AppError, CREDENTIAL_UNAVAILABLE};
pub use health::{create_health_router, HealthCheck};

use crate::auth::USER_ID_HEADER;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

/// Build the full application router.
pub fn create_app(
    state: CredentialAppState,
    health: HealthCheck,
    allowed_origins: &[String],
) -> Router {
    create_credential_router(state)
        .merge(create_health_router(health))
        .layer(cors_layer(allowed_origins))
}

/// CORS for the dashboard. An empty origin list allows any origin.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)])
}
