//! Liveness probe that exercises the cipher end to end.
//!
//! The self-check runs the KDF twice, so its result is cached: at most one
//! check runs per `recheck_interval`, and concurrent requests during a recheck
//! wait for it and share the result.

use crate::credentials::SecretCipher;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Health response
#[derive(Serialize, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub encryption: bool,
    /// When the reported self-check ran
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct SelfCheck {
    passed: bool,
    at: Instant,
    checked_at: DateTime<Utc>,
}

impl SelfCheck {
    fn now(passed: bool) -> Self {
        Self {
            passed,
            at: Instant::now(),
            checked_at: Utc::now(),
        }
    }
}

/// Cached encryption self-check behind `/health`.
pub struct HealthCheck {
    cipher: Arc<SecretCipher>,
    recheck_interval: Duration,
    last: Mutex<Option<SelfCheck>>,
}

impl HealthCheck {
    pub fn new(cipher: Arc<SecretCipher>, recheck_interval: Duration) -> Self {
        Self {
            cipher,
            recheck_interval,
            last: Mutex::new(None),
        }
    }

    /// Seeds the cache with a check that already ran, e.g. at startup.
    pub fn with_initial(self, passed: bool) -> Self {
        Self {
            last: Mutex::new(Some(SelfCheck::now(passed))),
            ..self
        }
    }

    async fn status(&self) -> SelfCheck {
        let mut last = self.last.lock().await;
        if let Some(check) = *last {
            if check.at.elapsed() < self.recheck_interval {
                return check;
            }
        }

        let cipher = Arc::clone(&self.cipher);
        let passed = match self.cipher.run_blocking(move || cipher.test_encryption()).await {
            Ok(passed) => passed,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Encryption self-check did not run");
                false
            }
        };
        debug!(passed, "Encryption self-check refreshed");

        let check = SelfCheck::now(passed);
        *last = Some(check);
        check
    }
}

/// Create health router
pub fn create_health_router(health: HealthCheck) -> Router {
    Router::new()
        .route("/health", get(health_status))
        .with_state(Arc::new(health))
}

/// GET /health - 200 when the encryption self-check passes, 503 otherwise
async fn health_status(
    State(health): State<Arc<HealthCheck>>,
) -> (StatusCode, Json<HealthResponse>) {
    let check = health.status().await;

    if check.passed {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                encryption: true,
                checked_at: check.checked_at,
            }),
        )
    } else {
        warn!("Health check failed: encryption self-check");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                encryption: false,
                checked_at: check.checked_at,
            }),
        )
    }
}
