use anyhow::{bail, Context, Result};
use credvault::api::{create_app, CredentialAppState, HealthCheck};
use credvault::config::{load_config, CONFIG_PATH_ENV, MASTER_KEY_ENV};
use credvault::credentials::{CredentialStore, MasterKey, SecretCipher};
use credvault::resolver::{CredentialResolver, FallbackPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credvault=info".into()),
        )
        .init();

    info!("credvault starting...");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "credvault.toml".to_string());
    let mut config = load_config(&config_path)?;
    config.apply_env_overrides();

    info!(
        config_path = %config_path,
        bind_addr = %config.server.bind_addr,
        database_path = %config.storage.database_path,
        strict_key_selection = config.resolver.strict_key_selection,
        max_concurrent_kdf = config.server.max_concurrent_kdf,
        "Configuration loaded"
    );

    // A bad master key must stop the process before anything is served
    let master_key = MasterKey::from_env(MASTER_KEY_ENV).with_context(|| {
        format!(
            "{} is required (base64-encoded 32-byte key)",
            MASTER_KEY_ENV
        )
    })?;
    let cipher = Arc::new(
        SecretCipher::new(master_key).with_max_concurrent_kdf(config.server.max_concurrent_kdf),
    );

    let probe = Arc::clone(&cipher);
    let self_check = cipher
        .run_blocking(move || probe.test_encryption())
        .await
        .context("Encryption self-check task failed")?;
    if !self_check {
        bail!("Encryption self-check failed");
    }
    info!("Encryption self-check passed");

    let store = Arc::new(
        CredentialStore::new(&config.storage.database_path, Arc::clone(&cipher))
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    for platform in config.defaults.missing_platforms() {
        warn!(
            platform = %platform,
            "No system default credential; requests without a user key will fail"
        );
    }

    let resolver = CredentialResolver::new(
        Arc::clone(&cipher),
        store.clone(),
        Arc::new(config.defaults.clone()),
    )
    .with_policy(FallbackPolicy::from_strict(
        config.resolver.strict_key_selection,
    ));

    let state = CredentialAppState { store, resolver };
    let health = HealthCheck::new(
        cipher,
        Duration::from_secs(config.server.health_recheck_secs),
    )
    .with_initial(self_check);
    let router = create_app(state, health, &config.server.allowed_origins);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("credvault stopped");

    Ok(())
}
