//! Process wiring for the features API: settings, database connection and
//! the choice between the Lambda adapter and a local listener.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgConnectOptions;
use tracing::{error, info};

use veda_features_lib::{
    fetch_credentials, ApiSettings, FeatureStore, PgFeatureStore, PostgresSettings, SecretSource,
    SecretsManagerSource,
};
use veda_features_service_shared::{
    init_logging, init_metrics, router, AppState, LoggingConfig, MetricsConfig, RefreshMode,
};

/// Set by the Lambda runtime in every function environment.
const LAMBDA_RUNTIME_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

/// Whether the process runs inside a Lambda execution environment.
pub fn running_in_lambda() -> bool {
    std::env::var_os(LAMBDA_RUNTIME_ENV).is_some()
}

/// Catalog refresh mode: Lambda freezes the process once the response is
/// returned, so spawned refreshes would never finish there.
pub fn refresh_mode(in_lambda: bool) -> RefreshMode {
    if in_lambda {
        RefreshMode::Inline
    } else {
        RefreshMode::Background
    }
}

/// Connection options for the API database.
///
/// The credentials secret is used when `postgis_secret_arn` is set; local
/// runs fall back to the `POSTGRES_*` variables.
pub async fn database_options(
    settings: &ApiSettings,
    secrets: Option<&dyn SecretSource>,
) -> veda_features_lib::Result<PgConnectOptions> {
    match (settings.postgis_secret_arn.as_deref(), secrets) {
        (Some(secret_id), Some(source)) => {
            let credentials = fetch_credentials(source, secret_id).await?;
            credentials.connect_options(secret_id)
        }
        (Some(secret_id), None) => {
            let source = SecretsManagerSource::from_env().await;
            let credentials = fetch_credentials(&source, secret_id).await?;
            credentials.connect_options(secret_id)
        }
        (None, _) => PostgresSettings::from_env()?.connect_options(),
    }
}

/// Start the API and serve until shutdown.
pub async fn run() -> Result<(), lambda_http::Error> {
    let settings = ApiSettings::from_env().map_err(|e| {
        eprintln!("invalid API settings: {}", e);
        e
    })?;

    init_logging(
        &LoggingConfig::from_env()
            .with_service(settings.name.clone())
            .with_debug(settings.debug),
    );

    let metrics_config = MetricsConfig::from_env();
    if let Err(e) = init_metrics(&metrics_config) {
        tracing::warn!(error = %e, "failed to initialize metrics, continuing without metrics");
    }

    let options = database_options(&settings, None).await.map_err(|e| {
        error!(error = %e, "failed to resolve database connection");
        e
    })?;
    let store = Arc::new(PgFeatureStore::connect(options, settings.max_pool_connections).await?);

    let in_lambda = running_in_lambda();
    let state = AppState::load(store.clone(), settings.clone())
        .await
        .map_err(|e| {
            error!(error = %e, "failed to load collection catalog");
            e
        })?
        .with_refresh_mode(refresh_mode(in_lambda));
    info!(
        collections = state.catalog().await.len(),
        schemas = ?settings.schemas,
        root_path = %settings.normalized_root_path(),
        "application state loaded"
    );

    let app = router(state);

    let served = if in_lambda {
        info!("starting Lambda adapter");
        lambda_http::run(app).await
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
        info!(addr = %addr, "listening on");
        serve_local(addr, app).await
    };

    store.close().await;
    served
}

async fn serve_local(addr: SocketAddr, app: axum::Router) -> Result<(), lambda_http::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}
