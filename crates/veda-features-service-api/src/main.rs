//! VEDA features API runtime.
//!
//! Serves OGC API Features over the PostGIS database, either behind API
//! Gateway on Lambda or as a plain HTTP server for local runs.
//!
//! # Configuration
//!
//! - `VEDA_FEATURES_*` - API settings (`POSTGIS_SECRET_ARN`, `ROOT_PATH`, `PORT`, ...)
//! - `POSTGRES_*` - direct connection settings when no secret is configured
//! - `RUST_LOG` - Log level (default: info)
//! - `LOG_FORMAT` - Log format: json (default) or text

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    veda_features_service_api::run().await
}
