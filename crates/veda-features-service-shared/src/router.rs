//! Route table and middleware stack.

use axum::{
    http::{HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
};

use veda_features_lib::ApiSettings;

use crate::handlers;
use crate::health::healthz;
use crate::metrics::metrics_handler;
use crate::middleware::{cache_control, refresh_stale_catalog, MetricsLayer};
use crate::state::AppState;

/// GET-only CORS. `*` allows any origin without credentials; otherwise only
/// the listed origins that parse as header values.
fn cors_layer(settings: &ApiSettings) -> CorsLayer {
    let origins = match settings.cors_origin_list() {
        None => AllowOrigin::from(Any),
        Some(list) => AllowOrigin::list(list.iter().filter_map(|origin| {
            let value = HeaderValue::from_str(origin).ok();
            if value.is_none() {
                tracing::warn!(origin = %origin, "ignoring unparsable CORS origin");
            }
            value
        })),
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers(Any)
}

/// Build the application router.
///
/// Every route is served under `root_path` when one is configured.
pub fn router(state: AppState) -> Router {
    let settings = state.settings().clone();

    let mut routes = Router::new()
        .route("/", get(handlers::landing))
        .route("/conformance", get(handlers::conformance))
        .route("/collections", get(handlers::collections))
        .route("/collections/{collection_id}", get(handlers::collection))
        .route("/collections/{collection_id}/items", get(handlers::items))
        .route(
            "/collections/{collection_id}/items/{item_id}",
            get(handlers::item),
        )
        .route("/api", get(handlers::openapi))
        .route("/refresh", get(handlers::refresh))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler));
    if settings.add_tiles_viewer {
        routes = routes.route("/collections/{collection_id}/viewer", get(handlers::viewer));
    }
    let routes = routes
        .layer(from_fn_with_state(state.clone(), refresh_stale_catalog))
        .with_state(state);

    let root = settings.normalized_root_path();
    let app = if root.is_empty() {
        routes
    } else {
        Router::new().nest(&root, routes)
    };

    let app = match HeaderValue::from_str(&settings.cachecontrol) {
        Ok(value) => app.layer(from_fn_with_state(value, cache_control)),
        Err(_) => {
            tracing::warn!(value = %settings.cachecontrol, "invalid cache-control setting ignored");
            app
        }
    };

    app.layer(
        ServiceBuilder::new()
            .layer(MetricsLayer)
            .layer(cors_layer(&settings))
            .layer(CompressionLayer::new()),
    )
}
