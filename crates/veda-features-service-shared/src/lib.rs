//! OGC API Features service for the VEDA features API.
//!
//! Everything the HTTP runtime needs apart from process startup:
//!
//! - [`AppState`]: feature store, cached collection catalog and settings
//! - [`router`]: the OGC API Features routes plus `/healthz`, `/refresh`,
//!   `/api` and `/metrics`, wrapped in the middleware stack
//! - [`ProblemDetails`]: RFC 9457 error bodies
//! - [`metrics`], [`logging`], [`middleware`]: observability
//!
//! Handlers are thin: queries go through the
//! [`FeatureStore`](veda_features_lib::FeatureStore) held by the state, so
//! the whole router can be exercised against an in-memory store.
//!
//! # Testing Support
//!
//! The [`test_utils`] module provides an in-memory store and fixture
//! collections. Enable the `test-utils` feature to access it from dependent
//! crates.

#![deny(warnings)]

mod handlers;
mod health;
mod links;
pub mod logging;
pub mod metrics;
pub mod middleware;
mod openapi;
mod problem;
mod router;
mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use health::{healthz, HealthStatus};
pub use links::{base_url, Link};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{
    init_metrics, metrics_handler, record_catalog_refresh, record_collections_loaded,
    record_features_returned, MetricsConfig, MetricsError,
};
pub use middleware::{extract_or_generate_request_id, MetricsLayer, RequestId};
pub use openapi::ApiDoc;
pub use problem::{
    from_lib_error, ProblemDetails, PROBLEM_FEATURE_NOT_FOUND, PROBLEM_INTERNAL_ERROR,
    PROBLEM_INVALID_REQUEST, PROBLEM_SERVICE_UNAVAILABLE, PROBLEM_UNKNOWN_COLLECTION,
};
pub use router::router;
pub use state::{AppState, RefreshMode, RefreshTrigger};
