//! OpenAPI document served at `/api`.

use utoipa::OpenApi;

use crate::handlers::{self, CollectionInfo, Collections, Conformance, LandingPage};
use crate::health::{self, HealthStatus};
use crate::links::Link;
use crate::problem::ProblemDetails;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "VEDA Features API",
        description = "OGC API Features over the VEDA PostGIS database"
    ),
    paths(
        handlers::landing,
        handlers::conformance,
        handlers::collections,
        handlers::collection,
        handlers::items,
        handlers::item,
        handlers::viewer,
        handlers::refresh,
        handlers::openapi,
        health::healthz,
    ),
    components(schemas(
        Link,
        LandingPage,
        Conformance,
        CollectionInfo,
        Collections,
        HealthStatus,
        ProblemDetails
    )),
    tags(
        (name = "features", description = "OGC API Features"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;
