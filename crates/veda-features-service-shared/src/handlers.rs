//! OGC API Features handlers.
//!
//! Handlers resolve the collection from the cached catalog, delegate queries
//! to the feature store and decorate results with absolute links.

use std::fmt::Display;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use veda_features_lib::{Collection, Error as LibError, Feature, ItemQuery, Result as LibResult};

use crate::links::{
    base_url, collection_href, path_segment, query_string, Link, MEDIA_GEOJSON, MEDIA_HTML,
    MEDIA_JSON, MEDIA_OPENAPI,
};
use crate::metrics::record_features_returned;
use crate::middleware::RequestId;
use crate::openapi::ApiDoc;
use crate::problem::{from_lib_error, ProblemDetails};
use crate::state::{AppState, RefreshTrigger};

/// Conformance classes implemented by this service.
pub const CONFORMANCE_CLASSES: [&str; 3] = [
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/oas30",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/geojson",
];

const CRS84: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";

type HandlerResult = Result<Response, ProblemDetails>;

fn geojson(body: impl Serialize) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(MEDIA_GEOJSON))],
        Json(body),
    )
        .into_response()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LandingPage {
    pub title: String,
    pub description: String,
    pub links: Vec<Link>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Conformance {
    #[serde(rename = "conformsTo")]
    pub conforms_to: Vec<String>,
}

/// Collection metadata.
#[derive(Debug, Serialize, ToSchema)]
pub struct CollectionInfo {
    pub id: String,
    pub title: String,
    #[serde(rename = "itemType")]
    pub item_type: String,
    #[serde(rename = "geometryType")]
    pub geometry_type: String,
    pub crs: Vec<String>,
    pub links: Vec<Link>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Collections {
    pub collections: Vec<CollectionInfo>,
    pub links: Vec<Link>,
}

#[derive(Debug, Serialize)]
struct FeatureCollectionBody {
    #[serde(rename = "type")]
    kind: &'static str,
    id: String,
    title: String,
    features: Vec<Feature>,
    links: Vec<Link>,
    #[serde(rename = "numberMatched")]
    number_matched: u64,
    #[serde(rename = "numberReturned")]
    number_returned: usize,
}

#[derive(Debug, Serialize)]
struct FeatureBody {
    #[serde(flatten)]
    feature: Feature,
    links: Vec<Link>,
}

/// Result of `GET /refresh`.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed_at: String,
    pub count: usize,
    pub collections: Vec<Collection>,
}

/// Raw items query parameters; parsed by hand so errors become problems.
#[derive(Debug, Default, Deserialize)]
pub struct ItemsParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub bbox: Option<String>,
}

fn parse_param<T>(name: &str, value: Option<&str>) -> LibResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| LibError::invalid_query(name, format!("{} ({:?})", e, raw))),
        None => Ok(None),
    }
}

impl ItemsParams {
    fn to_query(&self, default_limit: u32, max_limit: u32) -> LibResult<ItemQuery> {
        ItemQuery::new(
            parse_param("limit", self.limit.as_deref())?,
            parse_param("offset", self.offset.as_deref())?,
            self.bbox.as_deref(),
            default_limit,
            max_limit,
        )
    }
}

fn collection_info(collection: &Collection, base: &str, viewer: bool) -> CollectionInfo {
    let href = collection_href(base, &collection.id);
    let mut links = vec![
        Link::new(href.clone(), "self", MEDIA_JSON),
        Link::new(format!("{}/items", href), "items", MEDIA_GEOJSON).with_title("Items"),
        Link::new(format!("{}/", base), "root", MEDIA_JSON),
    ];
    if viewer {
        links.push(
            Link::new(format!("{}/viewer", href), "alternate", MEDIA_HTML).with_title("Map viewer"),
        );
    }
    CollectionInfo {
        id: collection.id.clone(),
        title: collection.title().to_string(),
        item_type: "feature".to_string(),
        geometry_type: collection.geometry_type.clone(),
        crs: vec![CRS84.to_string()],
        links,
    }
}

fn items_links(
    base: &str,
    collection_id: &str,
    query: &ItemQuery,
    returned: usize,
    matched: u64,
) -> Vec<Link> {
    let href = format!("{}/items", collection_href(base, collection_id));
    let page = |offset: u64| {
        let mut pairs = vec![
            ("limit", query.limit.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(bbox) = &query.bbox {
            pairs.push((
                "bbox",
                format!("{},{},{},{}", bbox.minx, bbox.miny, bbox.maxx, bbox.maxy),
            ));
        }
        format!("{}{}", href, query_string(pairs))
    };

    let mut links = vec![
        Link::new(page(query.offset), "self", MEDIA_GEOJSON),
        Link::new(collection_href(base, collection_id), "collection", MEDIA_JSON),
    ];
    if query.offset + (returned as u64) < matched {
        links.push(Link::new(page(query.offset + returned as u64), "next", MEDIA_GEOJSON));
    }
    if query.offset > 0 {
        links.push(Link::new(
            page(query.offset.saturating_sub(u64::from(query.limit))),
            "prev",
            MEDIA_GEOJSON,
        ));
    }
    links
}

/// Landing page.
#[utoipa::path(
    get,
    path = "/",
    tag = "features",
    responses((status = 200, description = "Landing page", body = LandingPage))
)]
pub async fn landing(State(state): State<AppState>, headers: HeaderMap) -> Json<LandingPage> {
    let base = base_url(&headers, state.settings());
    Json(LandingPage {
        title: state.settings().name.clone(),
        description: "OGC API Features over the VEDA PostGIS database".to_string(),
        links: vec![
            Link::new(format!("{}/", base), "self", MEDIA_JSON).with_title("Landing page"),
            Link::new(format!("{}/api", base), "service-desc", MEDIA_OPENAPI)
                .with_title("OpenAPI definition"),
            Link::new(format!("{}/conformance", base), "conformance", MEDIA_JSON)
                .with_title("Conformance classes"),
            Link::new(format!("{}/collections", base), "data", MEDIA_JSON)
                .with_title("Collections"),
        ],
    })
}

#[utoipa::path(
    get,
    path = "/conformance",
    tag = "features",
    responses((status = 200, description = "Implemented conformance classes", body = Conformance))
)]
pub async fn conformance() -> Json<Conformance> {
    Json(Conformance {
        conforms_to: CONFORMANCE_CLASSES.iter().map(|c| c.to_string()).collect(),
    })
}

#[utoipa::path(
    get,
    path = "/collections",
    tag = "features",
    responses((status = 200, description = "Collections in the catalog", body = Collections))
)]
pub async fn collections(State(state): State<AppState>, headers: HeaderMap) -> Json<Collections> {
    let base = base_url(&headers, state.settings());
    let viewer = state.settings().add_tiles_viewer;
    let catalog = state.catalog().await;
    Json(Collections {
        collections: catalog
            .iter()
            .map(|collection| collection_info(collection, &base, viewer))
            .collect(),
        links: vec![
            Link::new(format!("{}/collections", base), "self", MEDIA_JSON),
            Link::new(format!("{}/", base), "root", MEDIA_JSON),
        ],
    })
}

#[utoipa::path(
    get,
    path = "/collections/{collectionId}",
    tag = "features",
    params(("collectionId" = String, Path, description = "Collection id (`schema.table`)")),
    responses(
        (status = 200, description = "Collection metadata", body = CollectionInfo),
        (status = 404, description = "Unknown collection", body = ProblemDetails),
    )
)]
pub async fn collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    headers: HeaderMap,
    request_id: RequestId,
) -> HandlerResult {
    let collection = state
        .collection(&collection_id)
        .await
        .map_err(|e| from_lib_error(&e, request_id.as_str()))?;
    let base = base_url(&headers, state.settings());
    Ok(Json(collection_info(&collection, &base, state.settings().add_tiles_viewer)).into_response())
}

#[utoipa::path(
    get,
    path = "/collections/{collectionId}/items",
    tag = "features",
    params(
        ("collectionId" = String, Path, description = "Collection id (`schema.table`)"),
        ("limit" = Option<u32>, Query, description = "Page size, capped at the configured maximum"),
        ("offset" = Option<u64>, Query, description = "Features to skip"),
        ("bbox" = Option<String>, Query, description = "minx,miny,maxx,maxy in CRS84"),
    ),
    responses(
        (status = 200, description = "GeoJSON FeatureCollection"),
        (status = 400, description = "Invalid query parameter", body = ProblemDetails),
        (status = 404, description = "Unknown collection", body = ProblemDetails),
    )
)]
pub async fn items(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    Query(params): Query<ItemsParams>,
    headers: HeaderMap,
    request_id: RequestId,
) -> HandlerResult {
    let problem = |e: LibError| from_lib_error(&e, request_id.as_str());
    let collection = state.collection(&collection_id).await.map_err(problem)?;
    let settings = state.settings();
    let query = params
        .to_query(settings.default_limit, settings.max_limit)
        .map_err(problem)?;

    let page = state.store().items(&collection, &query).await.map_err(problem)?;
    let returned = page.number_returned();
    record_features_returned(returned);
    tracing::debug!(
        collection = %collection.id,
        limit = query.limit,
        offset = query.offset,
        returned,
        matched = page.number_matched,
        "items query"
    );

    let base = base_url(&headers, settings);
    Ok(geojson(FeatureCollectionBody {
        kind: "FeatureCollection",
        id: collection.id.clone(),
        title: collection.title().to_string(),
        links: items_links(&base, &collection.id, &query, returned, page.number_matched),
        number_matched: page.number_matched,
        number_returned: returned,
        features: page.features,
    }))
}

#[utoipa::path(
    get,
    path = "/collections/{collectionId}/items/{featureId}",
    tag = "features",
    params(
        ("collectionId" = String, Path, description = "Collection id (`schema.table`)"),
        ("featureId" = String, Path, description = "Value of the table's primary key"),
    ),
    responses(
        (status = 200, description = "GeoJSON Feature"),
        (status = 404, description = "Unknown collection or feature", body = ProblemDetails),
    )
)]
pub async fn item(
    State(state): State<AppState>,
    Path((collection_id, item_id)): Path<(String, String)>,
    headers: HeaderMap,
    request_id: RequestId,
) -> HandlerResult {
    let problem = |e: LibError| from_lib_error(&e, request_id.as_str());
    let collection = state.collection(&collection_id).await.map_err(problem)?;
    let feature = state
        .store()
        .item(&collection, &item_id)
        .await
        .map_err(problem)?
        .ok_or_else(|| {
            problem(LibError::UnknownFeature {
                collection_id: collection.id.clone(),
                item_id: item_id.clone(),
            })
        })?;

    let base = base_url(&headers, state.settings());
    let collection_link = collection_href(&base, &collection.id);
    let self_href = format!(
        "{}/items/{}",
        collection_link,
        path_segment(feature.id_string().as_deref().unwrap_or(&item_id))
    );
    Ok(geojson(FeatureBody {
        feature,
        links: vec![
            Link::new(self_href, "self", MEDIA_GEOJSON),
            Link::new(collection_link, "collection", MEDIA_JSON),
        ],
    }))
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Leaflet page drawing one page of items.
pub fn viewer_page(title: &str, items_url: &str) -> String {
    // a JSON string is a valid JS literal once `<` cannot close the script tag
    let url_literal = serde_json::to_string(items_url)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c");
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
  <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
  <style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
  <div id="map"></div>
  <script>
    const map = L.map("map").setView([0, 0], 2);
    L.tileLayer("https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png", {{
      attribution: "&copy; OpenStreetMap contributors"
    }}).addTo(map);
    fetch({url_literal})
      .then((response) => response.json())
      .then((data) => {{
        const layer = L.geoJSON(data, {{
          onEachFeature: (feature, l) => l.bindPopup(
            "<pre>" + JSON.stringify(feature.properties, null, 2) + "</pre>")
        }}).addTo(map);
        if (layer.getBounds().isValid()) map.fitBounds(layer.getBounds());
      }});
  </script>
</body>
</html>
"#,
        title = escape_html(title),
        url_literal = url_literal,
    )
}

#[utoipa::path(
    get,
    path = "/collections/{collectionId}/viewer",
    tag = "features",
    params(("collectionId" = String, Path, description = "Collection id (`schema.table`)")),
    responses(
        (status = 200, description = "HTML map viewer"),
        (status = 404, description = "Unknown collection", body = ProblemDetails),
    )
)]
pub async fn viewer(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    headers: HeaderMap,
    request_id: RequestId,
) -> HandlerResult {
    let collection = state
        .collection(&collection_id)
        .await
        .map_err(|e| from_lib_error(&e, request_id.as_str()))?;
    let base = base_url(&headers, state.settings());
    let items_url = format!(
        "{}/items{}",
        collection_href(&base, &collection.id),
        query_string([("limit", state.settings().default_limit.to_string())])
    );
    Ok(Html(viewer_page(collection.title(), &items_url)).into_response())
}

#[utoipa::path(
    get,
    path = "/refresh",
    tag = "features",
    responses(
        (status = 200, description = "Catalog reloaded from the database"),
        (status = 503, description = "Database unavailable", body = ProblemDetails),
    )
)]
pub async fn refresh(State(state): State<AppState>, request_id: RequestId) -> HandlerResult {
    let catalog = state
        .refresh(RefreshTrigger::Manual)
        .await
        .map_err(|e| from_lib_error(&e, request_id.as_str()))?;
    Ok(Json(RefreshResponse {
        refreshed_at: chrono::Utc::now().to_rfc3339(),
        count: catalog.len(),
        collections: catalog.iter().cloned().collect(),
    })
    .into_response())
}

#[utoipa::path(
    get,
    path = "/api",
    tag = "features",
    responses((status = 200, description = "OpenAPI definition"))
)]
pub async fn openapi(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![utoipa::openapi::server::Server::new(base_url(
        &headers,
        state.settings(),
    ))]);
    Json(doc).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use veda_features_lib::BBox;

    fn query(limit: u32, offset: u64, bbox: Option<BBox>) -> ItemQuery {
        ItemQuery { limit, offset, bbox }
    }

    fn rels(links: &[Link]) -> Vec<&str> {
        links.iter().map(|l| l.rel.as_str()).collect()
    }

    #[test]
    fn first_page_has_next_only() {
        let links = items_links("http://h", "public.c", &query(2, 0, None), 2, 5);
        assert_eq!(rels(&links), ["self", "collection", "next"]);
        assert_eq!(links[2].href, "http://h/collections/public.c/items?limit=2&offset=2");
    }

    #[test]
    fn middle_page_has_both() {
        let links = items_links("http://h", "public.c", &query(2, 2, None), 2, 5);
        assert_eq!(rels(&links), ["self", "collection", "next", "prev"]);
        assert!(links[3].href.ends_with("offset=0"));
    }

    #[test]
    fn last_page_has_prev_only() {
        let links = items_links("http://h", "public.c", &query(2, 4, None), 1, 5);
        assert_eq!(rels(&links), ["self", "collection", "prev"]);
    }

    #[test]
    fn links_keep_bbox() {
        let bbox: BBox = "-10,-5,10,5".parse().unwrap();
        let links = items_links("http://h", "public.c", &query(1, 0, Some(bbox)), 1, 2);
        assert!(links[2].href.contains("bbox=-10%2C-5%2C10%2C5"));
    }

    #[test]
    fn params_reject_non_numeric_limit() {
        let params = ItemsParams {
            limit: Some("ten".to_string()),
            ..ItemsParams::default()
        };
        let err = params.to_query(10, 100).unwrap_err();
        assert!(matches!(err, LibError::InvalidQuery { ref parameter, .. } if parameter == "limit"));
    }

    #[test]
    fn viewer_escapes_title_and_url() {
        let page = viewer_page("<b>x</b>", "http://h/collections/a</script>/items");
        assert!(page.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(!page.contains("a</script>"));
    }
}
