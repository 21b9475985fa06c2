//! Absolute links in responses.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};
use utoipa::ToSchema;

use veda_features_lib::ApiSettings;

pub const MEDIA_JSON: &str = "application/json";
pub const MEDIA_GEOJSON: &str = "application/geo+json";
pub const MEDIA_HTML: &str = "text/html";
pub const MEDIA_OPENAPI: &str = "application/vnd.oai.openapi+json;version=3.0";

/// A link object as used throughout OGC API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Link {
    pub href: String,
    pub rel: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Link {
    pub fn new(href: impl Into<String>, rel: &str, media_type: &str) -> Self {
        Self {
            href: href.into(),
            rel: rel.to_string(),
            media_type: Some(media_type.to_string()),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim())
        .filter(|v| !v.is_empty())
}

/// Scheme, host and root path that links are built on, without a trailing
/// slash.
///
/// `custom_host` wins over the request headers; a custom host without a
/// scheme is served over https. Otherwise the forwarded headers set by API
/// Gateway are used, then `Host`.
pub fn base_url(headers: &HeaderMap, settings: &ApiSettings) -> String {
    let origin = match settings.custom_host.as_deref() {
        Some(host) if host.contains("://") => host.trim_end_matches('/').to_string(),
        Some(host) => format!("https://{}", host.trim_end_matches('/')),
        None => {
            let host = header(headers, "x-forwarded-host")
                .or_else(|| header(headers, "host"))
                .unwrap_or("localhost");
            let scheme = header(headers, "x-forwarded-proto").unwrap_or("http");
            format!("{}://{}", scheme, host)
        }
    };
    format!("{}{}", origin, settings.normalized_root_path())
}

/// `segment` percent-encoded as a single path segment.
pub fn path_segment(segment: &str) -> String {
    let Ok(mut url) = Url::parse("http://localhost/") else {
        return segment.to_string();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(segment);
    }
    url.path().trim_start_matches('/').to_string()
}

/// Link to one collection.
pub fn collection_href(base: &str, collection_id: &str) -> String {
    format!("{}/collections/{}", base, path_segment(collection_id))
}

/// Encode `pairs` as a query string, with a leading `?` when non-empty.
pub fn query_string<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, &value);
    }
    let encoded = serializer.finish();
    if encoded.is_empty() {
        encoded
    } else {
        format!("?{}", encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn custom_host_wins() {
        let settings = ApiSettings {
            custom_host: Some("dev-features.example.com/".to_string()),
            ..ApiSettings::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("abc.execute-api.amazonaws.com"));
        assert_eq!(base_url(&headers, &settings), "https://dev-features.example.com");
    }

    #[test]
    fn forwarded_headers_and_root_path() {
        let settings = ApiSettings {
            root_path: "/api/features/".to_string(),
            ..ApiSettings::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("internal:8000"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("example.org"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(base_url(&headers, &settings), "https://example.org/api/features");
    }

    #[test]
    fn falls_back_to_localhost() {
        assert_eq!(
            base_url(&HeaderMap::new(), &ApiSettings::default()),
            "http://localhost"
        );
    }

    #[test]
    fn query_string_encodes_values() {
        assert_eq!(query_string(Vec::new()), "");
        assert_eq!(
            query_string(vec![("limit", "10".to_string()), ("bbox", "-10,0,10,5".to_string())]),
            "?limit=10&bbox=-10%2C0%2C10%2C5"
        );
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        assert_eq!(path_segment("public.counties"), "public.counties");
        assert_eq!(path_segment("public.my table"), "public.my%20table");
        assert_eq!(path_segment("a/b?c#d"), "a%2Fb%3Fc%23d");
        assert_eq!(
            collection_href("http://localhost", "public.50% off"),
            "http://localhost/collections/public.50%25%20off"
        );
    }
}
