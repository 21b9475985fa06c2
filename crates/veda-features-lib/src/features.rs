//! Feature queries and the storage seam the API reads through.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::catalog::{Catalog, Collection};
use crate::error::{Error, Result};

/// Bounding box in WGS84 (`minx,miny,maxx,maxy`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BBox {
    pub fn intersects_point(&self, x: f64, y: f64) -> bool {
        x >= self.minx && x <= self.maxx && y >= self.miny && y <= self.maxy
    }
}

impl FromStr for BBox {
    type Err = Error;

    /// Accepts 4 values, or 6 values (3D) of which the vertical bounds are dropped.
    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::invalid_query("bbox", e.to_string()))?;

        let (minx, miny, maxx, maxy) = match values.as_slice() {
            [minx, miny, maxx, maxy] => (*minx, *miny, *maxx, *maxy),
            [minx, miny, _, maxx, maxy, _] => (*minx, *miny, *maxx, *maxy),
            _ => {
                return Err(Error::invalid_query(
                    "bbox",
                    "expected 4 or 6 comma separated numbers",
                ))
            }
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid_query("bbox", "values must be finite"));
        }
        if minx > maxx || miny > maxy {
            return Err(Error::invalid_query("bbox", "minimum exceeds maximum"));
        }
        Ok(Self {
            minx,
            miny,
            maxx,
            maxy,
        })
    }
}

/// Paging and filtering of an items request.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQuery {
    pub limit: u32,
    pub offset: u64,
    pub bbox: Option<BBox>,
}

impl ItemQuery {
    /// Build a query, applying the default limit and capping at the maximum.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidQuery`] when `limit` is zero or `bbox` does not parse.
    pub fn new(
        limit: Option<u32>,
        offset: Option<u64>,
        bbox: Option<&str>,
        default_limit: u32,
        max_limit: u32,
    ) -> Result<Self> {
        let limit = match limit {
            Some(0) => return Err(Error::invalid_query("limit", "must be a positive integer")),
            Some(limit) => limit.min(max_limit),
            None => default_limit,
        };
        let bbox = match bbox.map(str::trim).filter(|b| !b.is_empty()) {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        Ok(Self {
            limit,
            offset: offset.unwrap_or(0),
            bbox,
        })
    }
}

/// A GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub id: Value,
    pub geometry: Value,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(id: Value, geometry: Value, properties: Map<String, Value>) -> Self {
        Self {
            kind: "Feature",
            id,
            geometry,
            properties,
        }
    }

    /// Feature id as used in item URLs.
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// One page of an items request.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePage {
    pub features: Vec<Feature>,
    /// Features matching the filter, ignoring paging.
    pub number_matched: u64,
}

impl FeaturePage {
    pub fn number_returned(&self) -> usize {
        self.features.len()
    }
}

/// Read access to the spatial database.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Discover the collections in the given schemas.
    async fn load_catalog(&self, schemas: &[String]) -> Result<Catalog>;

    /// One page of features.
    async fn items(&self, collection: &Collection, query: &ItemQuery) -> Result<FeaturePage>;

    /// A single feature by id, `None` when absent.
    async fn item(&self, collection: &Collection, item_id: &str) -> Result<Option<Feature>>;

    /// Release connections.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bbox_parses_2d_and_3d() {
        let b: BBox = "-10,-5,10,5".parse().unwrap();
        assert_eq!((b.minx, b.maxy), (-10.0, 5.0));
        let b: BBox = "-10,-5,0,10,5,100".parse().unwrap();
        assert_eq!((b.minx, b.miny, b.maxx, b.maxy), (-10.0, -5.0, 10.0, 5.0));
        assert!(b.intersects_point(0.0, 0.0));
        assert!(!b.intersects_point(11.0, 0.0));
    }

    #[test]
    fn bbox_rejects_garbage() {
        assert!("1,2,3".parse::<BBox>().is_err());
        assert!("a,b,c,d".parse::<BBox>().is_err());
        assert!("10,0,-10,5".parse::<BBox>().is_err());
    }

    #[test]
    fn item_query_applies_limits() {
        let q = ItemQuery::new(None, None, None, 10, 100).unwrap();
        assert_eq!((q.limit, q.offset), (10, 0));
        let q = ItemQuery::new(Some(5000), Some(20), Some(""), 10, 100).unwrap();
        assert_eq!((q.limit, q.offset), (100, 20));
        assert!(q.bbox.is_none());
        let err = ItemQuery::new(Some(0), None, None, 10, 100).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery { ref parameter, .. } if parameter == "limit"));
    }

    #[test]
    fn feature_serializes_as_geojson() {
        let mut props = Map::new();
        props.insert("name".to_string(), json!("Chile"));
        let feature = Feature::new(json!(7), json!({"type": "Point", "coordinates": [0, 0]}), props);
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value["type"], "Feature");
        assert_eq!(value["id"], 7);
        assert_eq!(value["properties"]["name"], "Chile");
        assert_eq!(feature.id_string().as_deref(), Some("7"));
    }
}
