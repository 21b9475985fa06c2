//! Test utilities for service handler testing.
//!
//! [`MemoryStore`] is a [`FeatureStore`] over in-memory point features. Its
//! catalog can be changed after the state is built, which is how tests
//! simulate tables appearing in the database between refreshes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use veda_features_lib::{
    ApiSettings, Catalog, Collection, Column, Error as LibError, Feature, FeaturePage,
    FeatureStore, ItemQuery, Result as LibResult,
};

use crate::state::AppState;

/// A point collection with a `name` property and an integer id column.
pub fn collection(schema: &str, table: &str) -> Collection {
    Collection {
        id: Collection::collection_id(schema, table),
        schema: schema.to_string(),
        table: table.to_string(),
        geometry_column: "geom".to_string(),
        geometry_type: "POINT".to_string(),
        srid: 4326,
        id_column: Some("id".to_string()),
        properties: vec![
            Column {
                name: "id".to_string(),
                data_type: "integer".to_string(),
            },
            Column {
                name: "name".to_string(),
                data_type: "text".to_string(),
            },
        ],
    }
}

/// A point feature with a `name` property.
pub fn point(id: i64, x: f64, y: f64, name: &str) -> Feature {
    let mut properties = Map::new();
    properties.insert("id".to_string(), json!(id));
    properties.insert("name".to_string(), json!(name));
    Feature::new(
        json!(id),
        json!({"type": "Point", "coordinates": [x, y]}),
        properties,
    )
}

fn point_coordinates(feature: &Feature) -> Option<(f64, f64)> {
    let coordinates = feature.geometry.get("coordinates")?.as_array()?;
    Some((coordinates.first()?.as_f64()?, coordinates.get(1)?.as_f64()?))
}

#[derive(Debug, Default)]
struct MemoryData {
    collections: BTreeMap<String, Collection>,
    features: BTreeMap<String, Vec<Feature>>,
    closed: bool,
    fail_catalog: bool,
}

/// [`FeatureStore`] backed by in-memory collections.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

impl MemoryStore {
    pub fn with_collection(self, collection: Collection) -> Self {
        self.add_collection(collection);
        self
    }

    pub fn with_features(self, collection_id: &str, features: Vec<Feature>) -> Self {
        self.data
            .lock()
            .unwrap()
            .features
            .insert(collection_id.to_string(), features);
        self
    }

    /// Make a table visible to the next catalog load.
    pub fn add_collection(&self, collection: Collection) {
        self.data
            .lock()
            .unwrap()
            .collections
            .insert(collection.id.clone(), collection);
    }

    /// Make the next catalog loads fail.
    pub fn fail_catalog_loads(&self) {
        self.data.lock().unwrap().fail_catalog = true;
    }

    pub fn is_closed(&self) -> bool {
        self.data.lock().unwrap().closed
    }
}

#[async_trait]
impl FeatureStore for MemoryStore {
    async fn load_catalog(&self, schemas: &[String]) -> LibResult<Catalog> {
        let data = self.data.lock().unwrap();
        if data.fail_catalog {
            return Err(LibError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "database unavailable",
            )));
        }
        Ok(Catalog::new(
            data.collections
                .values()
                .filter(|c| schemas.contains(&c.schema))
                .cloned(),
        ))
    }

    async fn items(&self, collection: &Collection, query: &ItemQuery) -> LibResult<FeaturePage> {
        let data = self.data.lock().unwrap();
        let matching: Vec<&Feature> = data
            .features
            .get(&collection.id)
            .map(|features| {
                features
                    .iter()
                    .filter(|f| match (&query.bbox, point_coordinates(f)) {
                        (Some(bbox), Some((x, y))) => bbox.intersects_point(x, y),
                        (Some(_), None) => false,
                        (None, _) => true,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(FeaturePage {
            number_matched: matching.len() as u64,
            features: matching
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn item(&self, collection: &Collection, item_id: &str) -> LibResult<Option<Feature>> {
        if collection.id_column.is_none() {
            return Ok(None);
        }
        let data = self.data.lock().unwrap();
        Ok(data.features.get(&collection.id).and_then(|features| {
            features
                .iter()
                .find(|f| f.id_string().as_deref() == Some(item_id))
                .cloned()
        }))
    }

    async fn close(&self) {
        self.data.lock().unwrap().closed = true;
    }
}

/// A store with `public.counties` (three points) and `public.rivers` (no
/// features).
pub fn sample_store() -> MemoryStore {
    MemoryStore::default()
        .with_collection(collection("public", "counties"))
        .with_collection(collection("public", "rivers"))
        .with_features(
            "public.counties",
            vec![
                point(1, -77.0, 38.9, "Washington"),
                point(2, -122.4, 37.8, "San Francisco"),
                point(3, -95.4, 29.8, "Houston"),
            ],
        )
}

/// State over [`sample_store`] with the given settings.
pub async fn test_state_with(store: MemoryStore, settings: ApiSettings) -> AppState {
    AppState::load(Arc::new(store), settings)
        .await
        .unwrap_or_else(|e| panic!("failed to load test catalog: {}", e))
}

/// State over [`sample_store`] with default settings.
pub async fn test_state() -> AppState {
    test_state_with(sample_store(), ApiSettings::default()).await
}

/// The `properties` of a GeoJSON feature value.
pub fn properties(feature: &Value) -> &Map<String, Value> {
    feature["properties"]
        .as_object()
        .unwrap_or_else(|| panic!("feature without properties: {}", feature))
}
