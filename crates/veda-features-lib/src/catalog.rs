//! Collection catalog: the spatial tables the API can serve.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A non-geometry column exposed as a feature property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// PostgreSQL type name as reported by `information_schema`.
    pub data_type: String,
}

/// One queryable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// `schema.table`
    pub id: String,
    pub schema: String,
    pub table: String,
    pub geometry_column: String,
    /// e.g. `POINT`, `MULTIPOLYGON`, `GEOMETRY`
    pub geometry_type: String,
    pub srid: i32,
    /// First primary key column, if the table has one.
    pub id_column: Option<String>,
    pub properties: Vec<Column>,
}

impl Collection {
    pub fn collection_id(schema: &str, table: &str) -> String {
        format!("{}.{}", schema, table)
    }

    pub fn title(&self) -> &str {
        &self.id
    }

    pub fn property(&self, name: &str) -> Option<&Column> {
        self.properties.iter().find(|c| c.name == name)
    }
}

/// Collections keyed by id, ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    collections: BTreeMap<String, Collection>,
}

impl Catalog {
    pub fn new(collections: impl IntoIterator<Item = Collection>) -> Self {
        Self {
            collections: collections.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    /// Look up a collection.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCollection`] when the id is not in the catalog.
    pub fn get(&self, id: &str) -> Result<&Collection> {
        self.collections
            .get(id)
            .ok_or_else(|| Error::UnknownCollection { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.collections.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countries() -> Collection {
        Collection {
            id: Collection::collection_id("public", "countries"),
            schema: "public".to_string(),
            table: "countries".to_string(),
            geometry_column: "geom".to_string(),
            geometry_type: "MULTIPOLYGON".to_string(),
            srid: 4326,
            id_column: Some("ogc_fid".to_string()),
            properties: vec![Column {
                name: "name".to_string(),
                data_type: "text".to_string(),
            }],
        }
    }

    #[test]
    fn lookup_by_id() {
        let catalog = Catalog::new([countries()]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("public.countries").unwrap().table, "countries");
        assert!(catalog.get("countries").is_err());
        assert!(catalog.get("public.countries").unwrap().property("name").is_some());
    }

    #[test]
    fn unknown_collection_error_names_id() {
        let err = Catalog::default().get("public.missing").unwrap_err();
        assert!(matches!(err, Error::UnknownCollection { ref id } if id == "public.missing"));
    }
}
