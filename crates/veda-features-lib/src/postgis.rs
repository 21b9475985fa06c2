//! [`FeatureStore`] backed by PostGIS through a sqlx pool.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;

use crate::catalog::{Catalog, Collection, Column};
use crate::error::Result;
use crate::features::{BBox, Feature, FeaturePage, FeatureStore, ItemQuery};
use crate::sql::{qualified, quote_ident, quote_literal};

const WGS84: i32 = 4326;

const GEOMETRY_COLUMNS_SQL: &str = "\
SELECT f_table_schema::text, f_table_name::text, f_geometry_column::text, type::text, srid \
FROM geometry_columns \
WHERE f_table_schema = ANY($1) \
ORDER BY f_table_schema, f_table_name, f_geometry_column";

const COLUMNS_SQL: &str = "\
SELECT table_schema::text, table_name::text, column_name::text, data_type::text \
FROM information_schema.columns \
WHERE table_schema = ANY($1) \
ORDER BY table_schema, table_name, ordinal_position";

const PRIMARY_KEYS_SQL: &str = "\
SELECT kcu.table_schema::text, kcu.table_name::text, kcu.column_name::text \
FROM information_schema.table_constraints tc \
JOIN information_schema.key_column_usage kcu \
  ON tc.constraint_name = kcu.constraint_name \
 AND tc.table_schema = kcu.table_schema \
 AND tc.table_name = kcu.table_name \
WHERE tc.constraint_type = 'PRIMARY KEY' \
  AND tc.table_schema = ANY($1) \
ORDER BY kcu.table_schema, kcu.table_name, kcu.ordinal_position";

/// PostGIS store.
#[derive(Debug, Clone)]
pub struct PgFeatureStore {
    pool: PgPool,
}

impl PgFeatureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with at most `max_connections` connections.
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type TableKey = (String, String);

/// Combine catalog query results into collections.
///
/// Tables with several geometry columns are served through the first one;
/// geometry columns never appear as properties. Only a single-column primary
/// key becomes the id column; tables with a composite key have none.
pub fn build_catalog(
    geometries: Vec<(String, String, String, String, i32)>,
    columns: Vec<(String, String, String, String)>,
    primary_keys: Vec<(String, String, String)>,
) -> Catalog {
    let mut by_table: BTreeMap<TableKey, Vec<Column>> = BTreeMap::new();
    for (schema, table, name, data_type) in columns {
        by_table
            .entry((schema, table))
            .or_default()
            .push(Column { name, data_type });
    }
    let mut key_columns: BTreeMap<TableKey, Vec<String>> = BTreeMap::new();
    for (schema, table, column) in primary_keys {
        key_columns.entry((schema, table)).or_default().push(column);
    }
    let keys: BTreeMap<TableKey, String> = key_columns
        .into_iter()
        .filter_map(|(table, mut columns)| match columns.len() {
            1 => columns.pop().map(|column| (table, column)),
            _ => None,
        })
        .collect();

    let mut geometry_columns: BTreeMap<TableKey, Vec<String>> = BTreeMap::new();
    for (schema, table, column, _, _) in &geometries {
        geometry_columns
            .entry((schema.clone(), table.clone()))
            .or_default()
            .push(column.clone());
    }

    let mut collections: BTreeMap<String, Collection> = BTreeMap::new();
    for (schema, table, column, geometry_type, srid) in geometries {
        let id = Collection::collection_id(&schema, &table);
        if collections.contains_key(&id) {
            continue;
        }
        let key = (schema.clone(), table.clone());
        let skip = geometry_columns.get(&key).cloned().unwrap_or_default();
        let properties = by_table
            .get(&key)
            .map(|cols| {
                cols.iter()
                    .filter(|c| !skip.contains(&c.name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        collections.insert(
            id.clone(),
            Collection {
                id,
                id_column: keys.get(&key).cloned(),
                schema,
                table,
                geometry_column: column,
                geometry_type,
                srid,
                properties,
            },
        );
    }
    Catalog::new(collections.into_values())
}

/// Geometry expression reprojected to WGS84 where the SRID is known.
fn geometry_expr(collection: &Collection) -> String {
    let column = format!("t.{}", quote_ident(&collection.geometry_column));
    if collection.srid > 0 && collection.srid != WGS84 {
        format!("ST_Transform({}, {})", column, WGS84)
    } else {
        column
    }
}

/// Spatial filter with the envelope in placeholders `$1..$4`.
fn bbox_filter(collection: &Collection) -> String {
    let envelope = format!("ST_MakeEnvelope($1, $2, $3, $4, {})", WGS84);
    let envelope = match collection.srid {
        WGS84 => envelope,
        0 => format!("ST_SetSRID({}, 0)", envelope),
        srid => format!("ST_Transform({}, {})", envelope, srid),
    };
    format!(
        "ST_Intersects(t.{}, {})",
        quote_ident(&collection.geometry_column),
        envelope
    )
}

/// Statements for one items request: `(count, page)`.
///
/// With a bbox the envelope binds to `$1..$4`; limit and offset follow.
pub fn items_sql(collection: &Collection, with_bbox: bool) -> (String, String) {
    let table = qualified(&collection.schema, &collection.table);
    let filter = if with_bbox {
        format!(" WHERE {}", bbox_filter(collection))
    } else {
        String::new()
    };
    let (limit_arg, offset_arg) = if with_bbox { (5, 6) } else { (1, 2) };
    let order = match &collection.id_column {
        Some(column) => format!("t.{}", quote_ident(column)),
        None => "t.ctid".to_string(),
    };

    let count = format!("SELECT count(*) AS matched FROM {} t{}", table, filter);
    let page = format!(
        "SELECT to_jsonb(t) - {} AS properties, ST_AsGeoJSON({})::jsonb AS geometry \
         FROM {} t{} ORDER BY {} LIMIT ${} OFFSET ${}",
        quote_literal(&collection.geometry_column),
        geometry_expr(collection),
        table,
        filter,
        order,
        limit_arg,
        offset_arg
    );
    (count, page)
}

/// Statement for a single item; the id text binds to `$1`.
pub fn item_sql(collection: &Collection, id_column: &str) -> String {
    format!(
        "SELECT to_jsonb(t) - {} AS properties, ST_AsGeoJSON({})::jsonb AS geometry \
         FROM {} t WHERE t.{}::text = $1 LIMIT 1",
        quote_literal(&collection.geometry_column),
        geometry_expr(collection),
        qualified(&collection.schema, &collection.table),
        quote_ident(id_column)
    )
}

fn into_feature(collection: &Collection, properties: Value, geometry: Option<Value>) -> Feature {
    let mut properties = match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    // other geometry columns come back as hex WKB
    for column in properties.keys().cloned().collect::<Vec<_>>() {
        if collection.property(&column).is_none()
            && collection.id_column.as_deref() != Some(column.as_str())
        {
            properties.remove(&column);
        }
    }
    let id = collection
        .id_column
        .as_ref()
        .and_then(|column| properties.get(column).cloned())
        .unwrap_or(Value::Null);
    Feature::new(id, geometry.unwrap_or(Value::Null), properties)
}

fn bind_bbox<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    bbox: &BBox,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query.bind(bbox.minx).bind(bbox.miny).bind(bbox.maxx).bind(bbox.maxy)
}

#[async_trait]
impl FeatureStore for PgFeatureStore {
    async fn load_catalog(&self, schemas: &[String]) -> Result<Catalog> {
        let geometries: Vec<(String, String, String, String, i32)> =
            sqlx::query_as(GEOMETRY_COLUMNS_SQL)
                .bind(schemas)
                .fetch_all(&self.pool)
                .await?;
        let columns: Vec<(String, String, String, String)> = sqlx::query_as(COLUMNS_SQL)
            .bind(schemas)
            .fetch_all(&self.pool)
            .await?;
        let keys: Vec<(String, String, String)> = sqlx::query_as(PRIMARY_KEYS_SQL)
            .bind(schemas)
            .fetch_all(&self.pool)
            .await?;

        let catalog = build_catalog(geometries, columns, keys);
        tracing::info!(collections = catalog.len(), schemas = ?schemas, "catalog loaded");
        Ok(catalog)
    }

    async fn items(&self, collection: &Collection, query: &ItemQuery) -> Result<FeaturePage> {
        let (count_sql, page_sql) = items_sql(collection, query.bbox.is_some());

        let mut count = sqlx::query(&count_sql);
        let mut page = sqlx::query(&page_sql);
        if let Some(bbox) = &query.bbox {
            count = bind_bbox(count, bbox);
            page = bind_bbox(page, bbox);
        }
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);
        page = page.bind(i64::from(query.limit)).bind(offset);

        let matched: i64 = count.fetch_one(&self.pool).await?.try_get("matched")?;
        let rows = page.fetch_all(&self.pool).await?;

        let features = rows
            .into_iter()
            .map(|row| {
                let properties: Value = row.try_get("properties")?;
                let geometry: Option<Value> = row.try_get("geometry")?;
                Ok(into_feature(collection, properties, geometry))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FeaturePage {
            features,
            number_matched: u64::try_from(matched).unwrap_or(0),
        })
    }

    async fn item(&self, collection: &Collection, item_id: &str) -> Result<Option<Feature>> {
        let Some(id_column) = &collection.id_column else {
            return Ok(None);
        };
        let row = sqlx::query(&item_sql(collection, id_column))
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let properties: Value = row.try_get("properties")?;
                let geometry: Option<Value> = row.try_get("geometry")?;
                Ok(Some(into_feature(collection, properties, geometry)))
            }
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn catalog() -> Catalog {
        build_catalog(
            vec![
                (s("public"), s("roads"), s("geom"), s("LINESTRING"), 3857),
                (s("public"), s("roads"), s("centroid"), s("POINT"), 3857),
                (s("public"), s("points"), s("geom"), s("POINT"), 4326),
            ],
            vec![
                (s("public"), s("roads"), s("id"), s("integer")),
                (s("public"), s("roads"), s("name"), s("text")),
                (s("public"), s("roads"), s("geom"), s("USER-DEFINED")),
                (s("public"), s("roads"), s("centroid"), s("USER-DEFINED")),
                (s("public"), s("points"), s("label"), s("text")),
                (s("public"), s("points"), s("geom"), s("USER-DEFINED")),
            ],
            vec![(s("public"), s("roads"), s("id"))],
        )
    }

    #[test]
    fn catalog_uses_first_geometry_column() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        let roads = catalog.get("public.roads").unwrap();
        assert_eq!(roads.geometry_column, "centroid");
        assert_eq!(roads.id_column.as_deref(), Some("id"));
        let names: Vec<_> = roads.properties.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert!(catalog.get("public.points").unwrap().id_column.is_none());
    }

    #[test]
    fn composite_primary_key_gives_no_id_column() {
        let catalog = build_catalog(
            vec![(s("obs"), s("readings"), s("geom"), s("POINT"), 4326)],
            vec![
                (s("obs"), s("readings"), s("station"), s("text")),
                (s("obs"), s("readings"), s("taken_at"), s("timestamp")),
                (s("obs"), s("readings"), s("geom"), s("USER-DEFINED")),
            ],
            vec![
                (s("obs"), s("readings"), s("station")),
                (s("obs"), s("readings"), s("taken_at")),
            ],
        );

        let readings = catalog.get("obs.readings").unwrap();
        assert!(readings.id_column.is_none());
        let (_, page) = items_sql(readings, false);
        assert!(page.contains("ORDER BY t.ctid"));
    }

    #[test]
    fn items_sql_quotes_and_reprojects() {
        let catalog = catalog();
        let roads = catalog.get("public.roads").unwrap();
        let (count, page) = items_sql(roads, true);
        assert!(count.contains("FROM \"public\".\"roads\" t WHERE ST_Intersects"));
        assert!(count.contains("ST_Transform(ST_MakeEnvelope($1, $2, $3, $4, 4326), 3857)"));
        assert!(page.contains("ST_Transform(t.\"centroid\", 4326)"));
        assert!(page.contains("ORDER BY t.\"id\" LIMIT $5 OFFSET $6"));

        let points = catalog.get("public.points").unwrap();
        let (_, page) = items_sql(points, false);
        assert!(page.contains("ST_AsGeoJSON(t.\"geom\")"));
        assert!(page.contains("ORDER BY t.ctid LIMIT $1 OFFSET $2"));
    }

    #[test]
    fn item_sql_compares_id_as_text() {
        let catalog = catalog();
        let roads = catalog.get("public.roads").unwrap();
        let sql = item_sql(roads, "id");
        assert!(sql.ends_with("WHERE t.\"id\"::text = $1 LIMIT 1"));
    }

    #[test]
    fn features_drop_unlisted_columns() {
        let catalog = catalog();
        let roads = catalog.get("public.roads").unwrap();
        let feature = into_feature(
            roads,
            serde_json::json!({"id": 3, "name": "A1", "geom": "0102000020"}),
            None,
        );
        assert_eq!(feature.id, serde_json::json!(3));
        assert!(feature.properties.get("geom").is_none());
        assert_eq!(feature.properties["name"], "A1");
    }
}
