//! Database access: scoped connections, column discovery and feature fetching.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use futures::TryStreamExt;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgColumn, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::types::{BigDecimal, JsonValue, Uuid};
use sqlx::{query, Column, Postgres, Row, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::feature::{ColumnSet, Feature, Properties, PropertyValue, GEOMETRY_COLUMN, ID_COLUMN};
use crate::query::BBOX_TOKEN;
use crate::tile::BoundingBox;

/// Column discovery gives up once the probe box is wider than this squared.
///
/// Only the box's width is compared. Spherical mercator is ~4.0075e7 meters wide, so the last
/// probe covers roughly the whole planet.
pub const PLANET_CUTOFF: f64 = 1.61e15;

/// Each failed probe grows every side of the box by this many widths, zooming out three levels.
pub const PROBE_EXPANSION: f64 = 3.5;

/// A connection held for the duration of one operation.
///
/// Dropping it releases the underlying connection, on error paths as well.
#[async_trait]
pub trait Connection: Send {
    /// Runs `sql` and returns the column names of its first row, if there is one.
    async fn first_row_columns(&mut self, sql: &str) -> Result<Option<ColumnSet>>;

    /// Runs `sql` and collects a feature for every row with a geometry.
    async fn fetch_features(&mut self, sql: &str) -> Result<Vec<Feature>>;
}

/// A source of scoped connections.
#[async_trait]
pub trait Database: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// Postgres connection parameters, as found in layer configuration.
///
/// Any other keys in the configuration are ignored.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DbInfo {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

impl DbInfo {
    /// Connection options, with anything unset falling back to the usual `PG*` environment.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new();

        if let Some(host) = &self.host {
            options = options.host(host);
        }
        if let Some(port) = self.port {
            options = options.port(port);
        }
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(database) = self.database.as_ref().or(self.dbname.as_ref()) {
            options = options.database(database);
        }

        options
    }
}

/// A pooled PostGIS database.
#[derive(Clone, Debug)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> PgDatabase {
        PgDatabase { pool }
    }

    /// Creates a pool that only connects once a tile needs it.
    pub fn connect_lazy(dbinfo: &DbInfo) -> PgDatabase {
        let pool = PgPoolOptions::new().connect_lazy_with(dbinfo.connect_options());
        PgDatabase { pool }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgConnectionScope { conn }))
    }
}

/// A pool connection that goes back to the pool when dropped.
pub struct PgConnectionScope {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl Connection for PgConnectionScope {
    async fn first_row_columns(&mut self, sql: &str) -> Result<Option<ColumnSet>> {
        // Every tile produces distinct SQL, so don't cache prepared statements
        let row = query(sql)
            .persistent(false)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(row.map(|row| row.columns().iter().map(|column| column.name()).collect()))
    }

    async fn fetch_features(&mut self, sql: &str) -> Result<Vec<Feature>> {
        let mut features = Vec::new();
        let mut rows = query(sql).persistent(false).fetch(&mut *self.conn);

        while let Some(row) = rows.try_next().await? {
            if let Some(feature) = decode_feature(&row)? {
                features.push(feature);
            }
        }

        Ok(features)
    }
}

fn decode_feature(row: &PgRow) -> Result<Option<Feature>> {
    let geometry: Option<Vec<u8>> = row.try_get(GEOMETRY_COLUMN)?;
    if geometry.is_none() {
        return Ok(None);
    }

    let values = row
        .columns()
        .iter()
        .filter(|column| column.name() != GEOMETRY_COLUMN)
        .map(|column| Ok::<_, Error>((column.name(), decode_value(row, column)?)))
        .collect::<Result<Vec<_>>>()?;

    Ok(build_feature(geometry, values))
}

/// Assembles a feature from a row's geometry and its other column values.
///
/// Rows without a geometry produce nothing, null values are left out, and `__id__` becomes the
/// feature's id rather than a property.
fn build_feature<'a>(
    geometry: Option<Vec<u8>>,
    values: impl IntoIterator<Item = (&'a str, Option<PropertyValue>)>,
) -> Option<Feature> {
    let geometry = geometry?;
    let mut properties = Properties::new();
    let mut id = None;

    for (name, value) in values {
        match (name, value) {
            (GEOMETRY_COLUMN, _) | (_, None) => {}
            (ID_COLUMN, value) => id = value,
            (name, Some(value)) => {
                properties.insert(name.to_string(), value);
            }
        }
    }

    Some(Feature::new(geometry, properties, id))
}

fn decode_value(row: &PgRow, column: &PgColumn) -> Result<Option<PropertyValue>> {
    let index = column.ordinal();
    if row.try_get_raw(index)?.is_null() {
        return Ok(None);
    }

    let value = match column.type_info().name() {
        "BOOL" => PropertyValue::Bool(row.try_get(index)?),
        "INT2" => PropertyValue::Int(row.try_get::<i16, _>(index)?.into()),
        "INT4" => PropertyValue::Int(row.try_get::<i32, _>(index)?.into()),
        "INT8" => PropertyValue::Int(row.try_get(index)?),
        "FLOAT4" => PropertyValue::Float(row.try_get::<f32, _>(index)?.into()),
        "FLOAT8" => PropertyValue::Float(row.try_get(index)?),
        "NUMERIC" => match row.try_get::<BigDecimal, _>(index) {
            Ok(value) => return Ok(numeric_value(&value.to_string())),
            // NaN has no BigDecimal representation
            Err(error) => {
                warn!(column = column.name(), %error, "Skipping undecodable NUMERIC value");
                return Ok(None);
            }
        },
        "JSON" | "JSONB" => return Ok(json_value(row.try_get(index)?)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => PropertyValue::String(row.try_get(index)?),
        "UUID" => PropertyValue::String(row.try_get::<Uuid, _>(index)?.to_string()),
        "TIMESTAMPTZ" => {
            PropertyValue::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339())
        }
        "TIMESTAMP" => PropertyValue::String(row.try_get::<NaiveDateTime, _>(index)?.to_string()),
        "DATE" => PropertyValue::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        other => {
            warn!(column = column.name(), sql_type = other, "Skipping column of unsupported type");
            return Ok(None);
        }
    };

    Ok(Some(value))
}

/// Whole NUMERIC values that fit become integers, anything else a float.
fn numeric_value(text: &str) -> Option<PropertyValue> {
    match text.parse::<i64>() {
        Ok(value) => Some(PropertyValue::Int(value)),
        Err(_) => text.parse::<f64>().ok().map(PropertyValue::Float),
    }
}

/// JSON scalars map onto properties directly; objects and arrays are kept as JSON text.
fn json_value(value: JsonValue) -> Option<PropertyValue> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(value) => Some(PropertyValue::Bool(value)),
        JsonValue::Number(number) => match number.as_i64() {
            Some(value) => Some(PropertyValue::Int(value)),
            None => number.as_f64().map(PropertyValue::Float),
        },
        JsonValue::String(value) => Some(PropertyValue::String(value)),
        other => Some(PropertyValue::String(other.to_string())),
    }
}

/// Discovers the columns a query returns by fetching one row.
///
/// Sparse queries may return nothing for a small box, so the box is widened until a row turns up
/// or the box spans the planet.
pub async fn query_columns(
    conn: &mut dyn Connection,
    srid: i32,
    subquery: &str,
    bounds: BoundingBox,
) -> Result<ColumnSet> {
    let mut bounds = bounds;

    // Width squared rather than area; the widening cadence depends on it
    while bounds.width() * bounds.width() < PLANET_CUTOFF {
        let bbox = format!(
            "ST_SetSRID(ST_MakeBox2D(ST_MakePoint({:.6}, {:.6}), ST_MakePoint({:.6}, {:.6})), {})",
            bounds.xmin, bounds.ymin, bounds.xmax, bounds.ymax, srid
        );

        // The newline breaks out of any trailing comment in the query
        let probe = format!("{}\n LIMIT 1", subquery.replace(BBOX_TOKEN, &bbox));

        if let Some(columns) = conn.first_row_columns(&probe).await? {
            info!(columns = columns.len(), "Discovered query columns");
            return Ok(columns);
        }

        debug!(width = bounds.width(), "No rows in probe box, zooming out");
        bounds = bounds.expand(PROBE_EXPANSION);
    }

    Err(Error::SchemaUndiscoverable(subquery.to_string()))
}

/// Runs a tile query on a fresh connection.
pub async fn get_features(db: &dyn Database, sql: &str) -> Result<Vec<Feature>> {
    let mut conn = db.connect().await?;
    let features = conn.fetch_features(sql).await?;
    debug!(count = features.len(), "Fetched features");

    Ok(features)
}

/// Columns of each configured query, keyed by the query's exact text.
///
/// Schemas are assumed stable, so entries are never invalidated.
#[derive(Debug, Default)]
pub struct ColumnCache {
    columns: RwLock<HashMap<String, Arc<ColumnSet>>>,
}

impl ColumnCache {
    pub fn new() -> ColumnCache {
        ColumnCache::default()
    }

    pub fn get(&self, subquery: &str) -> Option<Arc<ColumnSet>> {
        let columns = self.columns.read().unwrap_or_else(PoisonError::into_inner);
        columns.get(subquery).cloned()
    }

    /// Stores `columns` unless another request got there first, returning the cached set.
    pub fn insert(&self, subquery: &str, columns: ColumnSet) -> Arc<ColumnSet> {
        let mut cached = self.columns.write().unwrap_or_else(PoisonError::into_inner);
        cached
            .entry(subquery.to_string())
            .or_insert_with(|| Arc::new(columns))
            .clone()
    }

    /// Returns the cached columns of `subquery`, probing the database on first use.
    pub async fn get_or_discover(
        &self,
        db: &dyn Database,
        srid: i32,
        subquery: &str,
        bounds: BoundingBox,
    ) -> Result<Arc<ColumnSet>> {
        if let Some(columns) = self.get(subquery) {
            return Ok(columns);
        }

        let mut conn = db.connect().await?;
        let columns = query_columns(conn.as_mut(), srid, subquery, bounds).await?;

        Ok(self.insert(subquery, columns))
    }
}
