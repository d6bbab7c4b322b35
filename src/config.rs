//! VecTiles layer configuration (YAML).
use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::db::DbInfo;
use crate::error::{Error, Result};
use crate::provider::DEFAULT_SRID;
use crate::sort::SortFn;
use crate::transform::TransformFn;

/// The top level of a configuration file: layers by name.
#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub layers: HashMap<String, LayerConfig>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct LayerConfig {
    pub provider: ProviderConfig,
}

#[derive(Clone, Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Vectiles(VecTilesConfig),
    Multi(MultiConfig),
}

#[derive(Clone, Deserialize, Debug)]
pub struct VecTilesConfig {
    pub dbinfo: DbInfo,
    /// One entry per zoom level, starting at zero. Each is inline SQL, a path relative to the
    /// configuration file or an http(s) URL. Null entries have no data.
    pub queries: Vec<Option<String>>,
    #[serde(default = "default_clip")]
    pub clip: bool,
    #[serde(default = "default_srid")]
    pub srid: i32,
    #[serde(default = "default_simplify")]
    pub simplify: f64,
    #[serde(default = "default_simplify_until")]
    pub simplify_until: u8,
    #[serde(default)]
    pub sort: Option<SortFn>,
    #[serde(default)]
    pub transforms: Vec<TransformFn>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct MultiConfig {
    pub names: Vec<String>,
}

fn default_clip() -> bool {
    true
}

fn default_srid() -> i32 {
    DEFAULT_SRID
}

fn default_simplify() -> f64 {
    1.0
}

fn default_simplify_until() -> u8 {
    16
}

impl Config {
    pub fn from_yaml(data: &str) -> Result<Config> {
        Ok(serde_yaml::from_str(data)?)
    }
}

fn is_url(query: &str) -> bool {
    (query.starts_with("http://") || query.starts_with("https://"))
        && !query.contains(char::is_whitespace)
}

/// Resolves a configured query to its SQL text.
///
/// URLs are fetched and existing files (relative to `base_dir`) are read; anything else is
/// taken to be SQL already.
pub async fn load_query(query: &str, base_dir: &Path) -> Result<String> {
    if is_url(query) {
        debug!(url = query, "Fetching query");
        return fetch_query(query).await.map_err(|source| Error::QueryUrl {
            url: query.to_string(),
            source,
        });
    }

    let candidate = query.strip_prefix("file://").unwrap_or(query);
    if !candidate.contains('\n') {
        let path = base_dir.join(candidate);
        if path.is_file() {
            debug!(path = %path.display(), "Reading query file");
            return std::fs::read_to_string(&path)
                .map_err(|source| Error::QueryFile { path, source });
        }
    }

    Ok(query.to_string())
}

async fn fetch_query(url: &str) -> std::result::Result<String, reqwest::Error> {
    reqwest::get(url).await?.error_for_status()?.text().await
}
