use std::path::PathBuf;

use crate::format::Format;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid YAML in VecTiles configuration.")]
    Config(#[from] serde_yaml::Error),

    #[error("Unable to read query file {path:?}: {source}")]
    QueryFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to fetch query from {url}: {source}")]
    QueryUrl { url: String, source: reqwest::Error },

    #[error("{0} is not a valid extension")]
    InvalidExtension(String),

    #[error("{0} is not a valid extension for responses with multiple layers")]
    InvalidMultiExtension(String),

    #[error("{0} is not supported for responses with multiple layers")]
    UnsupportedMultiFormat(Format),

    #[error("There's supposed to be a __geometry__ column in query: {0}")]
    MissingGeometryColumn(String),

    #[error("No row found within planetary bounds, unable to discover columns of query: {0}")]
    SchemaUndiscoverable(String),

    #[error("Zoom level {0} is beyond the supported range")]
    UnsupportedZoom(u8),

    #[error("Didn't recognize {unknown} when trying to load {requested}")]
    UnknownLayers { unknown: String, requested: String },

    #[error("Encountered a non-JSON mime-type in {layer} sub-layer: \"{mime}\"")]
    NonJsonMime { layer: String, mime: String },

    #[error("Encountered a non-{expected} type in {layer} sub-layer: \"{found}\"")]
    UnexpectedTileType {
        layer: String,
        expected: &'static str,
        found: String,
    },

    #[error("Invalid JSON in {layer} sub-layer: {source}")]
    SubTileJson {
        layer: String,
        source: serde_json::Error,
    },

    #[error("Sub-layer {0} is not backed by a PostGIS query")]
    NotAVectorLayer(String),

    #[error("No encoder available for {0}")]
    CodecUnavailable(Format),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Geometry error: {0}")]
    Geometry(#[from] geozero::error::GeozeroError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
