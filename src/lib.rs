//! # VecTiles
//!
//! Serve PostGIS query results as vector tiles.
//!
//! ## Current features
//!
//! Given a PostGIS database and a list of per-zoom queries for each layer, this crate turns a
//! slippy map tile coordinate into a query adapted to the tile: clipped to its bounding box,
//! simplified to a pixel-sized tolerance, reprojected for geographic formats and scaled onto a
//! tile-local integer grid for tile-native formats. The resulting features are handed to a
//! [`TileCodec`] for one of several wire formats (MVT, GeoJSON, TopoJSON, OpenScienceMap and
//! Mapbox vector tiles). Several layers can be combined into a single tile.
//!
//! The column schema of each query is discovered on first use by fetching a single row, zooming
//! out from the requested tile until a row turns up. Schemas are assumed stable and cached for
//! the lifetime of the process.
//!
//! ## Known Limitations
//!
//! Only GeoJSON output is bundled ([`geojson::GeoJsonCodec`]); binary formats need a codec
//! supplied by the calling application. There is no HTTP layer or tile cache; those belong to
//! the host application, which renders tiles through [`TileSource`] and exposes its layers to
//! multi-layer tiles through [`TileHost`].

#![deny(warnings)]

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

pub mod config;
pub mod db;
pub mod error;
pub mod feature;
pub mod format;
pub mod geojson;
pub mod layers;
pub mod multi;
pub mod provider;
pub mod query;
pub mod sort;
pub mod tile;
pub mod transform;
pub mod zoom;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use format::{EncodeContext, Format, TileCodec};
pub use provider::Provider;
pub use tile::TileCoord;

/// Something that renders tiles for a layer.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Resolves a file extension to the mime-type and format this source can render.
    fn type_by_extension(&self, extension: &str) -> Result<(&'static str, Format)>;

    /// Renders the tile at `coord` in `format` into `out`.
    ///
    /// `host` resolves other layers for sources that combine them.
    async fn render_tile(
        &self,
        host: &dyn TileHost,
        coord: TileCoord,
        format: Format,
        out: &mut (dyn Write + Send),
    ) -> Result<()>;
}

/// The application's registry of layers, as seen by multi-layer tiles.
#[async_trait]
pub trait TileHost: Send + Sync {
    fn contains_layer(&self, name: &str) -> bool;

    /// The PostGIS provider behind `name`, if it is a single-layer source.
    fn vector_layer(&self, name: &str) -> Option<Arc<Provider>>;

    /// Renders a layer's tile, returning its mime-type and body.
    async fn get_tile(
        &self,
        name: &str,
        coord: TileCoord,
        extension: &str,
    ) -> Result<(String, Vec<u8>)>;
}
