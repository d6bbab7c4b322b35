//! Single-layer PostGIS tiles.
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use tracing::debug;

use crate::db::{get_features, ColumnCache, Database};
use crate::error::Result;
use crate::feature::Feature;
use crate::format::{EncodeContext, Format, TileCodec};
use crate::query::{QueryBuilder, QueryVariants};
use crate::sort::SortFn;
use crate::tile::{unit_distance, TileCoord};
use crate::transform::TransformFn;
use crate::zoom::{Simplification, ZoomQueries};
use crate::{TileHost, TileSource};

/// Spherical mercator, as PostGIS historically numbered it.
pub const DEFAULT_SRID: i32 = 900913;

#[derive(Clone, Debug, PartialEq)]
pub struct ProviderOptions {
    /// Clip geometries to the tile boundaries instead of returning them in full.
    pub clip: bool,
    pub srid: i32,
    pub simplify: Simplification,
    pub sort: Option<SortFn>,
    pub transforms: Vec<TransformFn>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        ProviderOptions {
            clip: true,
            srid: DEFAULT_SRID,
            simplify: Simplification::default(),
            sort: None,
            transforms: Vec::new(),
        }
    }
}

/// Renders one layer's tiles from a list of per-zoom PostGIS queries.
///
/// Queries must alias their geometry column `__geometry__`, in the layer's SRID, and may
/// include an `__id__` column to use instead of a hash of the geometry. The `!bbox!` token is
/// replaced with the tile's bounding box geometry, as in Mapnik's PostGIS datasource.
pub struct Provider {
    name: String,
    db: Arc<dyn Database>,
    queries: ZoomQueries,
    options: ProviderOptions,
    columns: Arc<ColumnCache>,
    codec: Arc<dyn TileCodec>,
}

impl Provider {
    pub fn new(
        name: &str,
        db: Arc<dyn Database>,
        queries: ZoomQueries,
        codec: Arc<dyn TileCodec>,
    ) -> Provider {
        Provider {
            name: name.to_string(),
            db,
            queries,
            options: ProviderOptions::default(),
            columns: Arc::new(ColumnCache::new()),
            codec,
        }
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Provider {
        self.options = options;
        self
    }

    /// Shares discovered query columns with other providers.
    pub fn with_column_cache(mut self, columns: Arc<ColumnCache>) -> Provider {
        self.columns = columns;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    /// Picks the query and simplification tolerance for `zoom`, or `None` when the layer has
    /// no data there.
    pub fn resolve(&self, zoom: u8) -> Result<Option<(&str, Option<f64>)>> {
        match self.queries.get(zoom) {
            Some(query) => Ok(Some((query, self.options.simplify.tolerance(zoom)?))),
            None => Ok(None),
        }
    }

    /// Prepares the queries for a tile. Nothing is fetched until the response is saved.
    pub async fn render(&self, coord: TileCoord) -> Result<TileResponse<'_>> {
        let Some((subquery, tolerance)) = self.resolve(coord.zoom)? else {
            debug!(layer = %self.name, %coord, "No query configured, rendering empty tile");
            return Ok(TileResponse::Empty(EmptyResponse {
                provider: self,
                coord,
            }));
        };

        // Out of range zooms can't be queried, so don't touch the database for them
        unit_distance(coord.zoom)?;

        let bounds = coord.mercator_bounds();
        let columns = self
            .columns
            .get_or_discover(self.db.as_ref(), self.options.srid, subquery, bounds)
            .await?;

        let builder = QueryBuilder {
            srid: self.options.srid,
            subquery,
            columns: &columns,
            bounds,
            tolerance,
            clip: self.options.clip,
        };
        let queries = QueryVariants::build(&builder, coord.zoom)?;

        Ok(TileResponse::Features(Response {
            provider: self,
            queries,
            coord,
        }))
    }

    fn context(&self, format: Format, coord: TileCoord) -> EncodeContext<'_> {
        EncodeContext::for_tile(format, coord, self.options.clip, &self.name)
    }
}

#[async_trait]
impl TileSource for Provider {
    fn type_by_extension(&self, extension: &str) -> Result<(&'static str, Format)> {
        Format::from_extension(extension)
    }

    async fn render_tile(
        &self,
        _host: &dyn TileHost,
        coord: TileCoord,
        format: Format,
        out: &mut (dyn Write + Send),
    ) -> Result<()> {
        self.render(coord).await?.save(out, format).await
    }
}

/// The outcome of preparing a tile: either there is a query to run or there is nothing to do.
pub enum TileResponse<'a> {
    Empty(EmptyResponse<'a>),
    Features(Response<'a>),
}

impl TileResponse<'_> {
    pub fn is_empty(&self) -> bool {
        matches!(self, TileResponse::Empty(_))
    }

    pub async fn save(&self, out: &mut (dyn Write + Send), format: Format) -> Result<()> {
        match self {
            TileResponse::Empty(response) => response.save(out, format),
            TileResponse::Features(response) => response.save(out, format).await,
        }
    }
}

/// A tile with a query for every output format.
pub struct Response<'a> {
    provider: &'a Provider,
    queries: QueryVariants,
    coord: TileCoord,
}

impl Response<'_> {
    pub fn query(&self, format: Format) -> &str {
        self.queries.get(format)
    }

    /// Runs the query for `format` and applies the layer's transforms and sort.
    pub async fn features(&self, format: Format) -> Result<Vec<Feature>> {
        let options = &self.provider.options;
        let mut features = get_features(self.provider.db.as_ref(), self.query(format)).await?;

        for feature in features.iter_mut() {
            for transform in &options.transforms {
                transform.apply(feature);
            }
        }
        if let Some(sort) = options.sort {
            sort.apply(&mut features);
        }

        Ok(features)
    }

    pub async fn save(&self, out: &mut (dyn Write + Send), format: Format) -> Result<()> {
        let features = self.features(format).await?;
        let context = self.provider.context(format, self.coord);

        self.provider.codec.encode(out, features, &context)
    }
}

/// A tile at a zoom level with no query; renders a valid tile with no features.
pub struct EmptyResponse<'a> {
    provider: &'a Provider,
    coord: TileCoord,
}

impl EmptyResponse<'_> {
    pub fn save(&self, out: &mut (dyn Write + Send), format: Format) -> Result<()> {
        let context = self.provider.context(format, self.coord);

        self.provider.codec.encode(out, Vec::new(), &context)
    }
}
