//! A registry of named layers, built from configuration.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use tracing::info;

use crate::config::{load_query, Config, ProviderConfig, VecTilesConfig};
use crate::db::{ColumnCache, Database, DbInfo, PgDatabase};
use crate::error::{Error, Result};
use crate::format::TileCodec;
use crate::multi::MultiProvider;
use crate::provider::{Provider, ProviderOptions};
use crate::tile::TileCoord;
use crate::zoom::{Simplification, ZoomQueries};
use crate::{TileHost, TileSource};

pub enum Layer {
    Vector(Arc<Provider>),
    Multi(MultiProvider),
}

impl Layer {
    pub fn source(&self) -> &dyn TileSource {
        match self {
            Layer::Vector(provider) => provider.as_ref(),
            Layer::Multi(provider) => provider,
        }
    }
}

#[derive(Default)]
pub struct Layers {
    layers: HashMap<String, Layer>,
}

impl Layers {
    pub fn new() -> Layers {
        Layers::default()
    }

    pub fn insert(&mut self, name: &str, layer: Layer) {
        self.layers.insert(name.to_string(), layer);
    }

    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// Loads a YAML configuration file, connecting each layer to PostGIS lazily.
    ///
    /// Query files are resolved relative to the configuration file's directory.
    pub async fn load(path: impl AsRef<Path>, codec: Arc<dyn TileCodec>) -> Result<Layers> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config = Config::from_yaml(&data)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        Layers::from_config(config, base_dir, codec, |dbinfo| {
            let db: Arc<dyn Database> = Arc::new(PgDatabase::connect_lazy(dbinfo));
            db
        })
        .await
    }

    /// Builds layers from parsed configuration, fetching any query files or URLs once.
    pub async fn from_config<F>(
        config: Config,
        base_dir: &Path,
        codec: Arc<dyn TileCodec>,
        connect: F,
    ) -> Result<Layers>
    where
        F: Fn(&DbInfo) -> Arc<dyn Database>,
    {
        let columns = Arc::new(ColumnCache::new());
        let mut layers = Layers::new();

        for (name, layer) in config.layers {
            let layer = match layer.provider {
                ProviderConfig::Vectiles(vectiles) => {
                    let db = connect(&vectiles.dbinfo);
                    let provider =
                        build_provider(&name, vectiles, base_dir, db, codec.clone()).await?;
                    Layer::Vector(Arc::new(provider.with_column_cache(columns.clone())))
                }
                ProviderConfig::Multi(multi) => {
                    Layer::Multi(MultiProvider::new(multi.names, codec.clone()))
                }
            };

            info!(layer = %name, "Configured layer");
            layers.insert(&name, layer);
        }

        Ok(layers)
    }
}

async fn build_provider(
    name: &str,
    config: VecTilesConfig,
    base_dir: &Path,
    db: Arc<dyn Database>,
    codec: Arc<dyn TileCodec>,
) -> Result<Provider> {
    let mut queries = Vec::with_capacity(config.queries.len());
    for query in &config.queries {
        queries.push(match query {
            Some(query) => Some(load_query(query, base_dir).await?),
            None => None,
        });
    }

    let options = ProviderOptions {
        clip: config.clip,
        srid: config.srid,
        simplify: Simplification {
            scale: config.simplify,
            until: config.simplify_until,
        },
        sort: config.sort,
        transforms: config.transforms,
    };

    Ok(Provider::new(name, db, ZoomQueries::new(queries), codec).with_options(options))
}

#[async_trait]
impl TileHost for Layers {
    fn contains_layer(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    fn vector_layer(&self, name: &str) -> Option<Arc<Provider>> {
        match self.layers.get(name) {
            Some(Layer::Vector(provider)) => Some(provider.clone()),
            _ => None,
        }
    }

    async fn get_tile(
        &self,
        name: &str,
        coord: TileCoord,
        extension: &str,
    ) -> Result<(String, Vec<u8>)> {
        let layer = self.layers.get(name).ok_or_else(|| Error::UnknownLayers {
            unknown: name.to_string(),
            requested: name.to_string(),
        })?;
        let source = layer.source();
        let (mime, format) = source.type_by_extension(extension)?;

        let mut body = Vec::new();
        source.render_tile(self, coord, format, &mut body).await?;

        Ok((mime.to_string(), body))
    }
}
