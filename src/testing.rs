//! Stand-ins for PostgreSQL, the wire-format encoders and the host's layer registry.
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::db::{Connection, Database};
use crate::error::{Error, Result};
use crate::feature::{ColumnSet, Feature, FeatureLayer};
use crate::format::{EncodeContext, Format, TileCodec};
use crate::provider::Provider;
use crate::tile::TileCoord;
use crate::TileHost;

type Probe = dyn Fn(&str) -> Option<ColumnSet> + Send + Sync;

/// A database answering column probes with a closure and tile queries with fixed features.
///
/// Every statement is logged, probes and fetches alike, and clones share the log.
#[derive(Clone)]
pub struct MockDatabase {
    probe: Arc<Probe>,
    features: Arc<Vec<Feature>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockDatabase {
    pub fn new<F>(probe: F) -> MockDatabase
    where
        F: Fn(&str) -> Option<ColumnSet> + Send + Sync + 'static,
    {
        MockDatabase {
            probe: Arc::new(probe),
            features: Arc::new(Vec::new()),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every probe finds a row with `columns`.
    pub fn with_columns(columns: &[&str]) -> MockDatabase {
        let columns = ColumnSet::from_iter(columns.iter().copied());
        MockDatabase::new(move |_| Some(columns.clone()))
    }

    pub fn returning(mut self, features: Vec<Feature>) -> MockDatabase {
        self.features = Arc::new(features);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MockConnection { db: self.clone() }))
    }
}

struct MockConnection {
    db: MockDatabase,
}

impl MockConnection {
    fn log(&self, sql: &str) {
        self.db.queries.lock().unwrap().push(sql.to_string());
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn first_row_columns(&mut self, sql: &str) -> Result<Option<ColumnSet>> {
        self.log(sql);
        Ok((self.db.probe)(sql))
    }

    async fn fetch_features(&mut self, sql: &str) -> Result<Vec<Feature>> {
        self.log(sql);
        Ok(self.db.features.as_ref().clone())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CodecCall {
    Encode {
        format: Format,
        features: usize,
    },
    MergeJson {
        format: Format,
        names: Vec<String>,
        tiles: Vec<Value>,
    },
    MergeFeatures {
        format: Format,
        layers: Vec<(String, usize)>,
    },
}

/// A codec that records what it was asked to do.
///
/// JSON-family tiles are written as minimal containers so they can be merged again.
#[derive(Debug, Default)]
pub struct RecordingCodec {
    calls: Mutex<Vec<CodecCall>>,
}

impl RecordingCodec {
    pub fn calls(&self) -> Vec<CodecCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: CodecCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TileCodec for RecordingCodec {
    fn encode(
        &self,
        out: &mut dyn Write,
        features: Vec<Feature>,
        context: &EncodeContext<'_>,
    ) -> Result<()> {
        let format = context.format();
        self.record(CodecCall::Encode {
            format,
            features: features.len(),
        });

        let placeholders = vec![json!({"type": "Feature"}); features.len()];
        match format {
            Format::Json => serde_json::to_writer(
                out,
                &json!({"type": "FeatureCollection", "features": placeholders}),
            )?,
            Format::TopoJson => serde_json::to_writer(
                out,
                &json!({"type": "Topology", "objects": {"vectile": {"geometries": placeholders}}}),
            )?,
            _ => out.write_all(format.name().as_bytes())?,
        }

        Ok(())
    }

    fn merge_json(
        &self,
        out: &mut dyn Write,
        format: Format,
        names: &[String],
        tiles: Vec<Value>,
        _coord: TileCoord,
    ) -> Result<()> {
        serde_json::to_writer(out, &tiles)?;
        self.record(CodecCall::MergeJson {
            format,
            names: names.to_vec(),
            tiles,
        });

        Ok(())
    }

    fn merge_features(
        &self,
        out: &mut dyn Write,
        format: Format,
        layers: Vec<FeatureLayer>,
        _coord: TileCoord,
    ) -> Result<()> {
        out.write_all(format.name().as_bytes())?;
        self.record(CodecCall::MergeFeatures {
            format,
            layers: layers
                .into_iter()
                .map(|layer| (layer.name, layer.features.len()))
                .collect(),
        });

        Ok(())
    }
}

/// A host serving canned tiles: `(layer, mime, body)`.
pub struct StaticTiles {
    tiles: HashMap<String, (String, Value)>,
}

impl StaticTiles {
    pub fn new(tiles: Vec<(&str, &str, Value)>) -> StaticTiles {
        StaticTiles {
            tiles: tiles
                .into_iter()
                .map(|(name, mime, body)| (name.to_string(), (mime.to_string(), body)))
                .collect(),
        }
    }
}

#[async_trait]
impl TileHost for StaticTiles {
    fn contains_layer(&self, name: &str) -> bool {
        self.tiles.contains_key(name)
    }

    fn vector_layer(&self, _name: &str) -> Option<Arc<Provider>> {
        None
    }

    async fn get_tile(
        &self,
        name: &str,
        _coord: TileCoord,
        _extension: &str,
    ) -> Result<(String, Vec<u8>)> {
        let (mime, body) = self.tiles.get(name).ok_or_else(|| Error::UnknownLayers {
            unknown: name.to_string(),
            requested: name.to_string(),
        })?;

        Ok((mime.clone(), serde_json::to_vec(body)?))
    }
}
