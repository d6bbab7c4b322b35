//! Tiles combining several layers into one response.
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::feature::FeatureLayer;
use crate::format::{Format, TileCodec};
use crate::provider::TileResponse;
use crate::tile::TileCoord;
use crate::{TileHost, TileSource};

/// Gathers tiles of other layers, named from elsewhere in the configuration, into one tile.
pub struct MultiProvider {
    names: Vec<String>,
    codec: Arc<dyn TileCodec>,
}

impl MultiProvider {
    pub fn new(names: Vec<String>, codec: Arc<dyn TileCodec>) -> MultiProvider {
        MultiProvider { names, codec }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn render(&self, coord: TileCoord) -> MultiResponse<'_> {
        MultiResponse {
            names: &self.names,
            coord,
            codec: self.codec.as_ref(),
        }
    }
}

#[async_trait]
impl TileSource for MultiProvider {
    fn type_by_extension(&self, extension: &str) -> Result<(&'static str, Format)> {
        Format::from_multi_extension(extension)
    }

    async fn render_tile(
        &self,
        host: &dyn TileHost,
        coord: TileCoord,
        format: Format,
        out: &mut (dyn Write + Send),
    ) -> Result<()> {
        self.render(coord).save(host, out, format).await
    }
}

pub struct MultiResponse<'a> {
    names: &'a [String],
    coord: TileCoord,
    codec: &'a dyn TileCodec,
}

impl MultiResponse<'_> {
    pub async fn save(
        &self,
        host: &dyn TileHost,
        out: &mut (dyn Write + Send),
        format: Format,
    ) -> Result<()> {
        if !format.supports_multiple_layers() {
            return Err(Error::UnsupportedMultiFormat(format));
        }
        self.check_layers(host, format)?;

        match format {
            Format::Json | Format::TopoJson => {
                let tiles = self.get_tiles(host, format).await?;
                self.codec
                    .merge_json(out, format, self.names, tiles, self.coord)
            }
            Format::OpenScienceMap | Format::Mapbox => {
                let layers = self.get_feature_layers(host, format).await?;
                self.codec.merge_features(out, format, layers, self.coord)
            }
            Format::Mvt => Err(Error::UnsupportedMultiFormat(format)),
        }
    }

    /// Fails before anything is queried if a requested layer doesn't exist, or if a tile-native
    /// format needs raw features from a layer that has none.
    fn check_layers(&self, host: &dyn TileHost, format: Format) -> Result<()> {
        let unknown: Vec<&str> = self
            .names
            .iter()
            .filter(|name| !host.contains_layer(name))
            .map(String::as_str)
            .collect();

        if !unknown.is_empty() {
            return Err(Error::UnknownLayers {
                unknown: unknown.join(", "),
                requested: self.names.join(", "),
            });
        }

        if format.tile_grid().is_some() {
            if let Some(name) = self
                .names
                .iter()
                .find(|name| host.vector_layer(name).is_none())
            {
                return Err(Error::NotAVectorLayer(name.clone()));
            }
        }

        Ok(())
    }

    /// Renders every sub-layer through the host and parses the resulting JSON tiles.
    async fn get_tiles(&self, host: &dyn TileHost, format: Format) -> Result<Vec<Value>> {
        let Some(expected) = format.json_container() else {
            return Err(Error::UnsupportedMultiFormat(format));
        };

        let mut bodies = Vec::with_capacity(self.names.len());
        for name in self.names {
            bodies.push(host.get_tile(name, self.coord, format.extension()).await?);
        }

        if let Some((name, (mime, _))) = self
            .names
            .iter()
            .zip(&bodies)
            .find(|(_, (mime, _))| !mime.ends_with("/json"))
        {
            return Err(Error::NonJsonMime {
                layer: name.clone(),
                mime: mime.clone(),
            });
        }

        let tiles = self
            .names
            .iter()
            .zip(bodies)
            .map(|(name, (_, body))| {
                serde_json::from_slice::<Value>(&body).map_err(|source| Error::SubTileJson {
                    layer: name.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, tile) in self.names.iter().zip(&tiles) {
            let found = tile.get("type").and_then(Value::as_str);
            if found != Some(expected) {
                return Err(Error::UnexpectedTileType {
                    layer: name.clone(),
                    expected,
                    found: found.unwrap_or("null").to_string(),
                });
            }
        }

        Ok(tiles)
    }

    /// Fetches raw features of every non-empty sub-layer for a tile-native encoder.
    async fn get_feature_layers(
        &self,
        host: &dyn TileHost,
        format: Format,
    ) -> Result<Vec<FeatureLayer>> {
        let mut layers = Vec::with_capacity(self.names.len());

        for name in self.names {
            let provider = host
                .vector_layer(name)
                .ok_or_else(|| Error::NotAVectorLayer(name.clone()))?;

            match provider.render(self.coord).await? {
                TileResponse::Empty(_) => {
                    debug!(layer = %name, coord = %self.coord, "Skipping empty sub-layer");
                }
                TileResponse::Features(response) => layers.push(FeatureLayer {
                    name: provider.name().to_string(),
                    features: response.features(format).await?,
                }),
            }
        }

        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::feature::Feature;
    use crate::layers::{Layer, Layers};
    use crate::provider::Provider;
    use crate::testing::{CodecCall, MockDatabase, RecordingCodec, StaticTiles};
    use crate::zoom::ZoomQueries;

    const QUERY: &str = "SELECT way AS __geometry__ FROM water WHERE way && !bbox!";

    fn vector_layer(name: &str, queries: Vec<Option<String>>, db: &MockDatabase, codec: &Arc<RecordingCodec>) -> Layer {
        let codec: Arc<dyn TileCodec> = codec.clone();
        Layer::Vector(Arc::new(Provider::new(
            name,
            Arc::new(db.clone()),
            ZoomQueries::new(queries),
            codec,
        )))
    }

    fn layers(db: &MockDatabase, codec: &Arc<RecordingCodec>) -> Layers {
        let mut layers = Layers::new();
        layers.insert("a", vector_layer("a", vec![Some(String::from(QUERY))], db, codec));
        layers.insert("b", vector_layer("b", vec![None], db, codec));
        layers
    }

    fn multi(names: &[&str], codec: &Arc<RecordingCodec>) -> MultiProvider {
        let codec: Arc<dyn TileCodec> = codec.clone();
        MultiProvider::new(names.iter().map(|name| name.to_string()).collect(), codec)
    }

    #[tokio::test]
    async fn test_raw_features_skip_empty_layers() {
        let db = MockDatabase::with_columns(&["__geometry__"])
            .returning(vec![Feature::new(vec![1], Default::default(), None)]);
        let codec = Arc::new(RecordingCodec::default());
        let layers = layers(&db, &codec);

        let mut out = Vec::new();
        multi(&["a", "b"], &codec)
            .render_tile(&layers, TileCoord::new(10, 1, 1), Format::Mapbox, &mut out)
            .await
            .unwrap();

        assert_eq!(
            vec![CodecCall::MergeFeatures {
                format: Format::Mapbox,
                layers: vec![(String::from("a"), 1)],
            }],
            codec.calls()
        );
    }

    #[tokio::test]
    async fn test_unknown_layer_fails_before_querying() {
        let db = MockDatabase::with_columns(&["__geometry__"]);
        let codec = Arc::new(RecordingCodec::default());
        let layers = layers(&db, &codec);

        for format in [Format::Json, Format::OpenScienceMap] {
            let mut out = Vec::new();
            let result = multi(&["a", "c"], &codec)
                .render_tile(&layers, TileCoord::new(10, 1, 1), format, &mut out)
                .await;

            match result {
                Err(Error::UnknownLayers { unknown, requested }) => {
                    assert_eq!("c", unknown);
                    assert_eq!("a, c", requested);
                }
                other => panic!("unexpected {:?}", other.err()),
            }
        }

        assert!(db.queries().is_empty());
        assert!(codec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_nested_multi_fails_before_querying() {
        let db = MockDatabase::with_columns(&["__geometry__"])
            .returning(vec![Feature::new(vec![1], Default::default(), None)]);
        let codec = Arc::new(RecordingCodec::default());
        let mut layers = layers(&db, &codec);
        layers.insert("m", Layer::Multi(multi(&["a"], &codec)));

        for format in [Format::OpenScienceMap, Format::Mapbox] {
            let mut out = Vec::new();
            let result = multi(&["a", "m"], &codec)
                .render_tile(&layers, TileCoord::new(10, 1, 1), format, &mut out)
                .await;

            assert!(matches!(result, Err(Error::NotAVectorLayer(ref name)) if name == "m"));
        }

        assert!(db.queries().is_empty());
        assert!(codec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_json_merges_sub_tiles() {
        let db = MockDatabase::with_columns(&["__geometry__"])
            .returning(vec![Feature::new(vec![1], Default::default(), None)]);
        let codec = Arc::new(RecordingCodec::default());
        let layers = layers(&db, &codec);

        let mut out = Vec::new();
        multi(&["a", "b"], &codec)
            .render_tile(&layers, TileCoord::new(10, 1, 1), Format::TopoJson, &mut out)
            .await
            .unwrap();

        let calls = codec.calls();
        assert_eq!(3, calls.len());
        assert_eq!(CodecCall::Encode { format: Format::TopoJson, features: 1 }, calls[0]);
        assert_eq!(CodecCall::Encode { format: Format::TopoJson, features: 0 }, calls[1]);
        match &calls[2] {
            CodecCall::MergeJson { format, names, tiles } => {
                assert_eq!(Format::TopoJson, *format);
                assert_eq!(&vec![String::from("a"), String::from("b")], names);
                assert!(tiles.iter().all(|tile| tile["type"] == "Topology"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_mime() {
        let host = StaticTiles::new(vec![
            ("a", "application/json", json!({"type": "FeatureCollection"})),
            ("b", "image/png", json!({"type": "FeatureCollection"})),
        ]);
        let codec = Arc::new(RecordingCodec::default());

        let mut out = Vec::new();
        let result = multi(&["a", "b"], &codec)
            .render_tile(&host, TileCoord::new(3, 1, 1), Format::Json, &mut out)
            .await;

        match result {
            Err(Error::NonJsonMime { layer, mime }) => {
                assert_eq!("b", layer);
                assert_eq!("image/png", mime);
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_unexpected_container_type() {
        let host = StaticTiles::new(vec![
            ("a", "application/json", json!({"type": "Topology"})),
            ("b", "application/json", json!({"type": "FeatureCollection"})),
        ]);
        let codec = Arc::new(RecordingCodec::default());

        let mut out = Vec::new();
        let result = multi(&["a", "b"], &codec)
            .render_tile(&host, TileCoord::new(3, 1, 1), Format::TopoJson, &mut out)
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::UnexpectedTileType { ref layer, .. } if layer == "b"));
        assert!(err.to_string().contains("FeatureCollection"));
    }

    #[tokio::test]
    async fn test_mvt_not_mergeable() {
        let codec = Arc::new(RecordingCodec::default());
        let host = StaticTiles::new(vec![]);

        let mut out = Vec::new();
        let result = multi(&["a"], &codec)
            .render_tile(&host, TileCoord::new(3, 1, 1), Format::Mvt, &mut out)
            .await;

        assert!(matches!(result, Err(Error::UnsupportedMultiFormat(Format::Mvt))));
        assert!(multi(&["a"], &codec).type_by_extension("mvt").is_err());
    }
}
