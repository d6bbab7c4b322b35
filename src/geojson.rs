//! GeoJSON encoding for the `json` format.
use std::io::Write;

use geozero::wkb::Wkb;
use geozero::ToJson;
use serde_json::{json, Map, Number, Value};

use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureLayer};
use crate::format::{EncodeContext, Format, TileCodec};
use crate::tile::TileCoord;

/// Encodes JSON tiles as GeoJSON feature collections.
///
/// Multi-layer JSON tiles are an object mapping each layer name to its collection. Other
/// formats are left to other codecs.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeoJsonCodec;

/// Decimal places needed to resolve a pixel at `zoom`.
fn precision(zoom: u8) -> i32 {
    (2f64.powi(zoom as i32) * 256.0 / 360.0).log10().ceil().max(0.0) as i32
}

fn round_coordinates(value: &mut Value, factor: f64) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| round_coordinates(item, factor)),
        Value::Number(number) if number.is_f64() => {
            if let Some(rounded) = number
                .as_f64()
                .and_then(|n| Number::from_f64((n * factor).round() / factor))
            {
                *number = rounded;
            }
        }
        _ => {}
    }
}

fn encode_feature(feature: Feature, factor: f64) -> Result<Value> {
    let mut geometry: Value = serde_json::from_str(&Wkb(feature.geometry).to_json()?)?;
    if let Some(coordinates) = geometry.get_mut("coordinates") {
        round_coordinates(coordinates, factor);
    }

    let mut encoded = json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": serde_json::to_value(feature.properties)?,
    });
    if let Some(id) = feature.id {
        encoded["id"] = serde_json::to_value(id)?;
    }

    Ok(encoded)
}

impl GeoJsonCodec {
    pub fn feature_collection(&self, features: Vec<Feature>, zoom: u8) -> Result<Value> {
        let factor = 10f64.powi(precision(zoom));
        let features = features
            .into_iter()
            .map(|feature| encode_feature(feature, factor))
            .collect::<Result<Vec<_>>>()?;

        Ok(json!({
            "type": "FeatureCollection",
            "features": features,
        }))
    }
}

impl TileCodec for GeoJsonCodec {
    fn encode(
        &self,
        out: &mut dyn Write,
        features: Vec<Feature>,
        context: &EncodeContext<'_>,
    ) -> Result<()> {
        match context {
            EncodeContext::Json { zoom, .. } => {
                serde_json::to_writer(out, &self.feature_collection(features, *zoom)?)?;
                Ok(())
            }
            other => Err(Error::CodecUnavailable(other.format())),
        }
    }

    fn merge_json(
        &self,
        out: &mut dyn Write,
        format: Format,
        names: &[String],
        tiles: Vec<Value>,
        _coord: TileCoord,
    ) -> Result<()> {
        if format != Format::Json {
            return Err(Error::CodecUnavailable(format));
        }

        let merged: Map<String, Value> = names.iter().cloned().zip(tiles).collect();
        serde_json::to_writer(out, &Value::Object(merged))?;

        Ok(())
    }

    fn merge_features(
        &self,
        _out: &mut dyn Write,
        format: Format,
        _layers: Vec<FeatureLayer>,
        _coord: TileCoord,
    ) -> Result<()> {
        Err(Error::CodecUnavailable(format))
    }
}
