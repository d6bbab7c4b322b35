//! Output formats and the encoder boundary.
use std::fmt;
use std::io::Write;

use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureLayer};
use crate::tile::{GeoBounds, TileCoord};

/// The wire formats a tile can be rendered to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Mvt,
    Json,
    TopoJson,
    OpenScienceMap,
    Mapbox,
}

/// A fixed integer grid that tile-native formats express coordinates in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileGrid {
    /// Padding around the tile, in pixels of the current zoom level.
    pub padding: f64,
    /// Coordinates are scaled to `0..extent` within the tile.
    pub extent: f64,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::Mvt,
        Format::Json,
        Format::TopoJson,
        Format::OpenScienceMap,
        Format::Mapbox,
    ];

    /// Resolves a file extension to its mime-type and format.
    ///
    /// The tile-native formats report `image/png`; clients of those formats only accept that
    /// mime-type even though the payload is not an image.
    pub fn from_extension(extension: &str) -> Result<(&'static str, Format)> {
        let format = match extension.to_lowercase().as_str() {
            "mvt" => Format::Mvt,
            "json" => Format::Json,
            "topojson" => Format::TopoJson,
            "vtm" => Format::OpenScienceMap,
            "mapbox" => Format::Mapbox,
            _ => return Err(Error::InvalidExtension(extension.to_string())),
        };

        Ok((format.mime_type(), format))
    }

    /// Like [`Format::from_extension`], restricted to formats that can merge several layers.
    pub fn from_multi_extension(extension: &str) -> Result<(&'static str, Format)> {
        match Format::from_extension(extension) {
            Ok((mime, format)) if format.supports_multiple_layers() => Ok((mime, format)),
            _ => Err(Error::InvalidMultiExtension(extension.to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Mvt => "mvt",
            Format::Json => "json",
            Format::TopoJson => "topojson",
            Format::OpenScienceMap => "vtm",
            Format::Mapbox => "mapbox",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Format::Mvt => "application/octet-stream+mvt",
            Format::Json | Format::TopoJson => "application/json",
            Format::OpenScienceMap | Format::Mapbox => "image/png",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Mvt => "MVT",
            Format::Json => "JSON",
            Format::TopoJson => "TopoJSON",
            Format::OpenScienceMap => "OpenScienceMap",
            Format::Mapbox => "Mapbox",
        }
    }

    pub fn supports_multiple_layers(self) -> bool {
        !matches!(self, Format::Mvt)
    }

    /// The `type` member every JSON-family tile of this format carries.
    pub fn json_container(self) -> Option<&'static str> {
        match self {
            Format::Json => Some("FeatureCollection"),
            Format::TopoJson => Some("Topology"),
            _ => None,
        }
    }

    pub fn tile_grid(self) -> Option<TileGrid> {
        match self {
            Format::OpenScienceMap => Some(TileGrid {
                padding: 5.0,
                extent: 4096.0,
            }),
            Format::Mapbox => Some(TileGrid {
                padding: 0.0,
                extent: 4096.0,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-format information an encoder needs besides the features themselves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EncodeContext<'a> {
    Mvt,
    Json {
        zoom: u8,
        clip: bool,
    },
    TopoJson {
        bounds: GeoBounds,
        clip: bool,
    },
    OpenScienceMap {
        coord: TileCoord,
        layer_name: &'a str,
    },
    Mapbox {
        coord: TileCoord,
        layer_name: &'a str,
    },
}

impl<'a> EncodeContext<'a> {
    pub fn for_tile(format: Format, coord: TileCoord, clip: bool, layer_name: &'a str) -> Self {
        match format {
            Format::Mvt => EncodeContext::Mvt,
            Format::Json => EncodeContext::Json {
                zoom: coord.zoom,
                clip,
            },
            Format::TopoJson => EncodeContext::TopoJson {
                bounds: coord.geographic_bounds(),
                clip,
            },
            Format::OpenScienceMap => EncodeContext::OpenScienceMap { coord, layer_name },
            Format::Mapbox => EncodeContext::Mapbox { coord, layer_name },
        }
    }

    pub fn format(&self) -> Format {
        match self {
            EncodeContext::Mvt => Format::Mvt,
            EncodeContext::Json { .. } => Format::Json,
            EncodeContext::TopoJson { .. } => Format::TopoJson,
            EncodeContext::OpenScienceMap { .. } => Format::OpenScienceMap,
            EncodeContext::Mapbox { .. } => Format::Mapbox,
        }
    }
}

/// The wire-format encoders. Implementations own the exact bytes written to `out`.
pub trait TileCodec: Send + Sync {
    /// Encodes a single layer of features.
    fn encode(
        &self,
        out: &mut dyn Write,
        features: Vec<Feature>,
        context: &EncodeContext<'_>,
    ) -> Result<()>;

    /// Merges already encoded and parsed JSON-family sub-tiles into one tile.
    fn merge_json(
        &self,
        out: &mut dyn Write,
        format: Format,
        names: &[String],
        tiles: Vec<serde_json::Value>,
        coord: TileCoord,
    ) -> Result<()>;

    /// Encodes several named feature layers into one tile-native tile.
    fn merge_features(
        &self,
        out: &mut dyn Write,
        format: Format,
        layers: Vec<FeatureLayer>,
        coord: TileCoord,
    ) -> Result<()>;
}
