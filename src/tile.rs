//! Tile addressing and the spherical mercator math needed to turn a tile into a query region.
use std::f64::consts::PI;
use std::fmt;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

/// Equatorial radius of the spherical mercator datum, in meters.
pub const EARTH_RADIUS: f64 = 6378137.0;

/// Highest zoom level with a precomputed unit distance.
pub const MAX_ZOOM: u8 = 21;

/// Size of one 256 pixel tile's pixel, in mercator meters, for each zoom level.
static UNIT_DISTANCES: Lazy<Vec<f64>> = Lazy::new(|| {
    (0..=MAX_ZOOM as i32)
        .map(|zoom| EARTH_RADIUS * 2.0 * PI / 2f64.powi(zoom + 8))
        .collect()
});

/// Returns the planar distance covered by one pixel at `zoom`.
pub fn unit_distance(zoom: u8) -> Result<f64> {
    UNIT_DISTANCES
        .get(zoom as usize)
        .copied()
        .ok_or(Error::UnsupportedZoom(zoom))
}

/// A slippy map tile in XYZ format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> TileCoord {
        TileCoord { zoom, x, y }
    }

    /// Spherical mercator bounds of this tile, from its bottom-left to its top-right corner.
    pub fn mercator_bounds(&self) -> BoundingBox {
        let span = 2.0 * PI * EARTH_RADIUS;
        let tiles = 2f64.powi(self.zoom as i32);
        let origin = PI * EARTH_RADIUS;

        BoundingBox {
            xmin: self.x as f64 / tiles * span - origin,
            ymin: origin - (self.y as f64 + 1.0) / tiles * span,
            xmax: (self.x as f64 + 1.0) / tiles * span - origin,
            ymax: origin - self.y as f64 / tiles * span,
        }
    }

    /// Longitude/latitude bounds of this tile.
    pub fn geographic_bounds(&self) -> GeoBounds {
        let (min_lon, min_lat) = slippy_map_tilenames::tile2lonlat(self.x, self.y + 1, self.zoom);
        let (max_lon, max_lat) = slippy_map_tilenames::tile2lonlat(self.x + 1, self.y, self.zoom);

        GeoBounds {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// An axis-aligned rectangle in the layer's SRID.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> BoundingBox {
        BoundingBox {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Grows the box by `amount` in every direction.
    pub fn pad(&self, amount: f64) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin - amount,
            ymin: self.ymin - amount,
            xmax: self.xmax + amount,
            ymax: self.ymax + amount,
        }
    }

    /// Grows each side by `factor` times the current width or height.
    pub fn expand(&self, factor: f64) -> BoundingBox {
        let dx = self.width() * factor;
        let dy = self.height() * factor;

        BoundingBox {
            xmin: self.xmin - dx,
            ymin: self.ymin - dy,
            xmax: self.xmax + dx,
            ymax: self.ymax + dy,
        }
    }
}

/// Longitude/latitude extent, as handed to TopoJSON encoders.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}
