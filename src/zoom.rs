//! Per-zoom query selection and simplification tolerance.
use crate::error::Result;
use crate::tile::unit_distance;

/// Query templates indexed by zoom level.
///
/// The last entry is repeated for all higher zooms, and a `None` entry means the layer has no
/// data at that zoom.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZoomQueries(Vec<Option<String>>);

impl ZoomQueries {
    pub fn new(queries: Vec<Option<String>>) -> ZoomQueries {
        ZoomQueries(queries)
    }

    pub fn get(&self, zoom: u8) -> Option<&str> {
        self.0
            .get(zoom as usize)
            .or_else(|| self.0.last())
            .and_then(|query| query.as_deref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pixel-based geometry simplification settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Simplification {
    /// Number of pixels to simplify to. 0.5 suits retina tiles.
    pub scale: f64,
    /// First zoom level at which geometry is no longer simplified.
    pub until: u8,
}

impl Default for Simplification {
    fn default() -> Self {
        Simplification {
            scale: 1.0,
            until: 16,
        }
    }
}

impl Simplification {
    pub fn tolerance(&self, zoom: u8) -> Result<Option<f64>> {
        if zoom < self.until {
            Ok(Some(self.scale * unit_distance(zoom)?))
        } else {
            Ok(None)
        }
    }
}
