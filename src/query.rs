//! PostGIS query synthesis.
//!
//! A configured query is wrapped in an outer `SELECT` that clips, simplifies, reprojects and
//! scales its `__geometry__` column for one tile and one output format.
use tracing::debug;

use crate::error::{Error, Result};
use crate::feature::{ColumnSet, GEOMETRY_COLUMN, ID_COLUMN};
use crate::format::Format;
use crate::tile::{unit_distance, BoundingBox};

/// Placeholder in configured queries for the tile's bounding box geometry.
pub const BBOX_TOKEN: &str = "!bbox!";

/// SRID of longitude/latitude output.
pub const GEOGRAPHIC_SRID: i32 = 4326;

/// Bounding box geometry expression used when querying a tile.
pub fn bbox_expression(srid: i32, bounds: &BoundingBox) -> String {
    format!(
        "ST_SetSRID(ST_MakeBox2D(ST_MakePoint({:.2}, {:.2}), ST_MakePoint({:.2}, {:.2})), {})",
        bounds.xmin, bounds.ymin, bounds.xmax, bounds.ymax, srid
    )
}

/// Everything about one tile's query that is shared by all output formats.
#[derive(Clone, Debug)]
pub struct QueryBuilder<'a> {
    pub srid: i32,
    pub subquery: &'a str,
    pub columns: &'a ColumnSet,
    pub bounds: BoundingBox,
    pub tolerance: Option<f64>,
    pub clip: bool,
}

impl QueryBuilder<'_> {
    /// Builds a query for one output variant.
    ///
    /// `padding` grows the query region in the layer's units, and `scale` maps the unpadded
    /// bounds onto `0..scale` on both axes. Geometry in the padding area lands outside that range.
    pub fn build(&self, geographic: bool, padding: f64, scale: Option<f64>) -> Result<String> {
        if !self.columns.contains(GEOMETRY_COLUMN) {
            return Err(Error::MissingGeometryColumn(self.subquery.to_string()));
        }

        let bounds = &self.bounds;
        let bbox = bbox_expression(self.srid, &bounds.pad(padding));
        let mut geom = format!("q.{GEOMETRY_COLUMN}");

        if self.clip {
            geom = format!("ST_Intersection({geom}, {bbox})");
        }

        if let Some(tolerance) = self.tolerance {
            geom = format!("ST_SimplifyPreserveTopology({geom}, {tolerance:.2})");
        }

        if geographic {
            geom = format!("ST_Transform({geom}, {GEOGRAPHIC_SRID})");
        }

        if let Some(scale) = scale {
            geom = format!(
                "ST_TransScale({}, {:.2}, {:.2}, ({:.2} / ({:.2} - {:.2})), ({:.2} / ({:.2} - {:.2})))",
                geom,
                -bounds.xmin,
                -bounds.ymin,
                scale,
                bounds.xmax,
                bounds.xmin,
                scale,
                bounds.ymax,
                bounds.ymin
            );
        }

        let subquery = self.subquery.replace(BBOX_TOKEN, &bbox);

        let mut columns: Vec<String> = self
            .columns
            .iter()
            .filter(|column| *column != GEOMETRY_COLUMN)
            .map(|column| format!("q.\"{}\"", column.replace('"', "\"\"")))
            .collect();

        if !self.columns.contains(ID_COLUMN) {
            columns.push(format!(
                "Substr(MD5(ST_AsBinary(q.{GEOMETRY_COLUMN})), 1, 10) AS {ID_COLUMN}"
            ));
        }

        Ok(format!(
            "SELECT {columns},
       ST_AsBinary({geom}) AS {GEOMETRY_COLUMN}
FROM (
  {subquery}
  ) AS q
WHERE ST_IsValid(q.{GEOMETRY_COLUMN})
  AND q.{GEOMETRY_COLUMN} && {bbox}
  AND ST_Intersects(q.{GEOMETRY_COLUMN}, {bbox})",
            columns = columns.join(", "),
        ))
    }
}

/// The materialized queries for every output format of one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryVariants {
    pub geographic: String,
    pub mercator: String,
    pub open_science_map: String,
    pub mapbox: String,
}

impl QueryVariants {
    pub fn build(builder: &QueryBuilder<'_>, zoom: u8) -> Result<QueryVariants> {
        let unit = unit_distance(zoom)?;
        let native = |format: Format| match format.tile_grid() {
            Some(grid) => builder.build(false, grid.padding * unit, Some(grid.extent)),
            None => builder.build(false, 0.0, None),
        };

        let variants = QueryVariants {
            geographic: builder.build(true, 0.0, None)?,
            mercator: builder.build(false, 0.0, None)?,
            open_science_map: native(Format::OpenScienceMap)?,
            mapbox: native(Format::Mapbox)?,
        };
        debug!(zoom, query = %variants.mercator, "Synthesized tile queries");

        Ok(variants)
    }

    pub fn get(&self, format: Format) -> &str {
        match format {
            Format::Json | Format::TopoJson => &self.geographic,
            Format::Mvt => &self.mercator,
            Format::OpenScienceMap => &self.open_science_map,
            Format::Mapbox => &self.mapbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBQUERY: &str = "SELECT way AS __geometry__, name FROM planet_osm_line WHERE way && !bbox!";

    fn columns() -> ColumnSet {
        ColumnSet::from_iter(["__geometry__", "name"])
    }

    fn builder<'a>(columns: &'a ColumnSet, tolerance: Option<f64>, clip: bool) -> QueryBuilder<'a> {
        QueryBuilder {
            srid: 900913,
            subquery: SUBQUERY,
            columns,
            bounds: BoundingBox::new(0.0, 0.0, 100.0, 100.0),
            tolerance,
            clip,
        }
    }

    #[test]
    fn test_filters_always_present() {
        let columns = columns();

        for clip in [true, false] {
            for tolerance in [None, Some(2.5)] {
                for scale in [None, Some(4096.0)] {
                    let sql = builder(&columns, tolerance, clip).build(false, 10.0, scale).unwrap();
                    assert_eq!(1, sql.matches("ST_IsValid").count());
                    assert_eq!(1, sql.matches("ST_Intersects(").count());
                }
            }
        }
    }

    #[test]
    fn test_unclipped_unsimplified() {
        let columns = columns();
        let sql = builder(&columns, None, false).build(false, 0.0, None).unwrap();

        assert!(!sql.contains("ST_Intersection"));
        assert!(!sql.contains("ST_SimplifyPreserveTopology"));
        assert!(!sql.contains("ST_Transform"));
        assert!(!sql.contains("ST_TransScale"));
        assert!(sql.contains("ST_AsBinary(q.__geometry__) AS __geometry__"));
    }

    #[test]
    fn test_geometry_wrapping_order() {
        let columns = columns();
        let sql = builder(&columns, Some(2.5), true).build(true, 0.0, None).unwrap();

        let bbox = "ST_SetSRID(ST_MakeBox2D(ST_MakePoint(0.00, 0.00), ST_MakePoint(100.00, 100.00)), 900913)";
        let geom = format!(
            "ST_AsBinary(ST_Transform(ST_SimplifyPreserveTopology(ST_Intersection(q.__geometry__, {bbox}), 2.50), 4326))"
        );
        assert!(sql.contains(&geom), "{}", sql);
    }

    #[test]
    fn test_padding_and_scale() {
        let columns = columns();
        let sql = builder(&columns, None, true).build(false, 5.0, Some(4096.0)).unwrap();

        // The clip and filter use the padded box, the scale uses the tile itself
        assert!(sql.contains("ST_MakePoint(-5.00, -5.00), ST_MakePoint(105.00, 105.00)"));
        assert!(sql.contains(
            "ST_TransScale(ST_Intersection(q.__geometry__, ST_SetSRID(ST_MakeBox2D(ST_MakePoint(-5.00, -5.00), ST_MakePoint(105.00, 105.00)), 900913)), "
        ), "{}", sql);
        assert!(sql.contains("(4096.00 / (100.00 - 0.00)), (4096.00 / (100.00 - 0.00)))"));
    }

    #[test]
    fn test_bbox_token_substituted() {
        let columns = columns();
        let sql = builder(&columns, None, false).build(false, 0.0, None).unwrap();

        assert!(!sql.contains(BBOX_TOKEN));
        assert!(sql.contains("WHERE way && ST_SetSRID("));
    }

    #[test]
    fn test_id_columns() {
        let columns = columns();
        let sql = builder(&columns, None, false).build(false, 0.0, None).unwrap();
        assert!(sql.contains("q.\"name\", Substr(MD5(ST_AsBinary(q.__geometry__)), 1, 10) AS __id__"));
        assert!(!sql.contains("q.\"__geometry__\""));

        let with_id = ColumnSet::from_iter(["__id__", "__geometry__"]);
        let sql = builder(&with_id, None, false).build(false, 0.0, None).unwrap();
        assert!(sql.contains("SELECT q.\"__id__\",\n"));
        assert!(!sql.contains("MD5"));
    }

    #[test]
    fn test_missing_geometry_column() {
        let columns = ColumnSet::from_iter(["way", "name"]);

        match builder(&columns, None, true).build(false, 0.0, None) {
            Err(Error::MissingGeometryColumn(query)) => assert_eq!(SUBQUERY, query),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_variants_per_format() {
        let columns = columns();
        let variants = QueryVariants::build(&builder(&columns, None, true), 10).unwrap();

        assert_eq!(variants.get(Format::Json), variants.get(Format::TopoJson));
        assert!(variants.get(Format::Json).contains("ST_Transform"));
        assert!(!variants.get(Format::Mvt).contains("ST_Transform"));
        assert!(variants.get(Format::Mapbox).contains("ST_TransScale"));
        assert!(variants.get(Format::OpenScienceMap).contains("ST_TransScale"));
        assert_ne!(variants.get(Format::Mapbox), variants.get(Format::OpenScienceMap));
    }
}
