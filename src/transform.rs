//! Per-feature transformations applied after a tile query runs.
use serde::Deserialize;

use crate::feature::{Feature, PropertyValue};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformFn {
    /// Folds osm2pgsql's negative relation ids into a positive `osm_id` plus an `osm_relation` flag.
    NormalizeOsmId,
}

impl TransformFn {
    pub fn apply(self, feature: &mut Feature) {
        match self {
            TransformFn::NormalizeOsmId => normalize_osm_id(feature),
        }
    }
}

fn normalize_osm_id(feature: &mut Feature) {
    let Some(osm_id) = feature.properties.get("osm_id").and_then(PropertyValue::as_int) else {
        return;
    };

    if osm_id < 0 {
        // i64::MIN has no positive counterpart
        let Some(relation_id) = osm_id.checked_neg() else {
            return;
        };
        feature
            .properties
            .insert(String::from("osm_id"), PropertyValue::Int(relation_id));
        feature
            .properties
            .insert(String::from("osm_relation"), PropertyValue::Bool(true));
    } else {
        feature
            .properties
            .insert(String::from("osm_id"), PropertyValue::Int(osm_id));
    }
}
