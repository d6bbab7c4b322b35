//! Named feature orderings, so clients draw features in a sensible stacking order.
use std::cmp::Ordering;

use serde::Deserialize;

use crate::feature::{Feature, PropertyValue};

const MISSING_SCALERANK: PropertyValue = PropertyValue::Int(1000);
const UNKNOWN_POPULATION: i64 = -1000;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortFn {
    Buildings,
    Earth,
    Landuse,
    Places,
    Pois,
    Roads,
    Water,
    Transit,
}

impl SortFn {
    pub fn apply(self, features: &mut [Feature]) {
        match self {
            SortFn::Buildings | SortFn::Landuse | SortFn::Water => sort_by_area_then_id(features),
            SortFn::Earth | SortFn::Pois | SortFn::Transit => sort_by_property(features, "id"),
            SortFn::Roads => sort_by_property(features, "sort_key"),
            SortFn::Places => sort_by_scalerank_then_population(features),
        }
    }
}

/// Orders property values with missing values first, then booleans, numbers and strings.
fn compare_values(a: Option<&PropertyValue>, b: Option<&PropertyValue>) -> Ordering {
    fn rank(value: Option<&PropertyValue>) -> u8 {
        match value {
            None => 0,
            Some(PropertyValue::Bool(_)) => 1,
            Some(PropertyValue::Int(_)) | Some(PropertyValue::Float(_)) => 2,
            Some(PropertyValue::String(_)) => 3,
        }
    }

    match (a, b) {
        (Some(PropertyValue::Bool(a)), Some(PropertyValue::Bool(b))) => a.cmp(b),
        (Some(PropertyValue::Int(a)), Some(PropertyValue::Int(b))) => a.cmp(b),
        (Some(PropertyValue::String(a)), Some(PropertyValue::String(b))) => a.cmp(b),
        (Some(a @ (PropertyValue::Int(_) | PropertyValue::Float(_))), Some(b @ (PropertyValue::Int(_) | PropertyValue::Float(_)))) => {
            as_float(a).total_cmp(&as_float(b))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn as_float(value: &PropertyValue) -> f64 {
    match value {
        PropertyValue::Int(value) => *value as f64,
        PropertyValue::Float(value) => *value,
        _ => f64::NAN,
    }
}

fn sort_by_property(features: &mut [Feature], property: &str) {
    features.sort_by(|a, b| compare_values(a.properties.get(property), b.properties.get(property)));
}

fn sort_by_area_then_id(features: &mut [Feature]) {
    sort_by_property(features, "id");
    features.sort_by(|a, b| compare_values(b.properties.get("area"), a.properties.get("area")));
}

fn population(feature: &Feature) -> i64 {
    feature
        .properties
        .get("population")
        .and_then(PropertyValue::as_int)
        .unwrap_or(UNKNOWN_POPULATION)
}

fn sort_by_scalerank_then_population(features: &mut [Feature]) {
    features.sort_by_key(|feature| std::cmp::Reverse(population(feature)));
    features.sort_by(|a, b| {
        compare_values(
            Some(a.properties.get("scalerank").unwrap_or(&MISSING_SCALERANK)),
            Some(b.properties.get("scalerank").unwrap_or(&MISSING_SCALERANK)),
        )
    });
}
