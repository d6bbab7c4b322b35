//! Feature records produced by PostGIS queries.
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Mandatory geometry column alias in every configured query.
pub const GEOMETRY_COLUMN: &str = "__geometry__";

/// Optional explicit feature id column alias.
pub const ID_COLUMN: &str = "__id__";

/// A scalar attribute value read from a query row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    /// Interprets the value as an integer the way a lenient config reader would.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(value) => Some(*value),
            PropertyValue::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            PropertyValue::String(value) => value.trim().parse().ok(),
            PropertyValue::Bool(value) => Some(*value as i64),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(value) => write!(f, "{value}"),
            PropertyValue::Int(value) => write!(f, "{value}"),
            PropertyValue::Float(value) => write!(f, "{value}"),
            PropertyValue::String(value) => f.write_str(value),
        }
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// One row of a tile query: WKB geometry, non-null attributes and an optional id.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub geometry: Vec<u8>,
    pub properties: Properties,
    pub id: Option<PropertyValue>,
}

impl Feature {
    pub fn new(geometry: Vec<u8>, properties: Properties, id: Option<PropertyValue>) -> Feature {
        Feature {
            geometry,
            properties,
            id,
        }
    }
}

/// A named group of features, as handed to multi-layer encoders.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureLayer {
    pub name: String,
    pub features: Vec<Feature>,
}

/// Column names returned by a query, in the order the database reported them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnSet(Vec<String>);

impl ColumnSet {
    pub fn contains(&self, column: &str) -> bool {
        self.0.iter().any(|name| name == column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ColumnSet(iter.into_iter().map(Into::into).collect())
    }
}
