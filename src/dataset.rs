use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ClimateError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Number(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(value) => Some(value.as_str()),
            AttrValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(value) => Some(*value),
            AttrValue::Text(value) => value.trim().parse().ok(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawVariable {
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
    pub values: Vec<f64>,
}

impl RawVariable {
    pub fn text_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(AttrValue::as_text)
    }

    pub fn number_attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).and_then(AttrValue::as_number)
    }
}

/// In-memory read of one scientific-data file: global attributes plus the data
/// variable and the coordinate variables it is laid out on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawDataset {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub variables: BTreeMap<String, RawVariable>,
}

impl RawDataset {
    pub fn text_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(AttrValue::as_text)
    }

    pub fn variable(&self, name: &str) -> Option<&RawVariable> {
        self.variables.get(name)
    }
}

pub trait DatasetReader {
    fn read(&self, path: &Path) -> Result<RawDataset, ClimateError>;
}

impl<T: DatasetReader + ?Sized> DatasetReader for &T {
    fn read(&self, path: &Path) -> Result<RawDataset, ClimateError> {
        (**self).read(path)
    }
}
