//! NetCDF reader backed by libnetcdf.

use std::collections::BTreeMap;
use std::path::Path;

use netcdf::AttributeValue;
use tracing::debug;

use crate::dataset::{AttrValue, DatasetReader, RawDataset, RawVariable};
use crate::error::ClimateError;

/// Reads the variable named by the `variable_id` global attribute together
/// with the coordinate variables of its dimensions. Files without that
/// attribute (CMIP5) get every `(time, lat, lon)` variable instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfReader;

impl DatasetReader for NetcdfReader {
    fn read(&self, path: &Path) -> Result<RawDataset, ClimateError> {
        let read_err = |message: String| ClimateError::DatasetRead {
            path: path.to_path_buf(),
            message,
        };
        let file = netcdf::open(path).map_err(|err| read_err(err.to_string()))?;

        let mut attributes = BTreeMap::new();
        for attr in file.attributes() {
            let value = attr.value().map_err(|err| read_err(err.to_string()))?;
            if let Some(value) = convert_attribute(value) {
                attributes.insert(attr.name().to_string(), value);
            }
        }

        let mut dataset = RawDataset {
            attributes,
            variables: BTreeMap::new(),
        };

        let data_vars: Vec<String> = match dataset.text_attribute("variable_id") {
            Some(variable_id) => vec![variable_id.to_string()],
            None => file
                .variables()
                .filter(|var| {
                    let dims: Vec<String> = var.dimensions().iter().map(|dim| dim.name()).collect();
                    is_gridded(&dims)
                })
                .map(|var| var.name())
                .collect(),
        };

        let mut wanted: Vec<String> = Vec::new();
        for name in data_vars {
            let Some(data_var) = file.variable(&name) else {
                continue;
            };
            let dims: Vec<String> = data_var.dimensions().iter().map(|dim| dim.name()).collect();
            for candidate in std::iter::once(name).chain(dims) {
                if !wanted.contains(&candidate) {
                    wanted.push(candidate);
                }
            }
        }

        for name in wanted {
            let Some(var) = file.variable(&name) else {
                debug!(path = %path.display(), variable = %name, "no coordinate variable");
                continue;
            };
            let mut var_attributes = BTreeMap::new();
            for attr in var.attributes() {
                let value = attr.value().map_err(|err| read_err(err.to_string()))?;
                if let Some(value) = convert_attribute(value) {
                    var_attributes.insert(attr.name().to_string(), value);
                }
            }
            let values: Vec<f64> = var
                .get_values::<f64, _>(..)
                .map_err(|err| read_err(format!("variable {name}: {err}")))?;
            dataset.variables.insert(
                name.clone(),
                RawVariable {
                    dimensions: var.dimensions().iter().map(|dim| dim.name()).collect(),
                    attributes: var_attributes,
                    values,
                },
            );
        }

        Ok(dataset)
    }
}

fn is_gridded(dims: &[String]) -> bool {
    matches!(
        dims,
        [time, lat, lon]
            if time == "time"
                && matches!(lat.as_str(), "lat" | "latitude")
                && matches!(lon.as_str(), "lon" | "longitude")
    )
}

fn convert_attribute(value: AttributeValue) -> Option<AttrValue> {
    match value {
        AttributeValue::Str(text) => Some(AttrValue::Text(text)),
        AttributeValue::Strs(texts) => texts.into_iter().next().map(AttrValue::Text),
        AttributeValue::Double(number) => Some(AttrValue::Number(number)),
        AttributeValue::Float(number) => Some(AttrValue::Number(f64::from(number))),
        AttributeValue::Int(number) => Some(AttrValue::Number(f64::from(number))),
        AttributeValue::Short(number) => Some(AttrValue::Number(f64::from(number))),
        AttributeValue::Longlong(number) => Some(AttrValue::Number(number as f64)),
        AttributeValue::Doubles(numbers) => numbers.first().copied().map(AttrValue::Number),
        AttributeValue::Floats(numbers) => {
            numbers.first().map(|number| AttrValue::Number(f64::from(*number)))
        }
        _ => None,
    }
}
