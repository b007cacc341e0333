//! Zarr V3 persistence of [`NormalizedArray`] values.
//!
//! Layout of one store directory:
//!
//! - root group attributes: variable, units, time dimension and encoding,
//!   scenario ids with display labels
//! - `/latitude`, `/longitude`: `float64` coordinates
//! - `/time` or `/year`: `int32` encoded periods
//! - `/<scenario id>`: `float32` data over `[time, latitude, longitude]`
//!
//! Stores are staged in a hidden sibling directory and published with a
//! rename, so a store at its final path is always complete.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::{Builder, TempDir};
use tracing::info;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

use crate::array::{LATITUDE, LONGITUDE, NormalizedArray, Period, TimeAxis, TimeDimension, TimeEncoding};
use crate::domain::Scenario;
use crate::error::ClimateError;
use crate::store::publish_dir;

/// Maximum number of time steps per chunk of a data array.
const TIME_CHUNK: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    SkipExisting,
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    Existing,
    Written,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioLabel {
    pub id: Scenario,
    pub label: String,
}

/// Attributes of the root group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAttributes {
    pub variable: String,
    pub units: String,
    pub time_dimension: TimeDimension,
    pub time_encoding: TimeEncoding,
    pub scenarios: Vec<ScenarioLabel>,
}

/// Store attributes plus the `[time, latitude, longitude]` shape, read without
/// loading any data.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreMetadata {
    pub attributes: StoreAttributes,
    pub shape: [u64; 3],
}

impl StoreMetadata {
    pub fn dimensions(&self) -> [&'static str; 3] {
        [self.attributes.time_dimension.name(), LATITUDE, LONGITUDE]
    }
}

type Storage = Arc<FilesystemStore>;

fn write_err(path: &Path, err: impl ToString) -> ClimateError {
    ClimateError::StoreWrite {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn read_err(path: &Path, err: impl ToString) -> ClimateError {
    ClimateError::StoreRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Persists `array` at `target`. With [`WriteMode::SkipExisting`] an existing
/// store is left untouched.
pub fn write(
    array: &NormalizedArray,
    target: &Utf8Path,
    mode: WriteMode,
) -> Result<(Utf8PathBuf, WriteAction), ClimateError> {
    let target_std = target.as_std_path();
    if target_std.exists() && mode == WriteMode::SkipExisting {
        info!(path = %target, variable = %array.variable, "array store already exists");
        return Ok((target.to_path_buf(), WriteAction::Existing));
    }

    let parent = target_std
        .parent()
        .ok_or_else(|| write_err(target_std, "store path has no parent directory"))?;
    fs::create_dir_all(parent).map_err(|err| write_err(target_std, err))?;
    let staging = Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)
        .map_err(|err| write_err(target_std, err))?;

    write_store(array, staging.path()).map_err(|err| write_err(target_std, err))?;
    publish_staged(staging, target_std).map_err(|err| write_err(target_std, err))?;

    info!(
        path = %target,
        variable = %array.variable,
        scenarios = array.scenarios.len(),
        "array store written"
    );
    Ok((target.to_path_buf(), WriteAction::Written))
}

/// Moves a staged store to `target`. The staging directory is removed when
/// publishing fails.
fn publish_staged(staging: TempDir, target: &Path) -> io::Result<()> {
    publish_dir(staging.path(), target)?;
    // Now lives at `target`; dropping the guard must not delete it.
    let _ = staging.keep();
    Ok(())
}

fn write_store(array: &NormalizedArray, root: &Path) -> Result<(), String> {
    let store: Storage = Arc::new(FilesystemStore::new(root).map_err(|err| err.to_string())?);

    let attributes = StoreAttributes {
        variable: array.variable.clone(),
        units: array.units.clone(),
        time_dimension: array.time.dimension,
        time_encoding: array.time.encoding(),
        scenarios: array
            .scenarios
            .keys()
            .map(|scenario| ScenarioLabel {
                id: *scenario,
                label: scenario.label().to_string(),
            })
            .collect(),
    };
    let attributes = match serde_json::to_value(&attributes).map_err(|err| err.to_string())? {
        serde_json::Value::Object(map) => map,
        _ => return Err("store attributes are not an object".to_string()),
    };
    let mut group = GroupBuilder::new();
    group.attributes(attributes);
    group
        .build(store.clone(), "/")
        .map_err(|err| err.to_string())?
        .store_metadata()
        .map_err(|err| err.to_string())?;

    write_coordinate(&store, LATITUDE, &array.latitude)?;
    write_coordinate(&store, LONGITUDE, &array.longitude)?;

    let encoded: Vec<i32> = array.time.periods.iter().map(Period::encode).collect();
    let time_name = array.time.dimension.name();
    let time = ArrayBuilder::new(
        vec![encoded.len() as u64],
        DataType::Int32,
        vec![chunk_len(encoded.len())].try_into().map_err(|err| format!("{err:?}"))?,
        FillValue::from(0i32),
    )
    .dimension_names(Some(vec![time_name]))
    .build(store.clone(), &format!("/{time_name}"))
    .map_err(|err| err.to_string())?;
    time.store_metadata().map_err(|err| err.to_string())?;
    if !encoded.is_empty() {
        time.store_array_subset_elements::<i32>(&ArraySubset::new_with_shape(vec![encoded.len() as u64]), &encoded)
            .map_err(|err| err.to_string())?;
    }

    let [nt, ny, nx] = array.shape();
    let shape = vec![nt as u64, ny as u64, nx as u64];
    for (scenario, data) in &array.scenarios {
        let chunks = vec![chunk_len(nt.min(TIME_CHUNK)), chunk_len(ny), chunk_len(nx)];
        let block = ArrayBuilder::new(
            shape.clone(),
            DataType::Float32,
            chunks.try_into().map_err(|err| format!("{err:?}"))?,
            FillValue::from(f32::NAN),
        )
        .dimension_names(Some(vec![time_name, LATITUDE, LONGITUDE]))
        .build(store.clone(), &format!("/{}", scenario.id()))
        .map_err(|err| err.to_string())?;
        block.store_metadata().map_err(|err| err.to_string())?;
        if !data.is_empty() {
            block
                .store_array_subset_elements::<f32>(&ArraySubset::new_with_shape(shape.clone()), data)
                .map_err(|err| err.to_string())?;
        }
    }
    Ok(())
}

fn write_coordinate(store: &Storage, name: &str, values: &[f64]) -> Result<(), String> {
    let array = ArrayBuilder::new(
        vec![values.len() as u64],
        DataType::Float64,
        vec![chunk_len(values.len())].try_into().map_err(|err| format!("{err:?}"))?,
        FillValue::from(f64::NAN),
    )
    .dimension_names(Some(vec![name]))
    .build(store.clone(), &format!("/{name}"))
    .map_err(|err| err.to_string())?;
    array.store_metadata().map_err(|err| err.to_string())?;
    if !values.is_empty() {
        array
            .store_array_subset_elements::<f64>(&ArraySubset::new_with_shape(vec![values.len() as u64]), values)
            .map_err(|err| err.to_string())?;
    }
    Ok(())
}

fn chunk_len(len: usize) -> u64 {
    len.max(1) as u64
}

fn open_store(path: &Path) -> Result<Storage, ClimateError> {
    if !path.is_dir() {
        return Err(read_err(path, "store directory does not exist"));
    }
    Ok(Arc::new(FilesystemStore::new(path).map_err(|err| read_err(path, err))?))
}

fn read_attributes(store: &Storage, path: &Path) -> Result<StoreAttributes, ClimateError> {
    let group = Group::open(store.clone(), "/").map_err(|err| read_err(path, err))?;
    serde_json::from_value(serde_json::Value::Object(group.attributes().clone()))
        .map_err(|err| read_err(path, format!("root attributes: {err}")))
}

fn read_elements<T: zarrs::array::ElementOwned>(
    store: &Storage,
    name: &str,
    path: &Path,
) -> Result<Vec<T>, ClimateError> {
    let array = Array::open(store.clone(), &format!("/{name}"))
        .map_err(|err| read_err(path, format!("{name}: {err}")))?;
    let subset = ArraySubset::new_with_shape(array.shape().to_vec());
    array
        .retrieve_array_subset_elements::<T>(&subset)
        .map_err(|err| read_err(path, format!("{name}: {err}")))
}

/// Reads the root attributes and data shape of a store.
pub fn read_metadata(path: &Utf8Path) -> Result<StoreMetadata, ClimateError> {
    let path = path.as_std_path();
    let store = open_store(path)?;
    let attributes = read_attributes(&store, path)?;

    let nt = Array::open(store.clone(), &format!("/{}", attributes.time_dimension.name()))
        .map_err(|err| read_err(path, err))?
        .shape()[0];
    let ny = Array::open(store.clone(), &format!("/{LATITUDE}"))
        .map_err(|err| read_err(path, err))?
        .shape()[0];
    let nx = Array::open(store.clone(), &format!("/{LONGITUDE}"))
        .map_err(|err| read_err(path, err))?
        .shape()[0];

    Ok(StoreMetadata {
        attributes,
        shape: [nt, ny, nx],
    })
}

/// Loads a full store back into memory.
pub fn read(path: &Utf8Path) -> Result<NormalizedArray, ClimateError> {
    let std_path = path.as_std_path();
    let store = open_store(std_path)?;
    let attributes = read_attributes(&store, std_path)?;

    let latitude = read_elements::<f64>(&store, LATITUDE, std_path)?;
    let longitude = read_elements::<f64>(&store, LONGITUDE, std_path)?;
    let periods = read_elements::<i32>(&store, attributes.time_dimension.name(), std_path)?
        .into_iter()
        .map(|value| Period::decode(value, attributes.time_encoding))
        .collect();

    let mut scenarios = BTreeMap::new();
    for scenario in &attributes.scenarios {
        let data = read_elements::<f32>(&store, scenario.id.id(), std_path)?;
        scenarios.insert(scenario.id, data);
    }

    Ok(NormalizedArray {
        variable: attributes.variable,
        units: attributes.units,
        time: TimeAxis {
            dimension: attributes.time_dimension,
            periods,
        },
        latitude,
        longitude,
        scenarios,
    })
}
