#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;

use climate_evolution::cds::{RetrievalClient, RetrievalParams};
use climate_evolution::dataset::{AttrValue, DatasetReader, RawDataset, RawVariable};
use climate_evolution::error::ClimateError;

/// Reads datasets serialized as JSON, standing in for NetCDF files.
pub struct JsonReader;

impl DatasetReader for JsonReader {
    fn read(&self, path: &Path) -> Result<RawDataset, ClimateError> {
        let content = fs::read_to_string(path).map_err(|err| ClimateError::DatasetRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|err| ClimateError::DatasetRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

/// Monthly grid on a 360-day calendar, one step per month of `years`.
pub fn monthly_dataset(
    experiment: Option<&str>,
    variable: &str,
    units: &str,
    years: RangeInclusive<i32>,
    latitude: &[f64],
    longitude: &[f64],
    value: impl Fn(i32, u32, usize, usize) -> f64,
) -> RawDataset {
    let mut times = Vec::new();
    let mut values = Vec::new();
    for year in years {
        for month in 1..=12u32 {
            times.push(f64::from((year - 1850) * 360) + f64::from((month - 1) * 30) + 15.0);
            for y in 0..latitude.len() {
                for x in 0..longitude.len() {
                    values.push(value(year, month, y, x));
                }
            }
        }
    }

    let mut attributes = BTreeMap::new();
    attributes.insert("variable_id".to_string(), AttrValue::from(variable));
    if let Some(experiment) = experiment {
        attributes.insert("experiment_id".to_string(), AttrValue::from(experiment));
    }

    let mut variables = BTreeMap::new();
    variables.insert(
        "time".to_string(),
        RawVariable {
            dimensions: vec!["time".to_string()],
            attributes: BTreeMap::from([
                ("units".to_string(), AttrValue::from("days since 1850-01-01")),
                ("calendar".to_string(), AttrValue::from("360_day")),
            ]),
            values: times,
        },
    );
    variables.insert(
        "lat".to_string(),
        RawVariable {
            dimensions: vec!["lat".to_string()],
            attributes: BTreeMap::new(),
            values: latitude.to_vec(),
        },
    );
    variables.insert(
        "lon".to_string(),
        RawVariable {
            dimensions: vec!["lon".to_string()],
            attributes: BTreeMap::new(),
            values: longitude.to_vec(),
        },
    );
    variables.insert(
        variable.to_string(),
        RawVariable {
            dimensions: vec!["time".to_string(), "lat".to_string(), "lon".to_string()],
            attributes: BTreeMap::from([("units".to_string(), AttrValue::from(units))]),
            values,
        },
    );

    RawDataset {
        attributes,
        variables,
    }
}

pub fn write_dataset(path: &Path, dataset: &RawDataset) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_vec(dataset).unwrap()).unwrap();
}

pub fn write_zip(path: &Path, members: &[(&str, Vec<u8>)]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, content) in members {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

/// Writes a gzip-compressed tarball. Member names are written raw so that
/// unsafe names can be produced too.
pub fn write_tgz(path: &Path, members: &[(&str, Vec<u8>)]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in members {
        let mut header = tar::Header::new_gnu();
        let raw = name.as_bytes();
        header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, content.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Retrieval client that writes a zip of canned datasets and counts its calls.
/// Archives are keyed by `experiment/variable`, falling back to `experiment`.
#[derive(Default)]
pub struct FakeClient {
    pub calls: Mutex<Vec<RetrievalParams>>,
    pub archives: HashMap<String, Vec<(String, RawDataset)>>,
}

impl FakeClient {
    pub fn with_archive(mut self, experiment: &str, members: Vec<(String, RawDataset)>) -> Self {
        self.archives.insert(experiment.to_string(), members);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl RetrievalClient for FakeClient {
    fn retrieve(
        &self,
        _dataset: &str,
        params: &RetrievalParams,
        destination: &Path,
    ) -> Result<u64, ClimateError> {
        self.calls.lock().unwrap().push(params.clone());
        let members = self
            .archives
            .get(&format!("{}/{}", params.experiment, params.variable))
            .or_else(|| self.archives.get(&params.experiment))
            .ok_or_else(|| ClimateError::CdsTask {
                request_id: "fake".to_string(),
                message: format!("no archive for {}", params.experiment),
            })?;
        let encoded: Vec<(&str, Vec<u8>)> = members
            .iter()
            .map(|(name, dataset)| (name.as_str(), serde_json::to_vec(dataset).unwrap()))
            .collect();
        write_zip(destination, &encoded);
        Ok(fs::metadata(destination).map(|meta| meta.len()).unwrap_or(0))
    }
}
