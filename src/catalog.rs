use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::array::NormalizedArray;
use crate::array_store::{self, ScenarioLabel};
use crate::domain::CatalogMode;
use crate::error::ClimateError;
use crate::store::Store;

pub const ZARR_DRIVER: &str = "zarr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryArgs {
    pub urlpath: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub variable: String,
    pub units: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<u64>,
    pub scenarios: Vec<ScenarioLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub driver: String,
    pub args: EntryArgs,
    pub metadata: EntryMetadata,
}

impl CatalogEntry {
    /// Loads the array store this entry points at.
    pub fn open(&self) -> Result<NormalizedArray, ClimateError> {
        array_store::read(&self.args.urlpath)
    }
}

/// Builds a catalog entry for a persisted store, reading its metadata.
pub fn describe(store_path: &Utf8Path, name: &str, description: &str) -> Result<CatalogEntry, ClimateError> {
    let metadata = array_store::read_metadata(store_path)?;
    Ok(CatalogEntry {
        name: name.to_string(),
        description: description.to_string(),
        driver: ZARR_DRIVER.to_string(),
        args: EntryArgs {
            urlpath: store_path.to_path_buf(),
        },
        metadata: EntryMetadata {
            dimensions: metadata.dimensions().iter().map(|dim| dim.to_string()).collect(),
            shape: metadata.shape.to_vec(),
            variable: metadata.attributes.variable,
            units: metadata.attributes.units,
            scenarios: metadata.attributes.scenarios,
        },
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub sources: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn load(path: &Utf8Path) -> Result<Self, ClimateError> {
        let read_err = |message: String| ClimateError::CatalogRead {
            path: path.as_std_path().to_path_buf(),
            message,
        };
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| read_err(err.to_string()))?;
        serde_yaml::from_str(&content).map_err(|err| read_err(err.to_string()))
    }

    /// Merges entries by name; a later entry replaces an earlier one.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut sources = BTreeMap::new();
        for entry in entries {
            let name = entry.name.clone();
            if let Some(previous) = sources.insert(name.clone(), entry) {
                warn!(
                    name = %name,
                    previous = %previous.args.urlpath,
                    "catalog entry replaced by a later entry with the same name"
                );
            }
        }
        Self { sources }
    }

    pub fn entry(&self, name: &str) -> Result<&CatalogEntry, ClimateError> {
        self.sources
            .get(name)
            .ok_or_else(|| ClimateError::EntryNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogAction {
    Existing,
    Written,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogWriteOutcome {
    pub path: Utf8PathBuf,
    pub action: CatalogAction,
    pub entries: usize,
}

/// True when a build in `mode` must leave the catalog at `path` alone.
pub fn is_frozen(path: &Utf8Path, mode: CatalogMode) -> bool {
    mode == CatalogMode::BuildOnce && path.as_std_path().exists()
}

pub fn write_catalog(
    entries: Vec<CatalogEntry>,
    path: &Utf8Path,
    mode: CatalogMode,
) -> Result<CatalogWriteOutcome, ClimateError> {
    if is_frozen(path, mode) {
        info!(path = %path, mode = %mode, "catalog exists, leaving it untouched");
        return Ok(CatalogWriteOutcome {
            path: path.to_path_buf(),
            action: CatalogAction::Existing,
            entries: 0,
        });
    }

    let catalog = Catalog::from_entries(entries);
    let yaml = catalog.to_yaml().map_err(|err| ClimateError::CatalogWrite {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })?;
    Store::write_bytes_atomic(path, yaml.as_bytes()).map_err(|err| ClimateError::CatalogWrite {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })?;
    info!(path = %path, entries = catalog.len(), "catalog written");

    Ok(CatalogWriteOutcome {
        path: path.to_path_buf(),
        action: CatalogAction::Written,
        entries: catalog.len(),
    })
}
