use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ClimateError {
    #[error("unknown scenario: {0}")]
    InvalidScenario(String),

    #[error("invalid resample rule: {0}")]
    InvalidResampleRule(String),

    #[error("invalid archive format: {0}")]
    InvalidArchiveFormat(String),

    #[error("invalid temporal resolution: {0}")]
    InvalidTemporalResolution(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    ConfigValue(String),

    #[error("missing CDS credentials: set CDSAPI_URL and CDSAPI_KEY or provide ~/.cdsapirc")]
    MissingCredentials,

    #[error("invalid CDS credentials: {0}")]
    InvalidCredentials(String),

    #[error("CDS request failed: {0}")]
    CdsHttp(String),

    #[error("CDS returned status {status}: {message}")]
    CdsStatus { status: u16, message: String },

    #[error("CDS task {request_id} failed: {message}")]
    CdsTask { request_id: String, message: String },

    #[error("failed to extract archive {archive}: {message}")]
    Extraction { archive: PathBuf, message: String },

    #[error("unsupported archive {0}: expected .zip, .tgz or .tar.gz")]
    UnsupportedArchive(PathBuf),

    #[error("archive {0} contains no scientific-data (.nc) files")]
    NoDataFiles(PathBuf),

    #[error("archive member escapes the extraction directory: {0}")]
    UnsafeArchiveMember(String),

    #[error("failed to read dataset {path}: {message}")]
    DatasetRead { path: PathBuf, message: String },

    #[error("dataset {path} is missing required attribute `{attribute}`")]
    MissingAttribute { path: PathBuf, attribute: String },

    #[error("dataset {path} declares blank units for variable `{variable}`")]
    UnsupportedUnit { path: PathBuf, variable: String },

    #[error("dataset {path} holds variable `{found}`, other inputs hold `{expected}`")]
    VariableMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("units mismatch while merging: `{expected}` vs `{found}`")]
    UnitsMismatch { expected: String, found: String },

    #[error("dataset {path} has unparsable time units `{units}`")]
    InvalidTimeUnits { path: PathBuf, units: String },

    #[error("dataset {path} uses unsupported calendar `{calendar}`")]
    UnsupportedCalendar { path: PathBuf, calendar: String },

    #[error("dataset {path} has unexpected layout: {message}")]
    InvalidLayout { path: PathBuf, message: String },

    #[error("dimension `{dimension}` mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        dimension: String,
        expected: String,
        found: String,
    },

    #[error("longitude {0} appears twice after wrapping to [-180, 180)")]
    DuplicateLongitude(f64),

    #[error("no time steps selected: {0}")]
    EmptySelection(String),

    #[error("nothing to normalize: no input files")]
    NoInputs,

    #[error("failed to write array store {path}: {message}")]
    StoreWrite { path: PathBuf, message: String },

    #[error("failed to read array store {path}: {message}")]
    StoreRead { path: PathBuf, message: String },

    #[error("failed to read catalog {path}: {message}")]
    CatalogRead { path: PathBuf, message: String },

    #[error("failed to write catalog {path}: {message}")]
    CatalogWrite { path: PathBuf, message: String },

    #[error("catalog entry not found: {0}")]
    EntryNotFound(String),

    #[error("scenario {scenario} not present in dataset {dataset}")]
    ScenarioNotFound { dataset: String, scenario: String },

    #[error("{failed} pipeline unit(s) failed")]
    BatchFailed { failed: usize },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
