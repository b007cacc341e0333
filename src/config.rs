use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ArchiveFormat, CatalogMode, FailurePolicy, ResampleRule, Scenario, TemporalResolution,
};
use crate::error::ClimateError;

pub const DEFAULT_CONFIG_FILE: &str = "climate-evolution.json";
pub const NOW: &str = "now";

const DEFAULT_DATA_ROOT: &str = "/data/climate";
const DEFAULT_CATALOG_ROOT: &str = "catalogs";
const DEFAULT_POLL_SECS: u64 = 5;
const OLDEST_DATE: &str = "1950-01-01";
const FURTHER_DATE: &str = "2100-12-01";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub catalog_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub on_error: Option<FailurePolicy>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub projections: ProjectionsConfig,
    #[serde(default)]
    pub periods: PeriodsConfig,
}

/// Multi-experiment pipeline: one store and one entry per variable.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProjectionsConfig {
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub catalog_mode: Option<CatalogMode>,
    #[serde(default)]
    pub temporal_resolution: Option<TemporalResolution>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub format: Option<ArchiveFormat>,
    #[serde(default)]
    pub resample: Option<ResampleRule>,
    #[serde(default)]
    pub experiments: Option<Vec<String>>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
}

/// Date-bounded pipeline: one yearly store and one entry per period.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PeriodsConfig {
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub catalog_mode: Option<CatalogMode>,
    #[serde(default)]
    pub temporal_resolution: Option<TemporalResolution>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub format: Option<ArchiveFormat>,
    /// Data variable inside files that lack a `variable_id` attribute.
    #[serde(default)]
    pub data_variable: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entries: Option<Vec<PeriodEntryConfig>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeriodEntryConfig {
    pub name: String,
    pub scenario: String,
    /// Experiment whose archive provides the data; defaults to `scenario`.
    #[serde(default)]
    pub source: Option<String>,
    /// `YYYY-MM-DD` or `now`.
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub dataset: String,
    pub temporal_resolution: TemporalResolution,
    pub level: String,
    pub model: String,
    pub format: ArchiveFormat,
}

#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    pub source: ArchiveSource,
    pub catalog_file: String,
    pub catalog_mode: CatalogMode,
    pub resample: ResampleRule,
    pub experiments: Vec<Scenario>,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodEntry {
    pub name: String,
    pub scenario: Scenario,
    pub source: Scenario,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct PeriodPlan {
    pub source: ArchiveSource,
    pub catalog_file: String,
    pub catalog_mode: CatalogMode,
    pub variable: String,
    pub data_variable: String,
    pub name: String,
    pub entries: Vec<PeriodEntry>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_root: Utf8PathBuf,
    pub catalog_root: Utf8PathBuf,
    pub on_error: FailurePolicy,
    pub poll_interval: Duration,
    pub projections: ProjectionPlan,
    pub periods: PeriodPlan,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or the default config file when it exists, or falls back
    /// to built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ClimateError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(ClimateError::MissingConfig(config_path));
            }
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ClimateError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ClimateError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ClimateError> {
        Self::resolve_config_at(config, Local::now().date_naive())
    }

    /// Resolves against an explicit `today`, which anchors `now` bounds.
    pub fn resolve_config_at(
        config: Config,
        today: NaiveDate,
    ) -> Result<ResolvedConfig, ClimateError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let poll_secs = config.poll_interval_secs.unwrap_or(DEFAULT_POLL_SECS);
        if poll_secs == 0 {
            return Err(ClimateError::ConfigValue(
                "poll_interval_secs must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            data_root: config
                .data_root
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATA_ROOT)),
            catalog_root: config
                .catalog_root
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CATALOG_ROOT)),
            on_error: config.on_error.unwrap_or_default(),
            poll_interval: Duration::from_secs(poll_secs),
            projections: resolve_projections(config.projections)?,
            periods: resolve_periods(config.periods, today)?,
        })
    }
}

fn resolve_projections(config: ProjectionsConfig) -> Result<ProjectionPlan, ClimateError> {
    let experiments = config
        .experiments
        .unwrap_or_else(|| vec!["historical".to_string(), "ssp2_4_5".to_string()])
        .iter()
        .map(|value| value.parse::<Scenario>())
        .collect::<Result<Vec<_>, _>>()?;
    if experiments.is_empty() {
        return Err(ClimateError::ConfigValue(
            "projections.experiments must not be empty".to_string(),
        ));
    }

    let variables = config
        .variables
        .unwrap_or_else(|| vec!["near_surface_air_temperature".to_string()]);
    if variables.is_empty() || variables.iter().any(|variable| variable.trim().is_empty()) {
        return Err(ClimateError::ConfigValue(
            "projections.variables must list non-empty names".to_string(),
        ));
    }

    Ok(ProjectionPlan {
        source: ArchiveSource {
            dataset: config
                .dataset
                .unwrap_or_else(|| "projections-cmip6".to_string()),
            temporal_resolution: config
                .temporal_resolution
                .unwrap_or(TemporalResolution::Monthly),
            level: config.level.unwrap_or_else(|| "single_levels".to_string()),
            model: config.model.unwrap_or_else(|| "mpi_esm1_2_lr".to_string()),
            format: config.format.unwrap_or(ArchiveFormat::Zip),
        },
        catalog_file: config
            .catalog
            .unwrap_or_else(|| "ecmwf_cmip6_catalog.yaml".to_string()),
        catalog_mode: config.catalog_mode.unwrap_or(CatalogMode::BuildFresh),
        resample: config.resample.unwrap_or_default(),
        experiments,
        variables,
    })
}

fn resolve_periods(config: PeriodsConfig, today: NaiveDate) -> Result<PeriodPlan, ClimateError> {
    let entries = config.entries.unwrap_or_else(default_period_entries);
    if entries.is_empty() {
        return Err(ClimateError::ConfigValue(
            "periods.entries must not be empty".to_string(),
        ));
    }
    let entries = entries
        .into_iter()
        .map(|entry| resolve_period_entry(entry, today))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PeriodPlan {
        source: ArchiveSource {
            dataset: config
                .dataset
                .unwrap_or_else(|| "projections-cmip5-monthly-single-levels".to_string()),
            temporal_resolution: config
                .temporal_resolution
                .unwrap_or(TemporalResolution::Monthly),
            level: config.level.unwrap_or_else(|| "single_levels".to_string()),
            model: config.model.unwrap_or_else(|| "ipsl_cm5a_mr".to_string()),
            format: config.format.unwrap_or(ArchiveFormat::Tgz),
        },
        catalog_file: config
            .catalog
            .unwrap_or_else(|| "climate_catalog.yaml".to_string()),
        catalog_mode: config.catalog_mode.unwrap_or(CatalogMode::BuildOnce),
        variable: config
            .variable
            .unwrap_or_else(|| "2m_temperature".to_string()),
        data_variable: config.data_variable.unwrap_or_else(|| "tas".to_string()),
        name: config.name.unwrap_or_else(|| "temperature".to_string()),
        entries,
    })
}

fn resolve_period_entry(
    entry: PeriodEntryConfig,
    today: NaiveDate,
) -> Result<PeriodEntry, ClimateError> {
    let scenario: Scenario = entry.scenario.parse()?;
    let source = match &entry.source {
        Some(source) => source.parse()?,
        None => scenario,
    };
    let start = resolve_date_bound(&entry.start, today)?;
    let end = resolve_date_bound(&entry.end, today)?;
    if start >= end {
        return Err(ClimateError::ConfigValue(format!(
            "period `{}` starts at {start}, not before its end {end}",
            entry.name
        )));
    }
    Ok(PeriodEntry {
        name: entry.name,
        scenario,
        source,
        start,
        end,
    })
}

/// `now` is January 1st of the current year; anything else is `YYYY-MM-DD`.
pub fn resolve_date_bound(value: &str, today: NaiveDate) -> Result<NaiveDate, ClimateError> {
    if value.trim().eq_ignore_ascii_case(NOW) {
        return NaiveDate::from_ymd_opt(today.year(), 1, 1)
            .ok_or_else(|| ClimateError::InvalidDate(value.to_string()));
    }
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ClimateError::InvalidDate(value.to_string()))
}

pub fn default_period_entries() -> Vec<PeriodEntryConfig> {
    let mut entries = vec![PeriodEntryConfig {
        name: "historical".to_string(),
        scenario: "historical".to_string(),
        source: Some("rcp4_5".to_string()),
        start: OLDEST_DATE.to_string(),
        end: NOW.to_string(),
    }];
    for scenario in [Scenario::Rcp45, Scenario::Rcp85] {
        entries.push(PeriodEntryConfig {
            name: format!("prediction {}", scenario.label()),
            scenario: scenario.id().to_string(),
            source: None,
            start: NOW.to_string(),
            end: FURTHER_DATE.to_string(),
        });
    }
    entries
}
