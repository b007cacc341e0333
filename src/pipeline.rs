use std::path::PathBuf;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::array_store::{self, WriteMode};
use crate::catalog::{self, CatalogAction, CatalogEntry, CatalogWriteOutcome};
use crate::cds::RetrievalClient;
use crate::config::{ArchiveSource, PeriodEntry, PeriodPlan, ProjectionPlan};
use crate::dataset::DatasetReader;
use crate::domain::{CatalogMode, FailurePolicy, Scenario};
use crate::error::ClimateError;
use crate::extract;
use crate::fetch::{ArchiveFetcher, FetchOutcome, RetrievalRequest};
use crate::normalize::{DateWindow, Normalizer};
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Re-download, re-extract and rewrite stores even when cached.
    pub force: bool,
    pub catalog_mode: Option<CatalogMode>,
    pub on_error: Option<FailurePolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Projections,
    Periods,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Store was already on disk; only the entry was rebuilt.
    Existing,
    Built,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub variable: String,
    pub status: UnitStatus,
    pub store: Option<Utf8PathBuf>,
    pub archives: Vec<FetchOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub pipeline: PipelineKind,
    pub catalog: CatalogWriteOutcome,
    pub units: Vec<UnitReport>,
}

impl BuildReport {
    pub fn failed(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| unit.status == UnitStatus::Failed)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

fn progress(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// Runs fetch, extract, normalize, store and catalog steps over the units of
/// a plan, one unit at a time.
pub struct Pipeline<C: RetrievalClient, R: DatasetReader> {
    store: Store,
    client: C,
    normalizer: Normalizer<R>,
}

impl<C: RetrievalClient, R: DatasetReader> Pipeline<C, R> {
    pub fn new(store: Store, client: C, reader: R) -> Self {
        Self {
            store,
            client,
            normalizer: Normalizer::new(reader),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetches and extracts one archive, returning the extracted data files.
    pub fn acquire(
        &self,
        request: &RetrievalRequest,
        force: bool,
    ) -> Result<(FetchOutcome, Vec<Utf8PathBuf>), ClimateError> {
        let fetched = ArchiveFetcher::new(&self.store, &self.client).fetch(request, force)?;
        let files = extract::extract(&self.store, &fetched.path, force)?;
        Ok((fetched, files))
    }

    pub fn run_projections(
        &self,
        plan: &ProjectionPlan,
        options: &BuildOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BuildReport, ClimateError> {
        let mode = options.catalog_mode.unwrap_or(plan.catalog_mode);
        let catalog_path = self.store.catalog_path(&plan.catalog_file);
        if catalog::is_frozen(&catalog_path, mode) {
            info!(path = %catalog_path, "existing catalog, continue without building");
            return Ok(frozen_report(PipelineKind::Projections, catalog_path));
        }
        self.store.ensure_data_root()?;
        self.store.ensure_catalog_root()?;

        let policy = options.on_error.unwrap_or_default();
        let mut entries = Vec::new();
        let mut units = Vec::new();
        for variable in &plan.variables {
            progress(sink, format!("phase=Build; variable {variable}"));
            let start = Instant::now();
            let mut archives = Vec::new();
            match self.projection_unit(plan, variable, options.force, &mut archives) {
                Ok((entry, status)) => {
                    sink.event(ProgressEvent {
                        message: format!("phase=Catalog; entry {}", entry.name),
                        elapsed: Some(start.elapsed()),
                    });
                    units.push(UnitReport {
                        name: entry.name.clone(),
                        variable: variable.clone(),
                        status,
                        store: Some(entry.args.urlpath.clone()),
                        archives,
                        error: None,
                    });
                    entries.push(entry);
                }
                Err(err) => {
                    warn!(variable = %variable, error = %err, "projection unit failed");
                    if policy == FailurePolicy::Abort {
                        return Err(err);
                    }
                    units.push(UnitReport {
                        name: variable.clone(),
                        variable: variable.clone(),
                        status: UnitStatus::Failed,
                        store: None,
                        archives,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let catalog = catalog::write_catalog(entries, &catalog_path, mode)?;
        Ok(BuildReport {
            pipeline: PipelineKind::Projections,
            catalog,
            units,
        })
    }

    fn projection_unit(
        &self,
        plan: &ProjectionPlan,
        variable: &str,
        force: bool,
        archives: &mut Vec<FetchOutcome>,
    ) -> Result<(CatalogEntry, UnitStatus), ClimateError> {
        let store_path = self
            .store
            .projection_store_path(variable, &plan.experiments, plan.resample);
        let labels = plan
            .experiments
            .iter()
            .map(Scenario::label)
            .collect::<Vec<_>>()
            .join(", ");
        let description = format!("{variable} under {labels}, resampled {}", plan.resample);

        if !force && self.store.exists(&store_path) {
            info!(variable, path = %store_path, "array store cached, skipping normalization");
            let entry = catalog::describe(&store_path, variable, &description)?;
            return Ok((entry, UnitStatus::Existing));
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for experiment in &plan.experiments {
            let request = request_for(&plan.source, *experiment, variable);
            let (fetched, extracted) = self.acquire(&request, force)?;
            archives.push(fetched);
            files.extend(extracted.into_iter().map(Utf8PathBuf::into_std_path_buf));
        }

        let array = self.normalizer.normalize(&files, variable, plan.resample)?;
        let (store_path, _) = array_store::write(&array, &store_path, write_mode(force))?;
        let entry = catalog::describe(&store_path, variable, &description)?;
        Ok((entry, UnitStatus::Built))
    }

    pub fn run_periods(
        &self,
        plan: &PeriodPlan,
        options: &BuildOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BuildReport, ClimateError> {
        let mode = options.catalog_mode.unwrap_or(plan.catalog_mode);
        let catalog_path = self.store.catalog_path(&plan.catalog_file);
        if catalog::is_frozen(&catalog_path, mode) {
            info!(path = %catalog_path, "existing catalog, continue without building");
            return Ok(frozen_report(PipelineKind::Periods, catalog_path));
        }
        self.store.ensure_data_root()?;
        self.store.ensure_catalog_root()?;

        let policy = options.on_error.unwrap_or_default();
        let mut entries = Vec::new();
        let mut units = Vec::new();
        for period in &plan.entries {
            progress(
                sink,
                format!("phase=Build; period {} ({} to {})", period.name, period.start, period.end),
            );
            let start = Instant::now();
            let mut archives = Vec::new();
            match self.period_unit(plan, period, options.force, &mut archives) {
                Ok((entry, status)) => {
                    sink.event(ProgressEvent {
                        message: format!("phase=Catalog; entry {}", entry.name),
                        elapsed: Some(start.elapsed()),
                    });
                    units.push(UnitReport {
                        name: entry.name.clone(),
                        variable: plan.name.clone(),
                        status,
                        store: Some(entry.args.urlpath.clone()),
                        archives,
                        error: None,
                    });
                    entries.push(entry);
                }
                Err(err) => {
                    warn!(
                        period = %period.name,
                        experiment = %period.source,
                        variable = %plan.variable,
                        error = %err,
                        "period unit failed"
                    );
                    if policy == FailurePolicy::Abort {
                        return Err(err);
                    }
                    units.push(UnitReport {
                        name: period.name.clone(),
                        variable: plan.name.clone(),
                        status: UnitStatus::Failed,
                        store: None,
                        archives,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let catalog = catalog::write_catalog(entries, &catalog_path, mode)?;
        Ok(BuildReport {
            pipeline: PipelineKind::Periods,
            catalog,
            units,
        })
    }

    fn period_unit(
        &self,
        plan: &PeriodPlan,
        period: &PeriodEntry,
        force: bool,
        archives: &mut Vec<FetchOutcome>,
    ) -> Result<(CatalogEntry, UnitStatus), ClimateError> {
        let store_path =
            self.store
                .period_store_path(&plan.name, period.scenario, period.start, period.end);
        let description = format!(
            "{} {} from {} to {}",
            period.name, plan.name, period.start, period.end
        );

        if !force && self.store.exists(&store_path) {
            info!(
                period = %period.name,
                variable = %plan.name,
                path = %store_path,
                "array store cached, skipping normalization"
            );
            let entry = catalog::describe(&store_path, &period.name, &description)?;
            return Ok((entry, UnitStatus::Existing));
        }

        let request = request_for(&plan.source, period.source, &plan.variable);
        let (fetched, extracted) = self.acquire(&request, force)?;
        archives.push(fetched);
        let files: Vec<PathBuf> = extracted
            .into_iter()
            .map(Utf8PathBuf::into_std_path_buf)
            .collect();

        let window = DateWindow {
            start: period.start,
            end: period.end,
        };
        let array = self
            .normalizer
            .normalize_period(
                &files,
                window,
                period.scenario,
                &plan.name,
                Some(&plan.data_variable),
            )?;
        let (store_path, _) = array_store::write(&array, &store_path, write_mode(force))?;
        let entry = catalog::describe(&store_path, &period.name, &description)?;
        Ok((entry, UnitStatus::Built))
    }
}

pub fn request_for(source: &ArchiveSource, experiment: Scenario, variable: &str) -> RetrievalRequest {
    RetrievalRequest {
        dataset: source.dataset.clone(),
        experiment,
        temporal_resolution: source.temporal_resolution,
        level: source.level.clone(),
        variable: variable.to_string(),
        model: source.model.clone(),
        format: source.format,
    }
}

fn write_mode(force: bool) -> WriteMode {
    if force {
        WriteMode::Overwrite
    } else {
        WriteMode::SkipExisting
    }
}

fn frozen_report(pipeline: PipelineKind, path: Utf8PathBuf) -> BuildReport {
    BuildReport {
        pipeline,
        catalog: CatalogWriteOutcome {
            path,
            action: CatalogAction::Existing,
            entries: 0,
        },
        units: Vec::new(),
    }
}
