use camino::Utf8PathBuf;
use serde::Serialize;
use tempfile::Builder;
use tracing::info;

use crate::cds::{RetrievalClient, RetrievalParams};
use crate::domain::{ArchiveFormat, Scenario, TemporalResolution};
use crate::error::ClimateError;
use crate::store::Store;

/// One archive to retrieve from the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub dataset: String,
    pub experiment: Scenario,
    pub temporal_resolution: TemporalResolution,
    pub level: String,
    pub variable: String,
    pub model: String,
    pub format: ArchiveFormat,
}

impl RetrievalRequest {
    /// File stem shared by the archive and its extraction directory.
    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.experiment.id(),
            self.temporal_resolution,
            self.level,
            self.variable,
            self.model
        )
    }

    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            format: self.format.to_string(),
            temporal_resolution: self.temporal_resolution.to_string(),
            experiment: self.experiment.id().to_string(),
            level: self.level.clone(),
            variable: self.variable.clone(),
            model: self.model.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchAction {
    Cached,
    Downloaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub experiment: Scenario,
    pub variable: String,
    pub action: FetchAction,
    pub path: Utf8PathBuf,
}

pub struct ArchiveFetcher<'a, C: RetrievalClient> {
    store: &'a Store,
    client: &'a C,
}

impl<'a, C: RetrievalClient> ArchiveFetcher<'a, C> {
    pub fn new(store: &'a Store, client: &'a C) -> Self {
        Self { store, client }
    }

    /// Returns the archive path for `request`, downloading it only when it is
    /// not already on disk or `force` is set.
    pub fn fetch(&self, request: &RetrievalRequest, force: bool) -> Result<FetchOutcome, ClimateError> {
        let target = self.store.archive_path(request);
        if !force && self.store.exists(&target) {
            info!(
                experiment = %request.experiment,
                variable = %request.variable,
                path = %target,
                "archive already downloaded"
            );
            return Ok(FetchOutcome {
                experiment: request.experiment,
                variable: request.variable.clone(),
                action: FetchAction::Cached,
                path: target,
            });
        }

        let parent = target
            .parent()
            .ok_or_else(|| ClimateError::Filesystem(format!("invalid archive path {target}")))?;
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".download-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))?;

        info!(
            experiment = %request.experiment,
            variable = %request.variable,
            model = %request.model,
            "retrieving archive"
        );
        let start = std::time::Instant::now();
        let bytes = self
            .client
            .retrieve(&request.dataset, &request.params(), temp.path())?;
        temp.persist(target.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))?;
        info!(
            experiment = %request.experiment,
            variable = %request.variable,
            path = %target,
            bytes,
            latency_ms = start.elapsed().as_millis() as u64,
            "archive downloaded"
        );

        Ok(FetchOutcome {
            experiment: request.experiment,
            variable: request.variable.clone(),
            action: FetchAction::Downloaded,
            path: target,
        })
    }
}
