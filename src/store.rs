use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use tempfile::Builder;

use crate::domain::{ResampleRule, Scenario};
use crate::error::ClimateError;
use crate::fetch::RetrievalRequest;

pub const ARCHIVE_PREFIX: &str = "climate-evolution";

/// Filesystem layout shared by every pipeline stage.
///
/// Paths are pure functions of their inputs; they double as cache keys.
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    catalog_root: Utf8PathBuf,
}

impl Store {
    pub fn new_with_paths(data_root: Utf8PathBuf, catalog_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            catalog_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn catalog_root(&self) -> &Utf8Path {
        &self.catalog_root
    }

    pub fn archive_path(&self, request: &RetrievalRequest) -> Utf8PathBuf {
        self.data_root
            .join(request.format.to_string())
            .join(format!("{}.{}", request.stem(), request.format.extension()))
    }

    pub fn extract_dir(&self, archive: &Utf8Path) -> Utf8PathBuf {
        let name = archive.file_name().unwrap_or("archive");
        let stem = name
            .strip_suffix(".tar.gz")
            .or_else(|| name.strip_suffix(".tgz"))
            .or_else(|| name.strip_suffix(".zip"))
            .unwrap_or(name);
        self.data_root.join("netcdf").join(stem)
    }

    pub fn projection_store_path(
        &self,
        variable: &str,
        scenarios: &[Scenario],
        rule: ResampleRule,
    ) -> Utf8PathBuf {
        let mut ids = scenarios.iter().map(Scenario::id).collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        self.data_root
            .join("zarr")
            .join(format!("{variable}_{}_{rule}.zarr", ids.join("-")))
    }

    pub fn period_store_path(
        &self,
        variable: &str,
        scenario: Scenario,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Utf8PathBuf {
        self.data_root.join("zarr").join(format!(
            "{variable}_{}_{}_{}.zarr",
            scenario.id(),
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        ))
    }

    pub fn catalog_path(&self, file_name: &str) -> Utf8PathBuf {
        self.catalog_root.join(file_name)
    }

    pub fn ensure_data_root(&self) -> Result<(), ClimateError> {
        fs::create_dir_all(self.data_root.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))
    }

    pub fn ensure_catalog_root(&self) -> Result<(), ClimateError> {
        fs::create_dir_all(self.catalog_root.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ClimateError> {
        let parent = path
            .parent()
            .ok_or_else(|| ClimateError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(ARCHIVE_PREFIX)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))?;
        io::Write::write_all(&mut temp, content)
            .map_err(|err| ClimateError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| ClimateError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Moves a fully written directory into place.
///
/// An existing directory at `to` is first renamed aside and only removed once
/// the new one is published, so readers never see a half-written tree.
pub fn publish_dir(from: &Path, to: &Path) -> io::Result<()> {
    if !to.exists() {
        return fs::rename(from, to);
    }
    let parent = to.parent().unwrap_or(Path::new("."));
    let backup = Builder::new().prefix(".replaced-").tempdir_in(parent)?;
    let aside = backup.path().join("previous");
    fs::rename(to, &aside)?;
    if let Err(err) = fs::rename(from, to) {
        fs::rename(&aside, to)?;
        return Err(err);
    }
    backup.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArchiveFormat, TemporalResolution};

    fn store() -> Store {
        Store::new_with_paths(
            Utf8PathBuf::from("/data/climate"),
            Utf8PathBuf::from("/srv/catalogs"),
        )
    }

    #[test]
    fn layout_paths() {
        let store = store();
        let request = RetrievalRequest {
            dataset: "projections-cmip6".to_string(),
            experiment: Scenario::Ssp245,
            temporal_resolution: TemporalResolution::Monthly,
            level: "single_levels".to_string(),
            variable: "near_surface_air_temperature".to_string(),
            model: "mpi_esm1_2_lr".to_string(),
            format: ArchiveFormat::Zip,
        };

        let archive = store.archive_path(&request);
        assert_eq!(
            archive,
            "/data/climate/zip/ssp2_4_5_monthly_single_levels_near_surface_air_temperature_mpi_esm1_2_lr.zip"
        );
        assert!(
            store
                .extract_dir(&archive)
                .ends_with("netcdf/ssp2_4_5_monthly_single_levels_near_surface_air_temperature_mpi_esm1_2_lr")
        );

        let zarr = store.projection_store_path(
            "tas",
            &[Scenario::Ssp245, Scenario::Historical],
            ResampleRule::Yearly,
        );
        assert!(zarr.ends_with("zarr/tas_historical-ssp2_4_5_yearly.zarr"));

        let period = store.period_store_path(
            "temperature",
            Scenario::Rcp45,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2100, 12, 1).unwrap(),
        );
        assert!(period.ends_with("zarr/temperature_rcp4_5_20260101_21001201.zarr"));

        assert_eq!(store.catalog_path("climate.yaml"), "/srv/catalogs/climate.yaml");
    }

    #[test]
    fn publish_dir_replaces_existing() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("store.zarr");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("old"), b"old").unwrap();

        let staged = temp.path().join("staged");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new"), b"new").unwrap();

        publish_dir(&staged, &target).unwrap();
        assert!(target.join("new").exists());
        assert!(!target.join("old").exists());
        assert!(!staged.exists());
        let leftovers = fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
