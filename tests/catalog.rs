use std::collections::BTreeMap;
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use climate_evolution::array::{NormalizedArray, Period, TimeAxis, TimeDimension};
use climate_evolution::array_store::{self, WriteMode};
use climate_evolution::catalog::{Catalog, CatalogAction, describe, write_catalog};
use climate_evolution::domain::{CatalogMode, Scenario};
use climate_evolution::error::ClimateError;

fn persisted(root: &Utf8PathBuf, name: &str) -> Utf8PathBuf {
    let mut scenarios = BTreeMap::new();
    scenarios.insert(Scenario::Rcp85, vec![1.0, 2.0, 3.0, 4.0]);
    let array = NormalizedArray {
        variable: "temperature".to_string(),
        units: "degC".to_string(),
        time: TimeAxis {
            dimension: TimeDimension::Year,
            periods: vec![Period::Year(2030), Period::Year(2031)],
        },
        latitude: vec![0.0],
        longitude: vec![-10.0, 10.0],
        scenarios,
    };
    let (path, _) = array_store::write(&array, &root.join(name), WriteMode::SkipExisting).unwrap();
    path
}

fn root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

#[test]
fn describe_reads_store_metadata() {
    let temp = tempfile::tempdir().unwrap();
    let path = persisted(&root(&temp), "t.zarr");

    let entry = describe(&path, "prediction RCP 8.5", "prediction RCP 8.5 temperature").unwrap();
    assert_eq!(entry.driver, "zarr");
    assert_eq!(entry.args.urlpath, path);
    assert_eq!(entry.metadata.dimensions, vec!["year", "latitude", "longitude"]);
    assert_eq!(entry.metadata.shape, vec![2, 1, 2]);
    assert_eq!(entry.metadata.scenarios[0].id, Scenario::Rcp85);
}

#[test]
fn describe_fails_without_store() {
    let temp = tempfile::tempdir().unwrap();
    let err = describe(&root(&temp).join("missing.zarr"), "x", "y").unwrap_err();
    assert_matches!(err, ClimateError::StoreRead { .. });
}

#[test]
fn entries_round_trip_through_yaml() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let path = persisted(&root, "t.zarr");
    let entry = describe(&path, "temperature", "temperature 2030-2031").unwrap();
    let catalog_path = root.join("catalogs/climate.yaml");

    let outcome = write_catalog(vec![entry.clone()], &catalog_path, CatalogMode::BuildFresh).unwrap();
    assert_eq!(outcome.action, CatalogAction::Written);
    assert_eq!(outcome.entries, 1);

    let catalog = Catalog::load(&catalog_path).unwrap();
    let loaded = catalog.entry("temperature").unwrap();
    assert_eq!(loaded, &entry);

    let array = loaded.open().unwrap();
    assert_eq!(
        [array.time.len() as u64, array.latitude.len() as u64, array.longitude.len() as u64],
        [2, 1, 2]
    );
    assert_eq!(array.value(Scenario::Rcp85, 1, 0, 1), Some(4.0));
}

#[test]
fn build_once_leaves_existing_catalog_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let path = persisted(&root, "t.zarr");
    let catalog_path = root.join("climate.yaml");
    fs::write(catalog_path.as_std_path(), "sources: {}\n# hand edited\n").unwrap();
    let before = fs::read(catalog_path.as_std_path()).unwrap();

    let entry = describe(&path, "temperature", "d").unwrap();
    let outcome = write_catalog(vec![entry.clone()], &catalog_path, CatalogMode::BuildOnce).unwrap();
    assert_eq!(outcome.action, CatalogAction::Existing);
    assert_eq!(fs::read(catalog_path.as_std_path()).unwrap(), before);

    let outcome = write_catalog(vec![entry], &catalog_path, CatalogMode::BuildFresh).unwrap();
    assert_eq!(outcome.action, CatalogAction::Written);
    assert_ne!(fs::read(catalog_path.as_std_path()).unwrap(), before);
}

#[test]
fn malformed_catalog_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = root(&temp).join("bad.yaml");
    fs::write(path.as_std_path(), "sources: [unclosed").unwrap();
    let err = Catalog::load(&path).unwrap_err();
    assert_matches!(err, ClimateError::CatalogRead { .. });
}
