mod support;

use std::path::PathBuf;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use climate_evolution::array::{Period, TimeDimension};
use climate_evolution::dataset::AttrValue;
use climate_evolution::domain::{ResampleRule, Scenario};
use climate_evolution::error::ClimateError;
use climate_evolution::normalize::{DateWindow, Normalizer};

use support::{JsonReader, monthly_dataset, write_dataset};

const LAT: [f64; 2] = [-10.0, 10.0];
const LON: [f64; 2] = [0.0, 90.0];

fn write(dir: &std::path::Path, name: &str, dataset: &climate_evolution::dataset::RawDataset) -> PathBuf {
    let path = dir.join(name);
    write_dataset(&path, dataset);
    path
}

#[test]
fn kelvin_becomes_celsius() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = monthly_dataset(Some("historical"), "tas", "K", 2000..=2000, &LAT, &LON, |_, _, _, _| 273.15);
    let path = write(temp.path(), "tas.nc", &dataset);

    let array = Normalizer::new(JsonReader)
        .normalize(&[path], "tas", ResampleRule::Yearly)
        .unwrap();

    assert_eq!(array.units, "degC");
    assert_eq!(array.time.periods, vec![Period::Year(2000)]);
    let data = array.data(Scenario::Historical).unwrap();
    assert!(data.iter().all(|value| value.abs() < 1e-4));
}

#[test]
fn other_units_pass_through() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = monthly_dataset(
        Some("ssp585"),
        "pr",
        "kg m-2 s-1",
        2050..=2050,
        &LAT,
        &LON,
        |_, month, _, _| f64::from(month),
    );
    let path = write(temp.path(), "pr.nc", &dataset);

    let array = Normalizer::new(JsonReader)
        .normalize(&[path], "pr", ResampleRule::Yearly)
        .unwrap();

    assert_eq!(array.units, "kg m-2 s-1");
    assert_eq!(array.value(Scenario::Ssp585, 0, 0, 0), Some(6.5));
}

#[test]
fn monthly_rule_keeps_months() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = monthly_dataset(Some("historical"), "tas", "degC", 1990..=1990, &LAT, &LON, |_, month, _, _| {
        f64::from(month)
    });
    let path = write(temp.path(), "tas.nc", &dataset);

    let array = Normalizer::new(JsonReader)
        .normalize(&[path], "tas", ResampleRule::Monthly)
        .unwrap();

    assert_eq!(array.time.len(), 12);
    assert_eq!(array.time.periods[2], Period::Month { year: 1990, month: 3 });
    assert_eq!(array.value(Scenario::Historical, 2, 1, 1), Some(3.0));
}

#[test]
fn longitudes_are_wrapped_and_sorted() {
    let temp = tempfile::tempdir().unwrap();
    let lon = [-170.0, 10.0, 200.0];
    let dataset = monthly_dataset(Some("historical"), "tas", "degC", 2000..=2000, &[0.0], &lon, |_, _, _, x| {
        x as f64
    });
    let path = write(temp.path(), "tas.nc", &dataset);

    let array = Normalizer::new(JsonReader)
        .normalize(&[path], "tas", ResampleRule::Yearly)
        .unwrap();

    assert_eq!(array.longitude, vec![-170.0, -160.0, 10.0]);
    assert!(array.longitude.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(array.data(Scenario::Historical).unwrap(), &[0.0, 2.0, 1.0]);
}

#[test]
fn experiments_merge_on_union_of_periods() {
    let temp = tempfile::tempdir().unwrap();
    let historical = monthly_dataset(Some("historical"), "tas", "K", 1950..=1951, &LAT, &LON, |_, _, _, _| 283.15);
    let future = monthly_dataset(Some("ssp245"), "tas", "K", 2020..=2020, &LAT, &LON, |_, _, _, _| 293.15);
    let files = vec![
        write(temp.path(), "hist.nc", &historical),
        write(temp.path(), "ssp.nc", &future),
    ];

    let array = Normalizer::new(JsonReader)
        .normalize(&files, "tas", ResampleRule::Yearly)
        .unwrap();

    assert_eq!(
        array.time.periods,
        vec![Period::Year(1950), Period::Year(1951), Period::Year(2020)]
    );
    assert_eq!(array.time.dimension, TimeDimension::Time);
    let hist = array.value(Scenario::Historical, 0, 0, 0).unwrap();
    assert!((hist - 10.0).abs() < 1e-4);
    assert!(array.value(Scenario::Historical, 2, 0, 0).unwrap().is_nan());
    assert!(array.value(Scenario::Ssp245, 0, 0, 0).unwrap().is_nan());
    let ssp = array.value(Scenario::Ssp245, 2, 0, 0).unwrap();
    assert!((ssp - 20.0).abs() < 1e-4);
}

#[test]
fn same_experiment_files_are_concatenated() {
    let temp = tempfile::tempdir().unwrap();
    let later = monthly_dataset(Some("ssp245"), "tas", "degC", 2031..=2031, &LAT, &LON, |_, _, _, _| 2.0);
    let earlier = monthly_dataset(Some("ssp245"), "tas", "degC", 2030..=2030, &LAT, &LON, |_, _, _, _| 1.0);
    let files = vec![
        write(temp.path(), "b.nc", &later),
        write(temp.path(), "a.nc", &earlier),
    ];

    let array = Normalizer::new(JsonReader)
        .normalize(&files, "tas", ResampleRule::Yearly)
        .unwrap();

    assert_eq!(array.scenarios.len(), 1);
    assert_eq!(array.time.periods, vec![Period::Year(2030), Period::Year(2031)]);
    assert_eq!(array.value(Scenario::Ssp245, 0, 0, 0), Some(1.0));
    assert_eq!(array.value(Scenario::Ssp245, 1, 0, 0), Some(2.0));
}

#[test]
fn latitude_mismatch_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let ten: Vec<f64> = (0..10).map(f64::from).collect();
    let twelve: Vec<f64> = (0..12).map(f64::from).collect();
    let ten = monthly_dataset(Some("historical"), "tas", "K", 2000..=2000, &ten, &LON, |_, _, _, _| {
        280.0
    });
    let twelve = monthly_dataset(Some("ssp245"), "tas", "K", 2020..=2020, &twelve, &LON, |_, _, _, _| {
        280.0
    });
    let files = vec![
        write(temp.path(), "hist.nc", &ten),
        write(temp.path(), "ssp.nc", &twelve),
    ];

    let err = Normalizer::new(JsonReader)
        .normalize(&files, "tas", ResampleRule::Yearly)
        .unwrap_err();
    assert_matches!(err, ClimateError::DimensionMismatch { ref dimension, .. } if dimension == "latitude");
}

#[test]
fn missing_attributes_are_named() {
    let temp = tempfile::tempdir().unwrap();

    let no_experiment = monthly_dataset(None, "tas", "K", 2000..=2000, &LAT, &LON, |_, _, _, _| 280.0);
    let path = write(temp.path(), "a.nc", &no_experiment);
    let err = Normalizer::new(JsonReader)
        .normalize(&[path], "tas", ResampleRule::Yearly)
        .unwrap_err();
    assert_matches!(err, ClimateError::MissingAttribute { ref attribute, .. } if attribute == "experiment_id");

    let mut no_units = monthly_dataset(Some("historical"), "tas", "K", 2000..=2000, &LAT, &LON, |_, _, _, _| 280.0);
    no_units.variables.get_mut("tas").unwrap().attributes.remove("units");
    let path = write(temp.path(), "b.nc", &no_units);
    let err = Normalizer::new(JsonReader)
        .normalize(&[path], "tas", ResampleRule::Yearly)
        .unwrap_err();
    assert_matches!(err, ClimateError::MissingAttribute { ref attribute, .. } if attribute == "units");

    let blank_units = monthly_dataset(Some("historical"), "tas", " ", 2000..=2000, &LAT, &LON, |_, _, _, _| 280.0);
    let path = write(temp.path(), "c.nc", &blank_units);
    let err = Normalizer::new(JsonReader)
        .normalize(&[path], "tas", ResampleRule::Yearly)
        .unwrap_err();
    assert_matches!(err, ClimateError::UnsupportedUnit { .. });
}

#[test]
fn fill_values_become_missing() {
    let temp = tempfile::tempdir().unwrap();
    let mut dataset = monthly_dataset(Some("historical"), "tas", "degC", 2000..=2000, &[0.0], &[0.0, 1.0], |_, month, _, x| {
        if x == 1 || month == 1 { 1e20 } else { 4.0 }
    });
    dataset
        .variables
        .get_mut("tas")
        .unwrap()
        .attributes
        .insert("_FillValue".to_string(), AttrValue::Number(1e20));
    let path = write(temp.path(), "tas.nc", &dataset);

    let array = Normalizer::new(JsonReader)
        .normalize(&[path], "tas", ResampleRule::Yearly)
        .unwrap();
    assert_eq!(array.value(Scenario::Historical, 0, 0, 0), Some(4.0));
    assert!(array.value(Scenario::Historical, 0, 0, 1).unwrap().is_nan());
}

#[test]
fn period_variant_filters_and_tags() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = monthly_dataset(Some("rcp45"), "tas", "K", 1949..=1952, &LAT, &LON, |year, _, _, _| {
        273.15 + f64::from(year - 1949)
    });
    let path = write(temp.path(), "tas.nc", &dataset);

    let window = DateWindow {
        start: NaiveDate::from_ymd_opt(1950, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(1952, 1, 1).unwrap(),
    };
    let array = Normalizer::new(JsonReader)
        .normalize_period(&[path.clone()], window, Scenario::Historical, "temperature", None)
        .unwrap();

    assert_eq!(array.variable, "temperature");
    assert_eq!(array.time.dimension, TimeDimension::Year);
    assert_eq!(array.time.periods, vec![Period::Year(1950), Period::Year(1951)]);
    assert_eq!(array.scenarios.keys().copied().collect::<Vec<_>>(), vec![Scenario::Historical]);
    let first = array.value(Scenario::Historical, 0, 0, 0).unwrap();
    assert!((first - 1.0).abs() < 1e-4);

    let empty = DateWindow {
        start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2001, 1, 1).unwrap(),
    };
    let err = Normalizer::new(JsonReader)
        .normalize_period(&[path], empty, Scenario::Historical, "temperature", None)
        .unwrap_err();
    assert_matches!(err, ClimateError::EmptySelection(_));
}

#[test]
fn mixed_longitude_conventions_share_a_grid() {
    let temp = tempfile::tempdir().unwrap();
    let east = [0.0, 90.0, 180.0, 270.0];
    let centered = [-180.0, -90.0, 0.0, 90.0];
    let historical = monthly_dataset(Some("historical"), "tas", "degC", 2000..=2000, &LAT, &east, |_, _, _, x| {
        [0.0, 90.0, -180.0, -90.0][x]
    });
    let future = monthly_dataset(Some("ssp245"), "tas", "degC", 2020..=2020, &LAT, &centered, |_, _, _, x| {
        centered[x]
    });
    let files = vec![
        write(temp.path(), "a.nc", &historical),
        write(temp.path(), "b.nc", &future),
    ];

    let array = Normalizer::new(JsonReader)
        .normalize(&files, "tas", ResampleRule::Yearly)
        .unwrap();
    assert_eq!(array.longitude, centered.to_vec());
    for (x, longitude) in centered.iter().enumerate() {
        assert_eq!(array.value(Scenario::Historical, 0, 1, x), Some(*longitude as f32));
        assert_eq!(array.value(Scenario::Ssp245, 1, 1, x), Some(*longitude as f32));
    }
}

#[test]
fn same_run_in_both_conventions_concatenates() {
    let temp = tempfile::tempdir().unwrap();
    let first = monthly_dataset(Some("historical"), "tas", "degC", 2000..=2000, &LAT, &[0.0, 270.0], |_, _, _, x| {
        [0.0, -90.0][x]
    });
    let second = monthly_dataset(Some("historical"), "tas", "degC", 2001..=2001, &LAT, &[-90.0, 0.0], |_, _, _, x| {
        [-90.0, 0.0][x]
    });
    let files = vec![
        write(temp.path(), "2000.nc", &first),
        write(temp.path(), "2001.nc", &second),
    ];

    let array = Normalizer::new(JsonReader)
        .normalize(&files, "tas", ResampleRule::Yearly)
        .unwrap();
    assert_eq!(array.longitude, vec![-90.0, 0.0]);
    assert_eq!(array.value(Scenario::Historical, 0, 0, 0), Some(-90.0));
    assert_eq!(array.value(Scenario::Historical, 1, 0, 0), Some(-90.0));
}

#[test]
fn different_variables_are_not_merged() {
    let temp = tempfile::tempdir().unwrap();
    let tas = monthly_dataset(Some("historical"), "tas", "K", 2000..=2000, &LAT, &LON, |_, _, _, _| 280.0);
    let tasmax = monthly_dataset(Some("ssp245"), "tasmax", "K", 2020..=2020, &LAT, &LON, |_, _, _, _| 290.0);
    let files = vec![
        write(temp.path(), "tas.nc", &tas),
        write(temp.path(), "tasmax.nc", &tasmax),
    ];

    let err = Normalizer::new(JsonReader)
        .normalize(&files, "tas", ResampleRule::Yearly)
        .unwrap_err();
    assert_matches!(
        err,
        ClimateError::VariableMismatch { ref expected, ref found, .. }
            if expected == "tas" && found == "tasmax"
    );
}

#[test]
fn period_variant_ignores_file_experiment() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = monthly_dataset(Some("historicalExt"), "tas", "K", 2005..=2007, &LAT, &LON, |_, _, _, _| 283.15);
    let path = write(temp.path(), "tas.nc", &dataset);
    let window = DateWindow {
        start: NaiveDate::from_ymd_opt(2005, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2007, 1, 1).unwrap(),
    };

    let array = Normalizer::new(JsonReader)
        .normalize_period(&[path], window, Scenario::Historical, "temperature", None)
        .unwrap();
    assert_eq!(array.scenarios.keys().copied().collect::<Vec<_>>(), vec![Scenario::Historical]);
    let value = array.value(Scenario::Historical, 0, 0, 0).unwrap();
    assert!((value - 10.0).abs() < 1e-4);
}

#[test]
fn period_variant_falls_back_to_named_variable() {
    let temp = tempfile::tempdir().unwrap();
    let mut dataset = monthly_dataset(None, "tas", "K", 2006..=2007, &LAT, &LON, |_, _, _, _| 273.15);
    dataset.attributes.remove("variable_id");
    let path = write(temp.path(), "tas_Amon_IPSL-CM5A-MR_rcp45.nc", &dataset);
    let window = DateWindow {
        start: NaiveDate::from_ymd_opt(2006, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2008, 1, 1).unwrap(),
    };

    let array = Normalizer::new(JsonReader)
        .normalize_period(&[path.clone()], window, Scenario::Rcp45, "temperature", Some("tas"))
        .unwrap();
    assert_eq!(array.units, "degC");
    assert_eq!(array.time.len(), 2);

    let err = Normalizer::new(JsonReader)
        .normalize_period(&[path], window, Scenario::Rcp45, "temperature", None)
        .unwrap_err();
    assert_matches!(err, ClimateError::MissingAttribute { ref attribute, .. } if attribute == "variable_id");
}

#[test]
fn no_inputs_is_an_error() {
    let err = Normalizer::new(JsonReader)
        .normalize(&[], "tas", ResampleRule::Yearly)
        .unwrap_err();
    assert_matches!(err, ClimateError::NoInputs);
}
