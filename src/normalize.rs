//! Turns raw climate-model files into a [`NormalizedArray`].
//!
//! Every input goes through the same steps: metadata validation, unit
//! conversion, CF time decoding and concatenation with other files of the same
//! experiment. Longitudes are canonicalized per file, before any grids are
//! compared, so sources in `[0, 360)` and `[-180, 180)` line up. The projection
//! path then resamples each experiment and merges them as scenarios of one
//! array; the period path filters to a date window, groups by calendar year and
//! tags the result with an explicit scenario.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::array::{NormalizedArray, Period, TimeAxis, TimeDimension};
use crate::dataset::{DatasetReader, RawDataset, RawVariable};
use crate::domain::{ResampleRule, Scenario};
use crate::error::ClimateError;
use crate::time::{CalendarDate, decode_times};

pub const KELVIN_OFFSET: f64 = 273.15;
pub const CELSIUS_UNITS: &str = "degC";

const LATITUDE_NAMES: [&str; 2] = ["lat", "latitude"];
const LONGITUDE_NAMES: [&str; 2] = ["lon", "longitude"];
const COORD_TOLERANCE: f64 = 1e-6;

pub fn is_kelvin(units: &str) -> bool {
    matches!(
        units.trim().to_lowercase().as_str(),
        "k" | "kelvin" | "kelvins" | "degk" | "deg_k" | "degree_kelvin" | "degrees_kelvin"
    )
}

/// Maps a longitude onto `[-180, 180)`.
pub fn wrap_longitude(value: f64) -> f64 {
    (value + 180.0).rem_euclid(360.0) - 180.0
}

/// Required metadata of one input file, validated before any data is touched.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    pub variable_id: String,
    pub experiment: Option<Scenario>,
    pub units: String,
}

impl DatasetMetadata {
    /// `experiment_id` is only read when `require_experiment` is set. Files
    /// without a `variable_id` attribute (CMIP5) fall back to `data_variable`.
    pub fn extract(
        path: &Path,
        raw: &RawDataset,
        require_experiment: bool,
        data_variable: Option<&str>,
    ) -> Result<Self, ClimateError> {
        let missing = |attribute: &str| ClimateError::MissingAttribute {
            path: path.to_path_buf(),
            attribute: attribute.to_string(),
        };

        let variable_id = raw
            .text_attribute("variable_id")
            .or(data_variable)
            .ok_or_else(|| missing("variable_id"))?
            .to_string();

        let experiment = if require_experiment {
            let value = raw
                .text_attribute("experiment_id")
                .ok_or_else(|| missing("experiment_id"))?;
            Some(value.parse::<Scenario>()?)
        } else {
            None
        };

        let variable = raw
            .variable(&variable_id)
            .ok_or_else(|| ClimateError::InvalidLayout {
                path: path.to_path_buf(),
                message: format!("data variable `{variable_id}` not found"),
            })?;
        let units = variable
            .text_attribute("units")
            .ok_or_else(|| missing("units"))?;
        if units.trim().is_empty() {
            return Err(ClimateError::UnsupportedUnit {
                path: path.to_path_buf(),
                variable: variable_id,
            });
        }

        Ok(Self {
            units: units.trim().to_string(),
            variable_id,
            experiment,
        })
    }
}

/// Open date interval used by the period variant; both bounds are excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: &CalendarDate) -> bool {
        let start = CalendarDate::from(self.start);
        let end = CalendarDate::from(self.end);
        *date > start && *date < end
    }
}

/// Time-ordered block of one experiment on one grid, before aggregation.
#[derive(Debug, Clone)]
struct GridSeries {
    path: PathBuf,
    dates: Vec<CalendarDate>,
    latitude: Vec<f64>,
    longitude: Vec<f64>,
    units: String,
    values: Vec<f64>,
}

impl GridSeries {
    fn grid_len(&self) -> usize {
        self.latitude.len() * self.longitude.len()
    }

    fn row(&self, t: usize) -> &[f64] {
        let len = self.grid_len();
        &self.values[t * len..(t + 1) * len]
    }
}

pub struct Normalizer<R: DatasetReader> {
    reader: R,
}

impl<R: DatasetReader> Normalizer<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Normalizes files of one variable, one or more experiments, into a single
    /// array whose scenarios are the files' experiments.
    pub fn normalize(
        &self,
        files: &[PathBuf],
        target_name: &str,
        rule: ResampleRule,
    ) -> Result<NormalizedArray, ClimateError> {
        if files.is_empty() {
            return Err(ClimateError::NoInputs);
        }

        let mut groups: BTreeMap<Scenario, Vec<GridSeries>> = BTreeMap::new();
        let mut declared: Option<String> = None;
        for path in files {
            let (metadata, series) = self.load(path, true, None)?;
            check_variable(&mut declared, path, &metadata.variable_id)?;
            let Some(experiment) = metadata.experiment else {
                return Err(ClimateError::MissingAttribute {
                    path: path.clone(),
                    attribute: "experiment_id".to_string(),
                });
            };
            debug!(
                path = %path.display(),
                variable = %metadata.variable_id,
                experiment = %experiment,
                steps = series.dates.len(),
                "loaded dataset"
            );
            groups.entry(experiment).or_default().push(series);
        }

        let mut resampled = Vec::with_capacity(groups.len());
        for (scenario, parts) in groups {
            let series = concat(parts)?;
            let (periods, values) = resample(&series.dates, &series.values, series.grid_len(), rule);
            resampled.push((scenario, series, periods, values));
        }

        let (_, reference, ..) = &resampled[0];
        let latitude = reference.latitude.clone();
        let longitude = reference.longitude.clone();
        let units = reference.units.clone();
        for (_, series, ..) in &resampled[1..] {
            check_grid(&latitude, &longitude, series)?;
            if series.units != units {
                return Err(ClimateError::UnitsMismatch {
                    expected: units.clone(),
                    found: series.units.clone(),
                });
            }
        }

        let mut all_periods: Vec<Period> = resampled
            .iter()
            .flat_map(|(_, _, periods, _)| periods.iter().copied())
            .collect();
        all_periods.sort();
        all_periods.dedup();

        let grid_len = latitude.len() * longitude.len();
        let mut scenarios = BTreeMap::new();
        for (scenario, _, periods, values) in resampled {
            let mut block = vec![f32::NAN; all_periods.len() * grid_len];
            for (index, period) in periods.iter().enumerate() {
                if let Ok(target) = all_periods.binary_search(period) {
                    block[target * grid_len..(target + 1) * grid_len]
                        .copy_from_slice(&values[index * grid_len..(index + 1) * grid_len]);
                }
            }
            scenarios.insert(scenario, block);
        }

        let array = NormalizedArray {
            variable: target_name.to_string(),
            units,
            time: TimeAxis {
                dimension: TimeDimension::Time,
                periods: all_periods,
            },
            latitude,
            longitude,
            scenarios,
        };

        info!(
            variable = %array.variable,
            scenarios = array.scenarios.len(),
            steps = array.time.len(),
            rule = %rule,
            "normalized dataset"
        );
        Ok(array)
    }

    /// Normalizes files of one run into a yearly array restricted to `window`,
    /// tagged with the given scenario regardless of the files' own metadata.
    /// `data_variable` names the variable in files that do not declare one.
    pub fn normalize_period(
        &self,
        files: &[PathBuf],
        window: DateWindow,
        scenario: Scenario,
        target_name: &str,
        data_variable: Option<&str>,
    ) -> Result<NormalizedArray, ClimateError> {
        if files.is_empty() {
            return Err(ClimateError::NoInputs);
        }

        let mut parts = Vec::with_capacity(files.len());
        let mut declared: Option<String> = None;
        for path in files {
            let (metadata, series) = self.load(path, false, data_variable)?;
            check_variable(&mut declared, path, &metadata.variable_id)?;
            parts.push(series);
        }
        let series = concat(parts)?;

        let keep: Vec<usize> = series
            .dates
            .iter()
            .enumerate()
            .filter(|(_, date)| window.contains(date))
            .map(|(index, _)| index)
            .collect();
        if keep.is_empty() {
            return Err(ClimateError::EmptySelection(format!(
                "{} between {} and {}",
                series.path.display(),
                window.start,
                window.end
            )));
        }
        let grid_len = series.grid_len();
        let dates: Vec<CalendarDate> = keep.iter().map(|index| series.dates[*index]).collect();
        let mut values = Vec::with_capacity(keep.len() * grid_len);
        for index in &keep {
            values.extend_from_slice(series.row(*index));
        }

        let (periods, values) = resample(&dates, &values, grid_len, ResampleRule::Yearly);
        let mut scenarios = BTreeMap::new();
        scenarios.insert(scenario, values);

        let array = NormalizedArray {
            variable: target_name.to_string(),
            units: series.units,
            time: TimeAxis {
                dimension: TimeDimension::Year,
                periods,
            },
            latitude: series.latitude,
            longitude: series.longitude,
            scenarios,
        };

        info!(
            variable = %array.variable,
            scenario = %scenario,
            start = %window.start,
            end = %window.end,
            years = array.time.len(),
            "normalized period"
        );
        Ok(array)
    }

    fn load(
        &self,
        path: &Path,
        require_experiment: bool,
        data_variable: Option<&str>,
    ) -> Result<(DatasetMetadata, GridSeries), ClimateError> {
        let raw = self.reader.read(path)?;
        let metadata = DatasetMetadata::extract(path, &raw, require_experiment, data_variable)?;
        let series = grid_series(path, &raw, &metadata)?;
        Ok((metadata, series))
    }
}

fn grid_series(
    path: &Path,
    raw: &RawDataset,
    metadata: &DatasetMetadata,
) -> Result<GridSeries, ClimateError> {
    let layout_err = |message: String| ClimateError::InvalidLayout {
        path: path.to_path_buf(),
        message,
    };
    let variable = raw
        .variable(&metadata.variable_id)
        .ok_or_else(|| layout_err(format!("data variable `{}` not found", metadata.variable_id)))?;

    let dims = &variable.dimensions;
    let valid_dims = dims.len() == 3
        && dims[0] == "time"
        && LATITUDE_NAMES.contains(&dims[1].as_str())
        && LONGITUDE_NAMES.contains(&dims[2].as_str());
    if !valid_dims {
        return Err(layout_err(format!(
            "expected dimensions (time, lat, lon), found ({})",
            dims.join(", ")
        )));
    }

    let time = coordinate(raw, &dims[0], path)?;
    let latitude = coordinate(raw, &dims[1], path)?.values.clone();
    let source_longitude = &coordinate(raw, &dims[2], path)?.values;

    let time_units = time
        .text_attribute("units")
        .ok_or_else(|| ClimateError::MissingAttribute {
            path: path.to_path_buf(),
            attribute: "time:units".to_string(),
        })?;
    let dates = decode_times(&time.values, time_units, time.text_attribute("calendar"), path)?;

    let expected = dates.len() * latitude.len() * source_longitude.len();
    if variable.values.len() != expected {
        return Err(layout_err(format!(
            "variable `{}` has {} values, expected {expected}",
            metadata.variable_id,
            variable.values.len()
        )));
    }

    let fills: Vec<f64> = ["_FillValue", "missing_value"]
        .iter()
        .filter_map(|name| variable.number_attribute(name))
        .collect();
    let kelvin = is_kelvin(&metadata.units);
    let mut values: Vec<f64> = variable
        .values
        .iter()
        .map(|value| {
            if value.is_nan() || fills.contains(value) {
                f64::NAN
            } else if kelvin {
                value - KELVIN_OFFSET
            } else {
                *value
            }
        })
        .collect();
    let units = if kelvin {
        CELSIUS_UNITS.to_string()
    } else {
        metadata.units.clone()
    };
    let longitude = canonicalize_longitude(source_longitude, &mut values)?;

    Ok(GridSeries {
        path: path.to_path_buf(),
        dates,
        latitude,
        longitude,
        units,
        values,
    })
}

fn coordinate<'a>(raw: &'a RawDataset, name: &str, path: &Path) -> Result<&'a RawVariable, ClimateError> {
    raw.variable(name).ok_or_else(|| ClimateError::InvalidLayout {
        path: path.to_path_buf(),
        message: format!("coordinate variable `{name}` not found"),
    })
}

/// Joins parts of one run along time, ordered by date.
fn concat(mut parts: Vec<GridSeries>) -> Result<GridSeries, ClimateError> {
    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }
    let first = parts.remove(0);
    for part in &parts {
        check_grid(&first.latitude, &first.longitude, part)?;
        if part.units != first.units {
            return Err(ClimateError::UnitsMismatch {
                expected: first.units.clone(),
                found: part.units.clone(),
            });
        }
    }
    parts.insert(0, first);

    let mut steps: Vec<(CalendarDate, usize, usize)> = parts
        .iter()
        .enumerate()
        .flat_map(|(part, series)| {
            series
                .dates
                .iter()
                .enumerate()
                .map(move |(t, date)| (*date, part, t))
        })
        .collect();
    steps.sort_by_key(|(date, ..)| *date);

    let grid_len = parts[0].grid_len();
    let mut dates = Vec::with_capacity(steps.len());
    let mut values = Vec::with_capacity(steps.len() * grid_len);
    for (date, part, t) in steps {
        dates.push(date);
        values.extend_from_slice(parts[part].row(t));
    }

    let first = parts.swap_remove(0);
    Ok(GridSeries {
        dates,
        values,
        ..first
    })
}

/// All inputs of one array must carry the same data variable.
fn check_variable(declared: &mut Option<String>, path: &Path, variable_id: &str) -> Result<(), ClimateError> {
    match declared {
        Some(expected) if expected != variable_id => Err(ClimateError::VariableMismatch {
            path: path.to_path_buf(),
            expected: expected.clone(),
            found: variable_id.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            *declared = Some(variable_id.to_string());
            Ok(())
        }
    }
}

fn check_grid(latitude: &[f64], longitude: &[f64], series: &GridSeries) -> Result<(), ClimateError> {
    for (dimension, expected, found) in [
        ("latitude", latitude, series.latitude.as_slice()),
        ("longitude", longitude, series.longitude.as_slice()),
    ] {
        if expected.len() != found.len() {
            return Err(ClimateError::DimensionMismatch {
                dimension: dimension.to_string(),
                expected: format!("{} points", expected.len()),
                found: format!("{} points in {}", found.len(), series.path.display()),
            });
        }
        let differs = expected
            .iter()
            .zip(found)
            .any(|(a, b)| (a - b).abs() > COORD_TOLERANCE);
        if differs {
            return Err(ClimateError::DimensionMismatch {
                dimension: dimension.to_string(),
                expected: "identical coordinate values".to_string(),
                found: format!("different values in {}", series.path.display()),
            });
        }
    }
    Ok(())
}

fn period_of(date: &CalendarDate, rule: ResampleRule) -> Period {
    match rule {
        ResampleRule::Yearly => Period::Year(date.year),
        ResampleRule::Monthly => Period::Month {
            year: date.year,
            month: date.month,
        },
    }
}

/// Mean over every period of `rule`, ignoring NaN. Cells without any valid
/// value stay NaN.
fn resample(
    dates: &[CalendarDate],
    values: &[f64],
    grid_len: usize,
    rule: ResampleRule,
) -> (Vec<Period>, Vec<f32>) {
    let mut sums: BTreeMap<Period, (Vec<f64>, Vec<u32>)> = BTreeMap::new();
    for (t, date) in dates.iter().enumerate() {
        let (sum, count) = sums
            .entry(period_of(date, rule))
            .or_insert_with(|| (vec![0.0; grid_len], vec![0; grid_len]));
        let row = &values[t * grid_len..(t + 1) * grid_len];
        for (cell, value) in row.iter().enumerate() {
            if !value.is_nan() {
                sum[cell] += value;
                count[cell] += 1;
            }
        }
    }

    let mut periods = Vec::with_capacity(sums.len());
    let mut out = Vec::with_capacity(sums.len() * grid_len);
    for (period, (sum, count)) in sums {
        periods.push(period);
        out.extend(sum.iter().zip(&count).map(|(total, n)| {
            if *n == 0 {
                f32::NAN
            } else {
                (total / f64::from(*n)) as f32
            }
        }));
    }
    (periods, out)
}

/// Wraps longitudes onto `[-180, 180)` and sorts the axis, permuting the
/// columns of the row-major `block` to match. Returns the new axis.
pub fn canonicalize_longitude<T: Copy>(longitude: &[f64], block: &mut [T]) -> Result<Vec<f64>, ClimateError> {
    let wrapped: Vec<f64> = longitude.iter().map(|v| wrap_longitude(*v)).collect();
    let mut order: Vec<usize> = (0..wrapped.len()).collect();
    order.sort_by(|a, b| wrapped[*a].total_cmp(&wrapped[*b]));

    let sorted: Vec<f64> = order.iter().map(|index| wrapped[*index]).collect();
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(ClimateError::DuplicateLongitude(pair[0]));
    }

    let identity = order.iter().enumerate().all(|(i, j)| i == *j);
    if identity || order.is_empty() {
        return Ok(sorted);
    }
    for row in block.chunks_mut(order.len()) {
        let original = row.to_vec();
        for (x, source) in order.iter().enumerate() {
            row[x] = original[*source];
        }
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_longitudes() {
        assert_eq!(wrap_longitude(200.0), -160.0);
        assert_eq!(wrap_longitude(-170.0), -170.0);
        assert_eq!(wrap_longitude(180.0), -180.0);
        assert_eq!(wrap_longitude(0.0), 0.0);
        assert_eq!(wrap_longitude(359.0), -1.0);
    }

    #[test]
    fn recognizes_kelvin() {
        assert!(is_kelvin("K"));
        assert!(is_kelvin(" kelvin "));
        assert!(!is_kelvin("degC"));
        assert!(!is_kelvin("kg m-2 s-1"));
    }

    #[test]
    fn resample_ignores_nan() {
        let dates = vec![
            CalendarDate::new(2000, 1, 15),
            CalendarDate::new(2000, 2, 15),
            CalendarDate::new(2001, 1, 15),
        ];
        let values = vec![1.0, f64::NAN, 3.0, f64::NAN, 5.0, f64::NAN];
        let (periods, out) = resample(&dates, &values, 2, ResampleRule::Yearly);
        assert_eq!(periods, vec![Period::Year(2000), Period::Year(2001)]);
        assert_eq!(out[0], 2.0);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 5.0);
        assert!(out[3].is_nan());
    }

    #[test]
    fn canonicalize_permutes_rows() {
        let mut block = vec![0.0, 90.0, 180.0, 270.0, 1.0, 91.0, 181.0, 271.0];
        let longitude = canonicalize_longitude(&[0.0, 90.0, 180.0, 270.0], &mut block).unwrap();
        assert_eq!(longitude, vec![-180.0, -90.0, 0.0, 90.0]);
        assert_eq!(block, vec![180.0, 270.0, 0.0, 90.0, 181.0, 271.0, 1.0, 91.0]);
    }

    #[test]
    fn canonicalize_rejects_duplicates() {
        let mut block: Vec<f32> = vec![1.0, 2.0];
        let err = canonicalize_longitude(&[0.0, 360.0], &mut block).unwrap_err();
        assert!(matches!(err, ClimateError::DuplicateLongitude(_)));
    }

    #[test]
    fn window_is_open() {
        let window = DateWindow {
            start: NaiveDate::from_ymd_opt(1950, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
        };
        assert!(!window.contains(&CalendarDate::new(1950, 1, 1)));
        assert!(window.contains(&CalendarDate::new(1950, 1, 16)));
        assert!(!window.contains(&CalendarDate::new(1960, 1, 1)));
    }
}
