//! Numerical side of the exploration views: series at a location and anomaly
//! maps between two years. Rendering is left to consumers.

use serde::Serialize;

use crate::array::{NormalizedArray, Period};
use crate::domain::Scenario;
use crate::error::ClimateError;
use crate::normalize::wrap_longitude;

/// Index of the coordinate closest to `target`; ties go to the lower index.
pub fn nearest_index(coords: &[f64], target: f64) -> Option<usize> {
    coords
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_nan())
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(index, _)| index)
}

/// Trailing mean over `window` steps. A step is `None` until the window is
/// full or whenever the window holds a missing value.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..values.len())
        .map(|end| {
            if end + 1 < window {
                return None;
            }
            let slice = &values[end + 1 - window..=end];
            let sum = slice.iter().try_fold(0.0, |acc, value| value.map(|v| acc + v))?;
            Some(sum / window as f64)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub period: String,
    pub year: i32,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioSeries {
    pub scenario: Scenario,
    pub label: String,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSeries {
    pub variable: String,
    pub units: String,
    /// Grid point actually used.
    pub latitude: f64,
    pub longitude: f64,
    pub window: usize,
    pub series: Vec<ScenarioSeries>,
}

#[derive(Debug, Clone, Default)]
pub struct SeriesQuery {
    pub latitude: f64,
    pub longitude: f64,
    /// Restrict to these scenarios; empty means all.
    pub scenarios: Vec<Scenario>,
    pub window: usize,
    /// Inclusive year bounds applied after smoothing.
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
}

/// Time series at the grid point nearest to the query location, smoothed with
/// a rolling mean. Missing steps are dropped from the output.
pub fn series_at(array: &NormalizedArray, query: &SeriesQuery) -> Result<LocationSeries, ClimateError> {
    let y = nearest_index(&array.latitude, query.latitude)
        .ok_or_else(|| ClimateError::EmptySelection(format!("{} has no latitudes", array.variable)))?;
    let x = nearest_index(&array.longitude, wrap_longitude(query.longitude))
        .ok_or_else(|| ClimateError::EmptySelection(format!("{} has no longitudes", array.variable)))?;

    let selected: Vec<Scenario> = if query.scenarios.is_empty() {
        array.scenarios.keys().copied().collect()
    } else {
        for scenario in &query.scenarios {
            if !array.scenarios.contains_key(scenario) {
                return Err(ClimateError::ScenarioNotFound {
                    dataset: array.variable.clone(),
                    scenario: scenario.to_string(),
                });
            }
        }
        query.scenarios.clone()
    };

    let window = query.window.max(1);
    let mut series = Vec::with_capacity(selected.len());
    for scenario in selected {
        let raw: Vec<Option<f64>> = (0..array.time.len())
            .map(|t| {
                array
                    .value(scenario, t, y, x)
                    .filter(|value| !value.is_nan())
                    .map(f64::from)
            })
            .collect();
        let smoothed = rolling_mean(&raw, window);
        let points = array
            .time
            .periods
            .iter()
            .zip(smoothed)
            .filter(|(period, _)| in_range(period, query.from_year, query.to_year))
            .filter_map(|(period, value)| {
                value.map(|value| SeriesPoint {
                    period: period.to_string(),
                    year: period.year(),
                    value: Some(value),
                })
            })
            .collect();
        series.push(ScenarioSeries {
            scenario,
            label: scenario.label().to_string(),
            points,
        });
    }

    Ok(LocationSeries {
        variable: array.variable.clone(),
        units: array.units.clone(),
        latitude: array.latitude[y],
        longitude: array.longitude[x],
        window,
        series,
    })
}

fn in_range(period: &Period, from: Option<i32>, to: Option<i32>) -> bool {
    let year = period.year();
    from.is_none_or(|from| year >= from) && to.is_none_or(|to| year <= to)
}

/// First and last year covered by the time axis.
pub fn year_range(array: &NormalizedArray) -> Option<(i32, i32)> {
    let first = array.time.periods.first()?.year();
    let last = array.time.periods.last()?.year();
    Some((first, last))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyMap {
    pub variable: String,
    pub units: String,
    pub reference_year: i32,
    pub comparison_year: i32,
    pub reversed: bool,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    /// Row-major `[latitude][longitude]`.
    pub values: Vec<Vec<Option<f64>>>,
    /// Half-width of a color scale centered on zero.
    pub limit: Option<f64>,
}

/// One side of an anomaly comparison.
#[derive(Debug, Clone, Copy)]
pub struct YearSelection<'a> {
    pub array: &'a NormalizedArray,
    pub year: i32,
    pub scenario: Option<Scenario>,
}

/// `comparison - reference` at the years nearest to those requested, or the
/// opposite difference when `reverse` is set. Both arrays must share a grid.
pub fn anomaly(
    reference: YearSelection<'_>,
    comparison: YearSelection<'_>,
    reverse: bool,
) -> Result<AnomalyMap, ClimateError> {
    let (ref_year, ref_slice) = year_slice(reference)?;
    let (cmp_year, cmp_slice) = year_slice(comparison)?;

    for (dimension, expected, found) in [
        ("latitude", &reference.array.latitude, &comparison.array.latitude),
        ("longitude", &reference.array.longitude, &comparison.array.longitude),
    ] {
        if expected.len() != found.len()
            || expected.iter().zip(found.iter()).any(|(a, b)| (a - b).abs() > 1e-6)
        {
            return Err(ClimateError::DimensionMismatch {
                dimension: dimension.to_string(),
                expected: format!("{} points of {}", expected.len(), reference.array.variable),
                found: format!("{} points of {}", found.len(), comparison.array.variable),
            });
        }
    }

    let sign = if reverse { -1.0 } else { 1.0 };
    let nx = reference.array.longitude.len();
    let diffs: Vec<Option<f64>> = ref_slice
        .iter()
        .zip(cmp_slice)
        .map(|(r, c)| {
            if r.is_nan() || c.is_nan() {
                None
            } else {
                Some(sign * f64::from(*c) - sign * f64::from(*r))
            }
        })
        .collect();
    let limit = diffs
        .iter()
        .flatten()
        .map(|value| value.abs())
        .reduce(f64::max);
    let values = if nx == 0 {
        Vec::new()
    } else {
        diffs.chunks(nx).map(<[Option<f64>]>::to_vec).collect()
    };

    Ok(AnomalyMap {
        variable: reference.array.variable.clone(),
        units: reference.array.units.clone(),
        reference_year: ref_year,
        comparison_year: cmp_year,
        reversed: reverse,
        latitude: reference.array.latitude.clone(),
        longitude: reference.array.longitude.clone(),
        values,
        limit,
    })
}

fn year_slice(selection: YearSelection<'_>) -> Result<(i32, &[f32]), ClimateError> {
    let array = selection.array;
    let scenario = match selection.scenario {
        Some(scenario) => scenario,
        None => *array.scenarios.keys().next().ok_or_else(|| {
            ClimateError::EmptySelection(format!("{} has no scenarios", array.variable))
        })?,
    };
    let data = array.data(scenario).ok_or_else(|| ClimateError::ScenarioNotFound {
        dataset: array.variable.clone(),
        scenario: scenario.to_string(),
    })?;
    let years: Vec<f64> = array.time.periods.iter().map(|p| f64::from(p.year())).collect();
    let t = nearest_index(&years, f64::from(selection.year))
        .ok_or_else(|| ClimateError::EmptySelection(format!("{} has no time steps", array.variable)))?;
    let len = array.grid_len();
    Ok((array.time.periods[t].year(), &data[t * len..(t + 1) * len]))
}
