use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Scenario;

pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeDimension {
    /// Resampled time axis.
    Time,
    /// Calendar-year groups.
    Year,
}

impl TimeDimension {
    pub fn name(&self) -> &'static str {
        match self {
            TimeDimension::Time => "time",
            TimeDimension::Year => "year",
        }
    }
}

/// One step of an aggregated time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    Year(i32),
    Month { year: i32, month: u32 },
}

impl Period {
    pub fn year(&self) -> i32 {
        match self {
            Period::Year(year) => *year,
            Period::Month { year, .. } => *year,
        }
    }

    /// Integer form stored in array stores: `YYYY` for years, `YYYYMM` for months.
    pub fn encode(&self) -> i32 {
        match self {
            Period::Year(year) => *year,
            Period::Month { year, month } => year * 100 + *month as i32,
        }
    }

    pub fn decode(value: i32, encoding: TimeEncoding) -> Self {
        match encoding {
            TimeEncoding::Year => Period::Year(value),
            TimeEncoding::YearMonth => Period::Month {
                year: value.div_euclid(100),
                month: value.rem_euclid(100) as u32,
            },
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Year(year) => write!(f, "{year:04}"),
            Period::Month { year, month } => write!(f, "{year:04}-{month:02}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeEncoding {
    Year,
    YearMonth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub dimension: TimeDimension,
    pub periods: Vec<Period>,
}

impl TimeAxis {
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn encoding(&self) -> TimeEncoding {
        match self.periods.first() {
            Some(Period::Month { .. }) => TimeEncoding::YearMonth,
            _ => TimeEncoding::Year,
        }
    }
}

/// A gridded variable with one data block per scenario.
///
/// Blocks are laid out row-major as `[time, latitude, longitude]`. Longitudes are
/// in `[-180, 180)` and strictly ascending once produced by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedArray {
    pub variable: String,
    pub units: String,
    pub time: TimeAxis,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub scenarios: BTreeMap<Scenario, Vec<f32>>,
}

impl NormalizedArray {
    pub fn shape(&self) -> [usize; 3] {
        [self.time.len(), self.latitude.len(), self.longitude.len()]
    }

    pub fn dimensions(&self) -> [&'static str; 3] {
        [self.time.dimension.name(), LATITUDE, LONGITUDE]
    }

    pub fn grid_len(&self) -> usize {
        self.latitude.len() * self.longitude.len()
    }

    pub fn data(&self, scenario: Scenario) -> Option<&[f32]> {
        self.scenarios.get(&scenario).map(Vec::as_slice)
    }

    /// Value at (time index, latitude index, longitude index).
    pub fn value(&self, scenario: Scenario, t: usize, y: usize, x: usize) -> Option<f32> {
        let data = self.data(scenario)?;
        let index = (t * self.latitude.len() + y) * self.longitude.len() + x;
        data.get(index).copied()
    }
}
