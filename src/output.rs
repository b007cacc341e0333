use std::io::{self, Write};

use serde::Serialize;

use crate::catalog::CatalogEntry;
use crate::explore::{AnomalyMap, LocationSeries};
use crate::fetch::FetchOutcome;
use crate::pipeline::{BuildReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub archive: FetchOutcome,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListReport {
    pub catalog: String,
    pub entries: Vec<CatalogEntry>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_build(reports: &[BuildReport]) -> io::Result<()> {
        Self::print_json(&reports)
    }

    pub fn print_fetch(report: &FetchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_list(report: &ListReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_series(series: &LocationSeries) -> io::Result<()> {
        Self::print_json(series)
    }

    pub fn print_anomaly(map: &AnomalyMap) -> io::Result<()> {
        Self::print_json(map)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr for interactive runs.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
