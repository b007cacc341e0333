use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ClimateError;

/// Emission scenario or historical run labelling one branch of a dataset.
///
/// The id is what lands in paths, request parameters and array-store names; the
/// label is only for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scenario {
    Historical,
    Ssp119,
    Ssp126,
    Ssp245,
    Ssp370,
    Ssp434,
    Ssp460,
    Ssp534Over,
    Ssp585,
    Rcp26,
    Rcp45,
    Rcp60,
    Rcp85,
}

/// Extra spellings accepted when parsing, after lowercasing and dropping
/// separators.
const ALIASES: [(Scenario, &[&str]); 13] = [
    (Scenario::Historical, &["historical", "hist", "0"]),
    (Scenario::Ssp119, &["ssp119"]),
    (Scenario::Ssp126, &["ssp126"]),
    (Scenario::Ssp245, &["ssp245"]),
    (Scenario::Ssp370, &["ssp370"]),
    (Scenario::Ssp434, &["ssp434"]),
    (Scenario::Ssp460, &["ssp460"]),
    (Scenario::Ssp534Over, &["ssp534os", "ssp534over"]),
    (Scenario::Ssp585, &["ssp585"]),
    (Scenario::Rcp26, &["rcp26", "26"]),
    (Scenario::Rcp45, &["rcp45", "45"]),
    (Scenario::Rcp60, &["rcp60", "60"]),
    (Scenario::Rcp85, &["rcp85", "85"]),
];

impl Scenario {
    pub fn id(&self) -> &'static str {
        match self {
            Scenario::Historical => "historical",
            Scenario::Ssp119 => "ssp1_1_9",
            Scenario::Ssp126 => "ssp1_2_6",
            Scenario::Ssp245 => "ssp2_4_5",
            Scenario::Ssp370 => "ssp3_7_0",
            Scenario::Ssp434 => "ssp4_3_4",
            Scenario::Ssp460 => "ssp4_6_0",
            Scenario::Ssp534Over => "ssp5_3_4os",
            Scenario::Ssp585 => "ssp5_8_5",
            Scenario::Rcp26 => "rcp2_6",
            Scenario::Rcp45 => "rcp4_5",
            Scenario::Rcp60 => "rcp6_0",
            Scenario::Rcp85 => "rcp8_5",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Scenario::Historical => "Historical",
            Scenario::Ssp119 => "SSP1-1.9",
            Scenario::Ssp126 => "SSP1-2.6",
            Scenario::Ssp245 => "SSP2-4.5",
            Scenario::Ssp370 => "SSP3-7.0",
            Scenario::Ssp434 => "SSP4-3.4",
            Scenario::Ssp460 => "SSP4-6.0",
            Scenario::Ssp534Over => "SSP5-3.4-OS",
            Scenario::Ssp585 => "SSP5-8.5",
            Scenario::Rcp26 => "RCP 2.6",
            Scenario::Rcp45 => "RCP 4.5",
            Scenario::Rcp60 => "RCP 6.0",
            Scenario::Rcp85 => "RCP 8.5",
        }
    }

    pub fn is_historical(&self) -> bool {
        matches!(self, Scenario::Historical)
    }

    pub fn all() -> impl Iterator<Item = Scenario> {
        ALIASES.iter().map(|(scenario, _)| *scenario)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for Scenario {
    type Err = ClimateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let compact = value
            .trim()
            .to_lowercase()
            .chars()
            .filter(|ch| !matches!(ch, ' ' | '-' | '_' | '.'))
            .collect::<String>();
        if compact.is_empty() {
            return Err(ClimateError::InvalidScenario(value.to_string()));
        }
        ALIASES
            .iter()
            .find(|(scenario, aliases)| {
                scenario.id().replace('_', "") == compact || aliases.contains(&compact.as_str())
            })
            .map(|(scenario, _)| *scenario)
            .ok_or_else(|| ClimateError::InvalidScenario(value.to_string()))
    }
}

impl TryFrom<String> for Scenario {
    type Error = ClimateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scenario> for String {
    fn from(value: Scenario) -> Self {
        value.id().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    Tgz,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tgz => "tar.gz",
        }
    }

    /// Infers the format from an archive file name.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Some(ArchiveFormat::Tgz)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::Tgz => write!(f, "tgz"),
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = ClimateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tgz" | "tar.gz" => Ok(ArchiveFormat::Tgz),
            _ => Err(ClimateError::InvalidArchiveFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TemporalResolution {
    Monthly,
    Daily,
}

impl fmt::Display for TemporalResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalResolution::Monthly => write!(f, "monthly"),
            TemporalResolution::Daily => write!(f, "daily"),
        }
    }
}

impl FromStr for TemporalResolution {
    type Err = ClimateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "monthly" | "mon" => Ok(TemporalResolution::Monthly),
            "daily" | "day" => Ok(TemporalResolution::Daily),
            _ => Err(ClimateError::InvalidTemporalResolution(value.to_string())),
        }
    }
}

/// Target granularity of the time axis after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResampleRule {
    #[default]
    Yearly,
    Monthly,
}

impl ResampleRule {
    pub fn code(&self) -> &'static str {
        match self {
            ResampleRule::Yearly => "Y",
            ResampleRule::Monthly => "M",
        }
    }
}

impl fmt::Display for ResampleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleRule::Yearly => write!(f, "yearly"),
            ResampleRule::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for ResampleRule {
    type Err = ClimateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Y" | "YE" | "A" | "AS" | "YS" | "yearly" | "annual" => Ok(ResampleRule::Yearly),
            "M" | "ME" | "MS" | "monthly" => Ok(ResampleRule::Monthly),
            _ => Err(ClimateError::InvalidResampleRule(value.to_string())),
        }
    }
}

impl TryFrom<String> for ResampleRule {
    type Error = ClimateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResampleRule> for String {
    fn from(value: ResampleRule) -> Self {
        value.code().to_string()
    }
}

/// How the catalog writer treats an existing catalog document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogMode {
    /// Leave an existing catalog untouched and skip the whole build.
    BuildOnce,
    /// Regenerate and overwrite the catalog on every build.
    BuildFresh,
}

impl fmt::Display for CatalogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogMode::BuildOnce => write!(f, "build-once"),
            CatalogMode::BuildFresh => write!(f, "build-fresh"),
        }
    }
}

/// What a batch does when one of its units fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Skip,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn scenario_accepts_metadata_and_request_spellings() {
        assert_eq!("ssp245".parse::<Scenario>().unwrap(), Scenario::Ssp245);
        assert_eq!("ssp2_4_5".parse::<Scenario>().unwrap(), Scenario::Ssp245);
        assert_eq!("SSP2-4.5".parse::<Scenario>().unwrap(), Scenario::Ssp245);
        assert_eq!("ssp534-over".parse::<Scenario>().unwrap(), Scenario::Ssp534Over);
    }

    #[test]
    fn scenario_accepts_legacy_rcp_markers() {
        assert_eq!("0".parse::<Scenario>().unwrap(), Scenario::Historical);
        assert_eq!("4.5".parse::<Scenario>().unwrap(), Scenario::Rcp45);
        assert_eq!("rcp8.5".parse::<Scenario>().unwrap(), Scenario::Rcp85);
    }

    #[test]
    fn scenario_rejects_unknown() {
        let err = "piControl".parse::<Scenario>().unwrap_err();
        assert_matches!(err, ClimateError::InvalidScenario(_));
    }

    #[test]
    fn scenario_id_and_label_are_separate() {
        assert_eq!(Scenario::Rcp45.id(), "rcp4_5");
        assert_eq!(Scenario::Rcp45.label(), "RCP 4.5");
        assert_eq!(Scenario::Historical.to_string(), "historical");
    }

    #[test]
    fn resample_rule_codes() {
        assert_eq!("Y".parse::<ResampleRule>().unwrap(), ResampleRule::Yearly);
        assert_eq!("monthly".parse::<ResampleRule>().unwrap(), ResampleRule::Monthly);
        assert!("W".parse::<ResampleRule>().is_err());
    }
}
