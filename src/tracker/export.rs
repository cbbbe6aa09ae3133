//! Snapshot export formats

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::stats::VariationStats;
use super::TrackerError;

/// Transfer format for exported statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(TrackerError::InvalidFormat(other.to_string())),
        }
    }
}

pub(crate) fn export(stats: &VariationStats, format: ExportFormat) -> Result<String, TrackerError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(stats)?),
        ExportFormat::Csv => to_csv(stats),
    }
}

/// One row per (group, alternative), ordered by group then alternative
fn to_csv(stats: &VariationStats) -> Result<String, TrackerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["campaign_id", "group", "alternative", "count", "share"])?;

    for (group_index, group) in &stats.groups {
        for (alternative, count) in &group.alternatives {
            writer.write_record([
                stats.campaign_id.clone(),
                group_index.to_string(),
                alternative.to_string(),
                count.to_string(),
                format!("{:.4}", group.share(*alternative)),
            ])?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TrackerError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TrackerError::Export(e.to_string()))
}
