//! Core data models used throughout the triage pipeline.
//!
//! These types represent the categories, the persisted audit record, and the
//! transient per-file outcomes that flow from extraction to disposition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Triage category assigned to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Triage {
    /// Durable value; worth keeping around.
    Evergreen,
    /// Time-sensitive; likely to be decommissioned.
    Temporal,
    /// Indeterminate, low-confidence, or failed classification.
    Unknown,
}

impl Triage {
    pub const ALL: [Triage; 3] = [Triage::Evergreen, Triage::Temporal, Triage::Unknown];

    /// Name used for the database column and the output subdirectory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Triage::Evergreen => "evergreen",
            Triage::Temporal => "temporal",
            Triage::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Triage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Triage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evergreen" => Ok(Triage::Evergreen),
            "temporal" => Ok(Triage::Temporal),
            "unknown" => Ok(Triage::Unknown),
            other => Err(format!("unrecognized triage category '{}'", other)),
        }
    }
}

/// One row of `triage_results`. Written once per processed file, never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageRecord {
    pub source_path: String,
    pub destination_path: Option<String>,
    pub checksum: String,
    pub file_size: i64,
    pub file_extension: String,
    pub triage: Triage,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub topics: Vec<String>,
    pub llm_provider: String,
    pub llm_model: String,
    pub extracted_text_length: i64,
    pub truncated: bool,
    pub error_message: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Result of running the text extraction backend over one file.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Enough text to classify.
    Sufficient(String),
    /// Conversion worked but the stripped text is shorter than the minimum.
    /// Carries the unstripped text (possibly empty) for diagnosis.
    Insufficient(String),
    /// The backend failed; the message is recorded, not propagated.
    Failed(String),
}

/// Aggregated counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub evergreen: usize,
    pub temporal: usize,
    pub unknown: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Count a recorded file. Records carrying an error count as errors
    /// rather than under their (forced `unknown`) category.
    pub fn record(&mut self, record: &TriageRecord) {
        if record.error_message.is_some() {
            self.errors += 1;
            return;
        }
        match record.triage {
            Triage::Evergreen => self.evergreen += 1,
            Triage::Temporal => self.temporal += 1,
            Triage::Unknown => self.unknown += 1,
        }
    }
}
