//! Chart stream payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line-chart sample, pushed individually by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePoint {
    /// Sample time.
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Sample value.
    pub value: f64,
    /// Time bucket index since the connection started.
    pub index: u64,
}

/// One pie slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieSlice {
    pub label: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Full pie-chart snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieChartData {
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
    pub slices: Vec<PieSlice>,
}

impl PieChartData {
    /// Sum of all slice values.
    pub fn total(&self) -> f64 {
        self.slices.iter().map(|s| s.value).sum()
    }
}

/// One bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartBar {
    pub label: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Full bar-chart snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarChartData {
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
    pub bars: Vec<ChartBar>,
}

impl BarChartData {
    /// Tallest bar, if any.
    pub fn max_bar(&self) -> Option<&ChartBar> {
        self.bars
            .iter()
            .max_by(|a, b| a.value.total_cmp(&b.value))
    }
}
