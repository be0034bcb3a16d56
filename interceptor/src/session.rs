//! Cross-session aggregation
//!
//! Folds per-operation samples from many interceptor sessions into one
//! summary with grouped breakdowns and cost totals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::Pricing;

/// One recorded sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSample {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub rows_read: u64,
    pub rows_written: u64,
    pub duration_ms: f64,
}

/// Per-operation means
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationBreakdown {
    pub count: u64,
    pub avg_rows_read: f64,
    pub avg_rows_written: f64,
    pub avg_duration_ms: f64,
}

/// Summary over every recorded sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_operations: u64,
    pub total_rows_read: u64,
    pub total_rows_written: u64,
    pub total_duration_ms: f64,
    pub avg_rows_read: f64,
    pub avg_rows_written: f64,
    pub avg_duration_ms: f64,
    pub estimated_read_cost: f64,
    pub estimated_write_cost: f64,
    pub estimated_total_cost: f64,
    pub by_operation: BTreeMap<String, OperationBreakdown>,
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    rows_read: u64,
    rows_written: u64,
    duration_ms: f64,
}

impl Accumulator {
    fn add(&mut self, sample: &SessionSample) {
        self.count += 1;
        self.rows_read += sample.rows_read;
        self.rows_written += sample.rows_written;
        self.duration_ms += sample.duration_ms;
    }

    fn mean(&self, total: f64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            total / self.count as f64
        }
    }

    fn breakdown(&self) -> OperationBreakdown {
        OperationBreakdown {
            count: self.count,
            avg_rows_read: self.mean(self.rows_read as f64),
            avg_rows_written: self.mean(self.rows_written as f64),
            avg_duration_ms: self.mean(self.duration_ms),
        }
    }
}

/// Collects samples across sessions under one pricing table
#[derive(Debug, Clone)]
pub struct SessionAggregator {
    pricing: Pricing,
    samples: Vec<SessionSample>,
}

impl SessionAggregator {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            samples: Vec::new(),
        }
    }

    /// Append one sample; any operation name is accepted
    pub fn record(
        &mut self,
        operation: impl Into<String>,
        rows_read: u64,
        rows_written: u64,
        duration_ms: f64,
    ) {
        self.samples.push(SessionSample {
            timestamp: Utc::now(),
            operation: operation.into(),
            rows_read,
            rows_written,
            duration_ms,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[SessionSample] {
        &self.samples
    }

    pub fn summary(&self) -> SessionSummary {
        let mut overall = Accumulator::default();
        let mut groups: BTreeMap<&str, Accumulator> = BTreeMap::new();

        for sample in &self.samples {
            overall.add(sample);
            groups.entry(sample.operation.as_str()).or_default().add(sample);
        }

        let estimated_read_cost = self.pricing.read_cost(overall.rows_read);
        let estimated_write_cost = self.pricing.write_cost(overall.rows_written);

        SessionSummary {
            total_operations: overall.count,
            total_rows_read: overall.rows_read,
            total_rows_written: overall.rows_written,
            total_duration_ms: overall.duration_ms,
            avg_rows_read: overall.mean(overall.rows_read as f64),
            avg_rows_written: overall.mean(overall.rows_written as f64),
            avg_duration_ms: overall.mean(overall.duration_ms),
            estimated_read_cost,
            estimated_write_cost,
            estimated_total_cost: estimated_read_cost + estimated_write_cost,
            by_operation: groups
                .into_iter()
                .map(|(operation, acc)| (operation.to_string(), acc.breakdown()))
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Raw samples as a JSON array, for offline analysis
    pub fn export_samples(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.samples)
    }
}
