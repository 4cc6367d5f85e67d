//! Per-genome ancestry records.

use serde::{Deserialize, Serialize};

use crate::genome::signature::TopologySummary;

/// One applied mutation and the typed ids it touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvoHistoryEvent {
    pub mutation: String,
    pub ids: Vec<String>,
}

/// Append-only record, one per genome ever seen by the monitor.
///
/// `operation` is either a lifecycle marker (`seed`, `continue_seed`,
/// `elite_clone`) or the composite `"a+b+c"` of the operators applied to
/// produce the genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageRecord {
    pub genome_id: String,
    pub parent_id: Option<String>,
    pub generation: u64,
    pub operation: String,
    pub events: Vec<EvoHistoryEvent>,
    pub fingerprint: String,
    pub summary: TopologySummary,
}
