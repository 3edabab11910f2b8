//! Shared data model: section descriptors, requests/results, incidents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A node in the compiled, ordered section index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub section_id: String,
    pub path: String,
    pub level: u8,
    pub kind: String,
}

/// A generated section body, ready for the downstream renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSection {
    pub section_id: String,
    pub path: String,
    pub content: String,
}

/// Selection mode for the candidate chain resolved by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Auto,
    Fixed,
}

/// One logical call into the router.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub phase: String,
    pub prompt: String,
    pub context: String,
    pub section_id: Option<String>,
    pub section_path: Option<String>,
    pub tenant_id: String,
    pub preferred_provider: Option<String>,
    pub candidate_providers: Vec<String>,
    pub selection_mode: SelectionMode,
    pub metadata: HashMap<String, String>,
}

/// Status of one router call's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone)]
pub struct LlmResult {
    pub content: String,
    pub provider: String,
    pub status: ResultStatus,
    pub incidents: Vec<Incident>,
    pub retry_count: u32,
}

/// Severity of an [`Incident`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Kind of condition an [`Incident`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Provider,
    Retry,
    CircuitOpen,
    Degraded,
    FixedModeFallback,
}

/// A structured warning or error attached to a run; distinct from a raised
/// error — a run can complete successfully with incidents recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: Severity,
    pub phase: String,
    pub provider: String,
    pub message: String,
    pub section_id: Option<String>,
    pub section_path: Option<String>,
    pub kind: IncidentKind,
}

/// Final outcome of a full generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    CompletedWithIncidents,
    Failed,
}

/// One event on the orchestrator's trace stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: String,
    pub status: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}
