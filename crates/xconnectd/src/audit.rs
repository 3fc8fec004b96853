//! Structured audit logging for control-plane mutations.
//!
//! Every configuration change (policy upsert/delete, attach/detach) emits a
//! structured record suitable for SIEM ingestion, following NIST SP 800-53
//! AU-2/AU-3: timestamp (UTC, microsecond precision), source component,
//! action, outcome, affected object, and failure reason when applicable.
//! Records are immutable once built and serialized as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories (NIST AU-2 event types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Resource creation events
    ResourceCreate,
    /// Resource modification events
    ResourceModify,
    /// Resource deletion events
    ResourceDelete,
    /// Network configuration changes
    NetworkConfig,
    /// System startup and shutdown
    SystemLifecycle,
    /// Error and failure events
    ErrorCondition,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ResourceCreate => write!(f, "RESOURCE_CREATE"),
            AuditCategory::ResourceModify => write!(f, "RESOURCE_MODIFY"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::NetworkConfig => write!(f, "NETWORK_CONFIG"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
        }
    }
}

/// Outcome of an audited action (NIST AU-3(e)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action completed successfully
    Success,
    /// Action failed
    Failure,
    /// Action is in progress
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
        }
    }
}

/// Structured audit record (NIST AU-3 content requirements).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC timestamp with microsecond precision
    pub timestamp: DateTime<Utc>,

    /// Event category for filtering and analysis
    pub category: AuditCategory,

    /// Source module/component generating the event
    pub source: String,

    /// Human-readable action description
    pub action: String,

    /// Outcome of the action
    pub outcome: AuditOutcome,

    /// Object identifier affected by the action (policy id, interface index)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Object type for classification ("policy", "attachment")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    /// Additional context as key-value pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Error message if outcome is failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a new audit record with the current timestamp.
    ///
    /// The outcome defaults to `InProgress` until explicitly set.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    /// Sets the outcome of the action.
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Sets the object identifier affected by the action.
    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    /// Sets the object type for classification.
    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    /// Adds structured context details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as `Failure`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    /// Serializes the record to JSON for log shipping.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits a structured audit record with outcome-based severity.
///
/// Success is logged at info, in-progress at debug, failure at warn.
///
/// # Usage
/// ```ignore
/// audit_log!(
///     AuditRecord::new(AuditCategory::ResourceCreate, "PolicyRegistry", "upsert")
///         .with_outcome(AuditOutcome::Success)
///         .with_object_id("10")
///         .with_object_type("policy")
/// );
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}
