//! Audit event document schema
//!
//! Append-only: every mutating operation in the system writes exactly one
//! of these. After creation only the `reviewed`/`flagged`/`archived` flags
//! may change; records leave the collection only by time-based expiry.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for audit events
pub const AUDIT_COLLECTION: &str = "audit_events";

/// Default retention: ~7 years
pub const DEFAULT_RETENTION_DAYS: i64 = 2555;

/// Event classification
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Auth,
    Project,
    Milestone,
    Financial,
    Security,
    #[default]
    System,
}

/// Event severity; critical events are auto-flagged at write time
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Who performed the action
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ActorRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// What the action touched (weak reference by id)
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ResourceRef {
    /// Resource kind: "user", "project", "milestone", ...
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
}

/// Audit event document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Machine-readable event type, e.g. "milestone.verify"
    pub event_type: String,

    #[serde(default)]
    pub actor: ActorRef,

    #[serde(default)]
    pub resource: ResourceRef,

    /// Action verb, e.g. "verify"
    pub action: String,

    /// Human-readable description
    pub description: String,

    #[serde(default)]
    pub category: AuditCategory,

    #[serde(default)]
    pub severity: AuditSeverity,

    /// Chain transaction reference for financial events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,

    /// Monetary amount for financial events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,

    #[serde(default)]
    pub flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<String>,

    #[serde(default)]
    pub reviewed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime>,

    #[serde(default)]
    pub archived: bool,

    /// Retention period driving the expiry timestamp
    pub retention_days: i64,

    /// When the record becomes eligible for bulk purge
    pub expires_at: DateTime,
}

/// Pure expiry derivation from a retention period
pub fn expiry_from_retention(created: DateTime, retention_days: i64) -> DateTime {
    DateTime::from_millis(created.timestamp_millis() + retention_days * 86_400_000)
}

/// Auto-flag rule applied at write time: critical severity or anything in
/// the security category is flagged with a system-generated reason.
pub fn auto_flag_reason(category: AuditCategory, severity: AuditSeverity) -> Option<String> {
    if severity == AuditSeverity::Critical {
        Some("auto-flagged: critical severity".to_string())
    } else if category == AuditCategory::Security {
        Some("auto-flagged: security event".to_string())
    } else {
        None
    }
}

impl IntoIndexes for AuditDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Trail-by-resource queries
            (
                doc! { "resource.kind": 1, "resource.id": 1, "metadata.created_at": -1 },
                Some(IndexOptions::builder().name("resource_trail_index".to_string()).build()),
            ),
            // Activity-by-actor queries
            (
                doc! { "actor.id": 1, "metadata.created_at": -1 },
                Some(IndexOptions::builder().name("actor_activity_index".to_string()).build()),
            ),
            // Bulk purge scans
            (
                doc! { "expires_at": 1 },
                Some(IndexOptions::builder().name("expiry_index".to_string()).build()),
            ),
            (
                doc! { "event_type": 1 },
                Some(IndexOptions::builder().name("event_type_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for AuditDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_from_retention() {
        let created = DateTime::from_millis(0);
        let expires = expiry_from_retention(created, 7);
        assert_eq!(expires.timestamp_millis(), 7 * 86_400_000);
    }

    #[test]
    fn test_auto_flag_rule() {
        assert!(auto_flag_reason(AuditCategory::Milestone, AuditSeverity::Critical).is_some());
        assert!(auto_flag_reason(AuditCategory::Security, AuditSeverity::Low).is_some());
        assert!(auto_flag_reason(AuditCategory::Financial, AuditSeverity::High).is_none());
        assert!(auto_flag_reason(AuditCategory::Milestone, AuditSeverity::Medium).is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AuditSeverity::Critical > AuditSeverity::High);
        assert!(AuditSeverity::High > AuditSeverity::Medium);
        assert!(AuditSeverity::Medium > AuditSeverity::Low);
    }
}
