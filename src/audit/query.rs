//! Read-side audit queries
//!
//! Trails, actor activity, flagged listings, and aggregate statistics.
//! Queries never mutate; the writer owns all writes.

use bson::{doc, oid::ObjectId, DateTime, Document};
use serde::Serialize;
use std::collections::HashMap;

use crate::db::schemas::{AuditDoc, AuditSeverity};
use crate::db::MongoCollection;
use crate::types::Result;

const DEFAULT_TRAIL_LIMIT: i64 = 100;

/// Listing filter for the audit browse endpoint
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    pub category: Option<String>,
    pub min_severity: Option<AuditSeverity>,
    pub flagged_only: bool,
    pub from: Option<DateTime>,
    pub to: Option<DateTime>,
    pub limit: Option<i64>,
}

/// Aggregate counts over a date range
#[derive(Debug, Clone, Serialize)]
pub struct AuditStatistics {
    pub total: u64,
    pub flagged: u64,
    pub unreviewed_flagged: u64,
    pub by_event_type: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
}

/// Query facade over the audit collection
#[derive(Clone)]
pub struct AuditQuery {
    collection: MongoCollection<AuditDoc>,
}

impl AuditQuery {
    pub fn new(collection: MongoCollection<AuditDoc>) -> Self {
        Self { collection }
    }

    /// Full trail for one resource, newest first
    pub async fn trail_for_resource(&self, kind: &str, id: ObjectId) -> Result<Vec<AuditDoc>> {
        self.collection
            .find_many(
                doc! { "resource.kind": kind, "resource.id": id, "archived": { "$ne": true } },
                Some(doc! { "metadata.created_at": -1 }),
                Some(DEFAULT_TRAIL_LIMIT),
            )
            .await
    }

    /// Everything one actor did, newest first
    pub async fn activity_for_actor(&self, actor_id: ObjectId, limit: i64) -> Result<Vec<AuditDoc>> {
        self.collection
            .find_many(
                doc! { "actor.id": actor_id, "archived": { "$ne": true } },
                Some(doc! { "metadata.created_at": -1 }),
                Some(limit),
            )
            .await
    }

    /// Filtered listing for the browse endpoint
    pub async fn list(&self, filter: AuditFilter) -> Result<Vec<AuditDoc>> {
        let query = build_filter_query(&filter);
        self.collection
            .find_many(
                query,
                Some(doc! { "metadata.created_at": -1 }),
                Some(filter.limit.unwrap_or(DEFAULT_TRAIL_LIMIT)),
            )
            .await
    }

    /// Flagged records awaiting review, oldest first so reviewers work
    /// through the backlog in order
    pub async fn pending_review(&self, limit: i64) -> Result<Vec<AuditDoc>> {
        self.collection
            .find_many(
                doc! { "flagged": true, "reviewed": false, "archived": { "$ne": true } },
                Some(doc! { "metadata.created_at": 1 }),
                Some(limit),
            )
            .await
    }

    /// Aggregate statistics over a date range, computed by folding the
    /// matching records. Collections are bounded by retention, and the
    /// statistics endpoint is auditor-only and rare.
    pub async fn statistics(&self, from: DateTime, to: DateTime) -> Result<AuditStatistics> {
        let records = self
            .collection
            .find_many(
                doc! { "metadata.created_at": { "$gte": from, "$lte": to } },
                None,
                None,
            )
            .await?;

        Ok(fold_statistics(&records))
    }
}

fn build_filter_query(filter: &AuditFilter) -> Document {
    let mut query = doc! { "archived": { "$ne": true } };

    if let Some(event_type) = &filter.event_type {
        query.insert("event_type", event_type);
    }
    if let Some(category) = &filter.category {
        query.insert("category", category);
    }
    if filter.flagged_only {
        query.insert("flagged", true);
    }
    if let Some(min) = filter.min_severity {
        let allowed: Vec<&str> = [
            (AuditSeverity::Low, "low"),
            (AuditSeverity::Medium, "medium"),
            (AuditSeverity::High, "high"),
            (AuditSeverity::Critical, "critical"),
        ]
        .iter()
        .filter(|(severity, _)| *severity >= min)
        .map(|(_, name)| *name)
        .collect();
        query.insert("severity", doc! { "$in": allowed });
    }

    let mut range = Document::new();
    if let Some(from) = filter.from {
        range.insert("$gte", from);
    }
    if let Some(to) = filter.to {
        range.insert("$lte", to);
    }
    if !range.is_empty() {
        query.insert("metadata.created_at", range);
    }

    query
}

fn fold_statistics(records: &[AuditDoc]) -> AuditStatistics {
    let mut stats = AuditStatistics {
        total: records.len() as u64,
        flagged: 0,
        unreviewed_flagged: 0,
        by_event_type: HashMap::new(),
        by_category: HashMap::new(),
        by_severity: HashMap::new(),
    };

    for record in records {
        if record.flagged {
            stats.flagged += 1;
            if !record.reviewed {
                stats.unreviewed_flagged += 1;
            }
        }
        *stats
            .by_event_type
            .entry(record.event_type.clone())
            .or_insert(0) += 1;
        *stats
            .by_category
            .entry(format!("{:?}", record.category).to_lowercase())
            .or_insert(0) += 1;
        *stats
            .by_severity
            .entry(format!("{:?}", record.severity).to_lowercase())
            .or_insert(0) += 1;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{
        expiry_from_retention, ActorRef, AuditCategory, Metadata, ResourceRef,
    };

    fn sample(event_type: &str, category: AuditCategory, severity: AuditSeverity, flagged: bool) -> AuditDoc {
        AuditDoc {
            _id: None,
            metadata: Metadata::new(),
            event_type: event_type.to_string(),
            actor: ActorRef::default(),
            resource: ResourceRef::default(),
            action: "test".to_string(),
            description: String::new(),
            category,
            severity,
            tx_ref: None,
            amount: None,
            flagged,
            flag_reason: None,
            reviewed: false,
            reviewed_by: None,
            reviewed_at: None,
            archived: false,
            retention_days: 7,
            expires_at: expiry_from_retention(DateTime::now(), 7),
        }
    }

    #[test]
    fn test_fold_statistics() {
        let records = vec![
            sample("milestone.verify", AuditCategory::Milestone, AuditSeverity::Medium, false),
            sample("milestone.verify", AuditCategory::Milestone, AuditSeverity::Medium, false),
            sample("subsidy.release", AuditCategory::Financial, AuditSeverity::Critical, true),
            sample("auth.login_failed", AuditCategory::Security, AuditSeverity::High, true),
        ];

        let stats = fold_statistics(&records);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.flagged, 2);
        assert_eq!(stats.unreviewed_flagged, 2);
        assert_eq!(stats.by_event_type["milestone.verify"], 2);
        assert_eq!(stats.by_category["financial"], 1);
        assert_eq!(stats.by_severity["critical"], 1);
    }

    #[test]
    fn test_fold_statistics_empty() {
        let stats = fold_statistics(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.by_event_type.is_empty());
    }

    #[test]
    fn test_build_filter_query() {
        let query = build_filter_query(&AuditFilter {
            event_type: Some("subsidy.release".to_string()),
            flagged_only: true,
            from: Some(DateTime::from_millis(0)),
            ..Default::default()
        });

        assert_eq!(query.get_str("event_type").unwrap(), "subsidy.release");
        assert!(query.get_bool("flagged").unwrap());
        assert!(query.get_document("metadata.created_at").unwrap().contains_key("$gte"));
        assert!(query.contains_key("archived"));
    }

    #[test]
    fn test_min_severity_filter() {
        let query = build_filter_query(&AuditFilter {
            min_severity: Some(AuditSeverity::High),
            ..Default::default()
        });

        let allowed = query
            .get_document("severity")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert_eq!(allowed.len(), 2);
        assert!(allowed.iter().any(|v| v.as_str() == Some("high")));
        assert!(allowed.iter().any(|v| v.as_str() == Some("critical")));
    }
}
