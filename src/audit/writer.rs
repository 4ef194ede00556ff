//! Append-only audit writer
//!
//! Every mutating operation in the system calls `record` exactly once.
//! Records are immutable after creation; only the reviewed/flagged/archived
//! flags may change, and reviewing is guarded so it happens once.

use bson::{doc, oid::ObjectId, DateTime};
use tracing::{debug, info};

use crate::db::schemas::{
    auto_flag_reason, expiry_from_retention, ActorRef, AuditCategory, AuditDoc, AuditSeverity,
    Metadata, ResourceRef,
};
use crate::db::MongoCollection;
use crate::types::{PlatformError, Result};

/// Input for one audit event. Severity defaults to medium.
#[derive(Debug, Clone, Default)]
pub struct NewAuditEvent {
    pub event_type: String,
    pub actor: ActorRef,
    pub resource: ResourceRef,
    pub action: String,
    pub description: String,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
    pub tx_ref: Option<String>,
    pub amount: Option<f64>,
}

/// The audit sink. One instance, injected everywhere that mutates state.
#[derive(Clone)]
pub struct AuditLogger {
    collection: MongoCollection<AuditDoc>,
    retention_days: i64,
}

impl AuditLogger {
    pub fn new(collection: MongoCollection<AuditDoc>, retention_days: i64) -> Self {
        Self {
            collection,
            retention_days,
        }
    }

    /// Append one immutable audit record. Critical or security events are
    /// auto-flagged with a system-generated reason.
    pub async fn record(&self, event: NewAuditEvent) -> Result<ObjectId> {
        let now = DateTime::now();
        let flag_reason = auto_flag_reason(event.category, event.severity);

        let doc = AuditDoc {
            _id: None,
            metadata: Metadata::new(),
            event_type: event.event_type,
            actor: event.actor,
            resource: event.resource,
            action: event.action,
            description: event.description,
            category: event.category,
            severity: event.severity,
            tx_ref: event.tx_ref,
            amount: event.amount,
            flagged: flag_reason.is_some(),
            flag_reason,
            reviewed: false,
            reviewed_by: None,
            reviewed_at: None,
            archived: false,
            retention_days: self.retention_days,
            expires_at: expiry_from_retention(now, self.retention_days),
        };

        let id = self.collection.insert_one(doc).await?;
        debug!(audit_id = %id, "Audit record written");
        Ok(id)
    }

    /// Mark a record reviewed. The guard lives in the update filter: a
    /// second call finds no unreviewed document and reports the conflict,
    /// so no duplicate review timestamp can land.
    pub async fn mark_reviewed(&self, id: ObjectId, reviewer: ObjectId) -> Result<AuditDoc> {
        let updated = self
            .collection
            .find_one_and_update(
                doc! { "_id": id, "reviewed": false },
                doc! { "$set": {
                    "reviewed": true,
                    "reviewed_by": reviewer,
                    "reviewed_at": DateTime::now(),
                }},
            )
            .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                let record_exists = self.collection.find_by_id(id).await?.is_some();
                Err(review_miss(id, record_exists))
            }
        }
    }

    /// Flag a record for attention
    pub async fn flag(&self, id: ObjectId, reason: String) -> Result<()> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "flagged": true, "flag_reason": reason } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(PlatformError::NotFound(format!("audit record {}", id)));
        }
        Ok(())
    }

    /// Archive a record (still queryable, excluded from default listings)
    pub async fn archive(&self, id: ObjectId) -> Result<()> {
        let result = self
            .collection
            .update_one(doc! { "_id": id }, doc! { "$set": { "archived": true } })
            .await?;

        if result.matched_count == 0 {
            return Err(PlatformError::NotFound(format!("audit record {}", id)));
        }
        Ok(())
    }

    /// Bulk purge of expired records. The one hard delete in the system;
    /// run from the scheduler, not per-request.
    pub async fn purge_expired(&self, now: DateTime) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "expires_at": { "$lt": now } })
            .await?;

        if result.deleted_count > 0 {
            info!(purged = result.deleted_count, "Expired audit records purged");
        }
        Ok(result.deleted_count)
    }

    pub fn collection(&self) -> &MongoCollection<AuditDoc> {
        &self.collection
    }
}

/// A review update that matched nothing is either a repeat review or a
/// missing record; the refetch disambiguates.
fn review_miss(id: ObjectId, record_exists: bool) -> PlatformError {
    if record_exists {
        PlatformError::Conflict("audit record already reviewed".into())
    } else {
        PlatformError::NotFound(format!("audit record {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_review_is_conflict_not_missing() {
        // The filtered update only matches unreviewed records, so a repeat
        // review misses while the record still exists
        let id = ObjectId::new();
        assert!(matches!(
            review_miss(id, true),
            PlatformError::Conflict(_)
        ));
    }

    #[test]
    fn test_review_of_unknown_record_is_not_found() {
        let id = ObjectId::new();
        assert!(matches!(
            review_miss(id, false),
            PlatformError::NotFound(_)
        ));
    }
}
