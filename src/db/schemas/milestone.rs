//! Milestone document schema
//!
//! A milestone belongs to exactly one project and carries two set-once
//! gates (verification, approval) parallel to its lifecycle status, plus a
//! monotonic `released` flag. Derived fields (`completion_percent`, overdue
//! status) are pure functions invoked explicitly by the workflow
//! controller, never hidden save hooks.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::oracle::OracleAggregate;

/// Collection name for milestones
pub const MILESTONE_COLLECTION: &str = "milestones";

/// Milestone lifecycle status. `Overdue` is a side-condition of
/// pending/in-progress past the due date, not a terminal state.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Overdue,
}

/// Work category; the oracle category rules key off this
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneCategory {
    #[default]
    Construction,
    Equipment,
    Production,
    /// "Performance Milestone" in the programme documents
    Performance,
    /// "Testing & Commissioning" in the programme documents
    Testing,
}

/// A deliverable requirement; the completion ratio drives `completion_percent`
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Requirement {
    pub description: String,
    #[serde(default)]
    pub is_complete: bool,
}

/// Declared performance target, checked against oracle-aggregated fields
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PerformanceTarget {
    /// Aggregated field name, e.g. "production_rate_kg_day"
    pub metric: String,
    pub target: f64,
    #[serde(default)]
    pub unit: String,
}

/// Set-once verification record
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct VerificationRecord {
    #[serde(default)]
    pub is_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Set-once approval record
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ApprovalRecord {
    #[serde(default)]
    pub is_approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime>,
}

/// Append-only progress note
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MilestoneUpdate {
    pub at: DateTime,
    pub author_id: ObjectId,
    pub note: String,
}

/// Milestone document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct MilestoneDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning project (logical cascade only; deletion does not propagate)
    pub project_id: ObjectId,

    /// Ordering within the project, unique per project
    pub sequence_number: i32,

    pub title: String,
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: MilestoneCategory,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_start: Option<DateTime>,
    /// Due date; drives the overdue side-condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_end: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_start: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_end: Option<DateTime>,

    /// Subsidy allocated to this milestone
    pub subsidy_amount: f64,

    /// Monotonic: false -> true on release, never reversed
    #[serde(default)]
    pub released: bool,

    /// Chain transaction reference recorded at release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_tx: Option<String>,

    #[serde(default)]
    pub verification: VerificationRecord,

    #[serde(default)]
    pub approval: ApprovalRecord,

    #[serde(default)]
    pub requirements: Vec<Requirement>,

    /// Derived from the requirement completion ratio
    #[serde(default)]
    pub completion_percent: i32,

    #[serde(default)]
    pub status: MilestoneStatus,

    /// Set by the overdue sweep so the producer is told once, not hourly
    #[serde(default)]
    pub overdue_notified: bool,

    /// Append-only timestamped notes, one per transition
    #[serde(default)]
    pub updates: Vec<MilestoneUpdate>,

    /// Targets consumed by the oracle category rules
    #[serde(default)]
    pub performance_targets: Vec<PerformanceTarget>,

    /// Advisory oracle aggregation result, persisted by the oracle service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_result: Option<OracleAggregate>,

    /// On-chain milestone id assigned by the contract, once created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_milestone_id: Option<u64>,
}

/// Pure derived-field computation: requirement completion ratio as a
/// percentage. A milestone with no requirements reports 0 until it is
/// explicitly completed.
pub fn completion_percent(requirements: &[Requirement]) -> i32 {
    if requirements.is_empty() {
        return 0;
    }
    let done = requirements.iter().filter(|r| r.is_complete).count();
    ((done as f64 / requirements.len() as f64) * 100.0).round() as i32
}

/// Pure overdue side-condition: a milestone not yet completed and past its
/// due date reads as overdue regardless of the stored status.
pub fn is_overdue(status: MilestoneStatus, planned_end: Option<DateTime>, now: DateTime) -> bool {
    if status == MilestoneStatus::Completed {
        return false;
    }
    match planned_end {
        Some(due) => due < now,
        None => false,
    }
}

impl MilestoneDoc {
    pub fn new(
        project_id: ObjectId,
        sequence_number: i32,
        title: String,
        category: MilestoneCategory,
        subsidy_amount: f64,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            project_id,
            sequence_number,
            title,
            description: String::new(),
            category,
            planned_start: None,
            planned_end: None,
            actual_start: None,
            actual_end: None,
            subsidy_amount,
            released: false,
            release_tx: None,
            verification: VerificationRecord::default(),
            approval: ApprovalRecord::default(),
            requirements: Vec::new(),
            completion_percent: 0,
            status: MilestoneStatus::Pending,
            overdue_notified: false,
            updates: Vec::new(),
            performance_targets: Vec::new(),
            oracle_result: None,
            chain_milestone_id: None,
        }
    }

    /// Recompute `completion_percent` from the requirement list
    pub fn recompute_completion(&mut self) {
        self.completion_percent = completion_percent(&self.requirements);
    }

    /// Status as seen by readers, with the overdue side-condition applied
    pub fn effective_status(&self, now: DateTime) -> MilestoneStatus {
        if is_overdue(self.status, self.planned_end, now) {
            MilestoneStatus::Overdue
        } else {
            self.status
        }
    }
}

impl IntoIndexes for MilestoneDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One sequence number per project
            (
                doc! { "project_id": 1, "sequence_number": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("project_sequence_unique".to_string())
                        .build(),
                ),
            ),
            // Overdue sweep scans on status + due date
            (
                doc! { "status": 1, "planned_end": 1 },
                Some(IndexOptions::builder().name("status_due_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for MilestoneDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reqs(flags: &[bool]) -> Vec<Requirement> {
        flags
            .iter()
            .map(|&f| Requirement {
                description: "r".into(),
                is_complete: f,
            })
            .collect()
    }

    #[test]
    fn test_completion_percent() {
        assert_eq!(completion_percent(&[]), 0);
        assert_eq!(completion_percent(&reqs(&[false, false])), 0);
        assert_eq!(completion_percent(&reqs(&[true, false])), 50);
        assert_eq!(completion_percent(&reqs(&[true, true, false])), 67);
        assert_eq!(completion_percent(&reqs(&[true, true])), 100);
    }

    #[test]
    fn test_overdue_side_condition() {
        let now = DateTime::now();
        let past = DateTime::from_millis(now.timestamp_millis() - 86_400_000);
        let future = DateTime::from_millis(now.timestamp_millis() + 86_400_000);

        assert!(is_overdue(MilestoneStatus::Pending, Some(past), now));
        assert!(is_overdue(MilestoneStatus::InProgress, Some(past), now));
        // Completed milestones never read overdue
        assert!(!is_overdue(MilestoneStatus::Completed, Some(past), now));
        // Not yet due
        assert!(!is_overdue(MilestoneStatus::Pending, Some(future), now));
        // No due date, no side-condition
        assert!(!is_overdue(MilestoneStatus::InProgress, None, now));
    }

    #[test]
    fn test_effective_status() {
        let now = DateTime::now();
        let past = DateTime::from_millis(now.timestamp_millis() - 1000);

        let mut ms = MilestoneDoc::new(
            ObjectId::new(),
            1,
            "Commissioning".into(),
            MilestoneCategory::Testing,
            25_000.0,
        );
        ms.status = MilestoneStatus::InProgress;
        ms.planned_end = Some(past);
        assert_eq!(ms.effective_status(now), MilestoneStatus::Overdue);

        // Completing from overdue still reads completed
        ms.status = MilestoneStatus::Completed;
        assert_eq!(ms.effective_status(now), MilestoneStatus::Completed);
    }
}
