//! Project document schema
//!
//! A project is owned by exactly one producer, overseen by one government
//! actor, and optionally assigned one auditor. `progress_percent` is a pure
//! function of the milestone counters, recomputed explicitly by every
//! transition handler that touches them.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for projects
pub const PROJECT_COLLECTION: &str = "projects";

/// Project lifecycle status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Pending,
    Active,
    Completed,
    Suspended,
    Cancelled,
}

/// Government approval state, parallel to the lifecycle status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Project document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProjectDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    pub name: String,
    pub description: String,

    /// Site location
    #[serde(default)]
    pub location: String,

    /// Planned electrolyser capacity in megawatts
    #[serde(default)]
    pub capacity_mw: f64,

    /// Owning producer
    pub producer_id: ObjectId,

    /// Overseeing government actor
    pub government_id: ObjectId,

    /// Assigned auditor, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auditor_id: Option<ObjectId>,

    /// Total subsidy committed to this project
    pub total_subsidy: f64,

    /// Subsidy released to date; invariant `released_amount <= total_subsidy`
    #[serde(default)]
    pub released_amount: f64,

    #[serde(default)]
    pub status: ProjectStatus,

    #[serde(default)]
    pub approval_status: ApprovalStatus,

    /// Who approved/rejected and when
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_by: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_at: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    /// Milestone counters; progress derives from these
    #[serde(default)]
    pub milestone_count: i32,
    #[serde(default)]
    pub completed_milestones: i32,

    /// Derived: round(completed / count * 100), 0 when no milestones
    #[serde(default)]
    pub progress_percent: i32,

    /// On-chain project id assigned by the contract, once created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_project_id: Option<u64>,

    /// Transaction hash of the on-chain project creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_tx: Option<String>,
}

/// Pure derived-field computation: percentage of completed milestones.
pub fn progress_percent(completed: i32, count: i32) -> i32 {
    if count <= 0 {
        return 0;
    }
    ((completed as f64 / count as f64) * 100.0).round() as i32
}

impl ProjectDoc {
    pub fn new(
        name: String,
        description: String,
        producer_id: ObjectId,
        government_id: ObjectId,
        total_subsidy: f64,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            name,
            description,
            location: String::new(),
            capacity_mw: 0.0,
            producer_id,
            government_id,
            auditor_id: None,
            total_subsidy,
            released_amount: 0.0,
            status: ProjectStatus::Pending,
            approval_status: ApprovalStatus::Pending,
            approval_by: None,
            approval_at: None,
            rejection_reason: None,
            milestone_count: 0,
            completed_milestones: 0,
            progress_percent: 0,
            chain_project_id: None,
            creation_tx: None,
        }
    }

    /// Recompute `progress_percent` from the counters. Callers that mutate
    /// the counters invoke this before persisting.
    pub fn recompute_progress(&mut self) {
        self.progress_percent = progress_percent(self.completed_milestones, self.milestone_count);
    }

    /// Whether `user_id` participates in this project in any role
    pub fn is_participant(&self, user_id: &ObjectId) -> bool {
        self.producer_id == *user_id
            || self.government_id == *user_id
            || self.auditor_id.as_ref() == Some(user_id)
    }
}

impl IntoIndexes for ProjectDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "producer_id": 1 },
                Some(IndexOptions::builder().name("producer_index".to_string()).build()),
            ),
            (
                doc! { "government_id": 1 },
                Some(IndexOptions::builder().name("government_index".to_string()).build()),
            ),
            (
                doc! { "auditor_id": 1 },
                Some(
                    IndexOptions::builder()
                        .sparse(true)
                        .name("auditor_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(IndexOptions::builder().name("status_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for ProjectDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(0, 4), 0);
        assert_eq!(progress_percent(1, 4), 25);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
    }

    #[test]
    fn test_recompute_progress() {
        let mut project = ProjectDoc::new(
            "Electrolyser Phase 1".into(),
            "".into(),
            ObjectId::new(),
            ObjectId::new(),
            100_000.0,
        );
        project.milestone_count = 4;
        project.completed_milestones = 3;
        project.recompute_progress();
        assert_eq!(project.progress_percent, 75);
    }

    #[test]
    fn test_is_participant() {
        let producer = ObjectId::new();
        let government = ObjectId::new();
        let auditor = ObjectId::new();
        let outsider = ObjectId::new();

        let mut project =
            ProjectDoc::new("P".into(), "".into(), producer, government, 1.0);
        project.auditor_id = Some(auditor);

        assert!(project.is_participant(&producer));
        assert!(project.is_participant(&government));
        assert!(project.is_participant(&auditor));
        assert!(!project.is_participant(&outsider));
    }
}
