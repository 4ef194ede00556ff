//! Project workflow
//!
//! Creation, government approval/rejection, auditor assignment, and
//! milestone registration. Approval and rejection are one-shot: the
//! pending precondition sits in the update filter, so a second decision
//! conflicts instead of overwriting the first.

use bson::{doc, oid::ObjectId, DateTime};
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditLogger, NewAuditEvent};
use crate::auth::{role_allows, Action, Role};
use crate::chain::{ether_to_wei, ChainClient};
use crate::db::schemas::{
    AuditCategory, AuditSeverity, MilestoneCategory, MilestoneDoc, PerformanceTarget, ProjectDoc,
    Requirement, ResourceRef, UserDoc,
};
use crate::db::MongoCollection;
use crate::types::{PlatformError, Result};
use crate::workflow::Actor;

/// Input for project creation
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub location: String,
    pub capacity_mw: f64,
    pub producer_id: ObjectId,
    pub auditor_id: Option<ObjectId>,
    pub total_subsidy: f64,
}

/// Input for milestone registration
#[derive(Debug, Clone)]
pub struct NewMilestone {
    pub title: String,
    pub description: String,
    pub category: MilestoneCategory,
    pub subsidy_amount: f64,
    pub planned_start: Option<DateTime>,
    pub planned_end: Option<DateTime>,
    pub requirements: Vec<Requirement>,
    pub performance_targets: Vec<PerformanceTarget>,
}

#[derive(Clone)]
pub struct ProjectWorkflow {
    projects: MongoCollection<ProjectDoc>,
    milestones: MongoCollection<MilestoneDoc>,
    users: MongoCollection<UserDoc>,
    audit: AuditLogger,
    chain: Option<Arc<ChainClient>>,
}

impl ProjectWorkflow {
    pub fn new(
        projects: MongoCollection<ProjectDoc>,
        milestones: MongoCollection<MilestoneDoc>,
        users: MongoCollection<UserDoc>,
        audit: AuditLogger,
        chain: Option<Arc<ChainClient>>,
    ) -> Self {
        Self {
            projects,
            milestones,
            users,
            audit,
            chain,
        }
    }

    /// Register a new project under the acting government actor's
    /// oversight. The producer (and auditor, when given) must exist and
    /// hold the matching role.
    pub async fn create(&self, actor: &Actor, input: NewProject) -> Result<ProjectDoc> {
        self.require(actor.role, Action::CreateProject)?;

        if input.name.trim().is_empty() {
            return Err(PlatformError::BadRequest("project name is required".into()));
        }
        if input.total_subsidy <= 0.0 || !input.total_subsidy.is_finite() {
            return Err(PlatformError::BadRequest(
                "total subsidy must be a positive amount".into(),
            ));
        }

        self.require_user_role(input.producer_id, Role::Producer).await?;
        if let Some(auditor_id) = input.auditor_id {
            self.require_user_role(auditor_id, Role::Auditor).await?;
        }

        let mut project = ProjectDoc::new(
            input.name,
            input.description,
            input.producer_id,
            actor.id,
            input.total_subsidy,
        );
        project.location = input.location;
        project.capacity_mw = input.capacity_mw;
        project.auditor_id = input.auditor_id;

        let id = self.projects.insert_one(project.clone()).await?;
        project._id = Some(id);

        self.audit_project(actor, &project, "project.created", Action::CreateProject, AuditSeverity::Medium)
            .await?;

        info!(project = %id, name = %project.name, "Project created");
        Ok(project)
    }

    /// One-shot government approval: pending -> approved, project goes
    /// active. Registers the project on-chain when a chain client is
    /// configured; a failed registration does not undo the approval, it is
    /// recorded and the chain fields stay unset.
    pub async fn approve(&self, actor: &Actor, project_id: ObjectId) -> Result<ProjectDoc> {
        self.require(actor.role, Action::ApproveProject)?;
        self.require_overseer(actor, project_id).await?;

        let mut approved = self
            .projects
            .find_one_and_update(
                doc! { "_id": project_id, "approval_status": "pending" },
                doc! { "$set": {
                    "approval_status": "approved",
                    "status": "active",
                    "approval_by": actor.id,
                    "approval_at": DateTime::now(),
                }},
            )
            .await?
            .ok_or_else(|| PlatformError::Conflict("project decision already recorded".into()))?;

        if let Some(registration) = self.register_on_chain(&approved).await {
            match registration {
                Ok((chain_id, tx)) => {
                    approved = self
                        .projects
                        .find_one_and_update(
                            doc! { "_id": project_id },
                            doc! { "$set": {
                                "chain_project_id": chain_id as i64,
                                "creation_tx": tx,
                            }},
                        )
                        .await?
                        .unwrap_or(approved);
                }
                Err(e) => {
                    warn!(project = %project_id, error = %e, "On-chain registration failed");
                    self.audit
                        .record(NewAuditEvent {
                            event_type: "project.chain_registration_failed".into(),
                            actor: actor.actor_ref(),
                            resource: project_resource(&approved),
                            action: Action::ApproveProject.verb().into(),
                            description: format!("on-chain registration failed: {}", e),
                            category: AuditCategory::System,
                            severity: AuditSeverity::High,
                            tx_ref: None,
                            amount: None,
                        })
                        .await?;
                }
            }
        }

        self.audit_project(actor, &approved, "project.approved", Action::ApproveProject, AuditSeverity::Medium)
            .await?;

        info!(project = %project_id, "Project approved");
        Ok(approved)
    }

    /// One-shot government rejection with a recorded reason
    pub async fn reject(&self, actor: &Actor, project_id: ObjectId, reason: String) -> Result<ProjectDoc> {
        self.require(actor.role, Action::RejectProject)?;
        self.require_overseer(actor, project_id).await?;

        if reason.trim().is_empty() {
            return Err(PlatformError::BadRequest("rejection reason is required".into()));
        }

        let rejected = self
            .projects
            .find_one_and_update(
                doc! { "_id": project_id, "approval_status": "pending" },
                doc! { "$set": {
                    "approval_status": "rejected",
                    "status": "cancelled",
                    "approval_by": actor.id,
                    "approval_at": DateTime::now(),
                    "rejection_reason": reason,
                }},
            )
            .await?
            .ok_or_else(|| PlatformError::Conflict("project decision already recorded".into()))?;

        self.audit_project(actor, &rejected, "project.rejected", Action::RejectProject, AuditSeverity::Medium)
            .await?;

        info!(project = %project_id, "Project rejected");
        Ok(rejected)
    }

    /// Register a milestone under an approved project. Sequence numbers
    /// are assigned from the counter; the unique index on
    /// `{project_id, sequence_number}` catches concurrent registrations.
    pub async fn create_milestone(
        &self,
        actor: &Actor,
        project_id: ObjectId,
        input: NewMilestone,
    ) -> Result<MilestoneDoc> {
        self.require(actor.role, Action::CreateMilestone)?;
        let project = self.require_overseer(actor, project_id).await?;

        if project.approval_status != crate::db::schemas::ApprovalStatus::Approved {
            return Err(PlatformError::Conflict(
                "milestones require an approved project".into(),
            ));
        }
        if input.title.trim().is_empty() {
            return Err(PlatformError::BadRequest("milestone title is required".into()));
        }
        if input.subsidy_amount <= 0.0 || !input.subsidy_amount.is_finite() {
            return Err(PlatformError::BadRequest(
                "milestone subsidy must be a positive amount".into(),
            ));
        }

        let allocated: f64 = self
            .milestones
            .find_many(doc! { "project_id": project_id }, None, None)
            .await?
            .iter()
            .map(|m| m.subsidy_amount)
            .sum();
        if allocated + input.subsidy_amount > project.total_subsidy {
            return Err(PlatformError::Conflict(format!(
                "milestone allocation of {} exceeds remaining subsidy ({} of {} allocated)",
                input.subsidy_amount, allocated, project.total_subsidy
            )));
        }

        let mut milestone = MilestoneDoc::new(
            project_id,
            project.milestone_count + 1,
            input.title,
            input.category,
            input.subsidy_amount,
        );
        milestone.description = input.description;
        milestone.planned_start = input.planned_start;
        milestone.planned_end = input.planned_end;
        milestone.requirements = input.requirements;
        milestone.performance_targets = input.performance_targets;
        milestone.recompute_completion();

        let id = self.milestones.insert_one(milestone.clone()).await?;
        milestone._id = Some(id);

        let counted = self
            .projects
            .find_one_and_update(
                doc! { "_id": project_id },
                doc! { "$inc": { "milestone_count": 1 } },
            )
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;
        self.projects
            .update_one(
                doc! { "_id": project_id },
                doc! { "$set": {
                    "progress_percent": crate::db::schemas::progress_percent(
                        counted.completed_milestones,
                        counted.milestone_count,
                    ),
                }},
            )
            .await?;

        if let Some(result) = self.register_milestone_on_chain(&counted, &milestone).await {
            match result {
                Ok(chain_id) => {
                    self.milestones
                        .update_one(
                            doc! { "_id": id },
                            doc! { "$set": { "chain_milestone_id": chain_id as i64 } },
                        )
                        .await?;
                    milestone.chain_milestone_id = Some(chain_id);
                }
                Err(e) => {
                    warn!(milestone = %id, error = %e, "On-chain milestone registration failed");
                }
            }
        }

        self.audit
            .record(NewAuditEvent {
                event_type: "milestone.created".into(),
                actor: actor.actor_ref(),
                resource: ResourceRef {
                    kind: "milestone".into(),
                    id: Some(id),
                },
                action: Action::CreateMilestone.verb().into(),
                description: format!("milestone '{}' registered", milestone.title),
                category: AuditCategory::Milestone,
                severity: AuditSeverity::Low,
                tx_ref: None,
                amount: Some(milestone.subsidy_amount),
            })
            .await?;

        info!(milestone = %id, project = %project_id, "Milestone registered");
        Ok(milestone)
    }

    /// Assign or replace the project's auditor
    pub async fn assign_auditor(
        &self,
        actor: &Actor,
        project_id: ObjectId,
        auditor_id: ObjectId,
    ) -> Result<ProjectDoc> {
        self.require(actor.role, Action::CreateProject)?;
        self.require_overseer(actor, project_id).await?;
        self.require_user_role(auditor_id, Role::Auditor).await?;

        let updated = self
            .projects
            .find_one_and_update(
                doc! { "_id": project_id },
                doc! { "$set": { "auditor_id": auditor_id } },
            )
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;

        self.audit_project(actor, &updated, "project.auditor_assigned", Action::CreateProject, AuditSeverity::Low)
            .await?;
        Ok(updated)
    }

    fn require(&self, role: Role, action: Action) -> Result<()> {
        if role_allows(role, action) {
            Ok(())
        } else {
            Err(PlatformError::Forbidden(format!(
                "role '{}' may not {}",
                role,
                action.verb()
            )))
        }
    }

    async fn require_user_role(&self, user_id: ObjectId, expected: Role) -> Result<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| PlatformError::BadRequest(format!("no such user {}", user_id)))?;
        if user.role != expected {
            return Err(PlatformError::BadRequest(format!(
                "user {} does not hold the {} role",
                user_id, expected
            )));
        }
        Ok(())
    }

    async fn require_overseer(&self, actor: &Actor, project_id: ObjectId) -> Result<ProjectDoc> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;
        if project.government_id != actor.id {
            return Err(PlatformError::Forbidden(
                "only the overseeing government actor may act on this project".into(),
            ));
        }
        Ok(project)
    }

    /// Returns None when no chain client is configured
    async fn register_on_chain(&self, project: &ProjectDoc) -> Option<Result<(u64, String)>> {
        let chain = self.chain.as_ref()?;
        let id = project._id?;

        Some(async {
            let subsidy_wei = ether_to_wei(project.total_subsidy)?;
            // Low 8 bytes of the ObjectId timestamp+counter as a stable numeric handle
            let numeric_id = u64::from_be_bytes(
                id.bytes()[4..12].try_into().map_err(|_| {
                    PlatformError::Internal("object id slice conversion".into())
                })?,
            );
            let outcome = chain.create_project(numeric_id as u128, subsidy_wei).await?;
            let chain_id = outcome
                .event_data
                .first()
                .copied()
                .unwrap_or(numeric_id as u128) as u64;
            Ok((chain_id, outcome.transaction_hash))
        }
        .await)
    }

    async fn register_milestone_on_chain(
        &self,
        project: &ProjectDoc,
        milestone: &MilestoneDoc,
    ) -> Option<Result<u64>> {
        let chain = self.chain.as_ref()?;
        let chain_project_id = project.chain_project_id?;

        Some(async {
            let subsidy_wei = ether_to_wei(milestone.subsidy_amount)?;
            let outcome = chain
                .create_milestone(
                    chain_project_id as u128,
                    milestone.sequence_number as u128,
                    subsidy_wei,
                )
                .await?;
            let chain_id = outcome
                .event_data
                .get(1)
                .copied()
                .unwrap_or(milestone.sequence_number as u128) as u64;
            Ok(chain_id)
        }
        .await)
    }

    async fn audit_project(
        &self,
        actor: &Actor,
        project: &ProjectDoc,
        event_type: &str,
        action: Action,
        severity: AuditSeverity,
    ) -> Result<()> {
        self.audit
            .record(NewAuditEvent {
                event_type: event_type.into(),
                actor: actor.actor_ref(),
                resource: project_resource(project),
                action: action.verb().into(),
                description: format!("project '{}' {}", project.name, action.verb()),
                category: AuditCategory::Project,
                severity,
                tx_ref: None,
                amount: None,
            })
            .await?;
        Ok(())
    }
}

fn project_resource(project: &ProjectDoc) -> ResourceRef {
    ResourceRef {
        kind: "project".into(),
        id: project._id,
    }
}
