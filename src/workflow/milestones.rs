//! Milestone lifecycle controller
//!
//! Orchestrates every milestone transition: runs the pure guards for
//! precise errors, then re-states the precondition inside the update
//! filter so the check and the write are one atomic operation. A CAS miss
//! after a passing guard means another request won the race, and reads as
//! the same conflict. Every successful transition appends one progress
//! note and writes exactly one audit record.

use bson::{doc, oid::ObjectId, DateTime};
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditLogger, NewAuditEvent};
use crate::auth::Action;
use crate::chain::{ether_to_wei, ChainClient};
use crate::db::schemas::{
    completion_percent, progress_percent, AuditCategory, AuditSeverity, MilestoneDoc,
    ProjectDoc, ResourceRef,
};
use crate::db::MongoCollection;
use crate::oracle::{assess, Assessment, OracleAggregate, OracleService};
use crate::types::{PlatformError, Result};
use crate::workflow::guards;
use crate::workflow::Actor;

/// The lifecycle controller. One instance, injected into the routes.
#[derive(Clone)]
pub struct MilestoneWorkflow {
    projects: MongoCollection<ProjectDoc>,
    milestones: MongoCollection<MilestoneDoc>,
    audit: AuditLogger,
    chain: Option<Arc<ChainClient>>,
}

impl MilestoneWorkflow {
    pub fn new(
        projects: MongoCollection<ProjectDoc>,
        milestones: MongoCollection<MilestoneDoc>,
        audit: AuditLogger,
        chain: Option<Arc<ChainClient>>,
    ) -> Self {
        Self {
            projects,
            milestones,
            audit,
            chain,
        }
    }

    /// Load a milestone together with its owning project
    pub async fn load(&self, milestone_id: ObjectId) -> Result<(ProjectDoc, MilestoneDoc)> {
        let milestone = self
            .milestones
            .find_by_id(milestone_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("milestone {}", milestone_id)))?;

        let project = self
            .projects
            .find_by_id(milestone.project_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", milestone.project_id)))?;

        Ok((project, milestone))
    }

    /// pending -> in_progress
    pub async fn start(
        &self,
        actor: &Actor,
        milestone_id: ObjectId,
        note: Option<String>,
    ) -> Result<MilestoneDoc> {
        let (project, milestone) = self.load(milestone_id).await?;
        guards::guard_start(&actor.id, actor.role, &project, &milestone)?;

        let updated = self
            .milestones
            .find_one_and_update(
                doc! { "_id": milestone_id, "status": "pending" },
                doc! {
                    "$set": { "status": "in_progress", "actual_start": DateTime::now() },
                    "$push": { "updates": progress_note(actor, note.unwrap_or_else(|| "work started".into())) },
                },
            )
            .await?
            .ok_or_else(|| PlatformError::Conflict("milestone is no longer pending".into()))?;

        self.audit_transition(actor, &updated, Action::StartMilestone, AuditSeverity::Low, None, None)
            .await?;

        info!(milestone = %milestone_id, "Milestone started");
        Ok(updated)
    }

    /// in_progress -> completed. All requirements are marked complete and
    /// the project's completion counters are recomputed.
    pub async fn complete(
        &self,
        actor: &Actor,
        milestone_id: ObjectId,
        note: Option<String>,
    ) -> Result<MilestoneDoc> {
        let (project, milestone) = self.load(milestone_id).await?;
        guards::guard_complete(&actor.id, actor.role, &project, &milestone)?;

        let updated = self
            .milestones
            .find_one_and_update(
                doc! { "_id": milestone_id, "status": "in_progress" },
                doc! {
                    "$set": {
                        "status": "completed",
                        "actual_end": DateTime::now(),
                        "requirements.$[].is_complete": true,
                        "completion_percent": 100,
                    },
                    "$push": { "updates": progress_note(actor, note.unwrap_or_else(|| "milestone completed".into())) },
                },
            )
            .await?
            .ok_or_else(|| PlatformError::Conflict("milestone is no longer in progress".into()))?;

        self.bump_completed_counter(milestone.project_id).await?;

        self.audit_transition(actor, &updated, Action::CompleteMilestone, AuditSeverity::Medium, None, None)
            .await?;

        info!(milestone = %milestone_id, "Milestone completed");
        Ok(updated)
    }

    /// Set-once verification by the assigned auditor
    pub async fn verify(
        &self,
        actor: &Actor,
        milestone_id: ObjectId,
        comment: Option<String>,
    ) -> Result<MilestoneDoc> {
        let (project, milestone) = self.load(milestone_id).await?;
        guards::guard_verify(&actor.id, actor.role, &project, &milestone)?;

        let updated = self
            .milestones
            .find_one_and_update(
                doc! {
                    "_id": milestone_id,
                    "status": "completed",
                    "verification.is_verified": false,
                },
                doc! {
                    "$set": {
                        "verification.is_verified": true,
                        "verification.verified_by": actor.id,
                        "verification.verified_at": DateTime::now(),
                        "verification.comment": comment.unwrap_or_default(),
                    },
                    "$push": { "updates": progress_note(actor, "verified by auditor".into()) },
                },
            )
            .await?
            .ok_or_else(|| PlatformError::Conflict("milestone is already verified".into()))?;

        self.audit_transition(actor, &updated, Action::VerifyMilestone, AuditSeverity::Medium, None, None)
            .await?;

        info!(milestone = %milestone_id, auditor = %actor.id, "Milestone verified");
        Ok(updated)
    }

    /// Set-once approval by a government actor
    pub async fn approve(&self, actor: &Actor, milestone_id: ObjectId) -> Result<MilestoneDoc> {
        let (_, milestone) = self.load(milestone_id).await?;
        guards::guard_approve(actor.role, &milestone)?;

        let updated = self
            .milestones
            .find_one_and_update(
                doc! {
                    "_id": milestone_id,
                    "status": "completed",
                    "verification.is_verified": true,
                    "approval.is_approved": false,
                },
                doc! {
                    "$set": {
                        "approval.is_approved": true,
                        "approval.approved_by": actor.id,
                        "approval.approved_at": DateTime::now(),
                    },
                    "$push": { "updates": progress_note(actor, "approved for release".into()) },
                },
            )
            .await?
            .ok_or_else(|| PlatformError::Conflict("milestone is already approved".into()))?;

        self.audit_transition(actor, &updated, Action::ApproveMilestone, AuditSeverity::Medium, None, None)
            .await?;

        info!(milestone = %milestone_id, "Milestone approved");
        Ok(updated)
    }

    /// Release the milestone subsidy. The unreleased->released flip is the
    /// atomic claim: whichever request wins it proceeds to the chain, the
    /// loser conflicts. A failed chain submission releases the claim so the
    /// release can be retried.
    pub async fn release_subsidy(&self, actor: &Actor, milestone_id: ObjectId) -> Result<MilestoneDoc> {
        let (project, milestone) = self.load(milestone_id).await?;
        guards::guard_release(actor.role, &project, &milestone)?;

        let claimed = self
            .milestones
            .find_one_and_update(
                doc! {
                    "_id": milestone_id,
                    "released": false,
                    "approval.is_approved": true,
                },
                doc! { "$set": { "released": true } },
            )
            .await?
            .ok_or_else(|| {
                PlatformError::Conflict("subsidy already released for this milestone".into())
            })?;

        let tx_ref = match self.submit_release(&project, &claimed).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(milestone = %milestone_id, error = %e, "Release submission failed, claim rolled back");
                self.milestones
                    .update_one(
                        doc! { "_id": milestone_id },
                        doc! { "$set": { "released": false } },
                    )
                    .await?;
                self.audit
                    .record(NewAuditEvent {
                        event_type: "subsidy.release_failed".into(),
                        actor: actor.actor_ref(),
                        resource: milestone_resource(&claimed),
                        action: Action::ReleaseSubsidy.verb().into(),
                        description: format!("subsidy release failed: {}", e),
                        category: AuditCategory::Financial,
                        severity: AuditSeverity::High,
                        tx_ref: None,
                        amount: Some(claimed.subsidy_amount),
                    })
                    .await?;
                return Err(e);
            }
        };

        let updated = self
            .milestones
            .find_one_and_update(
                doc! { "_id": milestone_id },
                doc! {
                    "$set": { "release_tx": tx_ref.clone() },
                    "$push": { "updates": progress_note(actor, format!("subsidy released ({})", tx_ref.clone().unwrap_or_else(|| "off-chain".into()))) },
                },
            )
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("milestone {}", milestone_id)))?;

        self.projects
            .update_one(
                doc! { "_id": project._id },
                doc! { "$inc": { "released_amount": claimed.subsidy_amount } },
            )
            .await?;

        self.audit
            .record(NewAuditEvent {
                event_type: "subsidy.released".into(),
                actor: actor.actor_ref(),
                resource: milestone_resource(&updated),
                action: Action::ReleaseSubsidy.verb().into(),
                description: format!(
                    "released {} for milestone '{}'",
                    claimed.subsidy_amount, updated.title
                ),
                category: AuditCategory::Financial,
                severity: AuditSeverity::Critical,
                tx_ref,
                amount: Some(claimed.subsidy_amount),
            })
            .await?;

        info!(milestone = %milestone_id, amount = claimed.subsidy_amount, "Subsidy released");
        Ok(updated)
    }

    /// Advisory oracle verification run. The aggregate is persisted on the
    /// milestone and returned with its category assessment; the verify
    /// transition never gates on it.
    pub async fn oracle_verify(
        &self,
        actor: &Actor,
        milestone_id: ObjectId,
        oracle: &OracleService,
    ) -> Result<(OracleAggregate, Assessment)> {
        let (project, milestone) = self.load(milestone_id).await?;
        guards::guard_oracle_verify(actor.role, &project, &milestone)?;

        let aggregate = oracle.aggregate_for_milestone(&milestone, &project).await?;
        let assessment = assess(milestone.category, &milestone.performance_targets, &aggregate);

        let aggregate_bson = bson::to_bson(&aggregate)
            .map_err(|e| PlatformError::Internal(format!("oracle result serialization: {}", e)))?;
        self.milestones
            .update_one(
                doc! { "_id": milestone_id },
                doc! { "$set": { "oracle_result": aggregate_bson } },
            )
            .await?;

        self.audit
            .record(NewAuditEvent {
                event_type: "milestone.oracle_verified".into(),
                actor: actor.actor_ref(),
                resource: milestone_resource(&milestone),
                action: Action::RunOracleVerification.verb().into(),
                description: format!(
                    "oracle score {:.2}, consensus {}, assessment {}",
                    aggregate.verification_score,
                    aggregate.consensus,
                    if assessment.passed { "passed" } else { "failed" }
                ),
                category: AuditCategory::Milestone,
                severity: if assessment.passed {
                    AuditSeverity::Low
                } else {
                    AuditSeverity::High
                },
                tx_ref: None,
                amount: None,
            })
            .await?;

        Ok((aggregate, assessment))
    }

    /// Toggle one requirement's completion and recompute the derived
    /// percentage. Owner-only, while the milestone is in progress.
    pub async fn set_requirement(
        &self,
        actor: &Actor,
        milestone_id: ObjectId,
        index: usize,
        is_complete: bool,
    ) -> Result<MilestoneDoc> {
        let (project, mut milestone) = self.load(milestone_id).await?;
        guards::guard_complete(&actor.id, actor.role, &project, &milestone)?;

        let requirement = milestone
            .requirements
            .get_mut(index)
            .ok_or_else(|| PlatformError::BadRequest(format!("no requirement at index {}", index)))?;
        requirement.is_complete = is_complete;
        milestone.completion_percent = completion_percent(&milestone.requirements);

        let requirements_bson = bson::to_bson(&milestone.requirements)
            .map_err(|e| PlatformError::Internal(format!("requirement serialization: {}", e)))?;

        self.milestones
            .find_one_and_update(
                doc! { "_id": milestone_id, "status": "in_progress" },
                doc! { "$set": {
                    "requirements": requirements_bson,
                    "completion_percent": milestone.completion_percent,
                }},
            )
            .await?
            .ok_or_else(|| PlatformError::Conflict("milestone is no longer in progress".into()))
    }

    /// Append a free-form progress note
    pub async fn add_update(
        &self,
        actor: &Actor,
        milestone_id: ObjectId,
        note: String,
    ) -> Result<MilestoneDoc> {
        let (project, milestone) = self.load(milestone_id).await?;
        if !project.is_participant(&actor.id) {
            return Err(PlatformError::Forbidden(
                "only project participants may post updates".into(),
            ));
        }
        if note.trim().is_empty() {
            return Err(PlatformError::BadRequest("update note is empty".into()));
        }

        self.milestones
            .find_one_and_update(
                doc! { "_id": milestone_id },
                doc! { "$push": { "updates": progress_note(actor, note) } },
            )
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("milestone {}", milestone._id.unwrap_or_default())))
    }

    /// Submit the release to the contract when a chain client is
    /// configured and both sides are registered on-chain
    async fn submit_release(
        &self,
        project: &ProjectDoc,
        milestone: &MilestoneDoc,
    ) -> Result<Option<String>> {
        let Some(chain) = &self.chain else {
            return Ok(None);
        };
        let (Some(chain_project_id), Some(chain_milestone_id)) =
            (project.chain_project_id, milestone.chain_milestone_id)
        else {
            return Ok(None);
        };

        let amount_wei = ether_to_wei(milestone.subsidy_amount)?;
        let outcome = chain
            .release_subsidy(chain_project_id as u128, chain_milestone_id as u128, amount_wei)
            .await?;
        Ok(Some(outcome.transaction_hash))
    }

    /// Increment the project's completed counter and refresh the derived
    /// progress percentage from the post-increment counters. A project whose
    /// last milestone completes moves to completed itself.
    async fn bump_completed_counter(&self, project_id: ObjectId) -> Result<()> {
        let updated = self
            .projects
            .find_one_and_update(
                doc! { "_id": project_id },
                doc! { "$inc": { "completed_milestones": 1 } },
            )
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;

        let progress = progress_percent(updated.completed_milestones, updated.milestone_count);
        let mut set = doc! { "progress_percent": progress };
        if updated.milestone_count > 0 && updated.completed_milestones >= updated.milestone_count {
            set.insert("status", "completed");
        }

        self.projects
            .update_one(doc! { "_id": project_id }, doc! { "$set": set })
            .await?;
        Ok(())
    }

    async fn audit_transition(
        &self,
        actor: &Actor,
        milestone: &MilestoneDoc,
        action: Action,
        severity: AuditSeverity,
        tx_ref: Option<String>,
        amount: Option<f64>,
    ) -> Result<()> {
        self.audit
            .record(NewAuditEvent {
                event_type: format!("milestone.{}", action.verb()),
                actor: actor.actor_ref(),
                resource: milestone_resource(milestone),
                action: action.verb().into(),
                description: format!("milestone '{}' {}", milestone.title, action.verb()),
                category: AuditCategory::Milestone,
                severity,
                tx_ref,
                amount,
            })
            .await?;
        Ok(())
    }
}

fn progress_note(actor: &Actor, note: String) -> bson::Document {
    doc! { "at": DateTime::now(), "author_id": actor.id, "note": note }
}

fn milestone_resource(milestone: &MilestoneDoc) -> ResourceRef {
    ResourceRef {
        kind: "milestone".into(),
        id: milestone._id,
    }
}
