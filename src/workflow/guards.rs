//! Milestone transition guards
//!
//! Pure preconditions for every lifecycle transition, checked in a fixed
//! order: role, then ownership/assignment, then lifecycle state, then the
//! set-once gates. Role and ownership failures read as Forbidden; state and
//! gate failures read as Conflict, since the request was well-formed but
//! arrived against the wrong document state.
//!
//! The controller re-checks state atomically in the update filter; these
//! guards exist so callers get precise errors before the write is attempted.

use bson::oid::ObjectId;

use crate::auth::{role_allows, Action, Role};
use crate::db::schemas::{
    ApprovalStatus, MilestoneDoc, MilestoneStatus, ProjectDoc, ProjectStatus,
};
use crate::types::{PlatformError, Result};

fn require_role(role: Role, action: Action) -> Result<()> {
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

fn require_owner(project: &ProjectDoc, producer_id: &ObjectId) -> Result<()> {
    if project.producer_id == *producer_id {
        Ok(())
    } else {
        Err(PlatformError::Forbidden(
            "only the owning producer may act on this milestone".into(),
        ))
    }
}

fn require_assigned_auditor(project: &ProjectDoc, auditor_id: &ObjectId) -> Result<()> {
    if project.auditor_id.as_ref() == Some(auditor_id) {
        Ok(())
    } else {
        Err(PlatformError::Forbidden(
            "only the assigned auditor may verify this milestone".into(),
        ))
    }
}

fn require_project_active(project: &ProjectDoc) -> Result<()> {
    if project.approval_status != ApprovalStatus::Approved {
        return Err(PlatformError::Conflict("project is not approved".into()));
    }
    match project.status {
        ProjectStatus::Active => Ok(()),
        other => Err(PlatformError::Conflict(format!(
            "project is {:?}, not active",
            other
        ))),
    }
}

fn require_status(milestone: &MilestoneDoc, expected: MilestoneStatus) -> Result<()> {
    if milestone.status == expected {
        Ok(())
    } else {
        Err(PlatformError::Conflict(format!(
            "milestone is {:?}, expected {:?}",
            milestone.status, expected
        )))
    }
}

/// Producer starts work on a pending milestone
pub fn guard_start(
    actor_id: &ObjectId,
    role: Role,
    project: &ProjectDoc,
    milestone: &MilestoneDoc,
) -> Result<()> {
    require_role(role, Action::StartMilestone)?;
    require_owner(project, actor_id)?;
    require_project_active(project)?;
    require_status(milestone, MilestoneStatus::Pending)
}

/// Producer reports an in-progress milestone complete
pub fn guard_complete(
    actor_id: &ObjectId,
    role: Role,
    project: &ProjectDoc,
    milestone: &MilestoneDoc,
) -> Result<()> {
    require_role(role, Action::CompleteMilestone)?;
    require_owner(project, actor_id)?;
    require_project_active(project)?;
    require_status(milestone, MilestoneStatus::InProgress)
}

/// Assigned auditor verifies a completed milestone. Verification is
/// set-once: a second attempt conflicts instead of overwriting.
pub fn guard_verify(
    actor_id: &ObjectId,
    role: Role,
    project: &ProjectDoc,
    milestone: &MilestoneDoc,
) -> Result<()> {
    require_role(role, Action::VerifyMilestone)?;
    require_assigned_auditor(project, actor_id)?;
    require_status(milestone, MilestoneStatus::Completed)?;
    if milestone.verification.is_verified {
        return Err(PlatformError::Conflict(
            "milestone is already verified".into(),
        ));
    }
    Ok(())
}

/// Any government actor approves a verified milestone; approval is not
/// bound to the project's overseer. Set-once, and requires verification
/// first.
pub fn guard_approve(role: Role, milestone: &MilestoneDoc) -> Result<()> {
    require_role(role, Action::ApproveMilestone)?;
    require_status(milestone, MilestoneStatus::Completed)?;
    if !milestone.verification.is_verified {
        return Err(PlatformError::Conflict(
            "milestone must be verified before approval".into(),
        ));
    }
    if milestone.approval.is_approved {
        return Err(PlatformError::Conflict(
            "milestone is already approved".into(),
        ));
    }
    Ok(())
}

/// Any government actor releases the milestone subsidy. Requires both
/// gates set, an unreleased milestone, and headroom in the project's
/// committed total.
pub fn guard_release(role: Role, project: &ProjectDoc, milestone: &MilestoneDoc) -> Result<()> {
    require_role(role, Action::ReleaseSubsidy)?;
    if !milestone.verification.is_verified {
        return Err(PlatformError::Conflict(
            "milestone must be verified before release".into(),
        ));
    }
    if !milestone.approval.is_approved {
        return Err(PlatformError::Conflict(
            "milestone must be approved before release".into(),
        ));
    }
    if milestone.released {
        return Err(PlatformError::Conflict(
            "subsidy already released for this milestone".into(),
        ));
    }
    if project.released_amount + milestone.subsidy_amount > project.total_subsidy {
        return Err(PlatformError::Conflict(format!(
            "release of {} would exceed committed subsidy ({} of {} already released)",
            milestone.subsidy_amount, project.released_amount, project.total_subsidy
        )));
    }
    Ok(())
}

/// Oracle verification run: advisory, so the only preconditions are the
/// role and that the milestone belongs to the project in hand.
pub fn guard_oracle_verify(role: Role, project: &ProjectDoc, milestone: &MilestoneDoc) -> Result<()> {
    require_role(role, Action::RunOracleVerification)?;
    if Some(milestone.project_id) != project._id {
        return Err(PlatformError::BadRequest(
            "milestone does not belong to this project".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::MilestoneCategory;

    struct Fixture {
        producer: ObjectId,
        government: ObjectId,
        auditor: ObjectId,
        project: ProjectDoc,
        milestone: MilestoneDoc,
    }

    fn fixture() -> Fixture {
        let producer = ObjectId::new();
        let government = ObjectId::new();
        let auditor = ObjectId::new();

        let mut project = ProjectDoc::new(
            "Electrolyser Phase 1".into(),
            "".into(),
            producer,
            government,
            100_000.0,
        );
        project._id = Some(ObjectId::new());
        project.auditor_id = Some(auditor);
        project.status = ProjectStatus::Active;
        project.approval_status = ApprovalStatus::Approved;

        let mut milestone = MilestoneDoc::new(
            project._id.unwrap(),
            1,
            "Site preparation".into(),
            MilestoneCategory::Construction,
            25_000.0,
        );
        milestone._id = Some(ObjectId::new());

        Fixture {
            producer,
            government,
            auditor,
            project,
            milestone,
        }
    }

    fn is_forbidden(result: Result<()>) -> bool {
        matches!(result, Err(PlatformError::Forbidden(_)))
    }

    fn is_conflict(result: Result<()>) -> bool {
        matches!(result, Err(PlatformError::Conflict(_)))
    }

    #[test]
    fn test_start_happy_path() {
        let f = fixture();
        assert!(guard_start(&f.producer, Role::Producer, &f.project, &f.milestone).is_ok());
    }

    #[test]
    fn test_start_wrong_role_is_forbidden() {
        let f = fixture();
        assert!(is_forbidden(guard_start(
            &f.government,
            Role::Government,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_start_wrong_producer_is_forbidden() {
        let f = fixture();
        let other = ObjectId::new();
        assert!(is_forbidden(guard_start(
            &other,
            Role::Producer,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_start_inactive_project_is_conflict() {
        let mut f = fixture();
        f.project.status = ProjectStatus::Suspended;
        assert!(is_conflict(guard_start(
            &f.producer,
            Role::Producer,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_start_wrong_status_is_conflict() {
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::InProgress;
        assert!(is_conflict(guard_start(
            &f.producer,
            Role::Producer,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_complete_requires_in_progress() {
        let mut f = fixture();
        assert!(is_conflict(guard_complete(
            &f.producer,
            Role::Producer,
            &f.project,
            &f.milestone
        )));

        f.milestone.status = MilestoneStatus::InProgress;
        assert!(guard_complete(&f.producer, Role::Producer, &f.project, &f.milestone).is_ok());
    }

    #[test]
    fn test_verify_requires_completed_and_assignment() {
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::Completed;

        assert!(guard_verify(&f.auditor, Role::Auditor, &f.project, &f.milestone).is_ok());

        // An unassigned auditor is rejected before any state check
        let other = ObjectId::new();
        assert!(is_forbidden(guard_verify(
            &other,
            Role::Auditor,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_verify_is_set_once() {
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::Completed;
        f.milestone.verification.is_verified = true;
        assert!(is_conflict(guard_verify(
            &f.auditor,
            Role::Auditor,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_producer_can_never_verify_own_milestone() {
        // Even the owning producer with every state precondition met is
        // rejected at the role check
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::Completed;
        assert!(is_forbidden(guard_verify(
            &f.producer,
            Role::Producer,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_approve_requires_verification_first() {
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::Completed;
        assert!(is_conflict(guard_approve(Role::Government, &f.milestone)));

        f.milestone.verification.is_verified = true;
        assert!(guard_approve(Role::Government, &f.milestone).is_ok());
    }

    #[test]
    fn test_approve_is_set_once() {
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::Completed;
        f.milestone.verification.is_verified = true;
        f.milestone.approval.is_approved = true;
        assert!(is_conflict(guard_approve(Role::Government, &f.milestone)));
    }

    #[test]
    fn test_approve_and_release_accept_any_government_actor() {
        // Approval and release gate on role and milestone state alone; the
        // overseer recorded on the project does not restrict which
        // government user may act
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::Completed;
        f.milestone.verification.is_verified = true;
        assert!(guard_approve(Role::Government, &f.milestone).is_ok());
        assert!(is_forbidden(guard_approve(Role::Auditor, &f.milestone)));

        f.milestone.approval.is_approved = true;
        assert!(guard_release(Role::Government, &f.project, &f.milestone).is_ok());
        assert!(is_forbidden(guard_release(
            Role::Producer,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_release_requires_both_gates() {
        let mut f = fixture();
        f.milestone.status = MilestoneStatus::Completed;

        assert!(is_conflict(guard_release(
            Role::Government,
            &f.project,
            &f.milestone
        )));

        f.milestone.verification.is_verified = true;
        assert!(is_conflict(guard_release(
            Role::Government,
            &f.project,
            &f.milestone
        )));

        f.milestone.approval.is_approved = true;
        assert!(guard_release(Role::Government, &f.project, &f.milestone).is_ok());
    }

    #[test]
    fn test_release_is_monotonic() {
        let mut f = fixture();
        f.milestone.verification.is_verified = true;
        f.milestone.approval.is_approved = true;
        f.milestone.released = true;
        assert!(is_conflict(guard_release(
            Role::Government,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_release_respects_committed_total() {
        let mut f = fixture();
        f.milestone.verification.is_verified = true;
        f.milestone.approval.is_approved = true;
        f.project.released_amount = 90_000.0;
        // 90k released + 25k milestone > 100k committed
        assert!(is_conflict(guard_release(
            Role::Government,
            &f.project,
            &f.milestone
        )));
    }

    #[test]
    fn test_oracle_verify_role_and_linkage() {
        let f = fixture();
        assert!(guard_oracle_verify(Role::Auditor, &f.project, &f.milestone).is_ok());
        assert!(guard_oracle_verify(Role::Oracle, &f.project, &f.milestone).is_ok());
        assert!(is_forbidden(guard_oracle_verify(
            Role::Producer,
            &f.project,
            &f.milestone
        )));

        let mut stray = f.milestone.clone();
        stray.project_id = ObjectId::new();
        assert!(matches!(
            guard_oracle_verify(Role::Auditor, &f.project, &stray),
            Err(PlatformError::BadRequest(_))
        ));
    }
}
