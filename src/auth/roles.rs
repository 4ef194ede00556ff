//! Roles and the capability table
//!
//! Roles are a closed tagged type and every role check goes through one
//! table at the request boundary, instead of string comparisons scattered
//! through handlers. Ownership checks (this producer owns that project,
//! this auditor is assigned to it) stay in the workflow guards where the
//! documents are in hand.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Government,
    #[default]
    Producer,
    Auditor,
    Oracle,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Government => write!(f, "government"),
            Role::Producer => write!(f, "producer"),
            Role::Auditor => write!(f, "auditor"),
            Role::Oracle => write!(f, "oracle"),
        }
    }
}

impl Role {
    /// Parse a role name as supplied at registration
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "government" => Some(Role::Government),
            "producer" => Some(Role::Producer),
            "auditor" => Some(Role::Auditor),
            "oracle" => Some(Role::Oracle),
            _ => None,
        }
    }
}

/// Every role-gated action in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateProject,
    ApproveProject,
    RejectProject,
    CreateMilestone,
    StartMilestone,
    CompleteMilestone,
    VerifyMilestone,
    ApproveMilestone,
    ReleaseSubsidy,
    RunOracleVerification,
    ViewAudit,
    ReviewAudit,
}

impl Action {
    /// Verb used in audit records
    pub fn verb(&self) -> &'static str {
        match self {
            Action::CreateProject => "create_project",
            Action::ApproveProject => "approve_project",
            Action::RejectProject => "reject_project",
            Action::CreateMilestone => "create_milestone",
            Action::StartMilestone => "start",
            Action::CompleteMilestone => "complete",
            Action::VerifyMilestone => "verify",
            Action::ApproveMilestone => "approve",
            Action::ReleaseSubsidy => "release_subsidy",
            Action::RunOracleVerification => "oracle_verify",
            Action::ViewAudit => "view_audit",
            Action::ReviewAudit => "review_audit",
        }
    }
}

/// The capability table: which roles may perform which actions.
/// Ownership/assignment constraints are layered on top by the workflow
/// guards; this table answers the pure role question.
pub fn role_allows(role: Role, action: Action) -> bool {
    use Action::*;
    match action {
        CreateProject | ApproveProject | RejectProject | CreateMilestone | ApproveMilestone
        | ReleaseSubsidy => role == Role::Government,
        StartMilestone | CompleteMilestone => role == Role::Producer,
        VerifyMilestone => role == Role::Auditor,
        RunOracleVerification => {
            matches!(role, Role::Government | Role::Auditor | Role::Oracle)
        }
        ViewAudit | ReviewAudit => matches!(role, Role::Government | Role::Auditor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_government_capabilities() {
        assert!(role_allows(Role::Government, Action::CreateProject));
        assert!(role_allows(Role::Government, Action::ApproveMilestone));
        assert!(role_allows(Role::Government, Action::ReleaseSubsidy));
        assert!(!role_allows(Role::Government, Action::StartMilestone));
        assert!(!role_allows(Role::Government, Action::VerifyMilestone));
    }

    #[test]
    fn test_producer_capabilities() {
        assert!(role_allows(Role::Producer, Action::StartMilestone));
        assert!(role_allows(Role::Producer, Action::CompleteMilestone));
        // A producer never verifies or approves, regardless of ownership
        assert!(!role_allows(Role::Producer, Action::VerifyMilestone));
        assert!(!role_allows(Role::Producer, Action::ApproveMilestone));
        assert!(!role_allows(Role::Producer, Action::ReleaseSubsidy));
        assert!(!role_allows(Role::Producer, Action::ViewAudit));
    }

    #[test]
    fn test_auditor_capabilities() {
        assert!(role_allows(Role::Auditor, Action::VerifyMilestone));
        assert!(role_allows(Role::Auditor, Action::ViewAudit));
        assert!(!role_allows(Role::Auditor, Action::ApproveMilestone));
        assert!(!role_allows(Role::Auditor, Action::CompleteMilestone));
    }

    #[test]
    fn test_role_parse_roundtrip() {
        for role in [Role::Government, Role::Producer, Role::Auditor, Role::Oracle] {
            assert_eq!(Role::parse(&role.to_string()), Some(role));
        }
        assert_eq!(Role::parse("admin"), None);
    }
}
