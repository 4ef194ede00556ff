//! Database schemas for the subsidy platform
//!
//! Defines MongoDB document structures for users, projects, milestones,
//! and audit events, plus the pure derived-field computations the
//! workflow controller applies explicitly on each transition.

mod audit;
mod metadata;
mod milestone;
mod project;
mod user;

pub use audit::{
    auto_flag_reason, expiry_from_retention, ActorRef, AuditCategory, AuditDoc, AuditSeverity,
    ResourceRef, AUDIT_COLLECTION, DEFAULT_RETENTION_DAYS,
};
pub use metadata::Metadata;
pub use milestone::{
    completion_percent, is_overdue, ApprovalRecord, MilestoneCategory, MilestoneDoc,
    MilestoneStatus, MilestoneUpdate, PerformanceTarget, Requirement, VerificationRecord,
    MILESTONE_COLLECTION,
};
pub use project::{progress_percent, ApprovalStatus, ProjectDoc, ProjectStatus, PROJECT_COLLECTION};
pub use user::{
    KycStatus, UserDoc, LOCKOUT_MINUTES, MAX_FAILED_LOGINS, USER_COLLECTION,
};
