//! Subsidy workflow: transition guards and the controllers that apply them

pub mod guards;
pub mod milestones;
pub mod projects;

pub use milestones::MilestoneWorkflow;
pub use projects::{NewMilestone, NewProject, ProjectWorkflow};

use bson::oid::ObjectId;

use crate::auth::Role;
use crate::db::schemas::ActorRef;

/// The authenticated principal behind a request, as seen by the workflow
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: ObjectId,
    pub role: Role,
    pub ip: Option<String>,
}

impl Actor {
    pub fn actor_ref(&self) -> ActorRef {
        ActorRef {
            id: Some(self.id),
            role: Some(self.role),
            ip: self.ip.clone(),
        }
    }
}
