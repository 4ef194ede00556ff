//! HTTP routes for projects
//!
//! - POST /api/projects                    - Register a project (government)
//! - GET  /api/projects                    - List projects visible to the caller
//! - GET  /api/projects/{id}               - Project detail (participants)
//! - POST /api/projects/{id}/approve       - Government approval
//! - POST /api/projects/{id}/reject        - Government rejection with reason
//! - POST /api/projects/{id}/auditor       - Assign the auditor
//! - POST /api/projects/{id}/milestones    - Register a milestone
//! - GET  /api/projects/{id}/milestones    - Milestone listing (participants)

use bson::{doc, DateTime};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::Role;
use crate::db::schemas::{MilestoneCategory, PerformanceTarget, ProjectDoc, Requirement};
use crate::routes::milestone_routes::milestone_view;
use crate::routes::{
    authenticate, cors_preflight, error_response, json_created, not_found, parse_json_body,
    parse_object_id, respond, BoxBody,
};
use crate::server::AppState;
use crate::types::{PlatformError, Result};
use crate::workflow::{Actor, NewMilestone, NewProject};

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub capacity_mw: f64,
    pub producer_id: String,
    #[serde(default)]
    pub auditor_id: Option<String>,
    pub total_subsidy: f64,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignAuditorRequest {
    pub auditor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMilestoneRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: MilestoneCategory,
    pub subsidy_amount: f64,
    #[serde(default)]
    pub planned_start: Option<String>,
    #[serde(default)]
    pub planned_end: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub performance_targets: Vec<PerformanceTarget>,
}

/// Dispatch /api/projects requests
pub async fn handle_project_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Response<BoxBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::OPTIONS {
        return cors_preflight();
    }

    let actor = match authenticate(&req, &state, addr) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    let rest = path.strip_prefix("/api/projects").unwrap_or("");
    let segments: Vec<&str> = rest.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (Method::POST, []) => {
            let result = create_project(req, &state, &actor).await;
            match result {
                Ok(view) => json_created(&view),
                Err(e) => error_response(&e),
            }
        }
        (Method::GET, []) => respond(list_projects(&state, &actor).await),
        (Method::GET, [id]) => respond(get_project(&state, &actor, id).await),
        (Method::POST, [id, "approve"]) => {
            let id = id.to_string();
            respond(approve_project(&state, &actor, &id).await)
        }
        (Method::POST, [id, "reject"]) => {
            let id = id.to_string();
            respond(reject_project(req, &state, &actor, &id).await)
        }
        (Method::POST, [id, "auditor"]) => {
            let id = id.to_string();
            respond(assign_auditor(req, &state, &actor, &id).await)
        }
        (Method::POST, [id, "milestones"]) => {
            let id = id.to_string();
            match create_milestone(req, &state, &actor, &id).await {
                Ok(view) => json_created(&view),
                Err(e) => error_response(&e),
            }
        }
        (Method::GET, [id, "milestones"]) => respond(list_milestones(&state, &actor, id).await),
        _ => not_found(&path),
    }
}

async fn create_project(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
) -> Result<serde_json::Value> {
    let body: CreateProjectRequest = parse_json_body(req).await?;

    let auditor_id = match body.auditor_id {
        Some(ref raw) => Some(parse_object_id(raw)?),
        None => None,
    };

    let project = state
        .project_workflow
        .create(
            actor,
            NewProject {
                name: body.name,
                description: body.description,
                location: body.location,
                capacity_mw: body.capacity_mw,
                producer_id: parse_object_id(&body.producer_id)?,
                auditor_id,
                total_subsidy: body.total_subsidy,
            },
        )
        .await?;

    Ok(project_view(&project))
}

async fn list_projects(state: &Arc<AppState>, actor: &Actor) -> Result<Vec<serde_json::Value>> {
    // Visibility follows participation: government actors see the whole
    // portfolio, producers their own projects, auditors their assignments
    let filter = match actor.role {
        Role::Government => doc! {},
        Role::Producer => doc! { "producer_id": actor.id },
        Role::Auditor => doc! { "auditor_id": actor.id },
        Role::Oracle => {
            return Err(PlatformError::Forbidden(
                "oracle accounts have no project listing".into(),
            ))
        }
    };

    let projects = state
        .projects
        .find_many(filter, Some(doc! { "metadata.created_at": -1 }), Some(200))
        .await?;

    Ok(projects.iter().map(project_view).collect())
}

async fn get_project(state: &Arc<AppState>, actor: &Actor, id: &str) -> Result<serde_json::Value> {
    let project_id = parse_object_id(id)?;
    let project = state
        .projects
        .find_by_id(project_id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;

    require_visible(actor, &project)?;
    Ok(project_view(&project))
}

async fn approve_project(state: &Arc<AppState>, actor: &Actor, id: &str) -> Result<serde_json::Value> {
    let project = state
        .project_workflow
        .approve(actor, parse_object_id(id)?)
        .await?;
    Ok(project_view(&project))
}

async fn reject_project(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    let project_id = parse_object_id(id)?;
    let body: RejectRequest = parse_json_body(req).await?;
    let project = state
        .project_workflow
        .reject(actor, project_id, body.reason)
        .await?;
    Ok(project_view(&project))
}

async fn assign_auditor(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    let project_id = parse_object_id(id)?;
    let body: AssignAuditorRequest = parse_json_body(req).await?;
    let project = state
        .project_workflow
        .assign_auditor(actor, project_id, parse_object_id(&body.auditor_id)?)
        .await?;
    Ok(project_view(&project))
}

async fn create_milestone(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    let project_id = parse_object_id(id)?;
    let body: CreateMilestoneRequest = parse_json_body(req).await?;

    let milestone = state
        .project_workflow
        .create_milestone(
            actor,
            project_id,
            NewMilestone {
                title: body.title,
                description: body.description,
                category: body.category,
                subsidy_amount: body.subsidy_amount,
                planned_start: parse_date(body.planned_start.as_deref())?,
                planned_end: parse_date(body.planned_end.as_deref())?,
                requirements: body
                    .requirements
                    .into_iter()
                    .map(|description| Requirement {
                        description,
                        is_complete: false,
                    })
                    .collect(),
                performance_targets: body.performance_targets,
            },
        )
        .await?;

    Ok(milestone_view(&milestone))
}

async fn list_milestones(
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<Vec<serde_json::Value>> {
    let project_id = parse_object_id(id)?;
    let project = state
        .projects
        .find_by_id(project_id)
        .await?
        .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;

    require_visible(actor, &project)?;

    let milestones = state
        .milestones
        .find_many(
            doc! { "project_id": project_id },
            Some(doc! { "sequence_number": 1 }),
            None,
        )
        .await?;

    Ok(milestones.iter().map(milestone_view).collect())
}

fn require_visible(actor: &Actor, project: &ProjectDoc) -> Result<()> {
    if actor.role == Role::Government || project.is_participant(&actor.id) {
        Ok(())
    } else {
        Err(PlatformError::Forbidden(
            "not a participant in this project".into(),
        ))
    }
}

fn parse_date(raw: Option<&str>) -> Result<Option<DateTime>> {
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_rfc3339_str(s)
            .map(Some)
            .map_err(|_| PlatformError::BadRequest(format!("invalid RFC 3339 date '{}'", s))),
    }
}

pub(crate) fn project_view(project: &ProjectDoc) -> serde_json::Value {
    json!({
        "id": project._id.map(|id| id.to_hex()),
        "name": project.name,
        "description": project.description,
        "location": project.location,
        "capacity_mw": project.capacity_mw,
        "producer_id": project.producer_id.to_hex(),
        "government_id": project.government_id.to_hex(),
        "auditor_id": project.auditor_id.map(|id| id.to_hex()),
        "total_subsidy": project.total_subsidy,
        "released_amount": project.released_amount,
        "status": project.status,
        "approval_status": project.approval_status,
        "rejection_reason": project.rejection_reason,
        "milestone_count": project.milestone_count,
        "completed_milestones": project.completed_milestones,
        "progress_percent": project.progress_percent,
        "chain_project_id": project.chain_project_id,
        "creation_tx": project.creation_tx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn test_parse_date() {
        assert!(parse_date(None).unwrap().is_none());
        assert!(parse_date(Some("2026-09-01T00:00:00Z")).unwrap().is_some());
        assert!(parse_date(Some("next tuesday")).is_err());
    }

    #[test]
    fn test_project_view_shape() {
        let mut project = ProjectDoc::new(
            "Electrolyser Phase 1".into(),
            "".into(),
            ObjectId::new(),
            ObjectId::new(),
            100_000.0,
        );
        project._id = Some(ObjectId::new());

        let view = project_view(&project);
        assert_eq!(view["name"], "Electrolyser Phase 1");
        assert_eq!(view["status"], "pending");
        assert_eq!(view["approval_status"], "pending");
        assert_eq!(view["progress_percent"], 0);
        assert!(view["id"].is_string());
    }
}
