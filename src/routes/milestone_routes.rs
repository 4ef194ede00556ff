//! HTTP routes for the milestone lifecycle
//!
//! - GET  /api/milestones/{id}                       - Milestone detail
//! - POST /api/milestones/{id}/start                 - Producer starts work
//! - POST /api/milestones/{id}/complete              - Producer reports completion
//! - POST /api/milestones/{id}/verify                - Auditor verification
//! - POST /api/milestones/{id}/approve               - Government approval
//! - POST /api/milestones/{id}/release               - Subsidy release
//! - POST /api/milestones/{id}/oracle-verify         - Advisory oracle run
//! - POST /api/milestones/{id}/updates               - Append a progress note
//! - POST /api/milestones/{id}/requirements/{index}  - Toggle a requirement

use bson::DateTime;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::Role;
use crate::db::schemas::MilestoneDoc;
use crate::routes::{
    authenticate, cors_preflight, error_response, not_found, parse_json_body, parse_object_id,
    respond, BoxBody,
};
use crate::server::AppState;
use crate::types::{PlatformError, Result};
use crate::workflow::Actor;

#[derive(Debug, Deserialize, Default)]
pub struct TransitionRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct VerifyRequest {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNoteRequest {
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct RequirementRequest {
    pub is_complete: bool,
}

/// Dispatch /api/milestones requests
pub async fn handle_milestone_request(
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

    let rest = path.strip_prefix("/api/milestones").unwrap_or("");
    let segments: Vec<String> = rest
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let parts: Vec<&str> = segments.iter().map(|s| s.as_str()).collect();

    match (method, parts.as_slice()) {
        (Method::GET, [id]) => respond(get_milestone(&state, &actor, id).await),
        (Method::POST, [id, "start"]) => {
            respond(start_milestone(req, &state, &actor, id).await)
        }
        (Method::POST, [id, "complete"]) => {
            respond(complete_milestone(req, &state, &actor, id).await)
        }
        (Method::POST, [id, "verify"]) => {
            respond(verify_milestone(req, &state, &actor, id).await)
        }
        (Method::POST, [id, "approve"]) => respond(approve_milestone(&state, &actor, id).await),
        (Method::POST, [id, "release"]) => respond(release_subsidy(&state, &actor, id).await),
        (Method::POST, [id, "oracle-verify"]) => respond(oracle_verify(&state, &actor, id).await),
        (Method::POST, [id, "updates"]) => respond(add_update(req, &state, &actor, id).await),
        (Method::POST, [id, "requirements", index]) => {
            respond(set_requirement(req, &state, &actor, id, index).await)
        }
        _ => not_found(&path),
    }
}

async fn get_milestone(state: &Arc<AppState>, actor: &Actor, id: &str) -> Result<serde_json::Value> {
    let (project, milestone) = state
        .milestone_workflow
        .load(parse_object_id(id)?)
        .await?;

    if actor.role != Role::Government && !project.is_participant(&actor.id) {
        return Err(PlatformError::Forbidden(
            "not a participant in this project".into(),
        ));
    }

    Ok(milestone_view(&milestone))
}

async fn start_milestone(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    let milestone_id = parse_object_id(id)?;
    let body: TransitionRequest = parse_json_body(req).await.unwrap_or_default();
    let milestone = state
        .milestone_workflow
        .start(actor, milestone_id, body.note)
        .await?;
    Ok(milestone_view(&milestone))
}

async fn complete_milestone(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    let milestone_id = parse_object_id(id)?;
    let body: TransitionRequest = parse_json_body(req).await.unwrap_or_default();
    let milestone = state
        .milestone_workflow
        .complete(actor, milestone_id, body.note)
        .await?;
    Ok(milestone_view(&milestone))
}

async fn verify_milestone(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    let milestone_id = parse_object_id(id)?;
    let body: VerifyRequest = parse_json_body(req).await.unwrap_or_default();
    let milestone = state
        .milestone_workflow
        .verify(actor, milestone_id, body.comment)
        .await?;
    Ok(milestone_view(&milestone))
}

async fn approve_milestone(state: &Arc<AppState>, actor: &Actor, id: &str) -> Result<serde_json::Value> {
    let milestone = state
        .milestone_workflow
        .approve(actor, parse_object_id(id)?)
        .await?;
    Ok(milestone_view(&milestone))
}

async fn release_subsidy(state: &Arc<AppState>, actor: &Actor, id: &str) -> Result<serde_json::Value> {
    let milestone = state
        .milestone_workflow
        .release_subsidy(actor, parse_object_id(id)?)
        .await?;
    Ok(milestone_view(&milestone))
}

async fn oracle_verify(state: &Arc<AppState>, actor: &Actor, id: &str) -> Result<serde_json::Value> {
    let (aggregate, assessment) = state
        .milestone_workflow
        .oracle_verify(actor, parse_object_id(id)?, &state.oracle)
        .await?;

    Ok(json!({
        "aggregate": aggregate,
        "assessment": assessment,
    }))
}

async fn add_update(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    let milestone_id = parse_object_id(id)?;
    let body: UpdateNoteRequest = parse_json_body(req).await?;
    let milestone = state
        .milestone_workflow
        .add_update(actor, milestone_id, body.note)
        .await?;
    Ok(milestone_view(&milestone))
}

async fn set_requirement(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
    index: &str,
) -> Result<serde_json::Value> {
    let milestone_id = parse_object_id(id)?;
    let index: usize = index
        .parse()
        .map_err(|_| PlatformError::BadRequest(format!("invalid requirement index '{}'", index)))?;
    let body: RequirementRequest = parse_json_body(req).await?;

    let milestone = state
        .milestone_workflow
        .set_requirement(actor, milestone_id, index, body.is_complete)
        .await?;
    Ok(milestone_view(&milestone))
}

pub(crate) fn milestone_view(milestone: &MilestoneDoc) -> serde_json::Value {
    let now = DateTime::now();
    json!({
        "id": milestone._id.map(|id| id.to_hex()),
        "project_id": milestone.project_id.to_hex(),
        "sequence_number": milestone.sequence_number,
        "title": milestone.title,
        "description": milestone.description,
        "category": milestone.category,
        "status": milestone.effective_status(now),
        "planned_start": fmt_date(milestone.planned_start),
        "planned_end": fmt_date(milestone.planned_end),
        "actual_start": fmt_date(milestone.actual_start),
        "actual_end": fmt_date(milestone.actual_end),
        "subsidy_amount": milestone.subsidy_amount,
        "released": milestone.released,
        "release_tx": milestone.release_tx,
        "verification": {
            "is_verified": milestone.verification.is_verified,
            "verified_by": milestone.verification.verified_by.map(|id| id.to_hex()),
            "verified_at": fmt_date(milestone.verification.verified_at),
            "comment": milestone.verification.comment,
        },
        "approval": {
            "is_approved": milestone.approval.is_approved,
            "approved_by": milestone.approval.approved_by.map(|id| id.to_hex()),
            "approved_at": fmt_date(milestone.approval.approved_at),
        },
        "requirements": milestone.requirements,
        "completion_percent": milestone.completion_percent,
        "performance_targets": milestone.performance_targets,
        "oracle_result": milestone.oracle_result,
        "chain_milestone_id": milestone.chain_milestone_id,
        "updates": milestone
            .updates
            .iter()
            .map(|u| json!({
                "at": fmt_date(Some(u.at)),
                "author_id": u.author_id.to_hex(),
                "note": u.note,
            }))
            .collect::<Vec<_>>(),
    })
}

fn fmt_date(date: Option<DateTime>) -> Option<String> {
    date.and_then(|d| d.try_to_rfc3339_string().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::MilestoneCategory;
    use bson::oid::ObjectId;

    #[test]
    fn test_milestone_view_reports_effective_status() {
        let mut milestone = MilestoneDoc::new(
            ObjectId::new(),
            1,
            "Commissioning".into(),
            MilestoneCategory::Testing,
            25_000.0,
        );
        milestone._id = Some(ObjectId::new());
        milestone.planned_end = Some(DateTime::from_millis(
            DateTime::now().timestamp_millis() - 86_400_000,
        ));

        // Stored status is pending, but the due date has passed
        let view = milestone_view(&milestone);
        assert_eq!(view["status"], "overdue");
        assert_eq!(view["released"], false);
        assert_eq!(view["verification"]["is_verified"], false);
    }
}
