//! Health and status endpoints

use bson::{doc, DateTime};
use hyper::Response;
use serde_json::json;
use std::sync::Arc;

use crate::routes::{json_ok, respond, BoxBody};
use crate::server::AppState;
use crate::types::Result;

/// GET /health - liveness probe
pub fn health_check(state: &Arc<AppState>) -> Response<BoxBody> {
    json_ok(&json!({
        "status": "ok",
        "node_id": state.args.node_id.to_string(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /status - collection counts, scheduler jobs, and service wiring
pub async fn status_check(state: Arc<AppState>) -> Response<BoxBody> {
    respond(collect_status(&state).await)
}

async fn collect_status(state: &Arc<AppState>) -> Result<serde_json::Value> {
    let users = state.users.count(doc! {}).await?;
    let projects = state.projects.count(doc! {}).await?;
    let milestones = state.milestones.count(doc! {}).await?;
    let overdue = state
        .milestones
        .count(doc! {
            "status": { "$in": ["pending", "in_progress"] },
            "planned_end": { "$lt": DateTime::now() },
        })
        .await?;

    let jobs = state
        .scheduler
        .as_ref()
        .map(|s| s.status())
        .unwrap_or_default();

    Ok(json!({
        "node_id": state.args.node_id.to_string(),
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        "build_time": option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        "now": DateTime::now().try_to_rfc3339_string().ok(),
        "counts": {
            "users": users,
            "projects": projects,
            "milestones": milestones,
            "overdue_milestones": overdue,
        },
        "oracle": {
            "providers": state.oracle.provider_count(),
            "total_weight": state.oracle.total_weight(),
        },
        "chain_enabled": state.chain.is_some(),
        "scheduler_jobs": jobs,
    }))
}
