//! HTTP routes for the audit trail
//!
//! Auditor and government only:
//! - GET  /api/audit                       - Filtered listing
//! - GET  /api/audit/statistics            - Aggregate counts over a range
//! - GET  /api/audit/pending-review        - Flagged records awaiting review
//! - GET  /api/audit/trail/{kind}/{id}     - Full trail for one resource
//! - GET  /api/audit/actor/{id}            - One actor's activity
//! - POST /api/audit/{id}/review           - One-shot review of a record
//! - POST /api/audit/{id}/flag             - Flag a record with a reason
//! - POST /api/audit/{id}/archive          - Drop a record from listings

use bson::DateTime;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::audit::AuditFilter;
use crate::auth::{role_allows, Action};
use crate::db::schemas::{AuditDoc, AuditSeverity};
use crate::routes::{
    authenticate, cors_preflight, error_response, not_found, parse_json_body, parse_object_id,
    query_pairs, respond, BoxBody,
};
use crate::server::AppState;
use crate::types::{PlatformError, Result};
use crate::workflow::Actor;

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    pub reason: String,
}

/// Dispatch /api/audit requests
pub async fn handle_audit_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Response<BoxBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());

    if method == Method::OPTIONS {
        return cors_preflight();
    }

    let actor = match authenticate(&req, &state, addr) {
        Ok(actor) => actor,
        Err(e) => return error_response(&e),
    };

    if !role_allows(actor.role, Action::ViewAudit) {
        return error_response(&PlatformError::Forbidden(format!(
            "role '{}' may not view the audit trail",
            actor.role
        )));
    }

    let rest = path.strip_prefix("/api/audit").unwrap_or("");
    let segments: Vec<String> = rest
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let parts: Vec<&str> = segments.iter().map(|s| s.as_str()).collect();

    match (method, parts.as_slice()) {
        (Method::GET, []) => respond(list_records(&state, query.as_deref()).await),
        (Method::GET, ["statistics"]) => respond(statistics(&state, query.as_deref()).await),
        (Method::GET, ["pending-review"]) => respond(pending_review(&state).await),
        (Method::GET, ["trail", kind, id]) => respond(resource_trail(&state, kind, id).await),
        (Method::GET, ["actor", id]) => respond(actor_activity(&state, id).await),
        (Method::POST, [id, "review"]) => respond(review_record(&state, &actor, id).await),
        (Method::POST, [id, "flag"]) => respond(flag_record(req, &state, id).await),
        (Method::POST, [id, "archive"]) => respond(archive_record(&state, &actor, id).await),
        _ => not_found(&path),
    }
}

async fn list_records(state: &Arc<AppState>, query: Option<&str>) -> Result<Vec<serde_json::Value>> {
    let filter = filter_from_query(query)?;
    let records = state.audit_query.list(filter).await?;
    Ok(records.iter().map(audit_view).collect())
}

async fn statistics(state: &Arc<AppState>, query: Option<&str>) -> Result<serde_json::Value> {
    let pairs = query_pairs(query);
    let now = DateTime::now();

    let from = match pairs.iter().find(|(k, _)| k == "from") {
        Some((_, raw)) => parse_date(raw)?,
        // Default window: the last 30 days
        None => DateTime::from_millis(now.timestamp_millis() - 30 * 86_400_000),
    };
    let to = match pairs.iter().find(|(k, _)| k == "to") {
        Some((_, raw)) => parse_date(raw)?,
        None => now,
    };

    let stats = state.audit_query.statistics(from, to).await?;
    Ok(json!({
        "from": from.try_to_rfc3339_string().ok(),
        "to": to.try_to_rfc3339_string().ok(),
        "statistics": stats,
    }))
}

async fn pending_review(state: &Arc<AppState>) -> Result<Vec<serde_json::Value>> {
    let records = state.audit_query.pending_review(100).await?;
    Ok(records.iter().map(audit_view).collect())
}

async fn resource_trail(state: &Arc<AppState>, kind: &str, id: &str) -> Result<Vec<serde_json::Value>> {
    let records = state
        .audit_query
        .trail_for_resource(kind, parse_object_id(id)?)
        .await?;
    Ok(records.iter().map(audit_view).collect())
}

async fn actor_activity(state: &Arc<AppState>, id: &str) -> Result<Vec<serde_json::Value>> {
    let records = state
        .audit_query
        .activity_for_actor(parse_object_id(id)?, 100)
        .await?;
    Ok(records.iter().map(audit_view).collect())
}

async fn review_record(state: &Arc<AppState>, actor: &Actor, id: &str) -> Result<serde_json::Value> {
    if !role_allows(actor.role, Action::ReviewAudit) {
        return Err(PlatformError::Forbidden(format!(
            "role '{}' may not review audit records",
            actor.role
        )));
    }

    let record = state.audit.mark_reviewed(parse_object_id(id)?, actor.id).await?;
    Ok(audit_view(&record))
}

async fn flag_record(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    id: &str,
) -> Result<serde_json::Value> {
    let record_id = parse_object_id(id)?;
    let body: FlagRequest = parse_json_body(req).await?;
    if body.reason.trim().is_empty() {
        return Err(PlatformError::BadRequest("flag reason is required".into()));
    }

    state.audit.flag(record_id, body.reason).await?;
    Ok(json!({ "flagged": true }))
}

async fn archive_record(
    state: &Arc<AppState>,
    actor: &Actor,
    id: &str,
) -> Result<serde_json::Value> {
    if !role_allows(actor.role, Action::ReviewAudit) {
        return Err(PlatformError::Forbidden(format!(
            "role '{}' may not archive audit records",
            actor.role
        )));
    }

    state.audit.archive(parse_object_id(id)?).await?;
    Ok(json!({ "archived": true }))
}

fn filter_from_query(query: Option<&str>) -> Result<AuditFilter> {
    let mut filter = AuditFilter::default();

    for (key, value) in query_pairs(query) {
        match key.as_str() {
            "event_type" => filter.event_type = Some(value),
            "category" => filter.category = Some(value),
            "flagged" => filter.flagged_only = value == "true",
            "min_severity" => {
                filter.min_severity = Some(parse_severity(&value)?);
            }
            "from" => filter.from = Some(parse_date(&value)?),
            "to" => filter.to = Some(parse_date(&value)?),
            "limit" => {
                filter.limit = Some(value.parse().map_err(|_| {
                    PlatformError::BadRequest(format!("invalid limit '{}'", value))
                })?);
            }
            _ => {}
        }
    }

    Ok(filter)
}

fn parse_severity(raw: &str) -> Result<AuditSeverity> {
    match raw {
        "low" => Ok(AuditSeverity::Low),
        "medium" => Ok(AuditSeverity::Medium),
        "high" => Ok(AuditSeverity::High),
        "critical" => Ok(AuditSeverity::Critical),
        _ => Err(PlatformError::BadRequest(format!(
            "unknown severity '{}'",
            raw
        ))),
    }
}

fn parse_date(raw: &str) -> Result<DateTime> {
    DateTime::parse_rfc3339_str(raw)
        .map_err(|_| PlatformError::BadRequest(format!("invalid RFC 3339 date '{}'", raw)))
}

fn audit_view(record: &AuditDoc) -> serde_json::Value {
    json!({
        "id": record._id.map(|id| id.to_hex()),
        "at": record.metadata.created_at.and_then(|d| d.try_to_rfc3339_string().ok()),
        "event_type": record.event_type,
        "actor": {
            "id": record.actor.id.map(|id| id.to_hex()),
            "role": record.actor.role,
            "ip": record.actor.ip,
        },
        "resource": {
            "kind": record.resource.kind,
            "id": record.resource.id.map(|id| id.to_hex()),
        },
        "action": record.action,
        "description": record.description,
        "category": record.category,
        "severity": record.severity,
        "tx_ref": record.tx_ref,
        "amount": record.amount,
        "flagged": record.flagged,
        "flag_reason": record.flag_reason,
        "reviewed": record.reviewed,
        "reviewed_by": record.reviewed_by.map(|id| id.to_hex()),
        "expires_at": record.expires_at.try_to_rfc3339_string().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_query() {
        let filter = filter_from_query(Some(
            "event_type=subsidy.released&flagged=true&min_severity=high&limit=25",
        ))
        .unwrap();

        assert_eq!(filter.event_type.as_deref(), Some("subsidy.released"));
        assert!(filter.flagged_only);
        assert_eq!(filter.min_severity, Some(AuditSeverity::High));
        assert_eq!(filter.limit, Some(25));
    }

    #[test]
    fn test_filter_rejects_bad_values() {
        assert!(filter_from_query(Some("min_severity=apocalyptic")).is_err());
        assert!(filter_from_query(Some("limit=lots")).is_err());
        assert!(filter_from_query(Some("from=yesterday")).is_err());
    }
}
