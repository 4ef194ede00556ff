//! HTTP routes for the subsidy platform
//!
//! Every response carries the same envelope: `{"success": true, "data"}`
//! on the happy path, `{"success": false, "error": {"message"}}` otherwise,
//! with the status code taken from the error taxonomy.

pub mod audit_routes;
pub mod auth_routes;
pub mod health;
pub mod milestone_routes;
pub mod project_routes;

pub use audit_routes::handle_audit_request;
pub use auth_routes::handle_auth_request;
pub use health::{health_check, status_check};
pub use milestone_routes::handle_milestone_request;
pub use project_routes::handle_project_request;

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::extract_token_from_header;
use crate::server::AppState;
use crate::types::{PlatformError, Result};
use crate::workflow::Actor;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Request bodies above this size are rejected outright
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Success envelope
pub fn json_ok<T: Serialize>(data: &T) -> Response<BoxBody> {
    json_with_status(StatusCode::OK, data)
}

pub fn json_created<T: Serialize>(data: &T) -> Response<BoxBody> {
    json_with_status(StatusCode::CREATED, data)
}

fn json_with_status<T: Serialize>(status: StatusCode, data: &T) -> Response<BoxBody> {
    let envelope = serde_json::json!({ "success": true, "data": data });
    let json = envelope.to_string();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

/// Error envelope with the status code from the error taxonomy
pub fn error_response(error: &PlatformError) -> Response<BoxBody> {
    let envelope = serde_json::json!({
        "success": false,
        "error": { "message": error.to_string() },
    });

    Response::builder()
        .status(error.status_code())
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(envelope.to_string()))
        .unwrap()
}

/// Collapse a handler result into a response
pub fn respond<T: Serialize>(result: Result<T>) -> Response<BoxBody> {
    match result {
        Ok(data) => json_ok(&data),
        Err(e) => error_response(&e),
    }
}

/// CORS preflight
pub fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub fn not_found(path: &str) -> Response<BoxBody> {
    error_response(&PlatformError::NotFound(format!("no route for {}", path)))
}

/// Read and deserialize a JSON body, bounded by `MAX_BODY_BYTES`
pub async fn parse_json_body<T: for<'de> Deserialize<'de>>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .collect()
        .await
        .map_err(|e| PlatformError::BadRequest(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > MAX_BODY_BYTES {
        return Err(PlatformError::BadRequest("Request body too large".into()));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| PlatformError::BadRequest(format!("Invalid JSON: {}", e)))
}

/// Resolve the authenticated actor from the Authorization header
pub fn authenticate(req: &Request<Incoming>, state: &Arc<AppState>, addr: SocketAddr) -> Result<Actor> {
    let header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PlatformError::Unauthorized("Missing Authorization header".into()))?;

    let token = extract_token_from_header(Some(header))
        .ok_or_else(|| PlatformError::Unauthorized("Malformed Authorization header".into()))?;

    let result = state.jwt.verify_token(token);
    let claims = match (result.valid, result.claims) {
        (true, Some(claims)) => claims,
        _ => {
            return Err(PlatformError::Unauthorized(
                result.error.unwrap_or_else(|| "Token validation failed".into()),
            ))
        }
    };

    let id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| PlatformError::Unauthorized("Invalid subject in token".into()))?;

    Ok(Actor {
        id,
        role: claims.role,
        ip: Some(addr.ip().to_string()),
    })
}

/// Parse an ObjectId path segment
pub fn parse_object_id(segment: &str) -> Result<ObjectId> {
    ObjectId::parse_str(segment)
        .map_err(|_| PlatformError::BadRequest(format!("invalid id '{}'", segment)))
}

/// Split a query string into key/value pairs (no percent decoding; values
/// here are ids, enum names, and numbers)
pub fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some(k), Some(v)) if !k.is_empty() => Some((k.to_string(), v.to_string())),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs(Some("event_type=subsidy.released&flagged=true"));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("event_type".into(), "subsidy.released".into()));
        assert_eq!(pairs[1], ("flagged".into(), "true".into()));

        assert!(query_pairs(None).is_empty());
        assert!(query_pairs(Some("")).is_empty());
        assert!(query_pairs(Some("novalue")).is_empty());
    }

    #[test]
    fn test_parse_object_id() {
        assert!(parse_object_id("64f0c0ffee0000000000aaaa").is_ok());
        assert!(parse_object_id("nope").is_err());
    }
}
