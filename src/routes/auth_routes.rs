//! HTTP routes for authentication
//!
//! - POST /auth/register - Create an account and get a JWT token
//! - POST /auth/login    - Authenticate and get a JWT token
//! - GET  /auth/me       - Current user info from the token
//!
//! Login failures are counted per account; too many in a row lock the
//! account for a fixed window and raise a security audit event.

use bson::{doc, DateTime};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::NewAuditEvent;
use crate::auth::{check_password_strength, hash_password, verify_password, Role, TokenInput};
use crate::chain::is_address;
use crate::db::schemas::{
    ActorRef, AuditCategory, AuditSeverity, ResourceRef, UserDoc, LOCKOUT_MINUTES,
    MAX_FAILED_LOGINS,
};
use crate::routes::{
    authenticate, cors_preflight, error_response, json_ok, not_found, parse_json_body, BoxBody,
};
use crate::server::AppState;
use crate::types::{PlatformError, Result};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_in: u64,
    pub user: serde_json::Value,
}

/// Dispatch /auth/* requests
pub async fn handle_auth_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Response<BoxBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::OPTIONS, _) => cors_preflight(),
        (Method::POST, "/auth/register") => handle_register(req, state, addr).await,
        (Method::POST, "/auth/login") => handle_login(req, state, addr).await,
        (Method::GET, "/auth/me") => handle_me(req, state, addr).await,
        _ => not_found(&path),
    }
}

async fn handle_register(
    req: Request<Incoming>,
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Response<BoxBody> {
    match register(req, &state, addr).await {
        Ok(response) => Response::builder()
            .status(StatusCode::CREATED)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(crate::routes::full_body(
                json!({ "success": true, "data": response }).to_string(),
            ))
            .unwrap(),
        Err(e) => error_response(&e),
    }
}

async fn register(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    addr: SocketAddr,
) -> Result<AuthResponse> {
    let body: RegisterRequest = parse_json_body(req).await?;

    if body.email.trim().is_empty() || body.name.trim().is_empty() {
        return Err(PlatformError::BadRequest(
            "email and name are required".into(),
        ));
    }
    if !body.email.contains('@') {
        return Err(PlatformError::BadRequest("invalid email address".into()));
    }
    check_password_strength(&body.password)?;

    let role = Role::parse(&body.role)
        .ok_or_else(|| PlatformError::BadRequest(format!("unknown role '{}'", body.role)))?;

    if let Some(ref wallet) = body.wallet_address {
        if !is_address(wallet) {
            return Err(PlatformError::BadRequest(
                "wallet_address must be a 0x-prefixed 20-byte hex address".into(),
            ));
        }
    }

    let password_hash = hash_password(&body.password)?;
    let mut user = UserDoc::new(
        body.email.trim().to_lowercase(),
        body.name.trim().to_string(),
        password_hash,
        role,
        body.wallet_address,
    );

    // The unique email index turns a concurrent duplicate into a 409
    let id = state.users.insert_one(user.clone()).await?;
    user._id = Some(id);

    state
        .audit
        .record(NewAuditEvent {
            event_type: "auth.registered".into(),
            actor: ActorRef {
                id: Some(id),
                role: Some(role),
                ip: Some(addr.ip().to_string()),
            },
            resource: ResourceRef {
                kind: "user".into(),
                id: Some(id),
            },
            action: "register".into(),
            description: format!("account registered for {}", user.email),
            category: AuditCategory::Auth,
            severity: AuditSeverity::Low,
            tx_ref: None,
            amount: None,
        })
        .await?;

    let token = state.jwt.generate_token(TokenInput {
        user_id: id.to_hex(),
        email: user.email.clone(),
        role,
        version: user.token_version,
    })?;

    info!(user = %id, role = %role, "Account registered");

    Ok(AuthResponse {
        token,
        expires_in: state.jwt.expiry_seconds(),
        user: user_view(&user),
    })
}

async fn handle_login(
    req: Request<Incoming>,
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Response<BoxBody> {
    match login(req, &state, addr).await {
        Ok(response) => json_ok(&response),
        Err(e) => error_response(&e),
    }
}

async fn login(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    addr: SocketAddr,
) -> Result<AuthResponse> {
    let body: LoginRequest = parse_json_body(req).await?;
    let email = body.email.trim().to_lowercase();

    let user = state
        .users
        .find_one(doc! { "email": &email })
        .await?
        .ok_or_else(|| PlatformError::Unauthorized("invalid credentials".into()))?;
    let user_id = user
        ._id
        .ok_or_else(|| PlatformError::Internal("user document missing id".into()))?;

    if !user.is_active {
        return Err(PlatformError::Unauthorized("account is deactivated".into()));
    }

    let now = DateTime::now();
    if user.is_locked(now) {
        return Err(PlatformError::Unauthorized(
            "account temporarily locked after repeated failures".into(),
        ));
    }

    if !verify_password(&body.password, &user.password_hash)? {
        let attempts = user.failed_login_attempts + 1;
        let mut update = doc! { "$set": { "failed_login_attempts": attempts } };
        let locked = attempts >= MAX_FAILED_LOGINS;
        if locked {
            let until = DateTime::from_millis(now.timestamp_millis() + LOCKOUT_MINUTES * 60_000);
            update = doc! { "$set": {
                "failed_login_attempts": attempts,
                "locked_until": until,
            }};
        }
        state.users.update_one(doc! { "_id": user_id }, update).await?;

        if locked {
            warn!(user = %user_id, "Account locked after repeated login failures");
            state
                .audit
                .record(NewAuditEvent {
                    event_type: "auth.account_locked".into(),
                    actor: ActorRef {
                        id: Some(user_id),
                        role: Some(user.role),
                        ip: Some(addr.ip().to_string()),
                    },
                    resource: ResourceRef {
                        kind: "user".into(),
                        id: Some(user_id),
                    },
                    action: "login".into(),
                    description: format!("account locked after {} failed logins", attempts),
                    category: AuditCategory::Security,
                    severity: AuditSeverity::High,
                    tx_ref: None,
                    amount: None,
                })
                .await?;
        }

        return Err(PlatformError::Unauthorized("invalid credentials".into()));
    }

    // Successful login clears the failure counters
    state
        .users
        .update_one(
            doc! { "_id": user_id },
            doc! { "$set": { "failed_login_attempts": 0, "locked_until": null } },
        )
        .await?;

    let token = state.jwt.generate_token(TokenInput {
        user_id: user_id.to_hex(),
        email: user.email.clone(),
        role: user.role,
        version: user.token_version,
    })?;

    state
        .audit
        .record(NewAuditEvent {
            event_type: "auth.login".into(),
            actor: ActorRef {
                id: Some(user_id),
                role: Some(user.role),
                ip: Some(addr.ip().to_string()),
            },
            resource: ResourceRef {
                kind: "user".into(),
                id: Some(user_id),
            },
            action: "login".into(),
            description: format!("login for {}", user.email),
            category: AuditCategory::Auth,
            severity: AuditSeverity::Low,
            tx_ref: None,
            amount: None,
        })
        .await?;

    info!(user = %user_id, "Login succeeded");

    Ok(AuthResponse {
        token,
        expires_in: state.jwt.expiry_seconds(),
        user: user_view(&user),
    })
}

async fn handle_me(
    req: Request<Incoming>,
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Response<BoxBody> {
    let result = async {
        let actor = authenticate(&req, &state, addr)?;
        let user = state
            .users
            .find_by_id(actor.id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("user no longer exists".into()))?;
        Ok::<_, PlatformError>(user_view(&user))
    }
    .await;

    crate::routes::respond(result)
}

/// Sanitized user representation; never exposes the password hash
fn user_view(user: &UserDoc) -> serde_json::Value {
    json!({
        "id": user._id.map(|id| id.to_hex()),
        "email": user.email,
        "name": user.name,
        "role": user.role,
        "wallet_address": user.wallet_address,
        "kyc_status": user.kyc_status,
        "permissions": user.permissions,
        "is_active": user.is_active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_view_omits_password_hash() {
        let mut user = UserDoc::new(
            "gov@example.com".into(),
            "Gov".into(),
            "$argon2id$secret".into(),
            Role::Government,
            None,
        );
        user._id = Some(bson::oid::ObjectId::new());

        let view = user_view(&user);
        let serialized = view.to_string();
        assert!(!serialized.contains("argon2id"));
        assert!(!serialized.contains("password"));
        assert_eq!(view["email"], "gov@example.com");
        assert_eq!(view["role"], "government");
    }
}
