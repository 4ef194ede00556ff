//! HTTP server
//!
//! hyper http1 with TokioIo, hand-routed. All shared services hang off
//! `AppState`, built once at startup and cloned per connection as an Arc.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLogger, AuditQuery};
use crate::auth::JwtValidator;
use crate::chain::{ChainClient, ChainConfig};
use crate::config::Args;
use crate::db::schemas::{
    AuditDoc, MilestoneDoc, ProjectDoc, UserDoc, AUDIT_COLLECTION, MILESTONE_COLLECTION,
    PROJECT_COLLECTION, USER_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::notify::{Mailer, NotificationScheduler, NullMailer, RelayMailer, SchedulerContext};
use crate::oracle::{default_providers, parse_provider_spec, OracleService};
use crate::routes::{self, BoxBody};
use crate::types::{PlatformError, Result};
use crate::workflow::{MilestoneWorkflow, ProjectWorkflow};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    pub users: MongoCollection<UserDoc>,
    pub projects: MongoCollection<ProjectDoc>,
    pub milestones: MongoCollection<MilestoneDoc>,
    pub jwt: JwtValidator,
    pub audit: AuditLogger,
    pub audit_query: AuditQuery,
    pub oracle: OracleService,
    pub chain: Option<Arc<ChainClient>>,
    pub project_workflow: ProjectWorkflow,
    pub milestone_workflow: MilestoneWorkflow,
    pub scheduler: Option<Arc<NotificationScheduler>>,
}

impl AppState {
    /// Connect to MongoDB and wire every service together
    pub async fn init(args: Args) -> Result<Self> {
        let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;

        let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
        let projects = mongo.collection::<ProjectDoc>(PROJECT_COLLECTION).await?;
        let milestones = mongo.collection::<MilestoneDoc>(MILESTONE_COLLECTION).await?;
        let audit_collection = mongo.collection::<AuditDoc>(AUDIT_COLLECTION).await?;

        let jwt = JwtValidator::new(args.jwt_secret(), args.jwt_expiry_seconds)?;
        let audit = AuditLogger::new(audit_collection.clone(), args.audit_retention_days);
        let audit_query = AuditQuery::new(audit_collection);

        let providers = match &args.oracle_providers {
            Some(spec) => parse_provider_spec(spec)?,
            None => default_providers(),
        };
        let oracle = OracleService::new(
            providers,
            args.oracle_consensus_threshold,
            Duration::from_millis(args.oracle_timeout_ms),
            args.oracle_verifying_key.clone(),
        )?;

        let chain = match (&args.contract_address, &args.chain_sender_address) {
            (Some(contract), Some(sender)) => {
                let client = ChainClient::new(ChainConfig {
                    rpc_url: args.chain_rpc_url.clone(),
                    sender_address: sender.clone(),
                    contract_address: contract.clone(),
                    gas_limit: args.chain_gas_limit,
                    poll_interval: Duration::from_millis(args.chain_poll_interval_ms),
                    poll_attempts: args.chain_poll_attempts,
                })?;
                info!(contract = %contract, "Chain client enabled");
                Some(Arc::new(client))
            }
            _ => {
                warn!("Chain client disabled (no contract or sender address configured)");
                None
            }
        };

        let project_workflow = ProjectWorkflow::new(
            projects.clone(),
            milestones.clone(),
            users.clone(),
            audit.clone(),
            chain.clone(),
        );
        let milestone_workflow = MilestoneWorkflow::new(
            projects.clone(),
            milestones.clone(),
            audit.clone(),
            chain.clone(),
        );

        let scheduler = if args.scheduler_enabled {
            let mailer: Arc<dyn Mailer> = match &args.mail_relay_url {
                Some(url) => Arc::new(RelayMailer::new(url.clone(), args.mail_from.clone())?),
                None => Arc::new(NullMailer),
            };
            Some(Arc::new(NotificationScheduler::new(SchedulerContext {
                projects: projects.clone(),
                milestones: milestones.clone(),
                users: users.clone(),
                mailer,
                audit: audit.clone(),
            })))
        } else {
            None
        };

        Ok(Self {
            args,
            mongo,
            users,
            projects,
            milestones,
            jwt,
            audit,
            audit_query,
            oracle,
            chain,
            project_workflow,
            milestone_workflow,
            scheduler,
        })
    }
}

/// Accept loop
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| PlatformError::Config(format!("Failed to bind {}: {}", state.args.listen, e)))?;

    info!(
        "Subsidy platform listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - relaxed configuration checks");
    }

    if let Some(ref scheduler) = state.scheduler {
        scheduler.start();
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(&state),
        (Method::GET, "/status") => routes::status_check(Arc::clone(&state)).await,
        (Method::OPTIONS, _) => routes::cors_preflight(),

        (_, p) if p.starts_with("/auth") => {
            routes::handle_auth_request(req, Arc::clone(&state), addr).await
        }
        (_, p) if p.starts_with("/api/projects") => {
            routes::handle_project_request(req, Arc::clone(&state), addr).await
        }
        (_, p) if p.starts_with("/api/milestones") => {
            routes::handle_milestone_request(req, Arc::clone(&state), addr).await
        }
        (_, p) if p.starts_with("/api/audit") => {
            routes::handle_audit_request(req, Arc::clone(&state), addr).await
        }

        _ => routes::not_found(&path),
    };

    Ok(response)
}
