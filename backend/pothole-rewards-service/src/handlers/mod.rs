/// HTTP handlers for the pothole rewards API
pub mod reports;
pub mod rewards;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::{CounterStore, LedgerStore, ReportStore};
use crate::error::{Result, RewardsError};
use crate::metrics::serve_metrics;
use crate::services::{
    client_ip, ContentValidator, GeoSpamDetector, PayoutProvider, PointsLedger, RateLimiter,
    RedemptionWorkflow, ReportIntake, ReviewEngine,
};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Header set by the upstream gateway after authenticating the caller
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Comma-separated roles granted to the caller, set by the same gateway
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Roles that unlock the back-office routes; `admin` holds all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Reviewer,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reviewer => "reviewer",
            Role::Operator => "operator",
        }
    }
}

/// Storage adapters and external capabilities the services run on
#[derive(Clone)]
pub struct Backends {
    pub reports: Arc<dyn ReportStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub counters: Arc<dyn CounterStore>,
    pub validator: Arc<dyn ContentValidator>,
    pub payout: Arc<dyn PayoutProvider>,
    pub clock: Arc<dyn Clock>,
}

/// Wired services shared by all workers
#[derive(Clone)]
pub struct AppState {
    pub reports: Arc<dyn ReportStore>,
    pub intake: Arc<ReportIntake>,
    pub review: Arc<ReviewEngine>,
    pub ledger: Arc<PointsLedger>,
    pub redemptions: Arc<RedemptionWorkflow>,
}

impl AppState {
    pub fn new(config: &Config, backends: Backends) -> Self {
        let Backends {
            reports,
            ledger: ledger_store,
            counters,
            validator,
            payout,
            clock,
        } = backends;

        let ledger = Arc::new(PointsLedger::new(
            ledger_store.clone(),
            clock.clone(),
            config.rewards.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(counters, config.rate_limit.clone()));
        let spam_detector = Arc::new(GeoSpamDetector::new(
            reports.clone(),
            clock.clone(),
            config.spam.clone(),
        ));

        let intake = Arc::new(ReportIntake::new(
            reports.clone(),
            ledger.clone(),
            rate_limiter,
            spam_detector,
            validator,
            clock.clone(),
            config.spam.clone(),
            config.content.clone(),
        ));
        let review = Arc::new(ReviewEngine::new(
            reports.clone(),
            ledger.clone(),
            clock.clone(),
        ));
        let redemptions = Arc::new(RedemptionWorkflow::new(
            ledger_store,
            payout,
            clock,
            config.rewards.clone(),
            &config.payout,
        ));

        Self {
            reports,
            intake,
            review,
            ledger,
            redemptions,
        }
    }
}

/// Success envelope; failures are rendered by `RewardsError`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

/// Caller identity forwarded by the gateway
pub fn acting_user(req: &HttpRequest) -> Result<Uuid> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RewardsError::InvalidInput(format!("Missing {} header", USER_ID_HEADER)))?;

    Uuid::parse_str(raw.trim())
        .map_err(|_| RewardsError::InvalidInput(format!("Malformed {} header", USER_ID_HEADER)))
}

/// Caller identity, provided the gateway granted `role` (or `admin`)
pub fn acting_staff(req: &HttpRequest, role: Role) -> Result<Uuid> {
    let user_id = acting_user(req)?;
    let granted = req
        .headers()
        .get(USER_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |roles| {
            roles
                .split(',')
                .map(str::trim)
                .any(|r| r.eq_ignore_ascii_case(role.as_str()) || r.eq_ignore_ascii_case("admin"))
        });

    if granted {
        Ok(user_id)
    } else {
        tracing::warn!(user_id = %user_id, role = role.as_str(), "Back-office route refused");
        Err(RewardsError::Forbidden(format!("{} role required", role.as_str())))
    }
}

/// Client address from `X-Forwarded-For`, else the connection peer
pub fn request_ip(req: &HttpRequest) -> Option<String> {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok());
    let peer = req.peer_addr().map(|addr| addr.ip().to_string());
    client_ip(forwarded, peer.as_deref())
}

pub fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn ready() -> HttpResponse {
    HttpResponse::Ok().body("READY")
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/ready", web::get().to(ready))
        .route("/metrics", web::get().to(serve_metrics));
    reports::register_routes(cfg);
    rewards::register_routes(cfg);
}
