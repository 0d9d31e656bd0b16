/// Points balance and airtime redemption handlers
use super::{acting_staff, acting_user, ApiResponse, AppState, Role};
use crate::error::Result;
use crate::models::{RedemptionRequest, RedemptionStatus};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_STALLED_AFTER_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
pub struct RedeemPayload {
    pub points: i64,
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct RedemptionView {
    pub id: Uuid,
    pub points: i64,
    pub payout_amount: i64,
    pub target_phone: String,
    pub status: RedemptionStatus,
    pub reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl From<RedemptionRequest> for RedemptionView {
    fn from(request: RedemptionRequest) -> Self {
        Self {
            id: request.id,
            points: request.points,
            payout_amount: request.payout_amount,
            target_phone: request.target_phone,
            status: request.status,
            reference: request.reference,
            rejection_reason: request.rejection_reason,
            created_at: request.created_at,
            decided_at: request.decided_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub points_balance: i64,
    pub points_available: i64,
}

#[derive(Debug, Deserialize)]
pub struct StalledQuery {
    pub older_than_secs: Option<i64>,
}

/// POST /api/v1/rewards/redeem
pub async fn redeem(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<RedeemPayload>,
) -> Result<HttpResponse> {
    let user_id = acting_user(&req)?;
    let request = state
        .redemptions
        .request_redemption(user_id, payload.points, &payload.phone)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        RedemptionView::from(request),
        "Redemption request submitted successfully.",
    )))
}

/// GET /api/v1/rewards/history
pub async fn history(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let user_id = acting_user(&req)?;
    let requests = state.redemptions.history(user_id).await?;
    let views: Vec<RedemptionView> = requests.into_iter().map(RedemptionView::from).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::ok(views)))
}

/// GET /api/v1/rewards/balance
pub async fn balance(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let user_id = acting_user(&req)?;
    let account = state.ledger.open_account(user_id, None).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(BalanceView {
        points_balance: account.points_balance,
        points_available: account.available_points(),
    })))
}

/// POST /api/v1/rewards/redemptions/{id}/settle
pub async fn settle(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let operator_id = acting_staff(&req, Role::Operator)?;
    let request = state
        .redemptions
        .settle(path.into_inner(), Some(operator_id))
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(RedemptionView::from(request))))
}

/// Close a stalled claim: approve if a payout reference was recorded,
/// otherwise release the held points
///
/// POST /api/v1/rewards/redemptions/{id}/resolve
pub async fn resolve(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let operator_id = acting_staff(&req, Role::Operator)?;
    let request = state
        .redemptions
        .resolve_stalled(path.into_inner(), operator_id)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(RedemptionView::from(request))))
}

/// Claims that paid out (or may have) but never reached the ledger
///
/// GET /api/v1/rewards/redemptions/stalled
pub async fn stalled(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<StalledQuery>,
) -> Result<HttpResponse> {
    acting_staff(&req, Role::Operator)?;
    let older_than = chrono::Duration::seconds(
        query
            .older_than_secs
            .unwrap_or(DEFAULT_STALLED_AFTER_SECS)
            .clamp(0, 31_536_000),
    );
    let requests = state.redemptions.stalled(older_than).await?;
    let views: Vec<RedemptionView> = requests.into_iter().map(RedemptionView::from).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::ok(views)))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/rewards")
            .route("/redeem", web::post().to(redeem))
            .route("/history", web::get().to(history))
            .route("/balance", web::get().to(balance))
            .route("/redemptions/stalled", web::get().to(stalled))
            .route("/redemptions/{id}/settle", web::post().to(settle))
            .route("/redemptions/{id}/resolve", web::post().to(resolve)),
    );
}
