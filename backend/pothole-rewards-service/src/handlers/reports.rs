/// Report submission, map feed and review handlers
use super::{acting_staff, acting_user, request_ip, user_agent, ApiResponse, AppState, Role};
use crate::error::{Result, RewardsError};
use crate::models::{Region, Report, ReportStatus};
use crate::services::{ReportImage, SubmitReport};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: i64 = 200;
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct SubmitReportPayload {
    /// Base64 image, optionally as a data URL
    pub image_base64: String,
    pub latitude: f64,
    pub longitude: f64,
    pub region: String,
    pub severity: i16,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitReportResponse {
    pub id: Uuid,
    pub status: ReportStatus,
}

/// Public map marker
#[derive(Debug, Serialize)]
pub struct MapItem {
    pub id: Uuid,
    pub region: Region,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: i16,
    pub created_at: DateTime<Utc>,
}

impl From<Report> for MapItem {
    fn from(report: Report) -> Self {
        Self {
            id: report.id,
            region: report.region,
            latitude: report.location.latitude,
            longitude: report.location.longitude,
            severity: report.severity,
            created_at: report.created_at,
        }
    }
}

/// A report as shown to its owner or a reviewer
#[derive(Debug, Serialize)]
pub struct ReportView {
    pub id: Uuid,
    pub region: Region,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: i16,
    pub ai_valid: bool,
    pub ai_score: f32,
    pub is_spam: bool,
    pub status: ReportStatus,
    pub rejection_reason: Option<String>,
    pub points_awarded: i64,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl From<Report> for ReportView {
    fn from(report: Report) -> Self {
        Self {
            id: report.id,
            region: report.region,
            latitude: report.location.latitude,
            longitude: report.location.longitude,
            severity: report.severity,
            ai_valid: report.ai_valid,
            ai_score: report.ai_score,
            is_spam: report.is_spam,
            status: report.status,
            rejection_reason: report.rejection_reason,
            points_awarded: report.points_awarded,
            created_at: report.created_at,
            approved_at: report.approved_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PublicQuery {
    pub region: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectPayload {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchPayload {
    pub ids: Vec<Uuid>,
    pub reason: Option<String>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Submit a pothole report
///
/// POST /api/v1/reports
pub async fn submit_report(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<SubmitReportPayload>,
) -> Result<HttpResponse> {
    let user_id = acting_user(&req)?;
    let payload = payload.into_inner();

    let report = state
        .intake
        .submit(SubmitReport {
            user_id,
            client_ip: request_ip(&req),
            user_agent: user_agent(&req),
            image: ReportImage::Base64(payload.image_base64),
            latitude: payload.latitude,
            longitude: payload.longitude,
            region: payload.region,
            severity: payload.severity,
            device_id: payload.device_id,
        })
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        SubmitReportResponse {
            id: report.id,
            status: report.status,
        },
        "Report submitted successfully and is pending review.",
    )))
}

/// Approved reports for the public map
///
/// GET /api/v1/reports/public?region=Ashanti
pub async fn public_reports(
    state: web::Data<AppState>,
    query: web::Query<PublicQuery>,
) -> Result<HttpResponse> {
    let region = match query.region.as_deref().filter(|r| !r.is_empty()) {
        Some(raw) => Some(
            raw.parse::<Region>()
                .map_err(|_| RewardsError::InvalidRegion(raw.to_string()))?,
        ),
        None => None,
    };

    let reports = state
        .reports
        .public_reports(region, clamp_limit(query.limit))
        .await?;
    let items: Vec<MapItem> = reports.into_iter().map(MapItem::from).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::ok(items)))
}

/// The caller's own reports
///
/// GET /api/v1/reports/mine
pub async fn my_reports(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse> {
    let user_id = acting_user(&req)?;
    let reports = state
        .reports
        .reports_for_user(user_id, clamp_limit(query.limit))
        .await?;
    let views: Vec<ReportView> = reports.into_iter().map(ReportView::from).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::ok(views)))
}

/// Review queue, oldest first
///
/// GET /api/v1/reports/pending
pub async fn pending_reports(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse> {
    acting_staff(&req, Role::Reviewer)?;
    let reports = state.review.pending(clamp_limit(query.limit)).await?;
    let views: Vec<ReportView> = reports.into_iter().map(ReportView::from).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::ok(views)))
}

/// POST /api/v1/reports/{id}/approve
pub async fn approve_report(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let reviewer_id = acting_staff(&req, Role::Reviewer)?;
    let report = state.review.approve(path.into_inner(), reviewer_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(ReportView::from(report))))
}

/// POST /api/v1/reports/{id}/reject
pub async fn reject_report(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    payload: Option<web::Json<RejectPayload>>,
) -> Result<HttpResponse> {
    let reviewer_id = acting_staff(&req, Role::Reviewer)?;
    let reason = payload.and_then(|p| p.into_inner().reason);
    let report = state
        .review
        .reject(path.into_inner(), Some(reviewer_id), reason)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(ReportView::from(report))))
}

/// POST /api/v1/reports/batch/approve
pub async fn approve_batch(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<BatchPayload>,
) -> Result<HttpResponse> {
    let reviewer_id = acting_staff(&req, Role::Reviewer)?;
    let outcomes = state.review.approve_many(&payload.ids, reviewer_id).await;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcomes)))
}

/// POST /api/v1/reports/batch/reject
pub async fn reject_batch(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<BatchPayload>,
) -> Result<HttpResponse> {
    let reviewer_id = acting_staff(&req, Role::Reviewer)?;
    let BatchPayload { ids, reason } = payload.into_inner();
    let outcomes = state
        .review
        .reject_many(&ids, Some(reviewer_id), reason)
        .await;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcomes)))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/reports")
            .route("", web::post().to(submit_report))
            .route("/public", web::get().to(public_reports))
            .route("/mine", web::get().to(my_reports))
            .route("/pending", web::get().to(pending_reports))
            .route("/batch/approve", web::post().to(approve_batch))
            .route("/batch/reject", web::post().to(reject_batch))
            .route("/{id}/approve", web::post().to(approve_report))
            .route("/{id}/reject", web::post().to(reject_report)),
    );
}
