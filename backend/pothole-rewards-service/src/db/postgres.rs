//! PostgreSQL store.
//!
//! Each mutating call runs in one transaction and locks the rows it changes
//! with `SELECT ... FOR UPDATE`. Fingerprint uniqueness is enforced by
//! `idx_pothole_reports_fingerprint`.

use super::{LedgerStore, ReportStore};
use crate::config::Config;
use crate::error::{Result, RewardsError};
use crate::models::{
    AwardOutcome, Decision, GeoPoint, NewRedemption, RedemptionRequest, RedemptionStatus, Region,
    Report, ReportStatus, SettlementClaim, SettlementOutcome, Transition, UserAccount,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::memory::INSUFFICIENT_POINTS_REASON;

const REPORT_COLUMNS: &str = r#"
    id, owner_id, image_fingerprint, latitude, longitude, region, severity,
    ai_valid, ai_score, is_spam, status, rejection_reason, points_awarded,
    submitted_ip, device_id, approved_by, created_at, approved_at, updated_at
"#;

const ACCOUNT_COLUMNS: &str = r#"
    id, phone, is_verified, points_balance, points_held, created_at, updated_at
"#;

const REDEMPTION_COLUMNS: &str = r#"
    id, owner_id, points, payout_amount, target_phone, status, reference,
    rejection_reason, decided_by, settlement_started_at, created_at, decided_at
"#;

/// Create the connection pool used by [`PgStore`]
pub async fn create_pool(config: &Config, database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    tracing::info!(
        service = %config.service_name,
        max_connections = config.db_max_connections,
        "Database pool initialized"
    );

    Ok(pool)
}

#[derive(Debug, FromRow)]
struct ReportRow {
    id: Uuid,
    owner_id: Option<Uuid>,
    image_fingerprint: String,
    latitude: f64,
    longitude: f64,
    region: String,
    severity: i16,
    ai_valid: bool,
    ai_score: f32,
    is_spam: bool,
    status: ReportStatus,
    rejection_reason: Option<String>,
    points_awarded: i64,
    submitted_ip: Option<String>,
    device_id: String,
    approved_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for Report {
    type Error = RewardsError;

    fn try_from(row: ReportRow) -> Result<Self> {
        let region = row.region.parse::<Region>().map_err(|raw| {
            RewardsError::Internal(format!("Report {} has unknown region {}", row.id, raw))
        })?;

        Ok(Report {
            id: row.id,
            owner_id: row.owner_id,
            image_fingerprint: row.image_fingerprint,
            location: GeoPoint::new(row.latitude, row.longitude),
            region,
            severity: row.severity,
            ai_valid: row.ai_valid,
            ai_score: row.ai_score,
            is_spam: row.is_spam,
            status: row.status,
            rejection_reason: row.rejection_reason,
            points_awarded: row.points_awarded,
            submitted_ip: row.submitted_ip,
            device_id: row.device_id,
            approved_by: row.approved_by,
            created_at: row.created_at,
            approved_at: row.approved_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_reports(rows: Vec<ReportRow>) -> Result<Vec<Report>> {
    rows.into_iter().map(Report::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&*self.pool).await?;
        Ok(())
    }

    async fn fetch_report_for_update(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        report_id: Uuid,
    ) -> Result<Report> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM pothole_reports WHERE id = $1 FOR UPDATE"
        ))
        .bind(report_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Report {} not found", report_id)))?;

        Report::try_from(row)
    }

    async fn fetch_redemption_for_update(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        redemption_id: Uuid,
    ) -> Result<RedemptionRequest> {
        sqlx::query_as::<_, RedemptionRequest>(&format!(
            "SELECT {REDEMPTION_COLUMNS} FROM redemption_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(redemption_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Redemption {} not found", redemption_id)))
    }

    async fn fetch_account_for_update(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
    ) -> Result<UserAccount> {
        sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM user_accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", user_id)))
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn insert_report(&self, report: Report) -> Result<Report> {
        let mut tx = self.pool.begin().await?;

        if let Some(owner_id) = report.owner_id {
            sqlx::query(
                r#"
                INSERT INTO user_accounts (id, created_at, updated_at)
                VALUES ($1, $2, $2)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(owner_id)
            .bind(report.created_at)
            .execute(&mut *tx)
            .await?;
        }

        let inserted = sqlx::query_as::<_, ReportRow>(&format!(
            r#"
            INSERT INTO pothole_reports (
                id, owner_id, image_fingerprint, latitude, longitude, region, severity,
                ai_valid, ai_score, is_spam, status, rejection_reason, points_awarded,
                submitted_ip, device_id, approved_by, created_at, approved_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {REPORT_COLUMNS}
            "#
        ))
        .bind(report.id)
        .bind(report.owner_id)
        .bind(&report.image_fingerprint)
        .bind(report.location.latitude)
        .bind(report.location.longitude)
        .bind(report.region.as_str())
        .bind(report.severity)
        .bind(report.ai_valid)
        .bind(report.ai_score)
        .bind(report.is_spam)
        .bind(report.status)
        .bind(&report.rejection_reason)
        .bind(report.points_awarded)
        .bind(&report.submitted_ip)
        .bind(&report.device_id)
        .bind(report.approved_by)
        .bind(report.created_at)
        .bind(report.approved_at)
        .bind(report.updated_at)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => return Err(RewardsError::DuplicateImage),
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        Report::try_from(row)
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM pothole_reports WHERE image_fingerprint = $1)",
        )
        .bind(fingerprint)
        .fetch_one(&*self.pool)
        .await?;

        Ok(exists)
    }

    async fn all_fingerprints(&self) -> Result<Vec<String>> {
        let fingerprints =
            sqlx::query_scalar::<_, String>("SELECT image_fingerprint FROM pothole_reports")
                .fetch_all(&*self.pool)
                .await?;

        Ok(fingerprints)
    }

    async fn recent_locations(
        &self,
        owner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<GeoPoint>> {
        let rows = sqlx::query_as::<_, (f64, f64)>(
            r#"
            SELECT latitude, longitude
            FROM pothole_reports
            WHERE owner_id = $1 AND created_at >= $2
            "#,
        )
        .bind(owner_id)
        .bind(since)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(latitude, longitude)| GeoPoint::new(latitude, longitude))
            .collect())
    }

    async fn get_report(&self, report_id: Uuid) -> Result<Report> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM pothole_reports WHERE id = $1"
        ))
        .bind(report_id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Report {} not found", report_id)))?;

        Report::try_from(row)
    }

    async fn apply_decision(
        &self,
        report_id: Uuid,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let mut report = Self::fetch_report_for_update(&mut tx, report_id).await?;

        if !report.apply(&decision, now) {
            tx.rollback().await?;
            return Ok(Transition::Unchanged(report));
        }

        sqlx::query(
            r#"
            UPDATE pothole_reports
            SET status = $2,
                rejection_reason = $3,
                approved_by = $4,
                approved_at = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(report.id)
        .bind(report.status)
        .bind(&report.rejection_reason)
        .bind(report.approved_by)
        .bind(report.approved_at)
        .bind(report.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Transition::Applied(report))
    }

    async fn public_reports(&self, region: Option<Region>, limit: i64) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM pothole_reports
            WHERE status = 'approved'
              AND is_spam = FALSE
              AND ($1::TEXT IS NULL OR region = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(region.map(|r| r.as_str()))
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        into_reports(rows)
    }

    async fn reports_for_user(&self, owner_id: Uuid, limit: i64) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM pothole_reports
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        into_reports(rows)
    }

    async fn pending_reports(&self, limit: i64) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM pothole_reports
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        into_reports(rows)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn open_account(
        &self,
        user_id: Uuid,
        phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount> {
        sqlx::query(
            r#"
            INSERT INTO user_accounts (id, phone, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&phone)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        self.get_account(user_id).await
    }

    async fn get_account(&self, user_id: Uuid) -> Result<UserAccount> {
        sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM user_accounts WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", user_id)))
    }

    async fn award_report(
        &self,
        report_id: Uuid,
        points: i64,
        now: DateTime<Utc>,
    ) -> Result<AwardOutcome> {
        let mut tx = self.pool.begin().await?;
        let report = Self::fetch_report_for_update(&mut tx, report_id).await?;

        let outcome = if report.status != ReportStatus::Approved {
            AwardOutcome::NotApproved
        } else if report.points_awarded > 0 {
            AwardOutcome::AlreadyAwarded {
                points: report.points_awarded,
            }
        } else if let Some(owner_id) = report.owner_id {
            let balance = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO user_accounts (id, points_balance, created_at, updated_at)
                VALUES ($1, $2, $3, $3)
                ON CONFLICT (id) DO UPDATE
                SET points_balance = user_accounts.points_balance + EXCLUDED.points_balance,
                    updated_at = EXCLUDED.updated_at
                RETURNING points_balance
                "#,
            )
            .bind(owner_id)
            .bind(points)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE pothole_reports SET points_awarded = $2, updated_at = $3 WHERE id = $1",
            )
            .bind(report_id)
            .bind(points)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            AwardOutcome::Credited { points, balance }
        } else {
            AwardOutcome::Orphaned
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn create_redemption(
        &self,
        input: NewRedemption,
        now: DateTime<Utc>,
    ) -> Result<RedemptionRequest> {
        let request = RedemptionRequest::new(input, now);

        let created = sqlx::query_as::<_, RedemptionRequest>(&format!(
            r#"
            INSERT INTO redemption_requests (
                id, owner_id, points, payout_amount, target_phone, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {REDEMPTION_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(request.owner_id)
        .bind(request.points)
        .bind(request.payout_amount)
        .bind(&request.target_phone)
        .bind(request.status)
        .bind(request.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(created)
    }

    async fn get_redemption(&self, redemption_id: Uuid) -> Result<RedemptionRequest> {
        sqlx::query_as::<_, RedemptionRequest>(&format!(
            "SELECT {REDEMPTION_COLUMNS} FROM redemption_requests WHERE id = $1"
        ))
        .bind(redemption_id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Redemption {} not found", redemption_id)))
    }

    async fn redemptions_for_user(&self, owner_id: Uuid) -> Result<Vec<RedemptionRequest>> {
        let requests = sqlx::query_as::<_, RedemptionRequest>(&format!(
            r#"
            SELECT {REDEMPTION_COLUMNS}
            FROM redemption_requests
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(owner_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(requests)
    }

    async fn claim_settlement(
        &self,
        redemption_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SettlementClaim> {
        let mut tx = self.pool.begin().await?;
        let request = Self::fetch_redemption_for_update(&mut tx, redemption_id).await?;

        if request.status != RedemptionStatus::Pending {
            tx.rollback().await?;
            return Ok(SettlementClaim::AlreadyDecided(request));
        }
        if request.is_claimed() {
            tx.rollback().await?;
            return Ok(SettlementClaim::InProgress);
        }

        let account = Self::fetch_account_for_update(&mut tx, request.owner_id).await?;
        let available = account.available_points();

        if available < request.points {
            let rejected = sqlx::query_as::<_, RedemptionRequest>(&format!(
                r#"
                UPDATE redemption_requests
                SET status = 'rejected', rejection_reason = $2, decided_at = $3
                WHERE id = $1
                RETURNING {REDEMPTION_COLUMNS}
                "#
            ))
            .bind(redemption_id)
            .bind(INSUFFICIENT_POINTS_REASON)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(SettlementClaim::Insufficient {
                request: rejected,
                available,
            });
        }

        sqlx::query(
            "UPDATE user_accounts SET points_held = points_held + $2, updated_at = $3 WHERE id = $1",
        )
        .bind(request.owner_id)
        .bind(request.points)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let claimed = sqlx::query_as::<_, RedemptionRequest>(&format!(
            r#"
            UPDATE redemption_requests
            SET settlement_started_at = $2
            WHERE id = $1
            RETURNING {REDEMPTION_COLUMNS}
            "#
        ))
        .bind(redemption_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SettlementClaim::Claimed(claimed))
    }

    async fn record_payout_reference(&self, redemption_id: Uuid, reference: &str) -> Result<()> {
        let result = sqlx::query("UPDATE redemption_requests SET reference = $2 WHERE id = $1")
            .bind(redemption_id)
            .bind(reference)
            .execute(&*self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RewardsError::NotFound(format!(
                "Redemption {} not found",
                redemption_id
            )));
        }
        Ok(())
    }

    async fn complete_settlement(
        &self,
        redemption_id: Uuid,
        outcome: SettlementOutcome,
        decided_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<RedemptionRequest> {
        let mut tx = self.pool.begin().await?;
        let request = Self::fetch_redemption_for_update(&mut tx, redemption_id).await?;

        if request.status != RedemptionStatus::Pending || !request.is_claimed() {
            tx.rollback().await?;
            return Err(RewardsError::Internal(format!(
                "Redemption {} has no active settlement",
                redemption_id
            )));
        }

        // Lock the account row before touching balance or holds.
        Self::fetch_account_for_update(&mut tx, request.owner_id).await?;

        let (status, reference, rejection_reason, debit) = match outcome {
            SettlementOutcome::Paid { reference } => {
                (RedemptionStatus::Approved, Some(reference), None, request.points)
            }
            SettlementOutcome::Failed { reason } => {
                (RedemptionStatus::Rejected, request.reference.clone(), Some(reason), 0)
            }
        };

        sqlx::query(
            r#"
            UPDATE user_accounts
            SET points_held = GREATEST(points_held - $2, 0),
                points_balance = GREATEST(points_balance - $3, 0),
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(request.owner_id)
        .bind(request.points)
        .bind(debit)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let decided = sqlx::query_as::<_, RedemptionRequest>(&format!(
            r#"
            UPDATE redemption_requests
            SET status = $2,
                reference = $3,
                rejection_reason = $4,
                decided_by = $5,
                decided_at = $6
            WHERE id = $1
            RETURNING {REDEMPTION_COLUMNS}
            "#
        ))
        .bind(redemption_id)
        .bind(status)
        .bind(reference)
        .bind(rejection_reason)
        .bind(decided_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(decided)
    }

    async fn stalled_settlements(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<RedemptionRequest>> {
        let requests = sqlx::query_as::<_, RedemptionRequest>(&format!(
            r#"
            SELECT {REDEMPTION_COLUMNS}
            FROM redemption_requests
            WHERE status = 'pending'
              AND settlement_started_at IS NOT NULL
              AND settlement_started_at < $1
            ORDER BY settlement_started_at ASC
            "#
        ))
        .bind(started_before)
        .fetch_all(&*self.pool)
        .await?;

        Ok(requests)
    }
}
