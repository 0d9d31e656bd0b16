use crate::clock::Clock;
use crate::db::ReportStore;
use crate::error::{Result, RewardsError};
use crate::metrics;
use crate::models::{AwardOutcome, Decision, Report, ReportStatus, Transition};
use crate::services::PointsLedger;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_REJECTION_REASON: &str = "rejected by reviewer";
pub const INVALID_CONTENT_REASON: &str = "content invalid";

/// Per-report result of a bulk review action
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub report_id: Uuid,
    pub status: Option<ReportStatus>,
    /// True when this call moved the report out of `pending`
    pub changed: bool,
    pub error: Option<String>,
}

/// Moves reports through `pending -> approved | rejected` and credits approvals
pub struct ReviewEngine {
    reports: Arc<dyn ReportStore>,
    ledger: Arc<PointsLedger>,
    clock: Arc<dyn Clock>,
}

impl ReviewEngine {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        ledger: Arc<PointsLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reports,
            ledger,
            clock,
        }
    }

    /// Approve a report. Content marked invalid is rejected instead, and
    /// nobody may approve their own report.
    ///
    /// Re-approving an approved report changes nothing but re-runs the award,
    /// which credits only if an earlier attempt never got that far.
    pub async fn approve(&self, report_id: Uuid, reviewer_id: Uuid) -> Result<Report> {
        let current = self.reports.get_report(report_id).await?;
        if current.owner_id == Some(reviewer_id) {
            tracing::warn!(
                report_id = %report_id,
                reviewer_id = %reviewer_id,
                "Self-approval refused"
            );
            return Err(RewardsError::Forbidden(
                "Reviewers cannot approve their own reports".to_string(),
            ));
        }

        let decision = if current.ai_valid {
            Decision::Approve { reviewer_id }
        } else {
            Decision::Reject {
                reviewer_id: Some(reviewer_id),
                reason: INVALID_CONTENT_REASON.to_string(),
            }
        };

        let transition = self.decide(report_id, decision).await?;
        let report = transition.into_report();

        if report.status == ReportStatus::Approved {
            if let AwardOutcome::Credited { points, .. } = self.ledger.award(report.id).await? {
                tracing::debug!(report_id = %report.id, points, "Approval credited");
            }
            return self.reports.get_report(report.id).await;
        }

        Ok(report)
    }

    pub async fn reject(
        &self,
        report_id: Uuid,
        reviewer_id: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Report> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());

        let transition = self
            .decide(
                report_id,
                Decision::Reject {
                    reviewer_id,
                    reason,
                },
            )
            .await?;

        Ok(transition.into_report())
    }

    pub async fn approve_many(&self, report_ids: &[Uuid], reviewer_id: Uuid) -> Vec<ReviewOutcome> {
        let mut outcomes = Vec::with_capacity(report_ids.len());
        for &report_id in report_ids {
            let before = self.status_of(report_id).await;
            let result = self.approve(report_id, reviewer_id).await;
            outcomes.push(ReviewOutcome::from_result(report_id, before, result));
        }
        outcomes
    }

    pub async fn reject_many(
        &self,
        report_ids: &[Uuid],
        reviewer_id: Option<Uuid>,
        reason: Option<String>,
    ) -> Vec<ReviewOutcome> {
        let mut outcomes = Vec::with_capacity(report_ids.len());
        for &report_id in report_ids {
            let before = self.status_of(report_id).await;
            let result = self.reject(report_id, reviewer_id, reason.clone()).await;
            outcomes.push(ReviewOutcome::from_result(report_id, before, result));
        }
        outcomes
    }

    /// Review queue, oldest first
    pub async fn pending(&self, limit: i64) -> Result<Vec<Report>> {
        self.reports.pending_reports(limit).await
    }

    async fn status_of(&self, report_id: Uuid) -> Option<ReportStatus> {
        self.reports.get_report(report_id).await.ok().map(|r| r.status)
    }

    async fn decide(&self, report_id: Uuid, decision: Decision) -> Result<Transition> {
        let transition = self
            .reports
            .apply_decision(report_id, decision, self.clock.now())
            .await?;

        match &transition {
            Transition::Applied(report) => {
                metrics::record_review(report.status.as_str());
                tracing::info!(
                    report_id = %report.id,
                    status = %report.status.as_str(),
                    reviewer_id = ?report.approved_by,
                    reason = ?report.rejection_reason,
                    "Report reviewed"
                );
            }
            Transition::Unchanged(report) => {
                tracing::debug!(
                    report_id = %report.id,
                    status = %report.status.as_str(),
                    "Report already decided; review ignored"
                );
            }
        }

        Ok(transition)
    }
}

impl ReviewOutcome {
    fn from_result(
        report_id: Uuid,
        before: Option<ReportStatus>,
        result: Result<Report>,
    ) -> Self {
        match result {
            Ok(report) => Self {
                report_id,
                changed: before == Some(ReportStatus::Pending) && report.status.is_terminal(),
                status: Some(report.status),
                error: None,
            },
            Err(e) => Self {
                report_id,
                status: before,
                changed: false,
                error: Some(e.to_string()),
            },
        }
    }
}
