use super::Region;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Report status enum with state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReportStatus {
    /// Validate state transition (pending -> approved/rejected only)
    pub fn can_transition_to(&self, new_status: ReportStatus) -> bool {
        matches!(
            (self, new_status),
            (ReportStatus::Pending, ReportStatus::Approved)
                | (ReportStatus::Pending, ReportStatus::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Approved => "approved",
            ReportStatus::Rejected => "rejected",
        }
    }
}

/// WGS84 coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Outcome of the content-validation capability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentVerdict {
    pub is_valid: bool,
    pub score: f32,
}

/// Pothole report record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    /// `None` once the owning account is gone
    pub owner_id: Option<Uuid>,
    pub image_fingerprint: String,
    pub location: GeoPoint,
    pub region: Region,
    pub severity: i16,
    pub ai_valid: bool,
    pub ai_score: f32,
    pub is_spam: bool,
    pub status: ReportStatus,
    pub rejection_reason: Option<String>,
    pub points_awarded: i64,
    pub submitted_ip: Option<String>,
    pub device_id: String,
    pub approved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the intake pipeline has established about a submission
#[derive(Debug, Clone)]
pub struct NewReport {
    pub owner_id: Uuid,
    pub image_fingerprint: String,
    pub location: GeoPoint,
    pub region: Region,
    pub severity: i16,
    pub verdict: ContentVerdict,
    pub submitted_ip: Option<String>,
    pub device_id: String,
}

impl Report {
    /// Create new pending report
    pub fn new(input: NewReport, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: Some(input.owner_id),
            image_fingerprint: input.image_fingerprint,
            location: input.location,
            region: input.region,
            severity: input.severity,
            ai_valid: input.verdict.is_valid,
            ai_score: input.verdict.score,
            is_spam: !input.verdict.is_valid,
            status: ReportStatus::Pending,
            rejection_reason: None,
            points_awarded: 0,
            submitted_ip: input.submitted_ip,
            device_id: input.device_id,
            approved_by: None,
            created_at: now,
            approved_at: None,
            updated_at: now,
        }
    }

    /// Apply a review decision. Returns `false` when the report was already
    /// decided and nothing changed.
    pub fn apply(&mut self, decision: &Decision, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(decision.target_status()) {
            return false;
        }

        match decision {
            Decision::Approve { reviewer_id } => {
                self.status = ReportStatus::Approved;
                self.approved_by = Some(*reviewer_id);
                self.approved_at = Some(now);
            }
            Decision::Reject { reason, .. } => {
                self.status = ReportStatus::Rejected;
                self.rejection_reason = Some(reason.clone());
            }
        }
        self.updated_at = now;
        true
    }
}

/// A resolved review decision, ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve { reviewer_id: Uuid },
    Reject { reviewer_id: Option<Uuid>, reason: String },
}

impl Decision {
    pub fn target_status(&self) -> ReportStatus {
        match self {
            Decision::Approve { .. } => ReportStatus::Approved,
            Decision::Reject { .. } => ReportStatus::Rejected,
        }
    }
}

/// Result of persisting a decision
#[derive(Debug, Clone)]
pub enum Transition {
    /// The report moved out of `pending`
    Applied(Report),
    /// The report was already decided; returned as stored
    Unchanged(Report),
}

impl Transition {
    pub fn into_report(self) -> Report {
        match self {
            Transition::Applied(report) | Transition::Unchanged(report) => report,
        }
    }
}
