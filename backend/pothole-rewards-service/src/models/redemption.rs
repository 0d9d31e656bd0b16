use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Redemption status enum with state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "redemption_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Approved,
    Rejected,
}

impl RedemptionStatus {
    pub fn can_transition_to(&self, new_status: RedemptionStatus) -> bool {
        matches!(
            (self, new_status),
            (RedemptionStatus::Pending, RedemptionStatus::Approved)
                | (RedemptionStatus::Pending, RedemptionStatus::Rejected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Approved => "approved",
            RedemptionStatus::Rejected => "rejected",
        }
    }
}

/// Airtime redemption request
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RedemptionRequest {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub points: i64,
    /// Whole currency units
    pub payout_amount: i64,
    pub target_phone: String,
    pub status: RedemptionStatus,
    /// External payout id, set once the provider confirms
    pub reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub decided_by: Option<Uuid>,
    /// Set while a settlement holds this request's points
    pub settlement_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewRedemption {
    pub owner_id: Uuid,
    pub points: i64,
    pub payout_amount: i64,
    pub target_phone: String,
}

impl RedemptionRequest {
    pub fn new(input: NewRedemption, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: input.owner_id,
            points: input.points,
            payout_amount: input.payout_amount,
            target_phone: input.target_phone,
            status: RedemptionStatus::Pending,
            reference: None,
            rejection_reason: None,
            decided_by: None,
            settlement_started_at: None,
            created_at: now,
            decided_at: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.settlement_started_at.is_some()
    }
}

/// Result of trying to start a settlement
#[derive(Debug, Clone)]
pub enum SettlementClaim {
    /// Points are held; the payout may be attempted
    Claimed(RedemptionRequest),
    /// Already approved or rejected
    AlreadyDecided(RedemptionRequest),
    /// Another settlement holds this request
    InProgress,
    /// Balance no longer covers the request; it has been rejected
    Insufficient {
        request: RedemptionRequest,
        available: i64,
    },
}

/// How a claimed settlement ended
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Paid { reference: String },
    Failed { reason: String },
}
