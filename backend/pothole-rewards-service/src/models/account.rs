use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Points balance owned by an opaque user id
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub phone: Option<String>,
    pub is_verified: bool,
    pub points_balance: i64,
    /// Points reserved by redemptions currently being settled
    pub points_held: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(id: Uuid, phone: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            phone,
            is_verified: false,
            points_balance: 0,
            points_held: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance not reserved by an in-flight settlement
    pub fn available_points(&self) -> i64 {
        (self.points_balance - self.points_held).max(0)
    }
}

/// Result of crediting a report's owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    Credited { points: i64, balance: i64 },
    AlreadyAwarded { points: i64 },
    NotApproved,
    /// Report has no owner left to credit
    Orphaned,
}
