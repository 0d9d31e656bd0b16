//! Storage ports and their adapters.
//!
//! Every mutating operation on these traits is atomic with respect to the
//! entity it touches: a report's status and points, an account's balance and
//! holds, a redemption's claim and decision. Services compose them but never
//! rely on a read followed by a separate write for correctness.

pub mod counters;
pub mod memory;
pub mod postgres;

pub use counters::{CounterStore, MemoryCounterStore, RedisCounterStore};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{
    AwardOutcome, Decision, GeoPoint, NewRedemption, RedemptionRequest, Region, Report,
    SettlementClaim, SettlementOutcome, Transition, UserAccount,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a new report. Fails with `DuplicateImage` when another report
    /// already holds the same fingerprint.
    async fn insert_report(&self, report: Report) -> Result<Report>;

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool>;

    /// All stored fingerprints, for near-duplicate scans
    async fn all_fingerprints(&self) -> Result<Vec<String>>;

    /// Locations of the owner's reports created at or after `since`
    async fn recent_locations(&self, owner_id: Uuid, since: DateTime<Utc>)
        -> Result<Vec<GeoPoint>>;

    async fn get_report(&self, report_id: Uuid) -> Result<Report>;

    /// Move a pending report to a terminal status. Already decided reports
    /// come back as `Transition::Unchanged`.
    async fn apply_decision(
        &self,
        report_id: Uuid,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Transition>;

    /// Approved, non-spam reports, newest first
    async fn public_reports(&self, region: Option<Region>, limit: i64) -> Result<Vec<Report>>;

    async fn reports_for_user(&self, owner_id: Uuid, limit: i64) -> Result<Vec<Report>>;

    /// Review queue, oldest first
    async fn pending_reports(&self, limit: i64) -> Result<Vec<Report>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the account if missing; returns the stored account either way
    async fn open_account(
        &self,
        user_id: Uuid,
        phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount>;

    async fn get_account(&self, user_id: Uuid) -> Result<UserAccount>;

    /// Credit the owner of an approved report exactly once. The
    /// already-awarded check and the credit happen under one lock.
    async fn award_report(
        &self,
        report_id: Uuid,
        points: i64,
        now: DateTime<Utc>,
    ) -> Result<AwardOutcome>;

    async fn create_redemption(
        &self,
        input: NewRedemption,
        now: DateTime<Utc>,
    ) -> Result<RedemptionRequest>;

    async fn get_redemption(&self, redemption_id: Uuid) -> Result<RedemptionRequest>;

    async fn redemptions_for_user(&self, owner_id: Uuid) -> Result<Vec<RedemptionRequest>>;

    /// Reserve the request's points against the owner's balance and mark the
    /// request as being settled.
    async fn claim_settlement(
        &self,
        redemption_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SettlementClaim>;

    /// Durably record the provider reference of a claimed request
    async fn record_payout_reference(&self, redemption_id: Uuid, reference: &str) -> Result<()>;

    /// Decide a claimed request and release its hold. A paid request debits
    /// the balance (floored at zero) in the same unit of work.
    async fn complete_settlement(
        &self,
        redemption_id: Uuid,
        outcome: SettlementOutcome,
        decided_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<RedemptionRequest>;

    /// Requests claimed before `started_before` that never completed
    async fn stalled_settlements(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<RedemptionRequest>>;
}
