//! DashMap-backed store for tests and local runs.
//!
//! Entity locks are the DashMap entry guards. Guards are always taken in the
//! order report -> account and redemption -> account, and never across an
//! await point.

use super::{LedgerStore, ReportStore};
use crate::error::{Result, RewardsError};
use crate::models::{
    AwardOutcome, Decision, GeoPoint, NewRedemption, RedemptionRequest, RedemptionStatus, Region,
    Report, ReportStatus, SettlementClaim, SettlementOutcome, Transition, UserAccount,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

pub const INSUFFICIENT_POINTS_REASON: &str = "insufficient points";

#[derive(Default)]
pub struct MemoryStore {
    reports: DashMap<Uuid, Report>,
    fingerprints: DashMap<String, Uuid>,
    accounts: DashMap<Uuid, UserAccount>,
    redemptions: DashMap<Uuid, RedemptionRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove an account, orphaning its reports
    pub fn delete_account(&self, user_id: Uuid) {
        self.accounts.remove(&user_id);
        for mut report in self.reports.iter_mut() {
            if report.owner_id == Some(user_id) {
                report.owner_id = None;
            }
        }
    }

    /// Overwrite an existing account's balance. Seeds fixtures and local demos.
    pub fn set_balance(&self, user_id: Uuid, points: i64) {
        if let Some(mut account) = self.accounts.get_mut(&user_id) {
            account.points_balance = points.max(0);
        }
    }

    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    fn collect_reports<F>(&self, filter: F) -> Vec<Report>
    where
        F: Fn(&Report) -> bool,
    {
        self.reports
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn truncate<T>(mut items: Vec<T>, limit: i64) -> Vec<T> {
    items.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
    items
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn insert_report(&self, report: Report) -> Result<Report> {
        match self.fingerprints.entry(report.image_fingerprint.clone()) {
            Entry::Occupied(_) => Err(RewardsError::DuplicateImage),
            Entry::Vacant(slot) => {
                slot.insert(report.id);
                self.reports.insert(report.id, report.clone());
                Ok(report)
            }
        }
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.fingerprints.contains_key(fingerprint))
    }

    async fn all_fingerprints(&self) -> Result<Vec<String>> {
        Ok(self.fingerprints.iter().map(|e| e.key().clone()).collect())
    }

    async fn recent_locations(
        &self,
        owner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<GeoPoint>> {
        Ok(self
            .reports
            .iter()
            .filter(|e| e.owner_id == Some(owner_id) && e.created_at >= since)
            .map(|e| e.location)
            .collect())
    }

    async fn get_report(&self, report_id: Uuid) -> Result<Report> {
        self.reports
            .get(&report_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| RewardsError::NotFound(format!("Report {} not found", report_id)))
    }

    async fn apply_decision(
        &self,
        report_id: Uuid,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let mut report = self
            .reports
            .get_mut(&report_id)
            .ok_or_else(|| RewardsError::NotFound(format!("Report {} not found", report_id)))?;

        if report.apply(&decision, now) {
            Ok(Transition::Applied(report.clone()))
        } else {
            Ok(Transition::Unchanged(report.clone()))
        }
    }

    async fn public_reports(&self, region: Option<Region>, limit: i64) -> Result<Vec<Report>> {
        let mut reports = self.collect_reports(|r| {
            r.status == ReportStatus::Approved
                && !r.is_spam
                && region.map_or(true, |region| r.region == region)
        });
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(truncate(reports, limit))
    }

    async fn reports_for_user(&self, owner_id: Uuid, limit: i64) -> Result<Vec<Report>> {
        let mut reports = self.collect_reports(|r| r.owner_id == Some(owner_id));
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(truncate(reports, limit))
    }

    async fn pending_reports(&self, limit: i64) -> Result<Vec<Report>> {
        let mut reports = self.collect_reports(|r| r.status == ReportStatus::Pending);
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(truncate(reports, limit))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn open_account(
        &self,
        user_id: Uuid,
        phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount> {
        let account = self
            .accounts
            .entry(user_id)
            .or_insert_with(|| UserAccount::new(user_id, phone, now));
        Ok(account.clone())
    }

    async fn get_account(&self, user_id: Uuid) -> Result<UserAccount> {
        self.accounts
            .get(&user_id)
            .map(|a| a.value().clone())
            .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", user_id)))
    }

    async fn award_report(
        &self,
        report_id: Uuid,
        points: i64,
        now: DateTime<Utc>,
    ) -> Result<AwardOutcome> {
        let mut report = self
            .reports
            .get_mut(&report_id)
            .ok_or_else(|| RewardsError::NotFound(format!("Report {} not found", report_id)))?;

        if report.status != ReportStatus::Approved {
            return Ok(AwardOutcome::NotApproved);
        }
        if report.points_awarded > 0 {
            return Ok(AwardOutcome::AlreadyAwarded {
                points: report.points_awarded,
            });
        }
        let Some(owner_id) = report.owner_id else {
            return Ok(AwardOutcome::Orphaned);
        };

        let balance = {
            let mut account = self
                .accounts
                .entry(owner_id)
                .or_insert_with(|| UserAccount::new(owner_id, None, now));
            account.points_balance += points;
            account.updated_at = now;
            account.points_balance
        };

        report.points_awarded = points;
        report.updated_at = now;

        Ok(AwardOutcome::Credited { points, balance })
    }

    async fn create_redemption(
        &self,
        input: NewRedemption,
        now: DateTime<Utc>,
    ) -> Result<RedemptionRequest> {
        let request = RedemptionRequest::new(input, now);
        self.redemptions.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_redemption(&self, redemption_id: Uuid) -> Result<RedemptionRequest> {
        self.redemptions
            .get(&redemption_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| {
                RewardsError::NotFound(format!("Redemption {} not found", redemption_id))
            })
    }

    async fn redemptions_for_user(&self, owner_id: Uuid) -> Result<Vec<RedemptionRequest>> {
        let mut requests: Vec<RedemptionRequest> = self
            .redemptions
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .map(|r| r.value().clone())
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn claim_settlement(
        &self,
        redemption_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SettlementClaim> {
        let mut request = self.redemptions.get_mut(&redemption_id).ok_or_else(|| {
            RewardsError::NotFound(format!("Redemption {} not found", redemption_id))
        })?;

        if request.status != RedemptionStatus::Pending {
            return Ok(SettlementClaim::AlreadyDecided(request.clone()));
        }
        if request.is_claimed() {
            return Ok(SettlementClaim::InProgress);
        }

        let mut account = self.accounts.get_mut(&request.owner_id).ok_or_else(|| {
            RewardsError::NotFound(format!("Account {} not found", request.owner_id))
        })?;

        let available = account.available_points();
        if available < request.points {
            request.status = RedemptionStatus::Rejected;
            request.rejection_reason = Some(INSUFFICIENT_POINTS_REASON.to_string());
            request.decided_at = Some(now);
            return Ok(SettlementClaim::Insufficient {
                request: request.clone(),
                available,
            });
        }

        account.points_held += request.points;
        account.updated_at = now;
        request.settlement_started_at = Some(now);

        Ok(SettlementClaim::Claimed(request.clone()))
    }

    async fn record_payout_reference(&self, redemption_id: Uuid, reference: &str) -> Result<()> {
        let mut request = self.redemptions.get_mut(&redemption_id).ok_or_else(|| {
            RewardsError::NotFound(format!("Redemption {} not found", redemption_id))
        })?;
        request.reference = Some(reference.to_string());
        Ok(())
    }

    async fn complete_settlement(
        &self,
        redemption_id: Uuid,
        outcome: SettlementOutcome,
        decided_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<RedemptionRequest> {
        let mut request = self.redemptions.get_mut(&redemption_id).ok_or_else(|| {
            RewardsError::NotFound(format!("Redemption {} not found", redemption_id))
        })?;

        if request.status != RedemptionStatus::Pending || !request.is_claimed() {
            return Err(RewardsError::Internal(format!(
                "Redemption {} has no active settlement",
                redemption_id
            )));
        }

        let mut account = self.accounts.get_mut(&request.owner_id).ok_or_else(|| {
            RewardsError::NotFound(format!("Account {} not found", request.owner_id))
        })?;

        account.points_held = (account.points_held - request.points).max(0);
        match outcome {
            SettlementOutcome::Paid { reference } => {
                account.points_balance = (account.points_balance - request.points).max(0);
                request.status = RedemptionStatus::Approved;
                request.reference = Some(reference);
            }
            SettlementOutcome::Failed { reason } => {
                request.status = RedemptionStatus::Rejected;
                request.rejection_reason = Some(reason);
            }
        }
        account.updated_at = now;
        request.decided_by = decided_by;
        request.decided_at = Some(now);

        Ok(request.clone())
    }

    async fn stalled_settlements(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<RedemptionRequest>> {
        Ok(self
            .redemptions
            .iter()
            .filter(|r| {
                r.status == RedemptionStatus::Pending
                    && r.settlement_started_at.map_or(false, |t| t < started_before)
            })
            .map(|r| r.value().clone())
            .collect())
    }
}
