use crate::clock::Clock;
use crate::config::RewardsConfig;
use crate::db::LedgerStore;
use crate::error::Result;
use crate::metrics;
use crate::models::{AwardOutcome, UserAccount};
use std::sync::Arc;
use uuid::Uuid;

/// Authoritative points balance per user
pub struct PointsLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: RewardsConfig,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: RewardsConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Credit the owner of an approved report. Safe to call any number of
    /// times; only the first call on a report credits.
    pub async fn award(&self, report_id: Uuid) -> Result<AwardOutcome> {
        let outcome = self
            .store
            .award_report(report_id, self.config.report_award_points, self.clock.now())
            .await?;

        match outcome {
            AwardOutcome::Credited { points, balance } => {
                metrics::POINTS_AWARDED_TOTAL.inc_by(points.max(0) as u64);
                tracing::info!(
                    report_id = %report_id,
                    points,
                    balance,
                    "Points awarded"
                );
            }
            AwardOutcome::AlreadyAwarded { points } => {
                tracing::debug!(report_id = %report_id, points, "Report already credited");
            }
            AwardOutcome::NotApproved => {
                tracing::warn!(report_id = %report_id, "Award skipped: report not approved");
            }
            AwardOutcome::Orphaned => {
                tracing::warn!(report_id = %report_id, "Award skipped: report owner no longer exists");
            }
        }

        Ok(outcome)
    }

    pub async fn account(&self, user_id: Uuid) -> Result<UserAccount> {
        self.store.get_account(user_id).await
    }

    pub async fn open_account(&self, user_id: Uuid, phone: Option<String>) -> Result<UserAccount> {
        self.store.open_account(user_id, phone, self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{MemoryStore, ReportStore};
    use crate::models::{ContentVerdict, Decision, GeoPoint, NewReport, Region, Report};

    async fn approved_report(store: &MemoryStore, owner: Uuid) -> Uuid {
        let now = chrono::Utc::now();
        let report = Report::new(
            NewReport {
                owner_id: owner,
                image_fingerprint: Uuid::new_v4().to_string(),
                location: GeoPoint::new(6.6885, -1.6244),
                region: Region::Ashanti,
                severity: 4,
                verdict: ContentVerdict {
                    is_valid: true,
                    score: 0.95,
                },
                submitted_ip: None,
                device_id: String::new(),
            },
            now,
        );
        let report = store.insert_report(report).await.unwrap();
        store
            .apply_decision(report.id, Decision::Approve { reviewer_id: Uuid::new_v4() }, now)
            .await
            .unwrap();
        report.id
    }

    #[tokio::test]
    async fn test_award_twice_credits_once() {
        let store = Arc::new(MemoryStore::new());
        let ledger = PointsLedger::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            RewardsConfig::default(),
        );
        let owner = Uuid::new_v4();
        ledger.open_account(owner, None).await.unwrap();
        let report_id = approved_report(&store, owner).await;

        ledger.award(report_id).await.unwrap();
        let second = ledger.award(report_id).await.unwrap();

        assert_eq!(second, AwardOutcome::AlreadyAwarded { points: 50 });
        assert_eq!(ledger.account(owner).await.unwrap().points_balance, 50);
        assert_eq!(store.get_report(report_id).await.unwrap().points_awarded, 50);
    }

    #[tokio::test]
    async fn test_concurrent_awards_credit_once() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(PointsLedger::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            RewardsConfig::default(),
        ));
        let owner = Uuid::new_v4();
        let report_id = approved_report(&store, owner).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.award(report_id).await.unwrap() })
            })
            .collect();

        let mut credited = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), AwardOutcome::Credited { .. }) {
                credited += 1;
            }
        }

        assert_eq!(credited, 1);
        assert_eq!(ledger.account(owner).await.unwrap().points_balance, 50);
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let ledger = PointsLedger::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
            RewardsConfig::default(),
        );
        let user = Uuid::new_v4();

        let first = ledger.open_account(user, Some("0244000000".into())).await.unwrap();
        let second = ledger.open_account(user, None).await.unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.phone.as_deref(), Some("0244000000"));
        assert_eq!(second.points_balance, 0);
    }
}
