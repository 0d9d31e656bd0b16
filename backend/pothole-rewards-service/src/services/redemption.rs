use crate::clock::Clock;
use crate::config::{PayoutConfig, RewardsConfig};
use crate::db::LedgerStore;
use crate::error::{Result, RewardsError};
use crate::metrics;
use crate::models::{
    NewRedemption, RedemptionRequest, RedemptionStatus, SettlementClaim, SettlementOutcome,
};
use crate::services::payout::PayoutProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

pub const PAYOUT_FAILURE_REASON: &str = "payout provider error";
pub const ABANDONED_SETTLEMENT_REASON: &str = "settlement abandoned";

static GHANA_PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:0|\+233)(2[0-9]|5[0-9])\d{7}$").expect("phone pattern must compile")
});

/// Strip spaces and check the number is a Ghana mobile number
pub fn normalize_ghana_phone(raw: &str) -> Result<String> {
    let phone: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if GHANA_PHONE.is_match(&phone) {
        Ok(phone)
    } else {
        Err(RewardsError::InvalidInput(
            "Enter a valid Ghana phone number starting with 0 or +233 followed by 9 digits"
                .to_string(),
        ))
    }
}

/// Turns points into airtime.
///
/// Creating a request never touches the balance. Settlement claims the
/// request and holds its points, calls the provider outside any lock, then
/// commits approval and debit together.
pub struct RedemptionWorkflow {
    store: Arc<dyn LedgerStore>,
    payout: Arc<dyn PayoutProvider>,
    clock: Arc<dyn Clock>,
    rewards: RewardsConfig,
    payout_timeout: Duration,
}

impl RedemptionWorkflow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        payout: Arc<dyn PayoutProvider>,
        clock: Arc<dyn Clock>,
        rewards: RewardsConfig,
        payout_config: &PayoutConfig,
    ) -> Self {
        Self {
            store,
            payout,
            clock,
            rewards,
            payout_timeout: payout_config.timeout(),
        }
    }

    /// Airtime value of a valid points amount
    pub fn payout_amount(&self, points: i64) -> i64 {
        (points / self.rewards.redemption_unit_points) * self.rewards.redemption_unit_value
    }

    pub async fn request_redemption(
        &self,
        user_id: Uuid,
        points: i64,
        phone: &str,
    ) -> Result<RedemptionRequest> {
        let unit = self.rewards.redemption_unit_points;
        if points <= 0 {
            return Err(RewardsError::InvalidAmount(
                "Points must be positive".to_string(),
            ));
        }
        if points % unit != 0 {
            return Err(RewardsError::InvalidAmount(format!(
                "Redemptions must be in blocks of {}",
                unit
            )));
        }

        let target_phone = normalize_ghana_phone(phone)?;

        let available = match self.store.get_account(user_id).await {
            Ok(account) => account.available_points(),
            Err(RewardsError::NotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        if available < points {
            return Err(RewardsError::InsufficientPoints {
                requested: points,
                available,
            });
        }

        let request = self
            .store
            .create_redemption(
                NewRedemption {
                    owner_id: user_id,
                    points,
                    payout_amount: self.payout_amount(points),
                    target_phone,
                },
                self.clock.now(),
            )
            .await?;

        metrics::record_redemption("requested");
        tracing::info!(
            redemption_id = %request.id,
            user_id = %user_id,
            points,
            payout_amount = request.payout_amount,
            "Redemption requested"
        );

        Ok(request)
    }

    /// Pay out a pending request and reconcile the ledger.
    ///
    /// A provider failure rejects the request and comes back as `Ok`. Already
    /// decided requests are returned unchanged.
    pub async fn settle(
        &self,
        redemption_id: Uuid,
        operator_id: Option<Uuid>,
    ) -> Result<RedemptionRequest> {
        let request = match self
            .store
            .claim_settlement(redemption_id, self.clock.now())
            .await?
        {
            SettlementClaim::Claimed(request) => request,
            SettlementClaim::AlreadyDecided(request) => {
                tracing::debug!(
                    redemption_id = %redemption_id,
                    status = %request.status.as_str(),
                    "Redemption already settled"
                );
                return Ok(request);
            }
            SettlementClaim::InProgress => {
                return Err(RewardsError::SettlementInProgress(redemption_id));
            }
            SettlementClaim::Insufficient { request, available } => {
                metrics::record_redemption("rejected");
                tracing::warn!(
                    redemption_id = %redemption_id,
                    user_id = %request.owner_id,
                    requested = request.points,
                    available,
                    "Redemption rejected: insufficient points"
                );
                return Err(RewardsError::InsufficientPoints {
                    requested: request.points,
                    available,
                });
            }
        };

        let started = Instant::now();
        let sent = timeout(
            self.payout_timeout,
            self.payout
                .send_airtime(&request.target_phone, request.payout_amount),
        )
        .await;
        metrics::observe_payout(started.elapsed());

        let receipt = match sent {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                tracing::warn!(redemption_id = %redemption_id, "Payout failed: {}", e);
                return self.fail(redemption_id, operator_id).await;
            }
            Err(_) => {
                tracing::warn!(
                    redemption_id = %redemption_id,
                    "Payout timed out after {}ms",
                    self.payout_timeout.as_millis()
                );
                return self.fail(redemption_id, operator_id).await;
            }
        };

        let reference = receipt.reference;
        let completed = match self
            .store
            .record_payout_reference(redemption_id, &reference)
            .await
        {
            Ok(()) => {
                self.store
                    .complete_settlement(
                        redemption_id,
                        SettlementOutcome::Paid {
                            reference: reference.clone(),
                        },
                        operator_id,
                        self.clock.now(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match completed {
            Ok(request) => {
                metrics::record_redemption("approved");
                tracing::info!(
                    redemption_id = %redemption_id,
                    user_id = %request.owner_id,
                    points = request.points,
                    reference = %reference,
                    "Redemption settled"
                );
                Ok(request)
            }
            Err(e) => {
                metrics::record_redemption("incomplete");
                tracing::error!(
                    redemption_id = %redemption_id,
                    reference = %reference,
                    "Payout sent but ledger update failed, manual reconciliation required: {}",
                    e
                );
                Err(RewardsError::SettlementIncomplete {
                    redemption_id,
                    reference,
                })
            }
        }
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<RedemptionRequest>> {
        self.store.redemptions_for_user(user_id).await
    }

    /// Claims older than `older_than` that never completed
    pub async fn stalled(&self, older_than: chrono::Duration) -> Result<Vec<RedemptionRequest>> {
        self.store
            .stalled_settlements(self.clock.now() - older_than)
            .await
    }

    /// Close a claim whose settlement never finished.
    ///
    /// A recorded provider reference means the airtime went out, so the
    /// request is approved and debited. Without one the hold is released and
    /// the request rejected. Claims younger than the payout timeout may still
    /// be in flight and are refused.
    pub async fn resolve_stalled(
        &self,
        redemption_id: Uuid,
        operator_id: Uuid,
    ) -> Result<RedemptionRequest> {
        let request = self.store.get_redemption(redemption_id).await?;
        if request.status != RedemptionStatus::Pending {
            return Ok(request);
        }
        let started = request.settlement_started_at.ok_or_else(|| {
            RewardsError::InvalidInput(format!(
                "Redemption {} has no settlement to resolve",
                redemption_id
            ))
        })?;

        let now = self.clock.now();
        let in_flight = chrono::Duration::from_std(self.payout_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        if now < started + in_flight {
            return Err(RewardsError::SettlementInProgress(redemption_id));
        }

        let outcome = match request.reference.clone() {
            Some(reference) => SettlementOutcome::Paid { reference },
            None => SettlementOutcome::Failed {
                reason: ABANDONED_SETTLEMENT_REASON.to_string(),
            },
        };

        let resolved = match self
            .store
            .complete_settlement(redemption_id, outcome, Some(operator_id), now)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => return self.decided_despite(redemption_id, e).await,
        };

        metrics::record_redemption(match resolved.status {
            RedemptionStatus::Approved => "approved",
            _ => "rejected",
        });
        tracing::warn!(
            redemption_id = %redemption_id,
            user_id = %resolved.owner_id,
            operator_id = %operator_id,
            status = %resolved.status.as_str(),
            reference = ?resolved.reference,
            "Stalled settlement resolved by operator"
        );
        Ok(resolved)
    }

    async fn fail(
        &self,
        redemption_id: Uuid,
        operator_id: Option<Uuid>,
    ) -> Result<RedemptionRequest> {
        let request = match self
            .store
            .complete_settlement(
                redemption_id,
                SettlementOutcome::Failed {
                    reason: PAYOUT_FAILURE_REASON.to_string(),
                },
                operator_id,
                self.clock.now(),
            )
            .await
        {
            Ok(request) => request,
            Err(e) => {
                let current = self.decided_despite(redemption_id, e).await;
                if let Err(RewardsError::SettlementUnresolved(_)) = &current {
                    metrics::record_redemption("unresolved");
                }
                return current;
            }
        };

        metrics::record_redemption("rejected");
        tracing::info!(
            redemption_id = %redemption_id,
            user_id = %request.owner_id,
            "Redemption rejected after payout failure"
        );
        Ok(request)
    }

    /// A completion failed; someone else may have closed the claim meanwhile.
    /// If not, the claim still holds points and needs `resolve_stalled`.
    async fn decided_despite(
        &self,
        redemption_id: Uuid,
        error: RewardsError,
    ) -> Result<RedemptionRequest> {
        if let Ok(current) = self.store.get_redemption(redemption_id).await {
            if current.status != RedemptionStatus::Pending {
                return Ok(current);
            }
        }
        tracing::error!(
            redemption_id = %redemption_id,
            "Settlement could not be closed, points stay held until resolved: {}",
            error
        );
        Err(RewardsError::SettlementUnresolved(redemption_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::MemoryStore;
    use crate::models::{AwardOutcome, RedemptionStatus, UserAccount};
    use crate::services::payout::{MockPayoutProvider, PayoutReceipt};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    const PHONE: &str = "0244000000";

    async fn funded(store: &MemoryStore, balance: i64) -> Uuid {
        let user = Uuid::new_v4();
        store.open_account(user, Some(PHONE.into()), Utc::now()).await.unwrap();
        store.set_balance(user, balance);
        user
    }

    fn workflow(
        store: Arc<dyn LedgerStore>,
        payout: impl PayoutProvider + 'static,
    ) -> RedemptionWorkflow {
        RedemptionWorkflow::new(
            store,
            Arc::new(payout),
            Arc::new(ManualClock::default()),
            RewardsConfig::default(),
            &PayoutConfig::default(),
        )
    }

    fn paying(reference: &'static str) -> MockPayoutProvider {
        let mut payout = MockPayoutProvider::new();
        payout.expect_send_airtime().returning(move |_, _| {
            Ok(PayoutReceipt {
                reference: reference.to_string(),
            })
        });
        payout
    }

    #[test]
    fn test_phone_validation() {
        assert_eq!(normalize_ghana_phone("024 400 0000").unwrap(), "0244000000");
        assert!(normalize_ghana_phone("+233244000000").is_ok());
        assert!(normalize_ghana_phone("0554000000").is_ok());
        assert!(normalize_ghana_phone("0344000000").is_err());
        assert!(normalize_ghana_phone("024400000").is_err());
        assert!(normalize_ghana_phone("").is_err());
    }

    #[tokio::test]
    async fn test_amount_must_be_positive_multiple_of_unit() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 5000).await;
        let flow = workflow(store, MockPayoutProvider::new());

        for points in [0, -500, 499, 750] {
            let result = flow.request_redemption(user, points, PHONE).await;
            assert!(
                matches!(result, Err(RewardsError::InvalidAmount(_))),
                "{} points",
                points
            );
        }
    }

    #[tokio::test]
    async fn test_request_does_not_touch_balance() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let flow = workflow(store.clone(), MockPayoutProvider::new());

        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        assert_eq!(request.status, RedemptionStatus::Pending);
        assert_eq!(request.payout_amount, 5);
        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.points_balance, 1000);
        assert_eq!(account.points_held, 0);
    }

    #[tokio::test]
    async fn test_request_over_balance_is_insufficient() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 400).await;
        let flow = workflow(store, MockPayoutProvider::new());

        let result = flow.request_redemption(user, 500, PHONE).await;
        assert!(matches!(
            result,
            Err(RewardsError::InsufficientPoints {
                requested: 500,
                available: 400
            })
        ));

        let stranger = flow.request_redemption(Uuid::new_v4(), 500, PHONE).await;
        assert!(matches!(stranger, Err(RewardsError::InsufficientPoints { available: 0, .. })));
    }

    #[tokio::test]
    async fn test_settle_success_debits_and_stores_reference() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let flow = workflow(store.clone(), paying("ATQid_1"));
        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        let settled = flow.settle(request.id, None).await.unwrap();

        assert_eq!(settled.status, RedemptionStatus::Approved);
        assert_eq!(settled.reference.as_deref(), Some("ATQid_1"));
        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.points_balance, 500);
        assert_eq!(account.points_held, 0);
    }

    #[tokio::test]
    async fn test_settle_failure_rejects_and_keeps_balance() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let mut payout = MockPayoutProvider::new();
        payout
            .expect_send_airtime()
            .times(1)
            .returning(|_, _| Err(RewardsError::PayoutProviderError("boom".into())));
        let flow = workflow(store.clone(), payout);
        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        let settled = flow.settle(request.id, None).await.unwrap();

        assert_eq!(settled.status, RedemptionStatus::Rejected);
        assert_eq!(settled.rejection_reason.as_deref(), Some(PAYOUT_FAILURE_REASON));
        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.points_balance, 1000);
        assert_eq!(account.points_held, 0);
    }

    #[tokio::test]
    async fn test_settled_request_is_not_paid_twice() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let mut payout = MockPayoutProvider::new();
        payout.expect_send_airtime().times(1).returning(|_, _| {
            Ok(PayoutReceipt {
                reference: "ATQid_once".into(),
            })
        });
        let flow = workflow(store.clone(), payout);
        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        flow.settle(request.id, None).await.unwrap();
        let again = flow.settle(request.id, None).await.unwrap();

        assert_eq!(again.status, RedemptionStatus::Approved);
        assert_eq!(store.get_account(user).await.unwrap().points_balance, 500);
    }

    #[tokio::test]
    async fn test_second_request_over_remaining_balance_is_rejected_at_settlement() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let mut payout = MockPayoutProvider::new();
        payout.expect_send_airtime().times(1).returning(|_, _| {
            Ok(PayoutReceipt {
                reference: "ATQid_first".into(),
            })
        });
        let flow = workflow(store.clone(), payout);

        let first = flow.request_redemption(user, 1000, PHONE).await.unwrap();
        let second = flow.request_redemption(user, 1000, PHONE).await.unwrap();

        flow.settle(first.id, None).await.unwrap();
        let result = flow.settle(second.id, None).await;

        assert!(matches!(result, Err(RewardsError::InsufficientPoints { available: 0, .. })));
        let second = store.get_redemption(second.id).await.unwrap();
        assert_eq!(second.status, RedemptionStatus::Rejected);
        assert_eq!(store.get_account(user).await.unwrap().points_balance, 0);
    }

    struct SlowPayout;

    #[async_trait]
    impl PayoutProvider for SlowPayout {
        async fn send_airtime(&self, _phone: &str, _amount: i64) -> Result<PayoutReceipt> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PayoutReceipt {
                reference: "late".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_payout_timeout_is_a_failure() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let flow = workflow(store.clone(), SlowPayout);
        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        let settled = flow.settle(request.id, None).await.unwrap();

        assert_eq!(settled.status, RedemptionStatus::Rejected);
        assert_eq!(store.get_account(user).await.unwrap().points_balance, 1000);
    }

    /// Delegates to a MemoryStore but fails every settlement completion
    struct BrokenCommitStore(Arc<MemoryStore>);

    #[async_trait]
    impl LedgerStore for BrokenCommitStore {
        async fn open_account(
            &self,
            user_id: Uuid,
            phone: Option<String>,
            now: DateTime<Utc>,
        ) -> Result<UserAccount> {
            self.0.open_account(user_id, phone, now).await
        }

        async fn get_account(&self, user_id: Uuid) -> Result<UserAccount> {
            self.0.get_account(user_id).await
        }

        async fn award_report(
            &self,
            report_id: Uuid,
            points: i64,
            now: DateTime<Utc>,
        ) -> Result<AwardOutcome> {
            self.0.award_report(report_id, points, now).await
        }

        async fn create_redemption(
            &self,
            input: NewRedemption,
            now: DateTime<Utc>,
        ) -> Result<RedemptionRequest> {
            self.0.create_redemption(input, now).await
        }

        async fn get_redemption(&self, redemption_id: Uuid) -> Result<RedemptionRequest> {
            self.0.get_redemption(redemption_id).await
        }

        async fn redemptions_for_user(&self, owner_id: Uuid) -> Result<Vec<RedemptionRequest>> {
            self.0.redemptions_for_user(owner_id).await
        }

        async fn claim_settlement(
            &self,
            redemption_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<SettlementClaim> {
            self.0.claim_settlement(redemption_id, now).await
        }

        async fn record_payout_reference(
            &self,
            redemption_id: Uuid,
            reference: &str,
        ) -> Result<()> {
            self.0.record_payout_reference(redemption_id, reference).await
        }

        async fn complete_settlement(
            &self,
            _redemption_id: Uuid,
            _outcome: SettlementOutcome,
            _decided_by: Option<Uuid>,
            _now: DateTime<Utc>,
        ) -> Result<RedemptionRequest> {
            Err(RewardsError::Internal("connection reset".into()))
        }

        async fn stalled_settlements(
            &self,
            started_before: DateTime<Utc>,
        ) -> Result<Vec<RedemptionRequest>> {
            self.0.stalled_settlements(started_before).await
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_after_payout_is_surfaced() {
        let memory = Arc::new(MemoryStore::new());
        let user = funded(&memory, 1000).await;
        let clock = Arc::new(ManualClock::default());
        let flow = RedemptionWorkflow::new(
            Arc::new(BrokenCommitStore(memory.clone())),
            Arc::new(paying("ATQid_lost")),
            clock.clone(),
            RewardsConfig::default(),
            &PayoutConfig::default(),
        );
        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        let result = flow.settle(request.id, None).await;

        match result {
            Err(RewardsError::SettlementIncomplete {
                redemption_id,
                reference,
            }) => {
                assert_eq!(redemption_id, request.id);
                assert_eq!(reference, "ATQid_lost");
            }
            other => panic!("expected SettlementIncomplete, got {:?}", other),
        }

        // The reference survived and the claim still holds the points
        let stored = memory.get_redemption(request.id).await.unwrap();
        assert_eq!(stored.reference.as_deref(), Some("ATQid_lost"));
        assert_eq!(stored.status, RedemptionStatus::Pending);
        assert_eq!(memory.get_account(user).await.unwrap().points_held, 500);

        clock.advance(chrono::Duration::minutes(10));
        let stalled = flow.stalled(chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, request.id);

        let retry = flow.settle(request.id, None).await;
        assert!(matches!(retry, Err(RewardsError::SettlementInProgress(_))));
    }

    fn workflow_at(
        store: Arc<dyn LedgerStore>,
        payout: impl PayoutProvider + 'static,
        clock: Arc<ManualClock>,
    ) -> RedemptionWorkflow {
        RedemptionWorkflow::new(
            store,
            Arc::new(payout),
            clock,
            RewardsConfig::default(),
            &PayoutConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_released_by_operator() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let clock = Arc::new(ManualClock::default());
        let flow = workflow_at(store.clone(), MockPayoutProvider::new(), clock.clone());
        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        // Process died right after claiming
        store.claim_settlement(request.id, clock.now()).await.unwrap();
        clock.advance(chrono::Duration::days(30));

        let retry = flow.settle(request.id, None).await;
        assert!(matches!(retry, Err(RewardsError::SettlementInProgress(_))));

        let operator = Uuid::new_v4();
        let resolved = flow.resolve_stalled(request.id, operator).await.unwrap();

        assert_eq!(resolved.status, RedemptionStatus::Rejected);
        assert_eq!(
            resolved.rejection_reason.as_deref(),
            Some(ABANDONED_SETTLEMENT_REASON)
        );
        assert_eq!(resolved.decided_by, Some(operator));
        let account = store.get_account(user).await.unwrap();
        assert_eq!(account.points_balance, 1000);
        assert_eq!(account.points_held, 0);
        assert!(flow.request_redemption(user, 1000, PHONE).await.is_ok());
        assert!(flow.stalled(chrono::Duration::zero()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_claim_with_reference_is_approved_and_debited() {
        let memory = Arc::new(MemoryStore::new());
        let user = funded(&memory, 1000).await;
        let clock = Arc::new(ManualClock::default());
        let broken = workflow_at(
            Arc::new(BrokenCommitStore(memory.clone())),
            paying("ATQid_recovered"),
            clock.clone(),
        );
        let request = broken.request_redemption(user, 500, PHONE).await.unwrap();
        assert!(matches!(
            broken.settle(request.id, None).await,
            Err(RewardsError::SettlementIncomplete { .. })
        ));

        clock.advance(chrono::Duration::minutes(10));
        let flow = workflow_at(memory.clone(), MockPayoutProvider::new(), clock);
        let resolved = flow.resolve_stalled(request.id, Uuid::new_v4()).await.unwrap();

        assert_eq!(resolved.status, RedemptionStatus::Approved);
        assert_eq!(resolved.reference.as_deref(), Some("ATQid_recovered"));
        let account = memory.get_account(user).await.unwrap();
        assert_eq!(account.points_balance, 500);
        assert_eq!(account.points_held, 0);
    }

    #[tokio::test]
    async fn test_failed_release_after_payout_error_is_surfaced() {
        let memory = Arc::new(MemoryStore::new());
        let user = funded(&memory, 1000).await;
        let clock = Arc::new(ManualClock::default());
        let mut payout = MockPayoutProvider::new();
        payout
            .expect_send_airtime()
            .times(1)
            .returning(|_, _| Err(RewardsError::PayoutProviderError("down".into())));
        let broken = workflow_at(
            Arc::new(BrokenCommitStore(memory.clone())),
            payout,
            clock.clone(),
        );
        let request = broken.request_redemption(user, 500, PHONE).await.unwrap();

        let result = broken.settle(request.id, None).await;
        assert!(
            matches!(result, Err(RewardsError::SettlementUnresolved(id)) if id == request.id)
        );
        assert_eq!(memory.get_account(user).await.unwrap().points_held, 500);

        clock.advance(chrono::Duration::minutes(10));
        let flow = workflow_at(memory.clone(), MockPayoutProvider::new(), clock);
        let resolved = flow.resolve_stalled(request.id, Uuid::new_v4()).await.unwrap();

        assert_eq!(resolved.status, RedemptionStatus::Rejected);
        let account = memory.get_account(user).await.unwrap();
        assert_eq!(account.points_balance, 1000);
        assert_eq!(account.points_held, 0);
    }

    #[tokio::test]
    async fn test_fresh_claim_is_not_resolved() {
        let store = Arc::new(MemoryStore::new());
        let user = funded(&store, 1000).await;
        let clock = Arc::new(ManualClock::default());
        let flow = workflow_at(store.clone(), MockPayoutProvider::new(), clock.clone());
        let request = flow.request_redemption(user, 500, PHONE).await.unwrap();

        let unclaimed = flow.resolve_stalled(request.id, Uuid::new_v4()).await;
        assert!(matches!(unclaimed, Err(RewardsError::InvalidInput(_))));

        store.claim_settlement(request.id, clock.now()).await.unwrap();
        clock.advance(chrono::Duration::seconds(2));

        let early = flow.resolve_stalled(request.id, Uuid::new_v4()).await;
        assert!(matches!(early, Err(RewardsError::SettlementInProgress(_))));
        assert_eq!(store.get_account(user).await.unwrap().points_held, 500);
    }
}
