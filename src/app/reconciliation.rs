//! Webhook reconciliation engine.
//!
//! Matches classified gateway events to loan/repayment records by their
//! correlation reference and applies the corresponding state transition.
//! Providers deliver at-least-once, so every transition is a guarded
//! conditional write on the current persisted status: redelivering an
//! already-applied event is a no-op, and terminal states never regress.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, CacheInvalidator, EventKind, Loan, LoanRepository, LoanStatus, Repayment,
    RepaymentRepository, RepaymentStatus, WebhookEvent,
};

/// What a delivery attempt did to the ledger.
///
/// Everything except an `Err` is acknowledged to the provider as success;
/// the distinction exists for logging and tests only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The transition was applied
    Applied,
    /// The record was already in (or past) the target state; no-op
    AlreadyApplied,
    /// No record matches the correlation reference; no-op
    UnknownReference,
    /// The current state does not admit this transition; no-op
    Ignored,
}

/// The reconciliation engine. Owns no records; mutates them through the
/// repository ports.
pub struct ReconciliationEngine {
    loans: Arc<dyn LoanRepository>,
    repayments: Arc<dyn RepaymentRepository>,
    cache: Arc<dyn CacheInvalidator>,
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(
        loans: Arc<dyn LoanRepository>,
        repayments: Arc<dyn RepaymentRepository>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            loans,
            repayments,
            cache,
        }
    }

    /// Apply a classified webhook event to the ledger.
    ///
    /// Storage errors propagate so the endpoint answers non-2xx and the
    /// provider redelivers; redelivery is safe by construction.
    #[instrument(skip(self, event), fields(provider = %event.provider, kind = ?event.kind, reference = %event.reference))]
    pub async fn process(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        match event.kind {
            EventKind::TransferSuccess => self.transfer_success(event).await,
            EventKind::TransferFailed => self.transfer_failed(event).await,
            EventKind::TransferReversed => self.transfer_reversed(event).await,
            EventKind::PaymentSuccess => self.payment_success(event).await,
            EventKind::PaymentFailed => self.payment_failed(event).await,
        }
    }

    /// transfer success: loan moves to DISBURSED, disbursed_at stamped once
    async fn transfer_success(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        let Some(loan) = self.find_loan(&event.reference).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let updated = self
            .loans
            .update_status_guarded(
                &loan.id,
                &[LoanStatus::Approved],
                LoanStatus::Disbursed,
                Some(&event.payload),
            )
            .await?;

        match updated {
            Some(loan) => {
                info!(loan_id = %loan.id, "Loan disbursement confirmed");
                self.invalidate_loan(&loan).await;
                Ok(ReconcileOutcome::Applied)
            }
            None => Ok(self.loan_gate_refused(&loan.id, LoanStatus::Disbursed).await?),
        }
    }

    /// transfer failed: loan reverts to APPROVED and becomes retryable.
    /// Only pre-ACTIVE loans revert; a failure notice arriving after the
    /// loan has progressed is ignored.
    async fn transfer_failed(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        let Some(loan) = self.find_loan(&event.reference).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let updated = self
            .loans
            .update_status_guarded(
                &loan.id,
                &[LoanStatus::Approved, LoanStatus::Disbursed],
                LoanStatus::Approved,
                Some(&event.payload),
            )
            .await?;

        match updated {
            Some(loan) => {
                info!(loan_id = %loan.id, "Loan reverted to approved after failed transfer");
                self.invalidate_loan(&loan).await;
                Ok(ReconcileOutcome::Applied)
            }
            None => Ok(self.loan_gate_refused(&loan.id, LoanStatus::Approved).await?),
        }
    }

    /// transfer reversed: loan moves to CANCELLED from any reachable state
    async fn transfer_reversed(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        let Some(loan) = self.find_loan(&event.reference).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let updated = self
            .loans
            .update_status_guarded(
                &loan.id,
                &[
                    LoanStatus::Approved,
                    LoanStatus::Disbursed,
                    LoanStatus::Active,
                ],
                LoanStatus::Cancelled,
                Some(&event.payload),
            )
            .await?;

        match updated {
            Some(loan) => {
                warn!(loan_id = %loan.id, "Loan cancelled after transfer reversal");
                self.invalidate_loan(&loan).await;
                Ok(ReconcileOutcome::Applied)
            }
            None => Ok(self.loan_gate_refused(&loan.id, LoanStatus::Cancelled).await?),
        }
    }

    /// payment success: repayment moves to COMPLETED, paid_at stamped once,
    /// then the owning loan is checked for completion. A FAILED repayment
    /// may still complete (gateway retry with the same reference), but a
    /// COMPLETED one never re-applies, so the aggregate never double-counts.
    async fn payment_success(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        let Some(repayment) = self.find_repayment(&event.reference).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let updated = self
            .repayments
            .update_status_guarded(
                &repayment.id,
                &[
                    RepaymentStatus::Pending,
                    RepaymentStatus::Processing,
                    RepaymentStatus::Overdue,
                    RepaymentStatus::Failed,
                ],
                RepaymentStatus::Completed,
                Some(&event.payload),
            )
            .await?;

        match updated {
            Some(repayment) => {
                info!(repayment_id = %repayment.id, loan_id = %repayment.loan_id, "Repayment completed");
                self.settle_loan_after_payment(&repayment.loan_id).await?;
                self.invalidate_repayment(&repayment).await;
                Ok(ReconcileOutcome::Applied)
            }
            None => {
                // Already completed: re-run the completion check so a side
                // effect lost to an earlier storage failure still heals on
                // redelivery.
                let current = self.find_repayment(&event.reference).await?;
                if current.map(|r| r.status) == Some(RepaymentStatus::Completed) {
                    self.settle_loan_after_payment(&repayment.loan_id).await?;
                    Ok(ReconcileOutcome::AlreadyApplied)
                } else {
                    warn!(repayment_id = %repayment.id, "Payment success ignored in current state");
                    Ok(ReconcileOutcome::Ignored)
                }
            }
        }
    }

    /// payment failed: repayment moves to FAILED unless already settled
    async fn payment_failed(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, AppError> {
        let Some(repayment) = self.find_repayment(&event.reference).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let updated = self
            .repayments
            .update_status_guarded(
                &repayment.id,
                &[
                    RepaymentStatus::Pending,
                    RepaymentStatus::Processing,
                    RepaymentStatus::Overdue,
                ],
                RepaymentStatus::Failed,
                Some(&event.payload),
            )
            .await?;

        match updated {
            Some(repayment) => {
                info!(repayment_id = %repayment.id, "Repayment marked failed");
                self.invalidate_repayment(&repayment).await;
                Ok(ReconcileOutcome::Applied)
            }
            None => {
                let current = self.find_repayment(&event.reference).await?;
                match current.map(|r| r.status) {
                    Some(RepaymentStatus::Failed) => Ok(ReconcileOutcome::AlreadyApplied),
                    _ => {
                        warn!(repayment_id = %repayment.id, "Payment failure ignored in current state");
                        Ok(ReconcileOutcome::Ignored)
                    }
                }
            }
        }
    }

    /// After a completed repayment: if the sum of COMPLETED repayments
    /// covers the principal the loan completes, otherwise the next
    /// installment date advances by one month (fixed monthly cadence).
    async fn settle_loan_after_payment(&self, loan_id: &str) -> Result<(), AppError> {
        let Some(loan) = self.loans.find_by_id(loan_id).await? else {
            warn!(loan_id = %loan_id, "Loan not found during post-payment settlement");
            return Ok(());
        };

        let totals = self.repayments.completed_totals_for_loan(loan_id).await?;

        if totals.total_amount >= loan.amount {
            let completed = self
                .loans
                .update_status_guarded(
                    loan_id,
                    &[
                        LoanStatus::Approved,
                        LoanStatus::Disbursed,
                        LoanStatus::Active,
                        LoanStatus::Defaulted,
                    ],
                    LoanStatus::Completed,
                    None,
                )
                .await?;
            if completed.is_some() {
                info!(loan_id = %loan_id, total_repaid = %totals.total_amount, "Loan fully repaid");
            }
        } else {
            let next = chrono::Utc::now()
                .checked_add_months(chrono::Months::new(1))
                .unwrap_or_else(chrono::Utc::now);
            let remaining = (loan.amount - totals.total_principal).max(0.0);
            self.loans
                .record_installment_progress(loan_id, next, remaining)
                .await?;
        }

        self.cache.invalidate_loan(loan_id).await;
        self.cache.invalidate_borrower(&loan.borrower_id).await;
        Ok(())
    }

    /// Map a refused loan gate to an outcome: no-op if the loan already
    /// reached the target, ignored otherwise.
    async fn loan_gate_refused(
        &self,
        loan_id: &str,
        target: LoanStatus,
    ) -> Result<ReconcileOutcome, AppError> {
        let current = self.loans.find_by_id(loan_id).await?.map(|l| l.status);
        if current == Some(target) {
            Ok(ReconcileOutcome::AlreadyApplied)
        } else {
            warn!(loan_id = %loan_id, current = ?current, target = %target, "Transition ignored in current state");
            Ok(ReconcileOutcome::Ignored)
        }
    }

    async fn find_loan(&self, reference: &str) -> Result<Option<Loan>, AppError> {
        let loan = self.loans.find_by_disbursement_reference(reference).await?;
        if loan.is_none() {
            warn!(reference = %reference, "No loan matches transfer reference");
        }
        Ok(loan)
    }

    async fn find_repayment(&self, reference: &str) -> Result<Option<Repayment>, AppError> {
        let repayment = self
            .repayments
            .find_by_transaction_reference(reference)
            .await?;
        if repayment.is_none() {
            warn!(reference = %reference, "No repayment matches transaction reference");
        }
        Ok(repayment)
    }

    async fn invalidate_loan(&self, loan: &Loan) {
        self.cache.invalidate_loan(&loan.id).await;
        self.cache.invalidate_borrower(&loan.borrower_id).await;
    }

    async fn invalidate_repayment(&self, repayment: &Repayment) {
        self.cache.invalidate_loan(&repayment.loan_id).await;
        self.cache.invalidate_borrower(&repayment.borrower_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PaymentProvider, WebhookEnvelope};
    use crate::test_utils::{MockCacheInvalidator, MockLoanRepository, MockRepaymentRepository};
    use serde_json::json;

    fn engine() -> (
        Arc<MockLoanRepository>,
        Arc<MockRepaymentRepository>,
        ReconciliationEngine,
    ) {
        let loans = Arc::new(MockLoanRepository::new());
        let repayments = Arc::new(MockRepaymentRepository::new());
        let cache = Arc::new(MockCacheInvalidator::new());
        let engine = ReconciliationEngine::new(
            Arc::clone(&loans) as _,
            Arc::clone(&repayments) as _,
            cache as _,
        );
        (loans, repayments, engine)
    }

    fn event(provider: PaymentProvider, name: &str, reference: &str) -> WebhookEvent {
        WebhookEvent::classify(
            provider,
            WebhookEnvelope {
                event: name.to_string(),
                data: json!({ "reference": reference, "tx_ref": reference }),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_transfer_success_disburses_loan() {
        let (loans, _, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Approved, Some("DISB_1"));

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "transfer.success", "DISB_1"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let stored = loans.get(&loan.id).unwrap();
        assert_eq!(stored.status, LoanStatus::Disbursed);
        assert!(stored.disbursed_at.is_some());
        assert!(stored.disbursement_gateway_response.is_some());
    }

    #[tokio::test]
    async fn test_transfer_success_is_idempotent() {
        let (loans, _, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Approved, Some("DISB_1"));
        let ev = event(PaymentProvider::Paystack, "transfer.success", "DISB_1");

        assert_eq!(engine.process(&ev).await.unwrap(), ReconcileOutcome::Applied);
        let first = loans.get(&loan.id).unwrap();

        assert_eq!(
            engine.process(&ev).await.unwrap(),
            ReconcileOutcome::AlreadyApplied
        );
        let second = loans.get(&loan.id).unwrap();
        assert_eq!(second.status, LoanStatus::Disbursed);
        assert_eq!(second.disbursed_at, first.disbursed_at);
    }

    #[tokio::test]
    async fn test_transfer_failed_reverts_to_approved() {
        let (loans, _, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Disbursed, Some("DISB_1"));

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "transfer.failed", "DISB_1"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let stored = loans.get(&loan.id).unwrap();
        assert_eq!(stored.status, LoanStatus::Approved);
    }

    #[tokio::test]
    async fn test_transfer_failed_never_reverts_active_loan() {
        let (loans, _, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "transfer.failed", "DISB_1"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(loans.get(&loan.id).unwrap().status, LoanStatus::Active);
    }

    #[tokio::test]
    async fn test_transfer_reversed_cancels_loan() {
        let (loans, _, engine) = engine();
        for status in [LoanStatus::Approved, LoanStatus::Disbursed, LoanStatus::Active] {
            let loan = loans.seed_loan("b-1", 50_000.0, status, Some("DISB_REV"));
            let outcome = engine
                .process(&event(
                    PaymentProvider::Paystack,
                    "transfer.reversed",
                    "DISB_REV",
                ))
                .await
                .unwrap();
            assert_eq!(outcome, ReconcileOutcome::Applied);
            assert_eq!(loans.get(&loan.id).unwrap().status, LoanStatus::Cancelled);
            loans.remove(&loan.id);
        }
    }

    #[tokio::test]
    async fn test_unknown_reference_is_safe_noop() {
        let (loans, repayments, engine) = engine();

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "transfer.success", "GHOST"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::UnknownReference);
        assert!(loans.all().is_empty());
        assert!(repayments.all().is_empty());
    }

    #[tokio::test]
    async fn test_payment_success_completes_repayment() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        let repayment =
            repayments.seed_repayment(&loan.id, "b-1", 10_000.0, RepaymentStatus::Pending, "LN_1");

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "charge.success", "LN_1"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let stored = repayments.get(&repayment.id).unwrap();
        assert_eq!(stored.status, RepaymentStatus::Completed);
        assert!(stored.paid_at.is_some());
        assert!(stored.gateway_response.is_some());
    }

    #[tokio::test]
    async fn test_payment_success_no_double_count() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        repayments.seed_repayment(&loan.id, "b-1", 30_000.0, RepaymentStatus::Pending, "LN_1");
        let ev = event(PaymentProvider::Paystack, "charge.success", "LN_1");

        engine.process(&ev).await.unwrap();
        assert_eq!(
            engine.process(&ev).await.unwrap(),
            ReconcileOutcome::AlreadyApplied
        );

        let totals = repayments
            .completed_totals_for_loan(&loan.id)
            .await
            .unwrap();
        assert_eq!(totals.total_amount, 30_000.0);
        assert_eq!(totals.completed_count, 1);
        // 30,000 of 50,000: loan must not complete
        assert_eq!(loans.get(&loan.id).unwrap().status, LoanStatus::Active);
    }

    #[tokio::test]
    async fn test_final_payment_completes_loan() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        repayments.seed_repayment(&loan.id, "b-1", 30_000.0, RepaymentStatus::Completed, "LN_1");
        repayments.seed_repayment(&loan.id, "b-1", 20_000.0, RepaymentStatus::Pending, "LN_2");

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "charge.success", "LN_2"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(loans.get(&loan.id).unwrap().status, LoanStatus::Completed);
    }

    #[tokio::test]
    async fn test_partial_payment_advances_next_payment_date() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        repayments.seed_repayment(&loan.id, "b-1", 30_000.0, RepaymentStatus::Completed, "LN_1");
        repayments.seed_repayment(&loan.id, "b-1", 10_000.0, RepaymentStatus::Pending, "LN_2");

        let before = chrono::Utc::now();
        engine
            .process(&event(PaymentProvider::Paystack, "charge.success", "LN_2"))
            .await
            .unwrap();

        let stored = loans.get(&loan.id).unwrap();
        assert_eq!(stored.status, LoanStatus::Active);
        let next = stored.next_payment_date.expect("next payment date set");
        // Roughly one month out
        assert!(next > before + chrono::Duration::days(27));
        assert!(next < before + chrono::Duration::days(32));
    }

    #[tokio::test]
    async fn test_failed_repayments_never_count_toward_completion() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        repayments.seed_repayment(&loan.id, "b-1", 40_000.0, RepaymentStatus::Failed, "LN_1");
        repayments.seed_repayment(&loan.id, "b-1", 20_000.0, RepaymentStatus::Pending, "LN_2");

        engine
            .process(&event(PaymentProvider::Paystack, "charge.success", "LN_2"))
            .await
            .unwrap();

        // 20,000 completed + 40,000 failed: failed must not count
        assert_eq!(loans.get(&loan.id).unwrap().status, LoanStatus::Active);
    }

    #[tokio::test]
    async fn test_payment_failed_marks_repayment_failed() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        let repayment =
            repayments.seed_repayment(&loan.id, "b-1", 10_000.0, RepaymentStatus::Pending, "LN_1");

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "charge.failed", "LN_1"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let stored = repayments.get(&repayment.id).unwrap();
        assert_eq!(stored.status, RepaymentStatus::Failed);
        assert!(stored.paid_at.is_none());
    }

    #[tokio::test]
    async fn test_payment_failed_never_regresses_completed() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        let repayment = repayments.seed_repayment(
            &loan.id,
            "b-1",
            10_000.0,
            RepaymentStatus::Completed,
            "LN_1",
        );

        let outcome = engine
            .process(&event(PaymentProvider::Paystack, "charge.failed", "LN_1"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(
            repayments.get(&repayment.id).unwrap().status,
            RepaymentStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_flutterwave_tx_ref_resolves_same_repayment() {
        let (loans, repayments, engine) = engine();
        let loan = loans.seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
        let repayment =
            repayments.seed_repayment(&loan.id, "b-1", 10_000.0, RepaymentStatus::Pending, "LN_9");

        let ev = WebhookEvent::classify(
            PaymentProvider::Flutterwave,
            WebhookEnvelope {
                event: "charge.completed".to_string(),
                data: json!({ "tx_ref": "LN_9", "reference": "flw-unrelated" }),
            },
        )
        .unwrap();

        assert_eq!(engine.process(&ev).await.unwrap(), ReconcileOutcome::Applied);
        assert_eq!(
            repayments.get(&repayment.id).unwrap().status,
            RepaymentStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let loans = Arc::new(MockLoanRepository::failing("connection reset"));
        let repayments = Arc::new(MockRepaymentRepository::new());
        let cache = Arc::new(MockCacheInvalidator::new());
        let engine = ReconciliationEngine::new(loans as _, repayments as _, cache as _);

        let result = engine
            .process(&event(PaymentProvider::Paystack, "transfer.success", "DISB_1"))
            .await;
        assert!(result.is_err());
    }
}
