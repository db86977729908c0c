//! Application state management.

use std::sync::Arc;

use crate::api::signature::WebhookVerifier;
use crate::domain::{CacheInvalidator, LoanRepository, PaymentGateway, RepaymentRepository};

use super::disbursement::DisbursementService;
use super::reconciliation::ReconciliationEngine;
use super::service::LedgerService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LedgerService>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub disbursement: Arc<DisbursementService>,
    pub verifier: Arc<WebhookVerifier>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(
        loans: Arc<dyn LoanRepository>,
        repayments: Arc<dyn RepaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        cache: Arc<dyn CacheInvalidator>,
        verifier: Arc<WebhookVerifier>,
        optimistic_disbursement: bool,
    ) -> Self {
        let service = Arc::new(LedgerService::new(
            Arc::clone(&loans),
            Arc::clone(&repayments),
            Arc::clone(&gateway),
            Arc::clone(&cache),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            Arc::clone(&loans),
            Arc::clone(&repayments),
            Arc::clone(&cache),
        ));
        let disbursement = Arc::new(DisbursementService::new(
            loans,
            gateway,
            cache,
            optimistic_disbursement,
        ));
        Self {
            service,
            reconciliation,
            disbursement,
            verifier,
        }
    }
}
