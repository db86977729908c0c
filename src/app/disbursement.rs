//! Disbursement orchestration.
//!
//! A disbursement pushes loan principal to the borrower's bank account
//! through the payment gateway. The correlation reference is persisted
//! BEFORE the gateway call: if the process dies between the two steps the
//! webhook can still find its loan. The synchronous gateway response is
//! advisory only; the webhook is the authoritative confirmation.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use validator::Validate;

use crate::app::reference::generate_reference;
use crate::domain::{
    AppError, CacheInvalidator, DatabaseError, DisburseLoanRequest, GatewayVerification, Loan,
    LoanRepository, LoanStatus, PaymentGateway, TransferInstruction, ValidationError,
};
use crate::infra::banks;

/// Orchestrates loan disbursements against the payment gateway
pub struct DisbursementService {
    loans: Arc<dyn LoanRepository>,
    gateway: Arc<dyn PaymentGateway>,
    cache: Arc<dyn CacheInvalidator>,
    /// When set, a successful synchronous gateway response moves the loan to
    /// DISBURSED immediately instead of waiting for the webhook.
    optimistic: bool,
}

impl DisbursementService {
    #[must_use]
    pub fn new(
        loans: Arc<dyn LoanRepository>,
        gateway: Arc<dyn PaymentGateway>,
        cache: Arc<dyn CacheInvalidator>,
        optimistic: bool,
    ) -> Self {
        Self {
            loans,
            gateway,
            cache,
            optimistic,
        }
    }

    /// Disburse an approved loan to the given bank account.
    #[instrument(skip(self, request), fields(loan_id = %loan_id))]
    pub async fn disburse(
        &self,
        loan_id: &str,
        request: &DisburseLoanRequest,
    ) -> Result<Loan, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let loan = self
            .loans
            .find_by_id(loan_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(loan_id.to_string())))?;

        if loan.status != LoanStatus::Approved {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "status".to_string(),
                message: format!("Loan must be approved to disburse, is {}", loan.status),
            }));
        }

        let account = &request.bank_account;
        if !banks::is_valid_account_number(&account.account_number) {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "account_number".to_string(),
                message: "Account number must be a 10-digit NUBAN".to_string(),
            }));
        }

        let bank_code = self.resolve_bank_code(account.bank_code.as_deref(), account.bank_name.as_deref())?;

        // Persist the reference first so the webhook can always join back,
        // even if we crash before observing the gateway response.
        let reference = generate_reference("DISB");
        let loan = self
            .loans
            .set_disbursement_reference(loan_id, &reference)
            .await?;

        info!(reference = %reference, bank_code = %bank_code, "Initiating disbursement transfer");

        let instruction = TransferInstruction {
            amount: loan.amount,
            reference: reference.clone(),
            account_number: account.account_number.clone(),
            bank_code: bank_code.to_string(),
            account_name: account.account_name.clone(),
            narration: request
                .notes
                .clone()
                .or_else(|| Some("Loan disbursement".to_string())),
            currency: "NGN".to_string(),
        };

        let receipt = self.gateway.initiate_transfer(&instruction).await?;

        let loan = if self.optimistic && receipt.success {
            let payload = serde_json::to_value(&receipt)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            self.loans
                .update_status_guarded(
                    loan_id,
                    &[LoanStatus::Approved],
                    LoanStatus::Disbursed,
                    Some(&payload),
                )
                .await?
                .unwrap_or(loan)
        } else {
            loan
        };

        self.cache.invalidate_loan(&loan.id).await;
        self.cache.invalidate_borrower(&loan.borrower_id).await;

        Ok(loan)
    }

    /// Check the transfer status at the gateway for a loan that has a
    /// disbursement in flight.
    #[instrument(skip(self), fields(loan_id = %loan_id))]
    pub async fn verify_disbursement(&self, loan_id: &str) -> Result<GatewayVerification, AppError> {
        let loan = self
            .loans
            .find_by_id(loan_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(loan_id.to_string())))?;

        let reference = loan.disbursement_reference.as_deref().ok_or_else(|| {
            AppError::Validation(ValidationError::InvalidField {
                field: "disbursement_reference".to_string(),
                message: "Loan has no disbursement in flight".to_string(),
            })
        })?;

        self.gateway.verify_transfer(reference).await
    }

    fn resolve_bank_code(
        &self,
        bank_code: Option<&str>,
        bank_name: Option<&str>,
    ) -> Result<&'static str, AppError> {
        if let Some(code) = bank_code {
            return code_as_static(code).ok_or_else(|| {
                AppError::Validation(ValidationError::InvalidField {
                    field: "bank_code".to_string(),
                    message: format!("Unknown bank code: {code}"),
                })
            });
        }

        let name = bank_name.ok_or_else(|| {
            AppError::Validation(ValidationError::InvalidField {
                field: "bank_account".to_string(),
                message: "Either bank_code or bank_name is required".to_string(),
            })
        })?;

        banks::resolve_bank_code(name).ok_or_else(|| {
            AppError::Validation(ValidationError::InvalidField {
                field: "bank_name".to_string(),
                message: format!("Unknown bank: {name}"),
            })
        })
    }
}

/// Map a caller-supplied code back onto the directory's static string
fn code_as_static(code: &str) -> Option<&'static str> {
    banks::bank_name_for_code(code).and_then(|name| banks::resolve_bank_code(name))
}
