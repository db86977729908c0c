//! Application service for the loan ledger.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use validator::Validate;

use crate::app::reference::generate_reference;
use crate::domain::{
    AppError, CacheInvalidator, ChargeInstruction, CreateLoanRequest, DatabaseError,
    GatewayVerification, HealthResponse, HealthStatus, InitiateRepaymentRequest, Loan,
    LoanRepository, LoanStats, LoanStatus, NewRepayment, PaginatedResponse, PaginationParams,
    PaymentGateway, Repayment, RepaymentRepository, RepaymentSession, ValidationError,
};

/// Core ledger operations: loan applications, repayment initiation, reads
pub struct LedgerService {
    loans: Arc<dyn LoanRepository>,
    repayments: Arc<dyn RepaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    cache: Arc<dyn CacheInvalidator>,
}

impl LedgerService {
    #[must_use]
    pub fn new(
        loans: Arc<dyn LoanRepository>,
        repayments: Arc<dyn RepaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            loans,
            repayments,
            gateway,
            cache,
        }
    }

    /// Register a new loan application in PENDING status.
    /// Amortization figures are derived once at creation.
    #[instrument(skip(self, request), fields(borrower = %request.borrower_id, amount = %request.amount))]
    pub async fn create_loan(&self, request: &CreateLoanRequest) -> Result<Loan, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        info!("Creating loan application");
        let loan = self.loans.create_loan(request).await?;
        self.cache.invalidate_borrower(&loan.borrower_id).await;
        Ok(loan)
    }

    /// Approve a pending loan application.
    #[instrument(skip(self), fields(loan_id = %loan_id))]
    pub async fn approve_loan(&self, loan_id: &str) -> Result<Loan, AppError> {
        let approved = self
            .loans
            .update_status_guarded(loan_id, &[LoanStatus::Pending], LoanStatus::Approved, None)
            .await?;

        match approved {
            Some(loan) => {
                info!(loan_id = %loan.id, "Loan approved");
                self.cache.invalidate_loan(&loan.id).await;
                self.cache.invalidate_borrower(&loan.borrower_id).await;
                Ok(loan)
            }
            None => {
                let current = self.loans.find_by_id(loan_id).await?;
                match current {
                    Some(loan) => Err(AppError::Validation(ValidationError::InvalidField {
                        field: "status".to_string(),
                        message: format!("Only pending loans can be approved, is {}", loan.status),
                    })),
                    None => Err(AppError::Database(DatabaseError::NotFound(loan_id.to_string()))),
                }
            }
        }
    }

    /// Reject a pending loan application.
    #[instrument(skip(self), fields(loan_id = %loan_id))]
    pub async fn reject_loan(&self, loan_id: &str) -> Result<Loan, AppError> {
        let rejected = self
            .loans
            .update_status_guarded(loan_id, &[LoanStatus::Pending], LoanStatus::Rejected, None)
            .await?;

        match rejected {
            Some(loan) => {
                info!(loan_id = %loan.id, "Loan rejected");
                self.cache.invalidate_loan(&loan.id).await;
                Ok(loan)
            }
            None => {
                let current = self.loans.find_by_id(loan_id).await?;
                match current {
                    Some(loan) => Err(AppError::Validation(ValidationError::InvalidField {
                        field: "status".to_string(),
                        message: format!("Only pending loans can be rejected, is {}", loan.status),
                    })),
                    None => Err(AppError::Database(DatabaseError::NotFound(loan_id.to_string()))),
                }
            }
        }
    }

    /// Get a loan by id
    #[instrument(skip(self))]
    pub async fn get_loan(&self, loan_id: &str) -> Result<Loan, AppError> {
        self.loans
            .find_by_id(loan_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(loan_id.to_string())))
    }

    /// List loans with cursor pagination
    #[instrument(skip(self))]
    pub async fn list_loans(
        &self,
        params: &PaginationParams,
    ) -> Result<PaginatedResponse<Loan>, AppError> {
        params.validate().map_err(|e| {
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        self.loans
            .list_loans(params.limit, params.cursor.as_deref())
            .await
    }

    /// Per-status loan counts
    #[instrument(skip(self))]
    pub async fn loan_stats(&self) -> Result<LoanStats, AppError> {
        self.loans.loan_stats().await
    }

    /// List repayments recorded against a loan, newest first
    #[instrument(skip(self))]
    pub async fn list_repayments(&self, loan_id: &str) -> Result<Vec<Repayment>, AppError> {
        // Surface a 404 rather than an empty list for unknown loans
        self.loans
            .find_by_id(loan_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(loan_id.to_string())))?;
        self.repayments.find_by_loan_id(loan_id).await
    }

    /// Open a gateway checkout session for an installment.
    ///
    /// The repayment row is created in PENDING status with its correlation
    /// reference BEFORE the gateway call; the charge webhook settles it.
    /// The first initiation moves a DISBURSED loan to ACTIVE.
    #[instrument(skip(self, request), fields(loan_id = %loan_id, amount = %request.amount))]
    pub async fn initiate_repayment(
        &self,
        loan_id: &str,
        request: &InitiateRepaymentRequest,
    ) -> Result<RepaymentSession, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let loan = self
            .loans
            .find_by_id(loan_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(loan_id.to_string())))?;

        if !matches!(loan.status, LoanStatus::Disbursed | LoanStatus::Active) {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "status".to_string(),
                message: format!(
                    "Repayments require a disbursed or active loan, is {}",
                    loan.status
                ),
            }));
        }

        let (principal, interest) = split_installment(request.amount, &loan);
        let reference = generate_reference("LN");
        let due_date = loan
            .next_payment_date
            .unwrap_or_else(chrono::Utc::now);

        let repayment = self
            .repayments
            .create_repayment(&NewRepayment {
                loan_id: loan.id.clone(),
                borrower_id: loan.borrower_id.clone(),
                amount: request.amount,
                principal_amount: principal,
                interest_amount: interest,
                transaction_reference: reference.clone(),
                due_date,
            })
            .await?;

        // First repayment activates the schedule; refusal means the loan
        // is already active
        self.loans
            .update_status_guarded(loan_id, &[LoanStatus::Disbursed], LoanStatus::Active, None)
            .await?;

        info!(reference = %reference, "Opening gateway checkout session");
        let session = self
            .gateway
            .initiate_payment(&ChargeInstruction {
                amount: request.amount,
                email: request.email.clone(),
                reference,
                callback_url: None,
            })
            .await?;

        self.cache.invalidate_loan(&loan.id).await;
        self.cache.invalidate_borrower(&loan.borrower_id).await;

        Ok(RepaymentSession {
            repayment,
            authorization_url: session.authorization_url,
        })
    }

    /// Check a repayment's charge status at the gateway on demand
    #[instrument(skip(self))]
    pub async fn verify_repayment(&self, reference: &str) -> Result<GatewayVerification, AppError> {
        self.repayments
            .find_by_transaction_reference(reference)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(reference.to_string())))?;
        self.gateway.verify_payment(reference).await
    }

    /// Compose overall health from storage and gateway connectivity
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.loans.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };
        let gateway = match self.gateway.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Gateway health check failed");
                HealthStatus::Degraded
            }
        };
        HealthResponse::new(database, gateway)
    }
}

/// Split an installment into principal and interest portions in the same
/// ratio as the loan's flat-interest schedule, keeping both at cents.
fn split_installment(amount: f64, loan: &Loan) -> (f64, f64) {
    if loan.total_amount <= 0.0 {
        return (amount, 0.0);
    }
    let interest = round_cents(amount * loan.total_interest / loan.total_amount);
    let principal = round_cents(amount - interest);
    (principal, interest)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
