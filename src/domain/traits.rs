//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AppError;
use super::events::PaymentProvider;
use super::types::{
    CreateLoanRequest, Loan, LoanStats, LoanStatus, PaginatedResponse, Repayment, RepaymentStatus,
    RepaymentTotals,
};

/// Persistence boundary for loan records.
///
/// Status updates are single atomic writes: the guarded variant embeds the
/// expected current statuses in the same statement so concurrent webhook
/// deliveries cannot interleave a read-then-write race.
#[async_trait]
pub trait LoanRepository: Send + Sync {
    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Create a new loan in PENDING status with computed amortization fields
    async fn create_loan(&self, data: &CreateLoanRequest) -> Result<Loan, AppError>;

    /// Get a loan by id
    async fn find_by_id(&self, id: &str) -> Result<Option<Loan>, AppError>;

    /// Get a loan by its disbursement correlation reference
    async fn find_by_disbursement_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Loan>, AppError>;

    /// List loans with cursor-based pagination
    async fn list_loans(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Loan>, AppError>;

    /// Set status unconditionally, stamping approved_at / disbursed_at as
    /// the status dictates and merging the gateway payload in one write.
    async fn update_status(
        &self,
        id: &str,
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Loan, AppError>;

    /// Set status only if the current status is one of `expected`.
    /// Returns `None` when the gate does not match; the write is a single
    /// conditional UPDATE, never a read-modify-write.
    async fn update_status_guarded(
        &self,
        id: &str,
        expected: &[LoanStatus],
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Option<Loan>, AppError>;

    /// Record the correlation reference assigned at disbursement initiation
    async fn set_disbursement_reference(
        &self,
        id: &str,
        reference: &str,
    ) -> Result<Loan, AppError>;

    /// Advance the next installment date and refresh the outstanding balance
    async fn record_installment_progress(
        &self,
        id: &str,
        next_payment_date: DateTime<Utc>,
        remaining_balance: f64,
    ) -> Result<(), AppError>;

    /// Per-status loan counts
    async fn loan_stats(&self) -> Result<LoanStats, AppError>;
}

/// Data for a repayment record created at payment initiation
#[derive(Debug, Clone)]
pub struct NewRepayment {
    pub loan_id: String,
    pub borrower_id: String,
    pub amount: f64,
    pub principal_amount: f64,
    pub interest_amount: f64,
    pub transaction_reference: String,
    pub due_date: DateTime<Utc>,
}

/// Persistence boundary for repayment records
#[async_trait]
pub trait RepaymentRepository: Send + Sync {
    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Create a new repayment in PENDING status
    async fn create_repayment(&self, data: &NewRepayment) -> Result<Repayment, AppError>;

    /// Get a repayment by its transaction correlation reference
    async fn find_by_transaction_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Repayment>, AppError>;

    /// List repayments belonging to a loan, newest first
    async fn find_by_loan_id(&self, loan_id: &str) -> Result<Vec<Repayment>, AppError>;

    /// Set status only if the current status is one of `expected`, stamping
    /// paid_at on COMPLETED and merging the gateway payload in one write.
    /// Returns `None` when the gate does not match.
    async fn update_status_guarded(
        &self,
        id: &str,
        expected: &[RepaymentStatus],
        status: RepaymentStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Option<Repayment>, AppError>;

    /// Sum of COMPLETED repayments for a loan. FAILED and PENDING rows
    /// never contribute.
    async fn completed_totals_for_loan(&self, loan_id: &str)
    -> Result<RepaymentTotals, AppError>;
}

/// Transfer instruction sent to a gateway for a disbursement
#[derive(Debug, Clone, Serialize)]
pub struct TransferInstruction {
    pub amount: f64,
    pub reference: String,
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
    pub narration: Option<String>,
    pub currency: String,
}

/// Normalized result of a transfer initiation or verification
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferReceipt {
    pub success: bool,
    pub reference: String,
    pub status: String,
    pub amount: f64,
    pub transfer_code: Option<String>,
}

/// Charge instruction sent to a gateway to open a checkout session
#[derive(Debug, Clone, Serialize)]
pub struct ChargeInstruction {
    pub amount: f64,
    pub email: String,
    pub reference: String,
    pub callback_url: Option<String>,
}

/// Normalized checkout session returned by a gateway
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub reference: String,
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
}

/// Normalized verification envelope, identical across providers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayVerification {
    pub success: bool,
    pub reference: String,
    pub amount: f64,
    pub status: String,
    pub gateway_response: serde_json::Value,
}

/// Payment gateway client abstracted over providers
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Which provider this client speaks to
    fn provider(&self) -> PaymentProvider;

    /// Check gateway reachability
    async fn health_check(&self) -> Result<(), AppError>;

    /// Open a hosted checkout session for a repayment
    async fn initiate_payment(
        &self,
        instruction: &ChargeInstruction,
    ) -> Result<CheckoutSession, AppError>;

    /// Initiate an outbound transfer for a disbursement.
    /// A successful return is advisory; the webhook is authoritative.
    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferReceipt, AppError>;

    /// Verify a charge by reference on demand
    async fn verify_payment(&self, reference: &str) -> Result<GatewayVerification, AppError>;

    /// Verify a transfer by reference on demand
    async fn verify_transfer(&self, reference: &str) -> Result<GatewayVerification, AppError>;
}

/// Best-effort cache invalidation hooks.
///
/// The backing store is the single source of truth; any cache is a read
/// accelerator. Implementations must never fail the calling path.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate_loan(&self, loan_id: &str);
    async fn invalidate_borrower(&self, borrower_id: &str);
}
