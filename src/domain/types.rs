//! Domain types with validation support.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Lifecycle status of a loan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// Application received, awaiting review
    #[default]
    Pending,
    /// Approved by an administrator, awaiting disbursement
    Approved,
    /// Application rejected (administrative, terminal)
    Rejected,
    /// Principal transferred to the borrower's bank account
    Disbursed,
    /// Repayment schedule in progress
    Active,
    /// Fully repaid
    Completed,
    /// Borrower defaulted (administrative, terminal)
    Defaulted,
    /// Disbursement reversed or loan withdrawn
    Cancelled,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Disbursed => "disbursed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Defaulted => "defaulted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "disbursed" => Ok(Self::Disbursed),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "defaulted" => Ok(Self::Defaulted),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a repayment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentStatus {
    /// Payment session opened, awaiting gateway confirmation
    #[default]
    Pending,
    /// Administrative hold while a manual payment clears
    Processing,
    /// Confirmed by the gateway
    Completed,
    /// Rejected by the gateway
    Failed,
    /// Past due date without completion (administrative)
    Overdue,
}

impl RepaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Overdue => "overdue",
        }
    }
}

impl std::str::FromStr for RepaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "overdue" => Ok(Self::Overdue),
            _ => Err(format!("Invalid repayment status: {}", s)),
        }
    }
}

impl std::fmt::Display for RepaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Core loan entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Loan {
    /// Unique identifier (UUID)
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    /// Borrower this loan belongs to
    pub borrower_id: String,
    /// Principal amount in NGN
    #[schema(example = 50000.0)]
    pub amount: f64,
    /// Flat interest rate in percent over the loan term
    #[schema(example = 10.0)]
    pub interest_rate: f64,
    /// Loan term in months
    #[schema(example = 6)]
    pub term_months: i32,
    /// Free-text purpose
    pub purpose: Option<String>,
    /// Current lifecycle status
    pub status: LoanStatus,
    /// Fixed monthly installment
    pub monthly_payment: f64,
    /// Principal plus total interest
    pub total_amount: f64,
    /// Total interest over the term
    pub total_interest: f64,
    /// Outstanding balance (principal not yet repaid)
    pub remaining_balance: f64,
    /// Correlation reference assigned at disbursement initiation.
    /// Sole join key for transfer webhooks.
    #[schema(example = "DISB_1731412800000_X7K2QD")]
    pub disbursement_reference: Option<String>,
    /// Last raw gateway payload observed for this loan
    pub disbursement_gateway_response: Option<serde_json::Value>,
    /// When the application was submitted
    pub applied_at: DateTime<Utc>,
    /// When the loan was approved
    pub approved_at: Option<DateTime<Utc>>,
    /// When the principal was disbursed
    pub disbursed_at: Option<DateTime<Utc>>,
    /// Final due date of the loan
    pub due_date: Option<DateTime<Utc>>,
    /// Next scheduled installment date
    pub next_payment_date: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    #[must_use]
    pub fn new(
        id: String,
        borrower_id: String,
        amount: f64,
        interest_rate: f64,
        term_months: i32,
        purpose: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let terms = LoanTerms::calculate(amount, interest_rate, term_months);
        Self {
            id,
            borrower_id,
            amount,
            interest_rate,
            term_months,
            purpose,
            status: LoanStatus::Pending,
            monthly_payment: terms.monthly_payment,
            total_amount: terms.total_amount,
            total_interest: terms.total_interest,
            remaining_balance: amount,
            disbursement_reference: None,
            disbursement_gateway_response: None,
            applied_at: now,
            approved_at: None,
            disbursed_at: None,
            due_date: None,
            next_payment_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derived amortization figures for a loan.
/// Flat interest: total interest is a fixed percentage of the principal,
/// spread evenly across monthly installments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoanTerms {
    pub monthly_payment: f64,
    pub total_amount: f64,
    pub total_interest: f64,
}

impl LoanTerms {
    #[must_use]
    pub fn calculate(amount: f64, interest_rate: f64, term_months: i32) -> Self {
        let total_interest = amount * interest_rate / 100.0;
        let total_amount = amount + total_interest;
        let monthly_payment = total_amount / f64::from(term_months.max(1));
        Self {
            monthly_payment: round_cents(monthly_payment),
            total_amount: round_cents(total_amount),
            total_interest: round_cents(total_interest),
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Core repayment entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Repayment {
    /// Unique identifier (UUID)
    pub id: String,
    /// Owning loan
    pub loan_id: String,
    /// Borrower who is paying
    pub borrower_id: String,
    /// Installment amount in NGN
    pub amount: f64,
    /// Principal portion of the installment
    pub principal_amount: f64,
    /// Interest portion of the installment
    pub interest_amount: f64,
    /// Current lifecycle status
    pub status: RepaymentStatus,
    /// Correlation reference assigned at payment initiation.
    /// Sole join key for charge webhooks.
    #[schema(example = "LN_1731412800000_A4B9CZ")]
    pub transaction_reference: Option<String>,
    /// Last raw gateway payload observed for this repayment
    pub gateway_response: Option<serde_json::Value>,
    /// Installment due date
    pub due_date: DateTime<Utc>,
    /// Set only when the repayment completes
    pub paid_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Aggregate of completed repayments for a loan.
/// Only COMPLETED rows contribute; pending or failed repayments never count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default, ToSchema)]
pub struct RepaymentTotals {
    pub total_amount: f64,
    pub total_principal: f64,
    pub total_interest: f64,
    pub completed_count: i64,
}

/// Request to create a new loan application
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateLoanRequest {
    /// Borrower identifier
    #[validate(length(min = 1, message = "Borrower id is required"))]
    pub borrower_id: String,
    /// Principal amount in NGN
    #[validate(range(min = 1.0, message = "Amount must be greater than 0"))]
    #[schema(example = 50000.0)]
    pub amount: f64,
    /// Flat interest rate in percent
    #[validate(range(min = 0.0, max = 100.0, message = "Interest rate must be 0-100"))]
    #[schema(example = 10.0)]
    pub interest_rate: f64,
    /// Term in months
    #[validate(range(min = 1, max = 120, message = "Term must be between 1 and 120 months"))]
    #[schema(example = 6)]
    pub term_months: i32,
    /// Free-text purpose
    pub purpose: Option<String>,
}

/// Destination bank account for a disbursement
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct BankAccount {
    /// Account number (10-digit NUBAN)
    #[validate(length(min = 1, message = "Account number is required"))]
    #[schema(example = "0123456789")]
    pub account_number: String,
    /// Bank code; resolved from bank_name when absent
    pub bank_code: Option<String>,
    /// Bank name; used to resolve bank_code when that is absent
    pub bank_name: Option<String>,
    /// Account holder name
    #[validate(length(min = 1, message = "Account name is required"))]
    pub account_name: String,
}

/// Request to disburse an approved loan
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct DisburseLoanRequest {
    #[validate(nested)]
    pub bank_account: BankAccount,
    /// Optional narration forwarded to the gateway
    pub notes: Option<String>,
}

/// Request to initiate a repayment through the payment gateway
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct InitiateRepaymentRequest {
    /// Installment amount in NGN
    #[validate(range(min = 1.0, message = "Amount must be greater than 0"))]
    pub amount: f64,
    /// Borrower email forwarded to the gateway checkout
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
}

/// Gateway checkout session opened for a repayment
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RepaymentSession {
    /// The repayment record created in PENDING status
    pub repayment: Repayment,
    /// Hosted checkout URL returned by the gateway
    pub authorization_url: Option<String>,
}

/// Pagination parameters for list requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaginationParams {
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
    /// Cursor for pagination (ID to start after)
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    /// List of items
    pub items: Vec<T>,
    /// Cursor for next page (null if no more items)
    pub next_cursor: Option<String>,
    /// Whether more items exist
    pub has_more: bool,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Per-status loan counts
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct LoanStats {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub disbursed: i64,
    pub active: i64,
    pub completed: i64,
    pub defaulted: i64,
    pub cancelled: i64,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Database health status
    pub database: HealthStatus,
    /// Payment gateway health status
    pub gateway: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, gateway: HealthStatus) -> Self {
        let status = match (&database, &gateway) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            gateway,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    /// Human-readable error message
    pub message: String,
}
