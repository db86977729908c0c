//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::{AppError, ConfigError, DatabaseError, GatewayError, ValidationError};
pub use events::{EventKind, PaymentProvider, WebhookEnvelope, WebhookEvent};
pub use traits::{
    CacheInvalidator, ChargeInstruction, CheckoutSession, GatewayVerification, LoanRepository,
    NewRepayment, PaymentGateway, RepaymentRepository, TransferInstruction, TransferReceipt,
};
pub use types::{
    BankAccount, CreateLoanRequest, DisburseLoanRequest, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, InitiateRepaymentRequest, Loan, LoanStats, LoanStatus, LoanTerms,
    PaginatedResponse, PaginationParams, Repayment, RepaymentSession, RepaymentStatus,
    RepaymentTotals,
};
