//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::app::{AppState, ReconcileOutcome};
use crate::domain::{
    AppError, CreateLoanRequest, DatabaseError, DisburseLoanRequest, ErrorDetail, ErrorResponse,
    GatewayError, GatewayVerification, HealthResponse, HealthStatus, InitiateRepaymentRequest,
    Loan, LoanStats, PaginatedResponse, PaginationParams, PaymentProvider, Repayment,
    RepaymentSession, WebhookEnvelope, WebhookEvent,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lending Ledger API",
        version = "0.1.0",
        description = "Back-office loan ledger with webhook-driven gateway reconciliation",
        license(
            name = "MIT"
        )
    ),
    paths(
        create_loan_handler,
        list_loans_handler,
        loan_stats_handler,
        get_loan_handler,
        approve_loan_handler,
        reject_loan_handler,
        disburse_loan_handler,
        verify_disbursement_handler,
        list_repayments_handler,
        initiate_repayment_handler,
        verify_repayment_handler,
        paystack_webhook_handler,
        flutterwave_webhook_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            Loan,
            Repayment,
            crate::domain::LoanStatus,
            crate::domain::RepaymentStatus,
            CreateLoanRequest,
            DisburseLoanRequest,
            crate::domain::BankAccount,
            InitiateRepaymentRequest,
            RepaymentSession,
            PaginationParams,
            PaginatedResponse<Loan>,
            LoanStats,
            WebhookAck,
            GatewayVerification,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "loans", description = "Loan application and lifecycle endpoints"),
        (name = "repayments", description = "Repayment initiation and verification endpoints"),
        (name = "webhooks", description = "Payment gateway webhook endpoints"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Acknowledgement body returned to webhook providers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookAck {
    fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            error: None,
        })
    }
}

/// Create a new loan application
#[utoipa::path(
    post,
    path = "/api/loans",
    tag = "loans",
    request_body = CreateLoanRequest,
    responses(
        (status = 200, description = "Loan application created in pending status", body = Loan),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_loan_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateLoanRequest>,
) -> Result<Json<Loan>, AppError> {
    let loan = state.service.create_loan(&payload).await?;
    Ok(Json(loan))
}

/// List loans with pagination
#[utoipa::path(
    get,
    path = "/api/loans",
    tag = "loans",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of loans to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor for pagination (loan ID to start after)")
    ),
    responses(
        (status = 200, description = "List of loans", body = PaginatedResponse<Loan>),
        (status = 400, description = "Invalid pagination parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_loans_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<Loan>>, AppError> {
    let loans = state.service.list_loans(&params).await?;
    Ok(Json(loans))
}

/// Per-status loan counts
#[utoipa::path(
    get,
    path = "/api/loans/stats",
    tag = "loans",
    responses(
        (status = 200, description = "Loan statistics", body = LoanStats),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn loan_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoanStats>, AppError> {
    let stats = state.service.loan_stats().await?;
    Ok(Json(stats))
}

/// Get a single loan by ID
#[utoipa::path(
    get,
    path = "/api/loans/{id}",
    tag = "loans",
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan found", body = Loan),
        (status = 404, description = "Loan not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_loan_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Loan>, AppError> {
    let loan = state.service.get_loan(&id).await?;
    Ok(Json(loan))
}

/// Approve a pending loan application
#[utoipa::path(
    post,
    path = "/api/loans/{id}/approve",
    tag = "loans",
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan approved", body = Loan),
        (status = 400, description = "Loan is not pending", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn approve_loan_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Loan>, AppError> {
    let loan = state.service.approve_loan(&id).await?;
    Ok(Json(loan))
}

/// Reject a pending loan application
#[utoipa::path(
    post,
    path = "/api/loans/{id}/reject",
    tag = "loans",
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan rejected", body = Loan),
        (status = 400, description = "Loan is not pending", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn reject_loan_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Loan>, AppError> {
    let loan = state.service.reject_loan(&id).await?;
    Ok(Json(loan))
}

/// Disburse an approved loan to a bank account
///
/// Initiates an outbound transfer at the payment gateway. The returned loan
/// reflects the synchronous gateway response only; the transfer webhook is
/// the authoritative confirmation.
#[utoipa::path(
    post,
    path = "/api/loans/{id}/disburse",
    tag = "loans",
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    request_body = DisburseLoanRequest,
    responses(
        (status = 200, description = "Disbursement initiated", body = Loan),
        (status = 400, description = "Loan not approved or invalid bank account", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
        (status = 502, description = "Gateway error", body = ErrorResponse)
    )
)]
pub async fn disburse_loan_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<DisburseLoanRequest>,
) -> Result<Json<Loan>, AppError> {
    let loan = state.disbursement.disburse(&id, &payload).await?;
    Ok(Json(loan))
}

/// Check the gateway-side status of a loan's disbursement transfer
#[utoipa::path(
    get,
    path = "/api/loans/{id}/disbursement",
    tag = "loans",
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Gateway transfer status", body = GatewayVerification),
        (status = 400, description = "No disbursement in flight", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
        (status = 502, description = "Gateway error", body = ErrorResponse)
    )
)]
pub async fn verify_disbursement_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GatewayVerification>, AppError> {
    let verification = state.disbursement.verify_disbursement(&id).await?;
    Ok(Json(verification))
}

/// List repayments recorded against a loan
#[utoipa::path(
    get,
    path = "/api/loans/{id}/repayments",
    tag = "repayments",
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Repayments for the loan, newest first", body = Vec<Repayment>),
        (status = 404, description = "Loan not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_repayments_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Repayment>>, AppError> {
    let repayments = state.service.list_repayments(&id).await?;
    Ok(Json(repayments))
}

/// Open a gateway checkout session for an installment
#[utoipa::path(
    post,
    path = "/api/loans/{id}/repayments",
    tag = "repayments",
    params(
        ("id" = String, Path, description = "Loan ID")
    ),
    request_body = InitiateRepaymentRequest,
    responses(
        (status = 200, description = "Checkout session opened; repayment is pending until the charge webhook settles it", body = RepaymentSession),
        (status = 400, description = "Loan not disbursed/active or invalid request", body = ErrorResponse),
        (status = 404, description = "Loan not found", body = ErrorResponse),
        (status = 502, description = "Gateway error", body = ErrorResponse)
    )
)]
pub async fn initiate_repayment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<InitiateRepaymentRequest>,
) -> Result<Json<RepaymentSession>, AppError> {
    let session = state.service.initiate_repayment(&id, &payload).await?;
    Ok(Json(session))
}

/// Check a repayment's charge status at the gateway
#[utoipa::path(
    get,
    path = "/api/repayments/{reference}/verify",
    tag = "repayments",
    params(
        ("reference" = String, Path, description = "Repayment transaction reference")
    ),
    responses(
        (status = 200, description = "Gateway charge status", body = GatewayVerification),
        (status = 404, description = "No repayment matches the reference", body = ErrorResponse),
        (status = 502, description = "Gateway error", body = ErrorResponse)
    )
)]
pub async fn verify_repayment_handler(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<GatewayVerification>, AppError> {
    let verification = state.service.verify_repayment(&reference).await?;
    Ok(Json(verification))
}

/// Handle Paystack webhook deliveries
#[utoipa::path(
    post,
    path = "/api/webhooks/paystack",
    tag = "webhooks",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 400, description = "Invalid signature or malformed body", body = WebhookAck),
        (status = 500, description = "Storage failure; the provider should redeliver", body = ErrorResponse)
    )
)]
pub async fn paystack_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, WebhookRejection> {
    handle_webhook(state, PaymentProvider::Paystack, &headers, &body).await
}

/// Handle Flutterwave webhook deliveries
#[utoipa::path(
    post,
    path = "/api/webhooks/flutterwave",
    tag = "webhooks",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 400, description = "Invalid signature or malformed body", body = WebhookAck),
        (status = 500, description = "Storage failure; the provider should redeliver", body = ErrorResponse)
    )
)]
pub async fn flutterwave_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, WebhookRejection> {
    handle_webhook(state, PaymentProvider::Flutterwave, &headers, &body).await
}

/// Rejection responses for the webhook endpoints.
///
/// Providers retry on any non-2xx: signature failures and junk bodies get a
/// 400 that will keep failing (and should), while transient processing
/// errors surface as 5xx so redelivery can succeed later.
pub enum WebhookRejection {
    BadRequest(String),
    Processing(AppError),
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(WebhookAck {
                    success: false,
                    error: Some(message),
                }),
            )
                .into_response(),
            Self::Processing(err) => err.into_response(),
        }
    }
}

/// Shared webhook pipeline: verify the raw body, parse, classify, reconcile.
///
/// Unknown event types and unmatched references are acknowledged with 200 so
/// the provider stops redelivering things we will never act on.
async fn handle_webhook(
    state: Arc<AppState>,
    provider: PaymentProvider,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<WebhookAck>, WebhookRejection> {
    let signature = headers
        .get(provider.signature_header())
        .and_then(|v| v.to_str().ok());

    if let Err(e) = state.verifier.verify(provider, signature, body) {
        warn!(provider = %provider, error = %e, "Webhook signature rejected");
        return Err(WebhookRejection::BadRequest("Invalid signature".to_string()));
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(provider = %provider, error = %e, "Malformed webhook body");
            return Err(WebhookRejection::BadRequest("Malformed body".to_string()));
        }
    };

    let Some(event) = WebhookEvent::classify(provider, envelope) else {
        info!(provider = %provider, "Webhook event outside reconciliation scope; acknowledged");
        return Ok(WebhookAck::ok());
    };

    let outcome = state
        .reconciliation
        .process(&event)
        .await
        .map_err(WebhookRejection::Processing)?;

    match outcome {
        ReconcileOutcome::Applied => {
            info!(provider = %provider, reference = %event.reference, "Webhook applied");
        }
        ReconcileOutcome::AlreadyApplied => {
            info!(provider = %provider, reference = %event.reference, "Webhook redelivery; already applied");
        }
        ReconcileOutcome::UnknownReference | ReconcileOutcome::Ignored => {}
    }

    Ok(WebhookAck::ok())
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Gateway(gw_err) => match gw_err {
                GatewayError::Configuration(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "gateway_error",
                    self.to_string(),
                ),
                _ => (StatusCode::BAD_GATEWAY, "gateway_error", self.to_string()),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
