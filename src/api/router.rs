//! Router assembly.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, approve_loan_handler, create_loan_handler, disburse_loan_handler,
    flutterwave_webhook_handler, get_loan_handler, health_check_handler,
    initiate_repayment_handler, list_loans_handler, list_repayments_handler, liveness_handler,
    loan_stats_handler, paystack_webhook_handler, readiness_handler, reject_loan_handler,
    verify_disbursement_handler, verify_repayment_handler,
};

/// Build the application router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/loans", post(create_loan_handler).get(list_loans_handler))
        .route("/api/loans/stats", get(loan_stats_handler))
        .route("/api/loans/{id}", get(get_loan_handler))
        .route("/api/loans/{id}/approve", post(approve_loan_handler))
        .route("/api/loans/{id}/reject", post(reject_loan_handler))
        .route("/api/loans/{id}/disburse", post(disburse_loan_handler))
        .route(
            "/api/loans/{id}/disbursement",
            get(verify_disbursement_handler),
        )
        .route(
            "/api/loans/{id}/repayments",
            post(initiate_repayment_handler).get(list_repayments_handler),
        )
        .route(
            "/api/repayments/{reference}/verify",
            get(verify_repayment_handler),
        )
        .route("/api/webhooks/paystack", post(paystack_webhook_handler))
        .route("/api/webhooks/flutterwave", post(flutterwave_webhook_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
