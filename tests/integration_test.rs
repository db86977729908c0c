//! Integration tests for the REST API.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::json;
use tower::ServiceExt;

use lending_ledger::api::{WebhookVerifier, create_router};
use lending_ledger::app::AppState;
use lending_ledger::domain::{HealthResponse, HealthStatus, Loan, LoanStats, LoanStatus, PaginatedResponse, Repayment, RepaymentSession, RepaymentStatus};
use lending_ledger::test_utils::{
    MockCacheInvalidator, MockLoanRepository, MockPaymentGateway, MockRepaymentRepository,
};

struct TestContext {
    router: Router,
    loans: Arc<MockLoanRepository>,
    repayments: Arc<MockRepaymentRepository>,
}

fn setup() -> TestContext {
    setup_with_gateway(Arc::new(MockPaymentGateway::new()))
}

fn setup_with_gateway(gateway: Arc<MockPaymentGateway>) -> TestContext {
    let loans = Arc::new(MockLoanRepository::new());
    let repayments = Arc::new(MockRepaymentRepository::new());
    let cache = Arc::new(MockCacheInvalidator::new());
    let verifier = Arc::new(WebhookVerifier::new(
        Some(SecretString::from("sk_test_secret".to_string())),
        None,
        false,
    ));
    let state = Arc::new(AppState::new(
        Arc::clone(&loans) as _,
        Arc::clone(&repayments) as _,
        gateway as _,
        cache as _,
        verifier,
        true,
    ));

    TestContext {
        router: create_router(state),
        loans,
        repayments,
    }
}

async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_create_loan_returns_pending_loan_with_terms() {
    let ctx = setup();

    let (status, body) = request(
        &ctx.router,
        "POST",
        "/api/loans",
        Some(json!({
            "borrower_id": "b-1",
            "amount": 50000.0,
            "interest_rate": 10.0,
            "term_months": 5,
            "purpose": "Working capital"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let loan: Loan = serde_json::from_value(body).unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.total_interest, 5_000.0);
    assert_eq!(loan.total_amount, 55_000.0);
    assert_eq!(loan.monthly_payment, 11_000.0);
    assert_eq!(loan.remaining_balance, 50_000.0);
}

#[tokio::test]
async fn test_create_loan_rejects_invalid_request() {
    let ctx = setup();

    let (status, body) = request(
        &ctx.router,
        "POST",
        "/api/loans",
        Some(json!({
            "borrower_id": "",
            "amount": 0.0,
            "interest_rate": 250.0,
            "term_months": 0
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], json!("validation_error"));
}

#[tokio::test]
async fn test_get_loan_not_found() {
    let ctx = setup();
    let (status, body) = request(&ctx.router, "GET", "/api/loans/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], json!("not_found"));
}

#[tokio::test]
async fn test_approve_pending_loan() {
    let ctx = setup();
    let loan = ctx.loans.seed_loan("b-1", 50_000.0, LoanStatus::Pending, None);

    let (status, body) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/approve", loan.id),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let approved: Loan = serde_json::from_value(body).unwrap();
    assert_eq!(approved.status, LoanStatus::Approved);
    assert!(approved.approved_at.is_some());

    // A second approval is refused
    let (status, _) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/approve", loan.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reject_pending_loan() {
    let ctx = setup();
    let loan = ctx.loans.seed_loan("b-1", 50_000.0, LoanStatus::Pending, None);

    let (status, body) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/reject", loan.id),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let rejected: Loan = serde_json::from_value(body).unwrap();
    assert_eq!(rejected.status, LoanStatus::Rejected);
}

#[tokio::test]
async fn test_list_loans_paginated() {
    let ctx = setup();
    for i in 0..3 {
        ctx.loans
            .seed_loan(&format!("b-{i}"), 10_000.0, LoanStatus::Pending, None);
    }

    let (status, body) = request(&ctx.router, "GET", "/api/loans?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let page: PaginatedResponse<Loan> = serde_json::from_value(body).unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);
    assert!(page.next_cursor.is_some());
}

#[tokio::test]
async fn test_loan_stats_counts_by_status() {
    let ctx = setup();
    ctx.loans.seed_loan("b-1", 10_000.0, LoanStatus::Pending, None);
    ctx.loans.seed_loan("b-2", 10_000.0, LoanStatus::Active, Some("DISB_1"));
    ctx.loans
        .seed_loan("b-3", 10_000.0, LoanStatus::Completed, Some("DISB_2"));

    let (status, body) = request(&ctx.router, "GET", "/api/loans/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    let stats: LoanStats = serde_json::from_value(body).unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn test_disburse_approved_loan() {
    let ctx = setup();
    let loan = ctx.loans.seed_loan("b-1", 50_000.0, LoanStatus::Approved, None);

    let (status, body) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/disburse", loan.id),
        Some(json!({
            "bank_account": {
                "account_number": "0123456789",
                "bank_code": "058",
                "account_name": "Ada Obi"
            }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let disbursed: Loan = serde_json::from_value(body).unwrap();
    // Optimistic mode: the sync transfer response marks the loan disbursed
    assert_eq!(disbursed.status, LoanStatus::Disbursed);
    let reference = disbursed.disbursement_reference.unwrap();
    assert!(reference.starts_with("DISB_"));
}

#[tokio::test]
async fn test_disburse_requires_approved_status() {
    let ctx = setup();
    let loan = ctx.loans.seed_loan("b-1", 50_000.0, LoanStatus::Pending, None);

    let (status, _) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/disburse", loan.id),
        Some(json!({
            "bank_account": {
                "account_number": "0123456789",
                "bank_code": "058",
                "account_name": "Ada Obi"
            }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ctx.loans.get(&loan.id).unwrap().status, LoanStatus::Pending);
}

#[tokio::test]
async fn test_gateway_failure_surfaces_as_bad_gateway() {
    let ctx = setup_with_gateway(Arc::new(MockPaymentGateway::failing()));
    let loan = ctx.loans.seed_loan("b-1", 50_000.0, LoanStatus::Approved, None);

    let (status, body) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/disburse", loan.id),
        Some(json!({
            "bank_account": {
                "account_number": "0123456789",
                "bank_code": "058",
                "account_name": "Ada Obi"
            }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], json!("gateway_error"));
    // The loan keeps its reference so the transfer webhook can still land
    let stored = ctx.loans.get(&loan.id).unwrap();
    assert_eq!(stored.status, LoanStatus::Approved);
    assert!(stored.disbursement_reference.is_some());
}

#[tokio::test]
async fn test_initiate_repayment_opens_checkout_and_activates_loan() {
    let ctx = setup();
    let loan = ctx
        .loans
        .seed_loan("b-1", 50_000.0, LoanStatus::Disbursed, Some("DISB_1"));

    let (status, body) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/repayments", loan.id),
        Some(json!({ "amount": 11000.0, "email": "ada@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let session: RepaymentSession = serde_json::from_value(body).unwrap();
    assert_eq!(session.repayment.status, RepaymentStatus::Pending);
    let reference = session.repayment.transaction_reference.clone().unwrap();
    assert!(reference.starts_with("LN_"));
    assert!(session.authorization_url.is_some());

    // First initiation moves the loan into repayment
    assert_eq!(ctx.loans.get(&loan.id).unwrap().status, LoanStatus::Active);
    assert_eq!(ctx.repayments.all().len(), 1);
}

#[tokio::test]
async fn test_initiate_repayment_requires_disbursed_or_active() {
    let ctx = setup();
    let loan = ctx.loans.seed_loan("b-1", 50_000.0, LoanStatus::Pending, None);

    let (status, _) = request(
        &ctx.router,
        "POST",
        &format!("/api/loans/{}/repayments", loan.id),
        Some(json!({ "amount": 11000.0, "email": "ada@example.com" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(ctx.repayments.all().is_empty());
}

#[tokio::test]
async fn test_list_repayments_for_loan() {
    let ctx = setup();
    let loan = ctx
        .loans
        .seed_loan("b-1", 50_000.0, LoanStatus::Active, Some("DISB_1"));
    ctx.repayments
        .seed_repayment(&loan.id, "b-1", 10_000.0, RepaymentStatus::Completed, "LN_1");
    ctx.repayments
        .seed_repayment(&loan.id, "b-1", 10_000.0, RepaymentStatus::Pending, "LN_2");

    let (status, body) = request(
        &ctx.router,
        "GET",
        &format!("/api/loans/{}/repayments", loan.id),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let repayments: Vec<Repayment> = serde_json::from_value(body).unwrap();
    assert_eq!(repayments.len(), 2);
}

#[tokio::test]
async fn test_health_check_healthy() {
    let ctx = setup();
    let (status, body) = request(&ctx.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_value(body).unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_health_check_degraded_on_gateway_failure() {
    let ctx = setup_with_gateway(Arc::new(MockPaymentGateway::failing()));
    let (status, body) = request(&ctx.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_value(body).unwrap();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.gateway, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_probes() {
    let ctx = setup();
    let (live, _) = request(&ctx.router, "GET", "/health/live", None).await;
    assert_eq!(live, StatusCode::OK);
    let (ready, _) = request(&ctx.router, "GET", "/health/ready", None).await;
    assert_eq!(ready, StatusCode::OK);
}
