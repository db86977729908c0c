//! Integration tests for the payment gateway HTTP clients.
//!
//! Uses `wiremock` to stand in for the Paystack and Flutterwave APIs:
//! checkout initialization, recipient + transfer flow, verification, and
//! error envelope handling.

use secrecy::SecretString;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

use lending_ledger::domain::{
    AppError, ChargeInstruction, GatewayError, PaymentGateway, TransferInstruction,
};
use lending_ledger::infra::{FlutterwaveClient, PaystackClient};

fn paystack(server: &MockServer) -> PaystackClient {
    PaystackClient::new(
        SecretString::from("sk_test_key".to_string()),
        Some(server.uri()),
    )
}

fn flutterwave(server: &MockServer) -> FlutterwaveClient {
    FlutterwaveClient::new(
        SecretString::from("FLWSECK_TEST".to_string()),
        Some(server.uri()),
    )
}

fn charge(reference: &str, amount: f64) -> ChargeInstruction {
    ChargeInstruction {
        amount,
        email: "ada@example.com".to_string(),
        reference: reference.to_string(),
        callback_url: None,
    }
}

fn transfer(reference: &str, amount: f64) -> TransferInstruction {
    TransferInstruction {
        amount,
        reference: reference.to_string(),
        account_number: "0123456789".to_string(),
        bank_code: "058".to_string(),
        account_name: "Ada Obi".to_string(),
        narration: Some("Loan disbursement".to_string()),
        currency: "NGN".to_string(),
    }
}

mod paystack_tests {
    use super::*;

    #[tokio::test]
    async fn test_initiate_payment_returns_checkout_session() {
        let server = MockServer::start().await;

        // Paystack expects the amount in kobo
        Mock::given(method("POST"))
            .and(path("/transaction/initialize"))
            .and(header("authorization", "Bearer sk_test_key"))
            .and(body_partial_json(json!({
                "email": "ada@example.com",
                "amount": 1_100_000,
                "reference": "LN_1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Authorization URL created",
                "data": {
                    "authorization_url": "https://checkout.paystack.com/abc123",
                    "access_code": "abc123",
                    "reference": "LN_1"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = paystack(&server)
            .initiate_payment(&charge("LN_1", 11_000.0))
            .await
            .unwrap();

        assert_eq!(session.reference, "LN_1");
        assert_eq!(
            session.authorization_url.as_deref(),
            Some("https://checkout.paystack.com/abc123")
        );
        assert_eq!(session.access_code.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_initiate_transfer_registers_recipient_first() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transferrecipient"))
            .and(body_partial_json(json!({
                "type": "nuban",
                "account_number": "0123456789",
                "bank_code": "058"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Transfer recipient created successfully",
                "data": { "recipient_code": "RCP_abc" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/transfer"))
            .and(body_partial_json(json!({
                "source": "balance",
                "amount": 5_000_000,
                "recipient": "RCP_abc",
                "reference": "DISB_1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Transfer has been queued",
                "data": {
                    "status": "pending",
                    "transfer_code": "TRF_xyz",
                    "reference": "DISB_1"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = paystack(&server)
            .initiate_transfer(&transfer("DISB_1", 50_000.0))
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.reference, "DISB_1");
        assert_eq!(receipt.status, "pending");
        assert_eq!(receipt.transfer_code.as_deref(), Some("TRF_xyz"));
    }

    #[tokio::test]
    async fn test_verify_payment_converts_kobo_to_naira() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/transaction/verify/LN_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Verification successful",
                "data": {
                    "status": "success",
                    "amount": 1_100_000,
                    "reference": "LN_1"
                }
            })))
            .mount(&server)
            .await;

        let verification = paystack(&server).verify_payment("LN_1").await.unwrap();

        assert!(verification.success);
        assert_eq!(verification.amount, 11_000.0);
        assert_eq!(verification.status, "success");
    }

    #[tokio::test]
    async fn test_failed_charge_reported_as_unsuccessful() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/transaction/verify/LN_2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Verification successful",
                "data": { "status": "failed", "amount": 1_100_000 }
            })))
            .mount(&server)
            .await;

        let verification = paystack(&server).verify_payment("LN_2").await.unwrap();
        assert!(!verification.success);
        assert_eq!(verification.status, "failed");
    }

    #[tokio::test]
    async fn test_envelope_status_false_is_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transaction/initialize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": false,
                "message": "Invalid key"
            })))
            .mount(&server)
            .await;

        let result = paystack(&server).initiate_payment(&charge("LN_1", 100.0)).await;
        match result {
            Err(AppError::Gateway(GatewayError::ApiError { message, .. })) => {
                assert_eq!(message, "Invalid key");
            }
            other => panic!("Expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_status_is_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transfer"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/transferrecipient"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "data": { "recipient_code": "RCP_abc" }
            })))
            .mount(&server)
            .await;

        let result = paystack(&server)
            .initiate_transfer(&transfer("DISB_1", 100.0))
            .await;
        match result {
            Err(AppError::Gateway(GatewayError::ApiError { status_code, .. })) => {
                assert_eq!(status_code, 401);
            }
            other => panic!("Expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_health_check_hits_bank_listing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/bank"))
            .and(query_param("currency", "NGN"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "data": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert!(paystack(&server).health_check().await.is_ok());
    }
}

mod flutterwave_tests {
    use super::*;

    #[tokio::test]
    async fn test_initiate_payment_returns_hosted_link() {
        let server = MockServer::start().await;

        // Flutterwave amounts stay in naira and correlate by tx_ref
        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(header("authorization", "Bearer FLWSECK_TEST"))
            .and(body_partial_json(json!({
                "tx_ref": "LN_1",
                "amount": 11_000.0,
                "currency": "NGN"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "message": "Hosted Link",
                "data": { "link": "https://checkout.flutterwave.com/v3/hosted/pay/xyz" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = flutterwave(&server)
            .initiate_payment(&charge("LN_1", 11_000.0))
            .await
            .unwrap();

        assert_eq!(session.reference, "LN_1");
        assert_eq!(
            session.authorization_url.as_deref(),
            Some("https://checkout.flutterwave.com/v3/hosted/pay/xyz")
        );
        assert!(session.access_code.is_none());
    }

    #[tokio::test]
    async fn test_initiate_transfer() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transfers"))
            .and(body_partial_json(json!({
                "account_bank": "058",
                "account_number": "0123456789",
                "amount": 50_000.0,
                "reference": "DISB_1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "message": "Transfer Queued Successfully",
                "data": { "id": 190_626, "status": "NEW", "reference": "DISB_1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = flutterwave(&server)
            .initiate_transfer(&transfer("DISB_1", 50_000.0))
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.status, "NEW");
        assert_eq!(receipt.transfer_code.as_deref(), Some("190626"));
    }

    #[tokio::test]
    async fn test_verify_payment_by_tx_ref() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/transactions/verify_by_reference"))
            .and(query_param("tx_ref", "LN_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": { "status": "successful", "amount": 11_000.0, "tx_ref": "LN_1" }
            })))
            .mount(&server)
            .await;

        let verification = flutterwave(&server).verify_payment("LN_1").await.unwrap();
        assert!(verification.success);
        assert_eq!(verification.amount, 11_000.0);
    }

    #[tokio::test]
    async fn test_verify_transfer_reads_first_listing_entry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/transfers"))
            .and(query_param("reference", "DISB_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": [
                    { "status": "SUCCESSFUL", "amount": 50_000.0, "reference": "DISB_1" }
                ]
            })))
            .mount(&server)
            .await;

        let verification = flutterwave(&server).verify_transfer("DISB_1").await.unwrap();
        assert!(verification.success);
        assert_eq!(verification.status, "SUCCESSFUL");
    }

    #[tokio::test]
    async fn test_error_envelope_is_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "message": "Invalid currency"
            })))
            .mount(&server)
            .await;

        let result = flutterwave(&server)
            .initiate_payment(&charge("LN_1", 100.0))
            .await;
        match result {
            Err(AppError::Gateway(GatewayError::ApiError { message, .. })) => {
                assert_eq!(message, "Invalid currency");
            }
            other => panic!("Expected ApiError, got {other:?}"),
        }
    }
}
