//! Flutterwave payment gateway client.
//!
//! Flutterwave denominates amounts in naira and correlates charges by the
//! caller-supplied `tx_ref`. Responses share the envelope
//! `{ "status": "success" | "error", "message": ..., "data": { ... } }`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, instrument};

use crate::domain::{
    AppError, ChargeInstruction, CheckoutSession, GatewayError, GatewayVerification,
    PaymentGateway, PaymentProvider, TransferInstruction, TransferReceipt,
};

/// Default Flutterwave API base URL
pub const DEFAULT_FLUTTERWAVE_API_URL: &str = "https://api.flutterwave.com/v3";

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Flutterwave API client
#[derive(Debug, Clone)]
pub struct FlutterwaveClient {
    http_client: Client,
    secret_key: SecretString,
    base_url: String,
}

impl FlutterwaveClient {
    /// Create a new Flutterwave client.
    ///
    /// # Arguments
    /// * `secret_key` - Flutterwave secret key used as a bearer token.
    /// * `base_url` - Optional custom API base URL. Defaults to production.
    pub fn new(secret_key: SecretString, base_url: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            secret_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_FLUTTERWAVE_API_URL.to_string()),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key.expose_secret())
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiEnvelope, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling Flutterwave API");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Flutterwave API request failed");
                AppError::Gateway(GatewayError::Network(e.to_string()))
            })?;

        Self::decode(response).await
    }

    async fn get(&self, path: &str) -> Result<ApiEnvelope, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling Flutterwave API");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Flutterwave API request failed");
                AppError::Gateway(GatewayError::Network(e.to_string()))
            })?;

        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<ApiEnvelope, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Flutterwave API returned error");
            return Err(AppError::Gateway(GatewayError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        let envelope: ApiEnvelope = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Flutterwave response");
            AppError::Gateway(GatewayError::ParseError(e.to_string()))
        })?;

        if envelope.status != "success" {
            return Err(AppError::Gateway(GatewayError::ApiError {
                status_code: 200,
                message: envelope.message,
            }));
        }

        Ok(envelope)
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Flutterwave
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.get("/banks/NG").await?;
        Ok(())
    }

    #[instrument(skip(self, instruction), fields(reference = %instruction.reference, amount = %instruction.amount))]
    async fn initiate_payment(
        &self,
        instruction: &ChargeInstruction,
    ) -> Result<CheckoutSession, AppError> {
        let envelope = self
            .post(
                "/payments",
                json!({
                    "tx_ref": instruction.reference,
                    "amount": instruction.amount,
                    "currency": "NGN",
                    "redirect_url": instruction.callback_url,
                    "customer": { "email": instruction.email },
                }),
            )
            .await?;

        Ok(CheckoutSession {
            reference: instruction.reference.clone(),
            authorization_url: envelope
                .data
                .get("link")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            access_code: None,
        })
    }

    #[instrument(skip(self, instruction), fields(reference = %instruction.reference, amount = %instruction.amount))]
    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferReceipt, AppError> {
        let envelope = self
            .post(
                "/transfers",
                json!({
                    "account_bank": instruction.bank_code,
                    "account_number": instruction.account_number,
                    "amount": instruction.amount,
                    "narration": instruction.narration,
                    "currency": instruction.currency,
                    "reference": instruction.reference,
                }),
            )
            .await?;

        let status = envelope
            .data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("NEW")
            .to_string();

        Ok(TransferReceipt {
            success: true,
            reference: instruction.reference.clone(),
            status,
            amount: instruction.amount,
            transfer_code: envelope
                .data
                .get("id")
                .and_then(|v| v.as_i64())
                .map(|id| id.to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn verify_payment(&self, reference: &str) -> Result<GatewayVerification, AppError> {
        let envelope = self
            .get(&format!(
                "/transactions/verify_by_reference?tx_ref={reference}"
            ))
            .await?;

        let status = envelope
            .data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(GatewayVerification {
            success: status == "successful",
            reference: reference.to_string(),
            amount: envelope
                .data
                .get("amount")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            status,
            gateway_response: envelope.data,
        })
    }

    #[instrument(skip(self))]
    async fn verify_transfer(&self, reference: &str) -> Result<GatewayVerification, AppError> {
        let envelope = self.get(&format!("/transfers?reference={reference}")).await?;

        // The transfers listing returns an array; the reference is unique
        let record = envelope
            .data
            .as_array()
            .and_then(|items| items.first())
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let status = record
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(GatewayVerification {
            success: status == "SUCCESSFUL",
            reference: reference.to_string(),
            amount: record.get("amount").and_then(|v| v.as_f64()).unwrap_or(0.0),
            status,
            gateway_response: record,
        })
    }
}
