//! Paystack payment gateway client.
//!
//! Paystack denominates amounts in kobo (NGN x 100) and requires a transfer
//! recipient to be registered before an outbound transfer. Responses share
//! the envelope `{ "status": bool, "message": ..., "data": { ... } }`.

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

/// Default Paystack API base URL
pub const DEFAULT_PAYSTACK_API_URL: &str = "https://api.paystack.co";

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Paystack API client
#[derive(Debug, Clone)]
pub struct PaystackClient {
    http_client: Client,
    secret_key: SecretString,
    base_url: String,
}

impl PaystackClient {
    /// Create a new Paystack client.
    ///
    /// # Arguments
    /// * `secret_key` - Paystack secret key used as a bearer token.
    /// * `base_url` - Optional custom API base URL. Defaults to production.
    pub fn new(secret_key: SecretString, base_url: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            secret_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_PAYSTACK_API_URL.to_string()),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key.expose_secret())
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiEnvelope, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling Paystack API");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Paystack API request failed");
                AppError::Gateway(GatewayError::Network(e.to_string()))
            })?;

        Self::decode(response).await
    }

    async fn get(&self, path: &str) -> Result<ApiEnvelope, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling Paystack API");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Paystack API request failed");
                AppError::Gateway(GatewayError::Network(e.to_string()))
            })?;

        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<ApiEnvelope, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Paystack API returned error");
            return Err(AppError::Gateway(GatewayError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        let envelope: ApiEnvelope = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Paystack response");
            AppError::Gateway(GatewayError::ParseError(e.to_string()))
        })?;

        if !envelope.status {
            return Err(AppError::Gateway(GatewayError::ApiError {
                status_code: 200,
                message: envelope.message,
            }));
        }

        Ok(envelope)
    }

    /// Register a transfer recipient and return its recipient code
    async fn create_recipient(&self, instruction: &TransferInstruction) -> Result<String, AppError> {
        let envelope = self
            .post(
                "/transferrecipient",
                json!({
                    "type": "nuban",
                    "name": instruction.account_name,
                    "account_number": instruction.account_number,
                    "bank_code": instruction.bank_code,
                    "currency": instruction.currency,
                }),
            )
            .await?;

        envelope
            .data
            .get("recipient_code")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                AppError::Gateway(GatewayError::ParseError(
                    "Missing recipient_code in Paystack response".to_string(),
                ))
            })
    }

    fn to_kobo(amount: f64) -> i64 {
        (amount * 100.0).round() as i64
    }

    fn from_kobo(value: &serde_json::Value) -> f64 {
        value.as_f64().unwrap_or(0.0) / 100.0
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paystack
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.get("/bank?currency=NGN&perPage=1").await?;
        Ok(())
    }

    #[instrument(skip(self, instruction), fields(reference = %instruction.reference, amount = %instruction.amount))]
    async fn initiate_payment(
        &self,
        instruction: &ChargeInstruction,
    ) -> Result<CheckoutSession, AppError> {
        let envelope = self
            .post(
                "/transaction/initialize",
                json!({
                    "email": instruction.email,
                    "amount": Self::to_kobo(instruction.amount),
                    "reference": instruction.reference,
                    "callback_url": instruction.callback_url,
                }),
            )
            .await?;

        Ok(CheckoutSession {
            reference: instruction.reference.clone(),
            authorization_url: envelope
                .data
                .get("authorization_url")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            access_code: envelope
                .data
                .get("access_code")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        })
    }

    #[instrument(skip(self, instruction), fields(reference = %instruction.reference, amount = %instruction.amount))]
    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferReceipt, AppError> {
        let recipient_code = self.create_recipient(instruction).await?;

        let envelope = self
            .post(
                "/transfer",
                json!({
                    "source": "balance",
                    "amount": Self::to_kobo(instruction.amount),
                    "recipient": recipient_code,
                    "reference": instruction.reference,
                    "reason": instruction.narration,
                }),
            )
            .await?;

        let status = envelope
            .data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("pending")
            .to_string();

        Ok(TransferReceipt {
            success: true,
            reference: instruction.reference.clone(),
            status,
            amount: instruction.amount,
            transfer_code: envelope
                .data
                .get("transfer_code")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        })
    }

    #[instrument(skip(self))]
    async fn verify_payment(&self, reference: &str) -> Result<GatewayVerification, AppError> {
        let envelope = self
            .get(&format!("/transaction/verify/{reference}"))
            .await?;

        let status = envelope
            .data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(GatewayVerification {
            success: status == "success",
            reference: reference.to_string(),
            amount: envelope
                .data
                .get("amount")
                .map(Self::from_kobo)
                .unwrap_or(0.0),
            status,
            gateway_response: envelope.data,
        })
    }

    #[instrument(skip(self))]
    async fn verify_transfer(&self, reference: &str) -> Result<GatewayVerification, AppError> {
        let envelope = self.get(&format!("/transfer/verify/{reference}")).await?;

        let status = envelope
            .data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(GatewayVerification {
            success: status == "success",
            reference: reference.to_string(),
            amount: envelope
                .data
                .get("amount")
                .map(Self::from_kobo)
                .unwrap_or(0.0),
            status,
            gateway_response: envelope.data,
        })
    }
}
