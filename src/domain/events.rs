//! Webhook event classification.
//!
//! Each provider speaks its own event vocabulary and places the correlation
//! reference in a differently named payload field. Classification collapses
//! both into a provider-agnostic [`WebhookEvent`] before any business logic
//! runs, so the reconciliation engine never branches on provider.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Supported payment providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Paystack,
    Flutterwave,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paystack => "paystack",
            Self::Flutterwave => "flutterwave",
        }
    }

    /// Header carrying the webhook signature for this provider
    pub fn signature_header(&self) -> &'static str {
        match self {
            Self::Paystack => "x-paystack-signature",
            Self::Flutterwave => "verif-hash",
        }
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paystack" => Ok(Self::Paystack),
            "flutterwave" => Ok(Self::Flutterwave),
            _ => Err(format!("Invalid payment provider: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Internal event kinds the reconciliation engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Disbursement transfer confirmed
    TransferSuccess,
    /// Disbursement transfer rejected; loan becomes retryable
    TransferFailed,
    /// Disbursement transfer clawed back after the fact
    TransferReversed,
    /// Repayment charge confirmed
    PaymentSuccess,
    /// Repayment charge rejected
    PaymentFailed,
}

/// Raw webhook envelope shared by both providers:
/// `{ "event": "...", "data": { ... } }`
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A classified webhook event, ready for reconciliation
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider: PaymentProvider,
    pub kind: EventKind,
    /// Correlation reference extracted from the provider payload
    pub reference: String,
    /// The raw `data` object, persisted as the gateway response blob
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    /// Classify a raw envelope into an internal event.
    ///
    /// Returns `None` for event types outside the reconciliation table or
    /// payloads missing a correlation reference; callers log and acknowledge
    /// those without mutation.
    pub fn classify(provider: PaymentProvider, envelope: WebhookEnvelope) -> Option<Self> {
        let kind = match (provider, envelope.event.as_str()) {
            (PaymentProvider::Paystack, "transfer.success") => EventKind::TransferSuccess,
            (PaymentProvider::Paystack, "transfer.failed") => EventKind::TransferFailed,
            (PaymentProvider::Paystack, "transfer.reversed") => EventKind::TransferReversed,
            (PaymentProvider::Paystack, "charge.success") => EventKind::PaymentSuccess,
            (PaymentProvider::Paystack, "charge.failed") => EventKind::PaymentFailed,
            (PaymentProvider::Flutterwave, "transfer.completed") => EventKind::TransferSuccess,
            (PaymentProvider::Flutterwave, "transfer.failed") => EventKind::TransferFailed,
            (PaymentProvider::Flutterwave, "charge.completed") => EventKind::PaymentSuccess,
            (PaymentProvider::Flutterwave, "charge.failed") => EventKind::PaymentFailed,
            _ => return None,
        };

        let reference = extract_reference(provider, kind, &envelope.data)?;

        Some(Self {
            provider,
            kind,
            reference,
            payload: envelope.data,
        })
    }
}

/// Pull the correlation reference out of the provider payload.
/// Paystack uses `reference` everywhere; Flutterwave uses `tx_ref` for
/// charges and `reference` for transfers.
fn extract_reference(
    provider: PaymentProvider,
    kind: EventKind,
    data: &serde_json::Value,
) -> Option<String> {
    let field = match (provider, kind) {
        (PaymentProvider::Flutterwave, EventKind::PaymentSuccess | EventKind::PaymentFailed) => {
            "tx_ref"
        }
        _ => "reference",
    };

    data.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
