//! Webhook signature verification.
//!
//! Both providers sign the RAW request body; verification must run on the
//! exact bytes received, before any JSON parsing. Paystack signs with
//! HMAC-SHA512 in `x-paystack-signature`, Flutterwave with HMAC-SHA256 in
//! `verif-hash`, both hex-encoded.
//!
//! When no secret is configured for a provider the verifier can either
//! accept unsigned deliveries (development mode, loudly logged) or reject
//! everything. Production deployments should configure both secrets and
//! leave `allow_unsigned` off.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Sha256, Sha512};
use tracing::warn;

use crate::domain::{AppError, PaymentProvider};

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

/// Verifies provider signatures on raw webhook bodies
pub struct WebhookVerifier {
    paystack_secret: Option<SecretString>,
    flutterwave_secret: Option<SecretString>,
    allow_unsigned: bool,
}

impl WebhookVerifier {
    #[must_use]
    pub fn new(
        paystack_secret: Option<SecretString>,
        flutterwave_secret: Option<SecretString>,
        allow_unsigned: bool,
    ) -> Self {
        Self {
            paystack_secret,
            flutterwave_secret,
            allow_unsigned,
        }
    }

    /// Verify the signature header against the raw body bytes.
    #[allow(clippy::missing_errors_doc)]
    pub fn verify(
        &self,
        provider: PaymentProvider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), AppError> {
        let secret = match provider {
            PaymentProvider::Paystack => self.paystack_secret.as_ref(),
            PaymentProvider::Flutterwave => self.flutterwave_secret.as_ref(),
        };

        let Some(secret) = secret else {
            if self.allow_unsigned {
                warn!(
                    provider = %provider,
                    "No webhook secret configured; accepting unsigned delivery"
                );
                return Ok(());
            }
            return Err(AppError::Authentication(format!(
                "No webhook secret configured for {provider}"
            )));
        };

        let signature = signature.ok_or_else(|| {
            AppError::Authentication(format!(
                "Missing {} header",
                provider.signature_header()
            ))
        })?;

        let expected = hex::decode(signature)
            .map_err(|_| AppError::Authentication("Malformed signature".to_string()))?;

        let valid = match provider {
            PaymentProvider::Paystack => {
                let mut mac = HmacSha512::new_from_slice(secret.expose_secret().as_bytes())
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                mac.update(body);
                mac.verify_slice(&expected).is_ok()
            }
            PaymentProvider::Flutterwave => {
                let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                mac.update(body);
                mac.verify_slice(&expected).is_ok()
            }
        };

        if valid {
            Ok(())
        } else {
            Err(AppError::Authentication("Invalid signature".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_sha512(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn sign_sha256(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verifier(paystack: Option<&str>, flutterwave: Option<&str>, allow: bool) -> WebhookVerifier {
        WebhookVerifier::new(
            paystack.map(|s| SecretString::from(s.to_string())),
            flutterwave.map(|s| SecretString::from(s.to_string())),
            allow,
        )
    }

    #[test]
    fn test_paystack_valid_signature() {
        let body = br#"{"event":"charge.success","data":{"reference":"LN_1"}}"#;
        let signature = sign_sha512("sk_test_secret", body);
        let v = verifier(Some("sk_test_secret"), None, false);
        assert!(v
            .verify(PaymentProvider::Paystack, Some(&signature), body)
            .is_ok());
    }

    #[test]
    fn test_paystack_tampered_body_rejected() {
        let body = br#"{"event":"charge.success","data":{"reference":"LN_1"}}"#;
        let signature = sign_sha512("sk_test_secret", body);
        let tampered = br#"{"event":"charge.success","data":{"reference":"LN_2"}}"#;
        let v = verifier(Some("sk_test_secret"), None, false);
        assert!(v
            .verify(PaymentProvider::Paystack, Some(&signature), tampered)
            .is_err());
    }

    #[test]
    fn test_flutterwave_valid_signature() {
        let body = br#"{"event":"charge.completed","data":{"tx_ref":"LN_1"}}"#;
        let signature = sign_sha256("flw_secret", body);
        let v = verifier(None, Some("flw_secret"), false);
        assert!(v
            .verify(PaymentProvider::Flutterwave, Some(&signature), body)
            .is_ok());
    }

    #[test]
    fn test_missing_header_rejected_when_secret_configured() {
        let v = verifier(Some("sk_test_secret"), None, false);
        assert!(v.verify(PaymentProvider::Paystack, None, b"{}").is_err());
    }

    #[test]
    fn test_malformed_hex_rejected() {
        let v = verifier(Some("sk_test_secret"), None, false);
        assert!(v
            .verify(PaymentProvider::Paystack, Some("not-hex!"), b"{}")
            .is_err());
    }

    #[test]
    fn test_unconfigured_secret_fails_closed_by_default() {
        let v = verifier(None, None, false);
        assert!(v.verify(PaymentProvider::Paystack, None, b"{}").is_err());
    }

    #[test]
    fn test_unconfigured_secret_passes_when_unsigned_allowed() {
        let v = verifier(None, None, true);
        assert!(v.verify(PaymentProvider::Paystack, None, b"{}").is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let signature = sign_sha512("wrong_secret", body);
        let v = verifier(Some("sk_test_secret"), None, false);
        assert!(v
            .verify(PaymentProvider::Paystack, Some(&signature), body)
            .is_err());
    }
}
