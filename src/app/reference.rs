//! Correlation reference generation.
//!
//! Every gateway-facing operation is tagged with a reference generated here
//! and persisted before the gateway call. Webhooks join back on this value,
//! so it must be unique per operation and never reused across retries.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Build a `<PREFIX>_<millis>_<RAND6>` correlation reference
#[must_use]
pub fn generate_reference(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("{prefix}_{millis}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_shape() {
        let reference = generate_reference("DISB");
        let parts: Vec<&str> = reference.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "DISB");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_references_are_unique() {
        let a = generate_reference("LN");
        let b = generate_reference("LN");
        assert_ne!(a, b);
    }
}
