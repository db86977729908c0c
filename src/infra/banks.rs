//! Static directory of Nigerian banks.
//!
//! Disbursements settle over NUBAN accounts, so destination validation is
//! local: a 10-digit account number plus a bank code drawn from this table.
//! Callers may pass a bank name instead of a code; resolution is
//! case-insensitive on the full name.

/// CBN-issued bank codes for the banks the gateways can settle to
const BANKS: &[(&str, &str)] = &[
    ("044", "Access Bank"),
    ("063", "Access Bank (Diamond)"),
    ("035A", "ALAT by WEMA"),
    ("023", "Citibank Nigeria"),
    ("050", "Ecobank Nigeria"),
    ("070", "Fidelity Bank"),
    ("011", "First Bank of Nigeria"),
    ("214", "First City Monument Bank"),
    ("058", "Guaranty Trust Bank"),
    ("030", "Heritage Bank"),
    ("301", "Jaiz Bank"),
    ("082", "Keystone Bank"),
    ("50211", "Kuda Bank"),
    ("526", "Parallex Bank"),
    ("076", "Polaris Bank"),
    ("101", "Providus Bank"),
    ("221", "Stanbic IBTC Bank"),
    ("068", "Standard Chartered Bank"),
    ("232", "Sterling Bank"),
    ("100", "Suntrust Bank"),
    ("032", "Union Bank of Nigeria"),
    ("033", "United Bank For Africa"),
    ("215", "Unity Bank"),
    ("035", "Wema Bank"),
    ("057", "Zenith Bank"),
];

/// Look up the bank code for a bank name (case-insensitive)
#[must_use]
pub fn resolve_bank_code(bank_name: &str) -> Option<&'static str> {
    let needle = bank_name.trim().to_lowercase();
    BANKS
        .iter()
        .find(|(_, name)| name.to_lowercase() == needle)
        .map(|(code, _)| *code)
}

/// Whether the code belongs to a known bank
#[must_use]
pub fn is_valid_bank_code(code: &str) -> bool {
    BANKS.iter().any(|(c, _)| *c == code)
}

/// Look up the display name for a bank code
#[must_use]
pub fn bank_name_for_code(code: &str) -> Option<&'static str> {
    BANKS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// NUBAN account numbers are exactly 10 digits
#[must_use]
pub fn is_valid_account_number(account_number: &str) -> bool {
    account_number.len() == 10 && account_number.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_bank_code_case_insensitive() {
        assert_eq!(resolve_bank_code("Guaranty Trust Bank"), Some("058"));
        assert_eq!(resolve_bank_code("guaranty trust bank"), Some("058"));
        assert_eq!(resolve_bank_code("  Zenith Bank "), Some("057"));
        assert_eq!(resolve_bank_code("Bank of Nowhere"), None);
    }

    #[test]
    fn test_is_valid_bank_code() {
        assert!(is_valid_bank_code("058"));
        assert!(is_valid_bank_code("50211"));
        assert!(!is_valid_bank_code("999"));
    }

    #[test]
    fn test_bank_name_for_code() {
        assert_eq!(bank_name_for_code("033"), Some("United Bank For Africa"));
        assert_eq!(bank_name_for_code("000"), None);
    }

    #[test]
    fn test_account_number_validation() {
        assert!(is_valid_account_number("0123456789"));
        assert!(!is_valid_account_number("012345678"));
        assert!(!is_valid_account_number("01234567890"));
        assert!(!is_valid_account_number("01234567x9"));
        assert!(!is_valid_account_number(""));
    }
}
