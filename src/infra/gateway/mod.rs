//! Payment gateway client implementations.

pub mod flutterwave;
pub mod paystack;

pub use flutterwave::{DEFAULT_FLUTTERWAVE_API_URL, FlutterwaveClient};
pub use paystack::{DEFAULT_PAYSTACK_API_URL, PaystackClient};
