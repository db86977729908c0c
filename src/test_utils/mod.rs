//! Test doubles for the domain ports. Available to integration tests
//! through the `test-utils` feature.

pub mod mocks;

pub use mocks::{
    MockCacheInvalidator, MockLoanRepository, MockPaymentGateway, MockRepaymentRepository,
};
