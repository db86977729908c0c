//! Application layer: services and shared state.

pub mod disbursement;
pub mod reconciliation;
pub mod reference;
pub mod service;
pub mod state;

pub use disbursement::DisbursementService;
pub use reconciliation::{ReconcileOutcome, ReconciliationEngine};
pub use reference::generate_reference;
pub use service::LedgerService;
pub use state::AppState;
