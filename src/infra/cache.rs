//! Cache invalidation implementations.
//!
//! The ledger reads straight from PostgreSQL; the invalidator port exists so
//! a read-side cache can be slotted in without touching the reconciliation
//! path. The default implementation only leaves a trace.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::CacheInvalidator;

/// Invalidator for deployments without a read-side cache
#[derive(Debug, Clone, Default)]
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn invalidate_loan(&self, loan_id: &str) {
        debug!(loan_id = %loan_id, "Cache invalidation (noop)");
    }

    async fn invalidate_borrower(&self, borrower_id: &str) {
        debug!(borrower_id = %borrower_id, "Cache invalidation (noop)");
    }
}
