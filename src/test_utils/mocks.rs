//! Mock implementations of the domain ports for tests.
//!
//! The repository mocks reproduce the guarded-update semantics of the
//! Postgres store, including the COALESCE stamping of approved_at,
//! disbursed_at and paid_at, so reconciliation tests exercise the same
//! idempotency behavior the production store provides.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AppError, CacheInvalidator, ChargeInstruction, CheckoutSession, CreateLoanRequest,
    DatabaseError, GatewayError, GatewayVerification, Loan, LoanRepository, LoanStats, LoanStatus,
    NewRepayment, PaginatedResponse, PaymentGateway, PaymentProvider, Repayment,
    RepaymentRepository, RepaymentStatus, RepaymentTotals, TransferInstruction, TransferReceipt,
};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// In-memory loan repository
pub struct MockLoanRepository {
    loans: Mutex<HashMap<String, Loan>>,
    fail_with: Option<String>,
}

impl Default for MockLoanRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLoanRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loans: Mutex::new(HashMap::new()),
            fail_with: None,
        }
    }

    /// Repository where every call fails with a connection error
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            loans: Mutex::new(HashMap::new()),
            fail_with: Some(message.to_string()),
        }
    }

    /// Insert a loan in the given state and return a copy
    pub fn seed_loan(
        &self,
        borrower_id: &str,
        amount: f64,
        status: LoanStatus,
        disbursement_reference: Option<&str>,
    ) -> Loan {
        let mut loan = Loan::new(
            new_id(),
            borrower_id.to_string(),
            amount,
            10.0,
            6,
            None,
        );
        let now = Utc::now();
        loan.status = status;
        loan.disbursement_reference = disbursement_reference.map(str::to_owned);
        if !matches!(status, LoanStatus::Pending | LoanStatus::Rejected) {
            loan.approved_at = Some(now);
        }
        if matches!(
            status,
            LoanStatus::Disbursed | LoanStatus::Active | LoanStatus::Completed
        ) {
            loan.disbursed_at = Some(now);
        }
        self.loans
            .lock()
            .unwrap()
            .insert(loan.id.clone(), loan.clone());
        loan
    }

    /// Current stored state of a loan
    pub fn get(&self, id: &str) -> Option<Loan> {
        self.loans.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.loans.lock().unwrap().remove(id);
    }

    pub fn all(&self) -> Vec<Loan> {
        self.loans.lock().unwrap().values().cloned().collect()
    }

    fn check_failure(&self) -> Result<(), AppError> {
        match &self.fail_with {
            Some(message) => Err(AppError::Database(DatabaseError::Connection(
                message.clone(),
            ))),
            None => Ok(()),
        }
    }

    fn apply_status(
        loan: &mut Loan,
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) {
        let now = Utc::now();
        loan.status = status;
        if let Some(payload) = gateway_response {
            loan.disbursement_gateway_response = Some(payload.clone());
        }
        match status {
            LoanStatus::Approved => {
                loan.approved_at.get_or_insert(now);
            }
            LoanStatus::Disbursed => {
                loan.disbursed_at.get_or_insert(now);
                loan.due_date.get_or_insert_with(|| {
                    now.checked_add_months(chrono::Months::new(loan.term_months.max(0) as u32))
                        .unwrap_or(now)
                });
                loan.next_payment_date.get_or_insert_with(|| {
                    now.checked_add_months(chrono::Months::new(1)).unwrap_or(now)
                });
            }
            LoanStatus::Completed => {
                loan.remaining_balance = 0.0;
            }
            _ => {}
        }
        loan.updated_at = now;
    }
}

#[async_trait]
impl LoanRepository for MockLoanRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        self.check_failure()
    }

    async fn create_loan(&self, data: &CreateLoanRequest) -> Result<Loan, AppError> {
        self.check_failure()?;
        let loan = Loan::new(
            new_id(),
            data.borrower_id.clone(),
            data.amount,
            data.interest_rate,
            data.term_months,
            data.purpose.clone(),
        );
        self.loans
            .lock()
            .unwrap()
            .insert(loan.id.clone(), loan.clone());
        Ok(loan)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Loan>, AppError> {
        self.check_failure()?;
        Ok(self.get(id))
    }

    async fn find_by_disbursement_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Loan>, AppError> {
        self.check_failure()?;
        Ok(self
            .loans
            .lock()
            .unwrap()
            .values()
            .find(|loan| loan.disbursement_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_loans(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Loan>, AppError> {
        self.check_failure()?;
        let mut loans = self.all();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let start = match cursor {
            Some(cursor_id) => {
                let position = loans.iter().position(|loan| loan.id == cursor_id);
                match position {
                    Some(idx) => idx + 1,
                    None => {
                        return Err(AppError::Validation(
                            crate::domain::ValidationError::InvalidField {
                                field: "cursor".to_string(),
                                message: "Invalid cursor".to_string(),
                            },
                        ));
                    }
                }
            }
            None => 0,
        };

        let limit = limit.clamp(1, 100) as usize;
        let page: Vec<Loan> = loans.iter().skip(start).take(limit).cloned().collect();
        let has_more = loans.len() > start + page.len();
        let next_cursor = if has_more {
            page.last().map(|loan| loan.id.clone())
        } else {
            None
        };
        Ok(PaginatedResponse::new(page, next_cursor, has_more))
    }

    async fn update_status(
        &self,
        id: &str,
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Loan, AppError> {
        self.check_failure()?;
        let mut loans = self.loans.lock().unwrap();
        let loan = loans
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        Self::apply_status(loan, status, gateway_response);
        Ok(loan.clone())
    }

    async fn update_status_guarded(
        &self,
        id: &str,
        expected: &[LoanStatus],
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Option<Loan>, AppError> {
        self.check_failure()?;
        let mut loans = self.loans.lock().unwrap();
        match loans.get_mut(id) {
            Some(loan) if expected.contains(&loan.status) => {
                Self::apply_status(loan, status, gateway_response);
                Ok(Some(loan.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_disbursement_reference(&self, id: &str, reference: &str) -> Result<Loan, AppError> {
        self.check_failure()?;
        let mut loans = self.loans.lock().unwrap();
        let loan = loans
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        loan.disbursement_reference = Some(reference.to_string());
        loan.updated_at = Utc::now();
        Ok(loan.clone())
    }

    async fn record_installment_progress(
        &self,
        id: &str,
        next_payment_date: DateTime<Utc>,
        remaining_balance: f64,
    ) -> Result<(), AppError> {
        self.check_failure()?;
        let mut loans = self.loans.lock().unwrap();
        let loan = loans
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        loan.next_payment_date = Some(next_payment_date);
        loan.remaining_balance = remaining_balance;
        loan.updated_at = Utc::now();
        Ok(())
    }

    async fn loan_stats(&self) -> Result<LoanStats, AppError> {
        self.check_failure()?;
        let mut stats = LoanStats::default();
        for loan in self.all() {
            stats.total += 1;
            match loan.status {
                LoanStatus::Pending => stats.pending += 1,
                LoanStatus::Approved => stats.approved += 1,
                LoanStatus::Disbursed => stats.disbursed += 1,
                LoanStatus::Active => stats.active += 1,
                LoanStatus::Completed => stats.completed += 1,
                LoanStatus::Defaulted => stats.defaulted += 1,
                LoanStatus::Cancelled => stats.cancelled += 1,
                LoanStatus::Rejected => {}
            }
        }
        Ok(stats)
    }
}

/// In-memory repayment repository
pub struct MockRepaymentRepository {
    repayments: Mutex<HashMap<String, Repayment>>,
    fail_with: Option<String>,
}

impl Default for MockRepaymentRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRepaymentRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            repayments: Mutex::new(HashMap::new()),
            fail_with: None,
        }
    }

    /// Repository where every call fails with a connection error
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            repayments: Mutex::new(HashMap::new()),
            fail_with: Some(message.to_string()),
        }
    }

    /// Insert a repayment in the given state and return a copy
    pub fn seed_repayment(
        &self,
        loan_id: &str,
        borrower_id: &str,
        amount: f64,
        status: RepaymentStatus,
        transaction_reference: &str,
    ) -> Repayment {
        let now = Utc::now();
        let repayment = Repayment {
            id: new_id(),
            loan_id: loan_id.to_string(),
            borrower_id: borrower_id.to_string(),
            amount,
            principal_amount: amount,
            interest_amount: 0.0,
            status,
            transaction_reference: Some(transaction_reference.to_string()),
            gateway_response: None,
            due_date: now,
            paid_at: (status == RepaymentStatus::Completed).then_some(now),
            created_at: now,
            updated_at: now,
        };
        self.repayments
            .lock()
            .unwrap()
            .insert(repayment.id.clone(), repayment.clone());
        repayment
    }

    /// Current stored state of a repayment
    pub fn get(&self, id: &str) -> Option<Repayment> {
        self.repayments.lock().unwrap().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Repayment> {
        self.repayments.lock().unwrap().values().cloned().collect()
    }

    fn check_failure(&self) -> Result<(), AppError> {
        match &self.fail_with {
            Some(message) => Err(AppError::Database(DatabaseError::Connection(
                message.clone(),
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RepaymentRepository for MockRepaymentRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        self.check_failure()
    }

    async fn create_repayment(&self, data: &NewRepayment) -> Result<Repayment, AppError> {
        self.check_failure()?;
        let now = Utc::now();
        let repayment = Repayment {
            id: new_id(),
            loan_id: data.loan_id.clone(),
            borrower_id: data.borrower_id.clone(),
            amount: data.amount,
            principal_amount: data.principal_amount,
            interest_amount: data.interest_amount,
            status: RepaymentStatus::Pending,
            transaction_reference: Some(data.transaction_reference.clone()),
            gateway_response: None,
            due_date: data.due_date,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.repayments
            .lock()
            .unwrap()
            .insert(repayment.id.clone(), repayment.clone());
        Ok(repayment)
    }

    async fn find_by_transaction_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Repayment>, AppError> {
        self.check_failure()?;
        Ok(self
            .repayments
            .lock()
            .unwrap()
            .values()
            .find(|r| r.transaction_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_by_loan_id(&self, loan_id: &str) -> Result<Vec<Repayment>, AppError> {
        self.check_failure()?;
        let mut repayments: Vec<Repayment> = self
            .repayments
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.loan_id == loan_id)
            .cloned()
            .collect();
        repayments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(repayments)
    }

    async fn update_status_guarded(
        &self,
        id: &str,
        expected: &[RepaymentStatus],
        status: RepaymentStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Option<Repayment>, AppError> {
        self.check_failure()?;
        let mut repayments = self.repayments.lock().unwrap();
        match repayments.get_mut(id) {
            Some(repayment) if expected.contains(&repayment.status) => {
                let now = Utc::now();
                repayment.status = status;
                if let Some(payload) = gateway_response {
                    repayment.gateway_response = Some(payload.clone());
                }
                if status == RepaymentStatus::Completed {
                    repayment.paid_at.get_or_insert(now);
                }
                repayment.updated_at = now;
                Ok(Some(repayment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn completed_totals_for_loan(
        &self,
        loan_id: &str,
    ) -> Result<RepaymentTotals, AppError> {
        self.check_failure()?;
        let mut totals = RepaymentTotals::default();
        for repayment in self.repayments.lock().unwrap().values() {
            if repayment.loan_id == loan_id && repayment.status == RepaymentStatus::Completed {
                totals.total_amount += repayment.amount;
                totals.total_principal += repayment.principal_amount;
                totals.total_interest += repayment.interest_amount;
                totals.completed_count += 1;
            }
        }
        Ok(totals)
    }
}

/// Scripted payment gateway that records every instruction it receives
pub struct MockPaymentGateway {
    provider: PaymentProvider,
    fail: bool,
    transfers: Mutex<Vec<TransferInstruction>>,
    charges: Mutex<Vec<ChargeInstruction>>,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPaymentGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: PaymentProvider::Paystack,
            fail: false,
            transfers: Mutex::new(Vec::new()),
            charges: Mutex::new(Vec::new()),
        }
    }

    /// Gateway where every call fails with a network error
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Transfer instructions received so far
    pub fn transfers(&self) -> Vec<TransferInstruction> {
        self.transfers.lock().unwrap().clone()
    }

    /// Charge instructions received so far
    pub fn charges(&self) -> Vec<ChargeInstruction> {
        self.charges.lock().unwrap().clone()
    }

    fn check_failure(&self) -> Result<(), AppError> {
        if self.fail {
            Err(AppError::Gateway(GatewayError::Network(
                "connection refused".to_string(),
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.check_failure()
    }

    async fn initiate_payment(
        &self,
        instruction: &ChargeInstruction,
    ) -> Result<CheckoutSession, AppError> {
        self.check_failure()?;
        self.charges.lock().unwrap().push(instruction.clone());
        Ok(CheckoutSession {
            reference: instruction.reference.clone(),
            authorization_url: Some(format!(
                "https://checkout.example.com/{}",
                instruction.reference
            )),
            access_code: Some("ACCESS_TEST".to_string()),
        })
    }

    async fn initiate_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferReceipt, AppError> {
        self.check_failure()?;
        self.transfers.lock().unwrap().push(instruction.clone());
        Ok(TransferReceipt {
            success: true,
            reference: instruction.reference.clone(),
            status: "pending".to_string(),
            amount: instruction.amount,
            transfer_code: Some("TRF_TEST".to_string()),
        })
    }

    async fn verify_payment(&self, reference: &str) -> Result<GatewayVerification, AppError> {
        self.check_failure()?;
        Ok(GatewayVerification {
            success: true,
            reference: reference.to_string(),
            amount: 0.0,
            status: "success".to_string(),
            gateway_response: serde_json::json!({ "reference": reference }),
        })
    }

    async fn verify_transfer(&self, reference: &str) -> Result<GatewayVerification, AppError> {
        self.check_failure()?;
        Ok(GatewayVerification {
            success: true,
            reference: reference.to_string(),
            amount: 0.0,
            status: "success".to_string(),
            gateway_response: serde_json::json!({ "reference": reference }),
        })
    }
}

/// Cache invalidator that counts invalidations
pub struct MockCacheInvalidator {
    loan_invalidations: AtomicUsize,
    borrower_invalidations: AtomicUsize,
}

impl Default for MockCacheInvalidator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCacheInvalidator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loan_invalidations: AtomicUsize::new(0),
            borrower_invalidations: AtomicUsize::new(0),
        }
    }

    pub fn loan_invalidations(&self) -> usize {
        self.loan_invalidations.load(Ordering::SeqCst)
    }

    pub fn borrower_invalidations(&self) -> usize {
        self.borrower_invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheInvalidator for MockCacheInvalidator {
    async fn invalidate_loan(&self, _loan_id: &str) {
        self.loan_invalidations.fetch_add(1, Ordering::SeqCst);
    }

    async fn invalidate_borrower(&self, _borrower_id: &str) {
        self.borrower_invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
