//! PostgreSQL persistence for loans and repayments.
//!
//! All webhook-driven status changes go through single conditional UPDATE
//! statements with the expected statuses in the WHERE clause. Concurrent
//! deliveries of the same event race on the row, exactly one wins, and the
//! losers observe a refused gate instead of overwriting each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, CreateLoanRequest, DatabaseError, Loan, LoanRepository, LoanStats, LoanStatus,
    LoanTerms, NewRepayment, PaginatedResponse, Repayment, RepaymentRepository, RepaymentStatus,
    RepaymentTotals,
};

const LOAN_COLUMNS: &str = r#"
    id, borrower_id, amount, interest_rate, term_months, purpose, status,
    monthly_payment, total_amount, total_interest, remaining_balance,
    disbursement_reference, disbursement_gateway_response,
    applied_at, approved_at, disbursed_at, due_date, next_payment_date,
    created_at, updated_at
"#;

const REPAYMENT_COLUMNS: &str = r#"
    id, loan_id, borrower_id, amount, principal_amount, interest_amount,
    status, transaction_reference, gateway_response, due_date, paid_at,
    created_at, updated_at
"#;

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL store implementing both repository ports over one pool
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store with custom pool configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new store with default pool configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Parse a database row into a Loan
    fn row_to_loan(row: &sqlx::postgres::PgRow) -> Result<Loan, AppError> {
        let status_str: String = row.get("status");

        Ok(Loan {
            id: row.get("id"),
            borrower_id: row.get("borrower_id"),
            amount: row.get("amount"),
            interest_rate: row.get("interest_rate"),
            term_months: row.get("term_months"),
            purpose: row.get("purpose"),
            status: status_str.parse().unwrap_or(LoanStatus::Pending),
            monthly_payment: row.get("monthly_payment"),
            total_amount: row.get("total_amount"),
            total_interest: row.get("total_interest"),
            remaining_balance: row.get("remaining_balance"),
            disbursement_reference: row.get("disbursement_reference"),
            disbursement_gateway_response: row.get("disbursement_gateway_response"),
            applied_at: row.get("applied_at"),
            approved_at: row.get("approved_at"),
            disbursed_at: row.get("disbursed_at"),
            due_date: row.get("due_date"),
            next_payment_date: row.get("next_payment_date"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Parse a database row into a Repayment
    fn row_to_repayment(row: &sqlx::postgres::PgRow) -> Result<Repayment, AppError> {
        let status_str: String = row.get("status");

        Ok(Repayment {
            id: row.get("id"),
            loan_id: row.get("loan_id"),
            borrower_id: row.get("borrower_id"),
            amount: row.get("amount"),
            principal_amount: row.get("principal_amount"),
            interest_amount: row.get("interest_amount"),
            status: status_str.parse().unwrap_or(RepaymentStatus::Pending),
            transaction_reference: row.get("transaction_reference"),
            gateway_response: row.get("gateway_response"),
            due_date: row.get("due_date"),
            paid_at: row.get("paid_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Shared body of the guarded and unguarded loan status updates.
    ///
    /// Timestamp columns are stamped with COALESCE so a redelivered event
    /// never moves approved_at / disbursed_at, and due dates are derived
    /// once from the disbursement instant.
    async fn write_loan_status(
        &self,
        id: &str,
        expected: Option<&[LoanStatus]>,
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Option<Loan>, AppError> {
        let now = Utc::now();
        let expected: Vec<String> = expected
            .map(|statuses| statuses.iter().map(|s| s.as_str().to_string()).collect())
            .unwrap_or_default();

        let query = format!(
            r#"
            UPDATE loans
            SET status = $1,
                disbursement_gateway_response = COALESCE($2, disbursement_gateway_response),
                approved_at = CASE WHEN $1 = 'approved'
                    THEN COALESCE(approved_at, $3) ELSE approved_at END,
                disbursed_at = CASE WHEN $1 = 'disbursed'
                    THEN COALESCE(disbursed_at, $3) ELSE disbursed_at END,
                due_date = CASE WHEN $1 = 'disbursed'
                    THEN COALESCE(due_date, $3 + make_interval(months => term_months))
                    ELSE due_date END,
                next_payment_date = CASE WHEN $1 = 'disbursed'
                    THEN COALESCE(next_payment_date, $3 + interval '1 month')
                    ELSE next_payment_date END,
                remaining_balance = CASE WHEN $1 = 'completed'
                    THEN 0 ELSE remaining_balance END,
                updated_at = $3
            WHERE id = $4 {guard}
            RETURNING {LOAN_COLUMNS}
            "#,
            guard = if expected.is_empty() {
                ""
            } else {
                "AND status = ANY($5)"
            },
        );

        let mut stmt = sqlx::query(&query)
            .bind(status.as_str())
            .bind(gateway_response)
            .bind(now)
            .bind(id);
        if !expected.is_empty() {
            stmt = stmt.bind(expected);
        }

        let row = stmt
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_loan(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LoanRepository for PostgresStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, data), fields(borrower = %data.borrower_id, amount = %data.amount))]
    async fn create_loan(&self, data: &CreateLoanRequest) -> Result<Loan, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let terms = LoanTerms::calculate(data.amount, data.interest_rate, data.term_months);

        sqlx::query(
            r#"
            INSERT INTO loans (
                id, borrower_id, amount, interest_rate, term_months, purpose,
                status, monthly_payment, total_amount, total_interest,
                remaining_balance, applied_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&id)
        .bind(&data.borrower_id)
        .bind(data.amount)
        .bind(data.interest_rate)
        .bind(data.term_months)
        .bind(&data.purpose)
        .bind(LoanStatus::Pending.as_str())
        .bind(terms.monthly_payment)
        .bind(terms.total_amount)
        .bind(terms.total_interest)
        .bind(data.amount)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(Loan::new(
            id,
            data.borrower_id.clone(),
            data.amount,
            data.interest_rate,
            data.term_months,
            data.purpose.clone(),
        ))
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> Result<Option<Loan>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_loan(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_disbursement_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Loan>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE disbursement_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_loan(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_loans(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Loan>, AppError> {
        // Clamp limit to valid range
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more items
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor_id) => {
                // Get the created_at of the cursor item for proper pagination
                let cursor_row = sqlx::query("SELECT created_at FROM loans WHERE id = $1")
                    .bind(cursor_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

                let cursor_created_at: DateTime<Utc> = match cursor_row {
                    Some(row) => row.get("created_at"),
                    None => {
                        return Err(AppError::Validation(
                            crate::domain::ValidationError::InvalidField {
                                field: "cursor".to_string(),
                                message: "Invalid cursor".to_string(),
                            },
                        ));
                    }
                };

                sqlx::query(&format!(
                    r#"
                    SELECT {LOAN_COLUMNS}
                    FROM loans
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#
                ))
                .bind(cursor_created_at)
                .bind(cursor_id)
                .bind(fetch_limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
            None => sqlx::query(&format!(
                r#"
                SELECT {LOAN_COLUMNS}
                FROM loans
                ORDER BY created_at DESC, id DESC
                LIMIT $1
                "#
            ))
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?,
        };

        let has_more = rows.len() > limit as usize;
        let loans: Vec<Loan> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_loan)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if has_more {
            loans.last().map(|loan| loan.id.clone())
        } else {
            None
        };

        Ok(PaginatedResponse::new(loans, next_cursor, has_more))
    }

    #[instrument(skip(self, gateway_response))]
    async fn update_status(
        &self,
        id: &str,
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Loan, AppError> {
        self.write_loan_status(id, None, status, gateway_response)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))
    }

    #[instrument(skip(self, gateway_response))]
    async fn update_status_guarded(
        &self,
        id: &str,
        expected: &[LoanStatus],
        status: LoanStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Option<Loan>, AppError> {
        self.write_loan_status(id, Some(expected), status, gateway_response)
            .await
    }

    #[instrument(skip(self))]
    async fn set_disbursement_reference(&self, id: &str, reference: &str) -> Result<Loan, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE loans
            SET disbursement_reference = $1, updated_at = $2
            WHERE id = $3
            RETURNING {LOAN_COLUMNS}
            "#
        ))
        .bind(reference)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        match row {
            Some(row) => Self::row_to_loan(&row),
            None => Err(AppError::Database(DatabaseError::NotFound(id.to_string()))),
        }
    }

    #[instrument(skip(self))]
    async fn record_installment_progress(
        &self,
        id: &str,
        next_payment_date: DateTime<Utc>,
        remaining_balance: f64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE loans
            SET next_payment_date = $1,
                remaining_balance = $2,
                updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(next_payment_date)
        .bind(remaining_balance)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn loan_stats(&self) -> Result<LoanStats, AppError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM loans GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        let mut stats = LoanStats::default();
        for row in &rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            stats.total += count;
            match status.parse::<LoanStatus>() {
                Ok(LoanStatus::Pending) => stats.pending = count,
                Ok(LoanStatus::Approved) => stats.approved = count,
                Ok(LoanStatus::Disbursed) => stats.disbursed = count,
                Ok(LoanStatus::Active) => stats.active = count,
                Ok(LoanStatus::Completed) => stats.completed = count,
                Ok(LoanStatus::Defaulted) => stats.defaulted = count,
                Ok(LoanStatus::Cancelled) => stats.cancelled = count,
                _ => {}
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl RepaymentRepository for PostgresStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, data), fields(loan = %data.loan_id, amount = %data.amount))]
    async fn create_repayment(&self, data: &NewRepayment) -> Result<Repayment, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO repayments (
                id, loan_id, borrower_id, amount, principal_amount,
                interest_amount, status, transaction_reference, due_date,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&id)
        .bind(&data.loan_id)
        .bind(&data.borrower_id)
        .bind(data.amount)
        .bind(data.principal_amount)
        .bind(data.interest_amount)
        .bind(RepaymentStatus::Pending.as_str())
        .bind(&data.transaction_reference)
        .bind(data.due_date)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(Repayment {
            id,
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
        })
    }

    #[instrument(skip(self))]
    async fn find_by_transaction_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Repayment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {REPAYMENT_COLUMNS} FROM repayments WHERE transaction_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_repayment(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_loan_id(&self, loan_id: &str) -> Result<Vec<Repayment>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REPAYMENT_COLUMNS}
            FROM repayments
            WHERE loan_id = $1
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        rows.iter().map(Self::row_to_repayment).collect()
    }

    #[instrument(skip(self, gateway_response))]
    async fn update_status_guarded(
        &self,
        id: &str,
        expected: &[RepaymentStatus],
        status: RepaymentStatus,
        gateway_response: Option<&serde_json::Value>,
    ) -> Result<Option<Repayment>, AppError> {
        let now = Utc::now();
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();

        let row = sqlx::query(&format!(
            r#"
            UPDATE repayments
            SET status = $1,
                gateway_response = COALESCE($2, gateway_response),
                paid_at = CASE WHEN $1 = 'completed'
                    THEN COALESCE(paid_at, $3) ELSE paid_at END,
                updated_at = $3
            WHERE id = $4 AND status = ANY($5)
            RETURNING {REPAYMENT_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(gateway_response)
        .bind(now)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_repayment(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn completed_totals_for_loan(
        &self,
        loan_id: &str,
    ) -> Result<RepaymentTotals, AppError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0)::float8 AS total_amount,
                   COALESCE(SUM(principal_amount), 0)::float8 AS total_principal,
                   COALESCE(SUM(interest_amount), 0)::float8 AS total_interest,
                   COUNT(*) AS completed_count
            FROM repayments
            WHERE loan_id = $1 AND status = 'completed'
            "#,
        )
        .bind(loan_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(RepaymentTotals {
            total_amount: row.get("total_amount"),
            total_principal: row.get("total_principal"),
            total_interest: row.get("total_interest"),
            completed_count: row.get("completed_count"),
        })
    }
}
