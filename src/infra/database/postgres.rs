//! PostgreSQL ledger: accounts, transfers and transactional unit of work.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{
    Account, AccountBalance, AccountRepository, AppError, Cpf, DatabaseError, LedgerScope, Money,
    Transfer, TransferRepository, UnitOfWork,
};

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

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
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

    /// Get the underlying connection pool
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_account(row: &PgRow) -> Account {
        let cpf: String = row.get("cpf");
        Account {
            id: row.get("id"),
            name: row.get("name"),
            cpf: Cpf::new(&cpf),
            secret_hash: row.get("secret_hash"),
            balance: Money::from_minor(row.get("balance")),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_transfer(row: &PgRow) -> Transfer {
        Transfer {
            id: row.get("id"),
            account_origin_id: row.get("account_origin_id"),
            account_destination_id: row.get("account_destination_id"),
            amount: Money::from_minor(row.get("amount")),
            created_at: row.get("created_at"),
        }
    }
}

fn row_to_balance(row: &PgRow) -> AccountBalance {
    AccountBalance {
        id: row.get("id"),
        balance: Money::from_minor(row.get("balance")),
    }
}

#[async_trait]
impl AccountRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, account), fields(account_id = %account.id))]
    async fn create_account(&self, account: &Account) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, name, cpf, secret_hash, balance, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&account.id)
        .bind(&account.name)
        .bind(account.cpf.digits())
        .bind(&account.secret_hash)
        .bind(account.balance.minor_units())
        .bind(account.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match DatabaseError::from(e) {
                DatabaseError::Duplicate(_) => Err(AppError::AccountAlreadyExists),
                other => Err(AppError::Database(other)),
            },
        }
    }

    #[instrument(skip_all)]
    async fn exists_by_cpf(&self, cpf: &Cpf) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM accounts WHERE cpf = $1) AS found")
            .bind(cpf.digits())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(row.get("found"))
    }

    #[instrument(skip_all)]
    async fn get_by_cpf(&self, cpf: &Cpf) -> Result<Account, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, cpf, secret_hash, balance, created_at
            FROM accounts
            WHERE cpf = $1
            "#,
        )
        .bind(cpf.digits())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        row.as_ref()
            .map(Self::row_to_account)
            .ok_or(AppError::AccountNotFound)
    }

    #[instrument(skip(self))]
    async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, cpf, secret_hash, balance, created_at
            FROM accounts
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(rows.iter().map(Self::row_to_account).collect())
    }

    #[instrument(skip(self))]
    async fn get_balance(&self, id: &str) -> Result<AccountBalance, AppError> {
        let row = sqlx::query("SELECT id, balance FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        row.as_ref()
            .map(row_to_balance)
            .ok_or(AppError::AccountNotFound)
    }
}

#[async_trait]
impl TransferRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn list_transfers(&self, account_id: &str) -> Result<Vec<Transfer>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_origin_id, account_destination_id, amount, created_at
            FROM transfers
            WHERE account_origin_id = $1 OR account_destination_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(rows.iter().map(Self::row_to_transfer).collect())
    }
}

#[async_trait]
impl UnitOfWork for PostgresClient {
    #[instrument(skip(self))]
    async fn begin(&self) -> Result<Box<dyn LedgerScope>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))?;

        Ok(Box::new(PgLedgerScope { tx }))
    }
}

/// One open PostgreSQL transaction.
///
/// Dropping it without commit lets sqlx roll the transaction back when the
/// connection returns to the pool.
struct PgLedgerScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerScope for PgLedgerScope {
    async fn lock_accounts(&mut self, ids: &[&str]) -> Result<(), AppError> {
        let ids: Vec<String> = ids.iter().map(|id| (*id).to_string()).collect();
        // ORDER BY makes Postgres take the row locks in id order.
        let locked = sqlx::query("SELECT id FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        debug!(requested = ids.len(), locked = locked.len(), "Locked account rows");
        Ok(())
    }

    async fn get_balance(&mut self, id: &str) -> Result<AccountBalance, AppError> {
        let row = sqlx::query("SELECT id, balance FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        row.as_ref()
            .map(row_to_balance)
            .ok_or(AppError::AccountNotFound)
    }

    async fn update_balance(&mut self, id: &str, balance: Money) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE accounts SET balance = $2 WHERE id = $1")
            .bind(id)
            .bind(balance.minor_units())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::AccountNotFound);
        }
        Ok(())
    }

    async fn create_transfer(&mut self, transfer: &Transfer) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO transfers (id, account_origin_id, account_destination_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&transfer.id)
        .bind(&transfer.account_origin_id)
        .bind(&transfer.account_destination_id)
        .bind(transfer.amount.minor_units())
        .bind(transfer.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Transaction(e.to_string())))
    }
}
