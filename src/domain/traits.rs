//! Domain traits defining contracts for persistence and caching.

use std::time::Duration;

use async_trait::async_trait;

use super::cpf::Cpf;
use super::error::AppError;
use super::money::Money;
use super::types::{Account, AccountBalance, Transfer};

/// Account persistence outside of a unit of work
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a new account. A CPF collision yields `AccountAlreadyExists`.
    async fn create_account(&self, account: &Account) -> Result<(), AppError>;

    async fn exists_by_cpf(&self, cpf: &Cpf) -> Result<bool, AppError>;

    /// Resolve an account by tax id, `AccountNotFound` when absent
    async fn get_by_cpf(&self, cpf: &Cpf) -> Result<Account, AppError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError>;

    /// Read a committed balance, `AccountNotFound` when absent
    async fn get_balance(&self, id: &str) -> Result<AccountBalance, AppError>;
}

/// Read side of the transfer store
#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Transfers where the account is origin or destination, newest first
    async fn list_transfers(&self, account_id: &str) -> Result<Vec<Transfer>, AppError>;
}

/// Opens atomic, isolated units of work against the ledger.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Begin a transaction at read-committed isolation or stronger.
    async fn begin(&self) -> Result<Box<dyn LedgerScope>, AppError>;
}

/// Handle to one open transaction.
///
/// Every call made through a scope runs inside the same transaction. The
/// scope must be finished with [`LedgerScope::commit`] or
/// [`LedgerScope::rollback`]; dropping it unfinished discards its writes.
#[async_trait]
pub trait LedgerScope: Send {
    /// Lock the given account rows for the rest of the transaction.
    ///
    /// Implementations lock in ascending id order so that two transfers
    /// touching the same pair of accounts cannot deadlock. Missing ids are
    /// skipped; the subsequent balance read reports them.
    async fn lock_accounts(&mut self, ids: &[&str]) -> Result<(), AppError>;

    async fn get_balance(&mut self, id: &str) -> Result<AccountBalance, AppError>;

    /// Overwrite a balance unconditionally, `AccountNotFound` when absent
    async fn update_balance(&mut self, id: &str, balance: Money) -> Result<(), AppError>;

    async fn create_transfer(&mut self, transfer: &Transfer) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// Key-value store backing the idempotency cache.
///
/// A key is either absent, claimed (a request holds it but has not stored a
/// response yet) or ready (a response is stored). Expired keys of either
/// kind behave as absent.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Stored response bytes. Claimed-but-pending keys return `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;

    /// Atomically take ownership of an absent key for `ttl`.
    ///
    /// Returns `false` when another request holds the key or a response is
    /// already stored.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, AppError>;

    /// Store a response, replacing a pending claim.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), AppError>;

    /// Push back the expiry of a pending claim.
    ///
    /// Returns `false` when the key no longer holds a live claim.
    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, AppError>;

    /// Drop a pending claim. Stored responses are left in place.
    async fn release(&self, key: &str) -> Result<(), AppError>;

    /// Delete a stored response, but only while it still equals `value`.
    ///
    /// Returns `false` when the entry changed or is gone.
    async fn discard(&self, key: &str, value: &[u8]) -> Result<bool, AppError>;

    /// Delete expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}
