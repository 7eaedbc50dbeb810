//! Mock implementations for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::domain::{
    Account, AccountBalance, AccountRepository, AppError, Cpf, DatabaseError, IdempotencyStore,
    LedgerScope, Money, Transfer, TransferRepository, UnitOfWork,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn check(&self) -> Result<(), AppError> {
        if self.should_fail {
            let msg = self
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

/// Faults injected into transactions opened by [`MockLedger`]
#[derive(Debug, Clone, Default)]
pub struct LedgerFaults {
    pub fail_begin: bool,
    /// Fail `update_balance` for this account id
    pub fail_update_for: Option<String>,
    pub fail_create_transfer: bool,
    pub panic_on_create_transfer: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    /// Sleep before every balance read inside a transaction
    pub delay: Option<Duration>,
}

struct LedgerInner {
    accounts: Mutex<HashMap<String, Account>>,
    transfers: Mutex<Vec<Transfer>>,
    tx_lock: Arc<tokio::sync::Mutex<()>>,
    faults: Mutex<LedgerFaults>,
    config: Mutex<MockConfig>,
    locked: Mutex<Vec<Vec<String>>>,
    begun: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    next_cpf: AtomicUsize,
    is_healthy: AtomicBool,
}

/// In-memory accounts, transfers and unit of work.
///
/// Transactions are serialized through one async mutex, which stands in for
/// the row locks of a real database. Writes are staged per transaction and
/// only become visible on commit.
#[derive(Clone)]
pub struct MockLedger {
    inner: Arc<LedgerInner>,
}

impl MockLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(LedgerFaults::default())
    }

    #[must_use]
    pub fn with_faults(faults: LedgerFaults) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                accounts: Mutex::new(HashMap::new()),
                transfers: Mutex::new(Vec::new()),
                tx_lock: Arc::new(tokio::sync::Mutex::new(())),
                faults: Mutex::new(faults),
                config: Mutex::new(MockConfig::success()),
                locked: Mutex::new(Vec::new()),
                begun: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
                next_cpf: AtomicUsize::new(1),
                is_healthy: AtomicBool::new(true),
            }),
        }
    }

    /// Ledger whose non-transactional repository calls all fail
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        let ledger = Self::new();
        *ledger.inner.config.lock().unwrap() = MockConfig::failure(message);
        ledger
    }

    pub fn set_faults(&self, faults: LedgerFaults) {
        *self.inner.faults.lock().unwrap() = faults;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Insert an account directly and return its id
    pub fn seed_account(&self, name: &str, balance: Money) -> String {
        let n = self.inner.next_cpf.fetch_add(1, Ordering::Relaxed);
        let cpf = Cpf::new(&format!("{n:011}"));
        self.seed_account_with(name, cpf, String::new(), balance)
    }

    pub fn seed_account_with(
        &self,
        name: &str,
        cpf: Cpf,
        secret_hash: String,
        balance: Money,
    ) -> String {
        let account = Account::new(name, cpf, secret_hash, balance);
        let id = account.id.clone();
        self.inner
            .accounts
            .lock()
            .unwrap()
            .insert(id.clone(), account);
        id
    }

    #[must_use]
    pub fn balance(&self, id: &str) -> Option<Money> {
        self.inner
            .accounts
            .lock()
            .unwrap()
            .get(id)
            .map(|a| a.balance)
    }

    /// Sum of all committed balances
    #[must_use]
    pub fn total_balance(&self) -> Money {
        self.inner
            .accounts
            .lock()
            .unwrap()
            .values()
            .fold(Money::ZERO, |acc, a| acc + a.balance)
    }

    #[must_use]
    pub fn transfers(&self) -> Vec<Transfer> {
        self.inner.transfers.lock().unwrap().clone()
    }

    /// Ids passed to each `lock_accounts` call, in call order
    #[must_use]
    pub fn locked_ids(&self) -> Vec<Vec<String>> {
        self.inner.locked.lock().unwrap().clone()
    }

    #[must_use]
    pub fn transactions_started(&self) -> usize {
        self.inner.begun.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    fn faults(&self) -> LedgerFaults {
        self.inner.faults.lock().unwrap().clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        self.inner.config.lock().unwrap().check()
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for MockLedger {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.inner.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn create_account(&self, account: &Account) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut accounts = self.inner.accounts.lock().unwrap();
        if accounts.values().any(|a| a.cpf == account.cpf) {
            return Err(AppError::AccountAlreadyExists);
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn exists_by_cpf(&self, cpf: &Cpf) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let accounts = self.inner.accounts.lock().unwrap();
        Ok(accounts.values().any(|a| &a.cpf == cpf))
    }

    async fn get_by_cpf(&self, cpf: &Cpf) -> Result<Account, AppError> {
        self.check_should_fail()?;
        let accounts = self.inner.accounts.lock().unwrap();
        accounts
            .values()
            .find(|a| &a.cpf == cpf)
            .cloned()
            .ok_or(AppError::AccountNotFound)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        self.check_should_fail()?;
        let accounts = self.inner.accounts.lock().unwrap();
        let mut list: Vec<Account> = accounts.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn get_balance(&self, id: &str) -> Result<AccountBalance, AppError> {
        self.check_should_fail()?;
        self.balance(id)
            .map(|balance| AccountBalance {
                id: id.to_string(),
                balance,
            })
            .ok_or(AppError::AccountNotFound)
    }
}

#[async_trait]
impl TransferRepository for MockLedger {
    async fn list_transfers(&self, account_id: &str) -> Result<Vec<Transfer>, AppError> {
        self.check_should_fail()?;
        let transfers = self.inner.transfers.lock().unwrap();
        let mut list: Vec<Transfer> = transfers
            .iter()
            .rev()
            .filter(|t| t.account_origin_id == account_id || t.account_destination_id == account_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}

#[async_trait]
impl UnitOfWork for MockLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerScope>, AppError> {
        if self.faults().fail_begin {
            return Err(AppError::Database(DatabaseError::Connection(
                "Mock begin failure".to_string(),
            )));
        }
        let guard = Arc::clone(&self.inner.tx_lock).lock_owned().await;
        self.inner.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockScope {
            ledger: self.clone(),
            _guard: guard,
            staged_balances: HashMap::new(),
            staged_transfers: Vec::new(),
        }))
    }
}

struct MockScope {
    ledger: MockLedger,
    _guard: OwnedMutexGuard<()>,
    staged_balances: HashMap<String, Money>,
    staged_transfers: Vec<Transfer>,
}

#[async_trait]
impl LedgerScope for MockScope {
    async fn lock_accounts(&mut self, ids: &[&str]) -> Result<(), AppError> {
        let ids = ids.iter().map(|id| (*id).to_string()).collect();
        self.ledger.inner.locked.lock().unwrap().push(ids);
        Ok(())
    }

    async fn get_balance(&mut self, id: &str) -> Result<AccountBalance, AppError> {
        if let Some(delay) = self.ledger.faults().delay {
            tokio::time::sleep(delay).await;
        }
        let balance = match self.staged_balances.get(id) {
            Some(balance) => Some(*balance),
            None => self.ledger.balance(id),
        };
        balance
            .map(|balance| AccountBalance {
                id: id.to_string(),
                balance,
            })
            .ok_or(AppError::AccountNotFound)
    }

    async fn update_balance(&mut self, id: &str, balance: Money) -> Result<(), AppError> {
        if self.ledger.faults().fail_update_for.as_deref() == Some(id) {
            return Err(AppError::Database(DatabaseError::Query(
                "Mock update failure".to_string(),
            )));
        }
        if self.ledger.balance(id).is_none() {
            return Err(AppError::AccountNotFound);
        }
        self.staged_balances.insert(id.to_string(), balance);
        Ok(())
    }

    async fn create_transfer(&mut self, transfer: &Transfer) -> Result<(), AppError> {
        let faults = self.ledger.faults();
        if faults.panic_on_create_transfer {
            panic!("Mock panic while persisting transfer");
        }
        if faults.fail_create_transfer {
            return Err(AppError::Database(DatabaseError::Query(
                "Mock insert failure".to_string(),
            )));
        }
        self.staged_transfers.push(transfer.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        if self.ledger.faults().fail_commit {
            return Err(AppError::Database(DatabaseError::Transaction(
                "Mock commit failure".to_string(),
            )));
        }
        let MockScope {
            ledger,
            staged_balances,
            staged_transfers,
            ..
        } = *self;
        {
            let mut accounts = ledger.inner.accounts.lock().unwrap();
            for (id, balance) in staged_balances {
                if let Some(account) = accounts.get_mut(&id) {
                    account.balance = balance;
                }
            }
        }
        ledger
            .inner
            .transfers
            .lock()
            .unwrap()
            .extend(staged_transfers);
        ledger.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.ledger.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.ledger.faults().fail_rollback {
            return Err(AppError::Database(DatabaseError::Transaction(
                "Mock rollback failure".to_string(),
            )));
        }
        Ok(())
    }
}

enum MockEntry {
    Pending,
    Ready(Vec<u8>),
}

/// Idempotency store mock, ignores TTLs
pub struct MockIdempotencyStore {
    entries: Mutex<HashMap<String, MockEntry>>,
    config: MockConfig,
    fail_writes: AtomicBool,
    set_calls: AtomicUsize,
    is_healthy: AtomicBool,
}

impl MockIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            fail_writes: AtomicBool::new(false),
            set_calls: AtomicUsize::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    /// Every operation fails
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Reads and claims succeed, `set` fails
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Store raw bytes under a key, bypassing the claim protocol
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), MockEntry::Ready(value));
    }

    /// Number of stored responses, pending claims excluded
    #[must_use]
    pub fn stored(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| matches!(e, MockEntry::Ready(_)))
            .count()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| matches!(e, MockEntry::Pending))
            .count()
    }

    #[must_use]
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MockIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.config.check()?;
        let entries = self.entries.lock().unwrap();
        Ok(match entries.get(key) {
            Some(MockEntry::Ready(bytes)) => Some(bytes.clone()),
            _ => None,
        })
    }

    async fn claim(&self, key: &str, _ttl: Duration) -> Result<bool, AppError> {
        self.config.check()?;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), MockEntry::Pending);
        Ok(true)
    }

    async fn set(&self, key: &str, value: &[u8], _ttl: Duration) -> Result<(), AppError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.config.check()?;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "Mock write failure".to_string(),
            )));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), MockEntry::Ready(value.to_vec()));
        Ok(())
    }

    async fn renew(&self, key: &str, _ttl: Duration) -> Result<bool, AppError> {
        self.config.check()?;
        let entries = self.entries.lock().unwrap();
        Ok(matches!(entries.get(key), Some(MockEntry::Pending)))
    }

    async fn release(&self, key: &str) -> Result<(), AppError> {
        self.config.check()?;
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(key), Some(MockEntry::Pending)) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn discard(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        self.config.check()?;
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(MockEntry::Ready(bytes)) if bytes.as_slice() == value => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<u64, AppError> {
        self.config.check()?;
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.config.check()
    }
}
