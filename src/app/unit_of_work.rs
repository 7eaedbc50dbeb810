//! Transaction runner.
//!
//! [`within_transaction`] opens one transaction, hands its [`LedgerScope`] to
//! the caller's closure and finishes it: commit on `Ok`, rollback on `Err`,
//! on panic and when the deadline elapses. A panic is re-raised after the
//! rollback. Nesting is not supported; code inside the closure must use the
//! scope it was given.

use std::panic::{AssertUnwindSafe, resume_unwind};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::{Instant, timeout_at};
use tracing::{error, warn};

use crate::domain::{AppError, LedgerScope, UnitOfWork};

/// Run `work` inside a single transaction bounded by `timeout`.
///
/// The deadline covers opening the transaction and the closure. Commit runs
/// after the closure returns and is not cut short, so a reported timeout
/// always means the transaction was rolled back.
pub async fn within_transaction<T, F>(
    uow: &dyn UnitOfWork,
    timeout: Duration,
    work: F,
) -> Result<T, AppError>
where
    T: Send,
    F: for<'s> FnOnce(&'s mut Box<dyn LedgerScope>) -> BoxFuture<'s, Result<T, AppError>> + Send,
{
    let deadline = Instant::now() + timeout;

    let mut scope = match timeout_at(deadline, uow.begin()).await {
        Ok(scope) => scope?,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Timed out opening transaction");
            return Err(AppError::Timeout("opening transaction".to_string()));
        }
    };

    let outcome = timeout_at(deadline, AssertUnwindSafe(work(&mut scope)).catch_unwind()).await;

    match outcome {
        Ok(Ok(Ok(value))) => {
            scope.commit().await?;
            Ok(value)
        }
        Ok(Ok(Err(err))) => {
            rollback(scope, "error").await;
            Err(err)
        }
        Ok(Err(panic)) => {
            rollback(scope, "panic").await;
            resume_unwind(panic)
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Unit of work exceeded its deadline");
            rollback(scope, "timeout").await;
            Err(AppError::Timeout("unit of work".to_string()))
        }
    }
}

/// A failed rollback is logged and otherwise ignored so the original outcome
/// reaches the caller.
async fn rollback(scope: Box<dyn LedgerScope>, reason: &'static str) {
    if let Err(e) = scope.rollback().await {
        error!(reason, error = %e, "Rollback failed");
    }
}
