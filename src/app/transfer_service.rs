//! Transfer engine: validated, atomic debit/credit between two accounts.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, LedgerScope, Transfer, TransferInput, TransferRepository, UnitOfWork,
    ValidationError,
};

use super::unit_of_work::within_transaction;

/// Transfer engine settings
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Upper bound for one transfer's unit of work
    pub timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct TransferService {
    uow: Arc<dyn UnitOfWork>,
    transfers: Arc<dyn TransferRepository>,
    config: TransferConfig,
}

impl TransferService {
    #[must_use]
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        transfers: Arc<dyn TransferRepository>,
        config: TransferConfig,
    ) -> Self {
        Self {
            uow,
            transfers,
            config,
        }
    }

    /// Move `input.amount` from origin to destination and record the transfer.
    ///
    /// Validation runs before any I/O. Not-found, insufficient balance and
    /// validation failures reach the caller unchanged; every other failure
    /// is logged and reported as [`AppError::TransferCreate`].
    #[instrument(
        skip(self, input),
        fields(origin = %input.account_origin_id, destination = %input.account_destination_id, amount = %input.amount)
    )]
    pub async fn create(&self, input: TransferInput) -> Result<Transfer, AppError> {
        input.validate().map_err(|e| {
            warn!(error = %e, "Transfer rejected by validation");
            AppError::Validation(e)
        })?;

        let transfer = Transfer::new(
            input.account_origin_id,
            input.account_destination_id,
            input.amount,
        );

        let result = within_transaction(self.uow.as_ref(), self.config.timeout, move |scope| {
            move_funds(scope, transfer).boxed()
        })
        .await;

        match result {
            Ok(transfer) => {
                info!(transfer_id = %transfer.id, "Transfer committed");
                Ok(transfer)
            }
            Err(
                e @ (AppError::AccountNotFound
                | AppError::InsufficientBalance
                | AppError::Validation(_)),
            ) => {
                warn!(error = %e, "Transfer rejected");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Transfer failed");
                Err(AppError::TransferCreate)
            }
        }
    }

    /// Transfers involving the account, newest first
    #[instrument(skip(self))]
    pub async fn fetch(&self, account_id: &str) -> Result<Vec<Transfer>, AppError> {
        self.transfers.list_transfers(account_id).await.map_err(|e| {
            error!(error = %e, "Could not fetch transfers");
            AppError::TransferFetch
        })
    }
}

/// Debit, credit and persist inside the caller's transaction.
///
/// Both rows are locked up front in id order, so the balance reads below
/// cannot be invalidated by a concurrent transfer before the writes land.
async fn move_funds(
    scope: &mut Box<dyn LedgerScope>,
    transfer: Transfer,
) -> Result<Transfer, AppError> {
    let mut ids = [
        transfer.account_origin_id.as_str(),
        transfer.account_destination_id.as_str(),
    ];
    ids.sort_unstable();
    scope.lock_accounts(&ids).await?;

    let origin = scope.get_balance(&transfer.account_origin_id).await?;
    let debited = origin
        .balance
        .checked_sub(transfer.amount)
        .filter(|balance| !balance.is_negative())
        .ok_or(AppError::InsufficientBalance)?;
    scope.update_balance(&origin.id, debited).await?;

    let destination = scope.get_balance(&transfer.account_destination_id).await?;
    let credited = destination
        .balance
        .checked_add(transfer.amount)
        .ok_or(ValidationError::AmountOutOfRange)?;
    scope.update_balance(&destination.id, credited).await?;

    scope.create_transfer(&transfer).await?;
    Ok(transfer)
}
