use meltdown_types::meltdown::ParticipantId;
use meltdown_types::Account;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[cfg(any(test, feature = "mocks"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "mocks"))]
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds (needed={needed}, available={available})")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("ledger storage failure: {0}")]
    Storage(String),
}

/// Token and experience balances, owned outside the engine.
///
/// Every call is independent: a failed `debit` leaves the balance untouched and nothing is
/// retried on the engine side.
pub trait Ledger: Send + Sync + 'static {
    fn credit(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Fails with [`LedgerError::InsufficientFunds`] iff the balance is below `amount`.
    fn debit(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Returns the participant's level after the award.
    fn award_experience(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> impl Future<Output = Result<u32, LedgerError>> + Send;

    fn account(
        &self,
        participant: ParticipantId,
    ) -> impl Future<Output = Result<Account, LedgerError>> + Send;
}

impl<T: Ledger> Ledger for Arc<T> {
    fn credit(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send {
        (**self).credit(participant, amount)
    }

    fn debit(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send {
        (**self).debit(participant, amount)
    }

    fn award_experience(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> impl Future<Output = Result<u32, LedgerError>> + Send {
        (**self).award_experience(participant, amount)
    }

    fn account(
        &self,
        participant: ParticipantId,
    ) -> impl Future<Output = Result<Account, LedgerError>> + Send {
        (**self).account(participant)
    }
}

/// Applies a debit to an account, mapping a shortfall to [`LedgerError::InsufficientFunds`].
pub fn debit_account(account: &mut Account, amount: u64) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    let available = account.tokens;
    if !account.debit(amount) {
        return Err(LedgerError::InsufficientFunds {
            needed: amount,
            available,
        });
    }
    Ok(())
}

/// Applies a credit to an account.
pub fn credit_account(account: &mut Account, amount: u64) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    account.credit(amount);
    Ok(())
}

/// In-memory ledger with an optional failure switch.
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    accounts: Mutex<HashMap<ParticipantId, Account>>,
    offline: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    pub fn tokens(&self, participant: ParticipantId) -> u64 {
        self.snapshot(participant).tokens
    }

    pub fn snapshot(&self, participant: ParticipantId) -> Account {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&participant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_tokens(&self, participant: ParticipantId, tokens: u64) {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(participant)
            .or_default()
            .tokens = tokens;
    }

    /// Makes every subsequent call fail with [`LedgerError::Storage`].
    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    fn with_account<R>(
        &self,
        participant: ParticipantId,
        f: impl FnOnce(&mut Account) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LedgerError::Storage("ledger offline".to_string()));
        }
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        f(accounts.entry(participant).or_default())
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Ledger for Memory {
    async fn credit(&self, participant: ParticipantId, amount: u64) -> Result<(), LedgerError> {
        self.with_account(participant, |account| credit_account(account, amount))
    }

    async fn debit(&self, participant: ParticipantId, amount: u64) -> Result<(), LedgerError> {
        self.with_account(participant, |account| debit_account(account, amount))
    }

    async fn award_experience(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> Result<u32, LedgerError> {
        self.with_account(participant, |account| Ok(account.add_experience(amount).1))
    }

    async fn account(&self, participant: ParticipantId) -> Result<Account, LedgerError> {
        self.with_account(participant, |account| Ok(account.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debit_rejects_shortfall_without_partial_debit() {
        let ledger = Memory::default();
        let alice = ParticipantId(1);
        ledger.set_tokens(alice, 30);

        let err = ledger.debit(alice, 50).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                needed: 50,
                available: 30
            }
        );
        assert_eq!(ledger.tokens(alice), 30);
    }

    #[tokio::test]
    async fn test_zero_amounts_are_invalid() {
        let ledger = Memory::default();
        assert_eq!(
            ledger.credit(ParticipantId(1), 0).await,
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            ledger.debit(ParticipantId(1), 0).await,
            Err(LedgerError::InvalidAmount)
        );
    }

    #[tokio::test]
    async fn test_arc_forwards_to_inner_ledger() {
        let ledger = Arc::new(Memory::default());
        let shared = Arc::clone(&ledger);
        shared.credit(ParticipantId(9), 25).await.unwrap();
        assert_eq!(shared.award_experience(ParticipantId(9), 16).await, Ok(2));
        assert_eq!(ledger.tokens(ParticipantId(9)), 25);
        assert_eq!(ledger.snapshot(ParticipantId(9)).xp, 16);
    }

    #[tokio::test]
    async fn test_offline_ledger_fails_everything() {
        let ledger = Memory::default();
        ledger.set_offline(true);
        assert!(matches!(
            ledger.credit(ParticipantId(1), 5).await,
            Err(LedgerError::Storage(_))
        ));
    }
}
