// Account Entity - owner name + exact balance, guarded debit
//
// "Account id is IDENTITY (never changes), owner name and balance are VALUES"
//
// - Debit is the only guarded mutation: it fails without touching the
//   balance when the result would go below zero
// - Credit is unguarded apart from the amount sign
// - The owning bank is a weak back-reference set by Bank::add_account

use super::bank::{Bank, WeakBank};
use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

/// Account value: owner name, balance and the bank it currently belongs to.
///
/// Two accounts are equal when their owner names and balances are equal.
/// Neither the id nor the bank link take part in equality.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    /// Stable identity - NEVER changes
    id: Uuid,

    /// Display name of the holder, stored as given
    owner_name: String,

    balance: Money,

    #[serde(skip)]
    bank: Option<WeakBank>,
}

impl Account {
    /// Create an account with an opening balance and no bank.
    pub fn new(owner_name: impl Into<String>, balance: Money) -> Self {
        Account {
            id: Uuid::new_v4(),
            owner_name: owner_name.into(),
            balance,
            bank: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    /// Bank this account was last added to, if that bank is still alive
    pub fn bank(&self) -> Option<Bank> {
        self.bank.as_ref().and_then(WeakBank::upgrade)
    }

    /// Change the display name. The balance is untouched.
    pub fn rename(&mut self, owner_name: impl Into<String>) {
        self.owner_name = owner_name.into();
    }

    /// Subtract `amount` from the balance.
    ///
    /// Fails with [`LedgerError::InsufficientFunds`] when the balance would
    /// drop below zero, and with [`LedgerError::InvalidAmount`] for a
    /// negative amount. On failure the balance is unchanged.
    pub fn debit(&mut self, amount: Money) -> LedgerResult<()> {
        self.balance = self.debited_balance(amount)?;
        Ok(())
    }

    /// Add `amount` to the balance.
    pub fn credit(&mut self, amount: Money) -> LedgerResult<()> {
        self.balance = self.credited_balance(amount)?;
        Ok(())
    }

    /// Balance a debit of `amount` would leave, without applying it
    pub(crate) fn debited_balance(&self, amount: Money) -> LedgerResult<Money> {
        ensure_non_negative(amount)?;
        let new_balance = self.balance.checked_sub(amount)?;
        if new_balance.is_negative() {
            return Err(LedgerError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        Ok(new_balance)
    }

    /// Balance a credit of `amount` would leave, without applying it
    pub(crate) fn credited_balance(&self, amount: Money) -> LedgerResult<Money> {
        ensure_non_negative(amount)?;
        self.balance.checked_add(amount)
    }

    pub(crate) fn commit_balance(&mut self, balance: Money) {
        self.balance = balance;
    }

    pub(crate) fn bank_link(&self) -> Option<&WeakBank> {
        self.bank.as_ref()
    }

    pub(crate) fn set_bank(&mut self, bank: WeakBank) {
        self.bank = Some(bank);
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.owner_name == other.owner_name && self.balance == other.balance
    }
}

impl Eq for Account {}

fn ensure_non_negative(amount: Money) -> LedgerResult<()> {
    if amount.is_negative() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

// ============================================================================
// SHARED ACCOUNT HANDLE
// ============================================================================

/// Shared handle to an [`Account`].
///
/// Banks and callers hold clones of the same handle, so a transfer made
/// through a bank is visible to whoever created the account. Cloning the
/// handle does not copy the account; use [`SharedAccount::snapshot`] for a
/// detached value.
#[derive(Clone)]
pub struct SharedAccount(Arc<RwLock<Account>>);

impl SharedAccount {
    pub fn new(owner_name: impl Into<String>, balance: Money) -> Self {
        Self::from_account(Account::new(owner_name, balance))
    }

    pub fn from_account(account: Account) -> Self {
        SharedAccount(Arc::new(RwLock::new(account)))
    }

    pub fn id(&self) -> Uuid {
        self.0.read().id()
    }

    pub fn owner_name(&self) -> String {
        self.0.read().owner_name().to_string()
    }

    pub fn balance(&self) -> Money {
        self.0.read().balance()
    }

    pub fn bank(&self) -> Option<Bank> {
        // Upgrade outside the account lock
        let link = self.0.read().bank_link().cloned();
        link.and_then(|weak| weak.upgrade())
    }

    pub fn rename(&self, owner_name: impl Into<String>) {
        self.0.write().rename(owner_name);
    }

    pub fn debit(&self, amount: Money) -> LedgerResult<()> {
        self.0.write().debit(amount)
    }

    pub fn credit(&self, amount: Money) -> LedgerResult<()> {
        self.0.write().credit(amount)
    }

    /// Detached copy of the current account value
    pub fn snapshot(&self) -> Account {
        self.0.read().clone()
    }

    /// True when both handles point at the same account
    pub fn ptr_eq(&self, other: &SharedAccount) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Account> {
        self.0.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Account> {
        self.0.write()
    }

    fn lock_address(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// Write-lock two distinct accounts in address order, returning the guards
/// in argument order.
pub(crate) fn lock_pair<'a>(
    first: &'a SharedAccount,
    second: &'a SharedAccount,
) -> (RwLockWriteGuard<'a, Account>, RwLockWriteGuard<'a, Account>) {
    debug_assert!(!first.ptr_eq(second));
    if first.lock_address() < second.lock_address() {
        let a = first.write();
        let b = second.write();
        (a, b)
    } else {
        let b = second.write();
        let a = first.write();
        (a, b)
    }
}

impl PartialEq for SharedAccount {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        // Never hold both locks at once
        let mine = self.snapshot();
        mine == *other.read()
    }
}

impl fmt::Debug for SharedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedAccount").field(&*self.0.read()).finish()
    }
}

impl From<Account> for SharedAccount {
    fn from(account: Account) -> Self {
        SharedAccount::from_account(account)
    }
}

// ============================================================================
// TESTS
// ============================================================================
