// Bank Entity - groups accounts and moves money between them
//
// "A transfer is debit-then-credit: if the debit fails, nothing moves"
//
// - The bank owns its ordered list of account handles (duplicates allowed)
// - Accounts point back at the bank weakly, so the name they see is always
//   the bank's current name
// - Bank methods copy the handle list before touching any account, accounts
//   are locked before the bank. Keep it that way or transfers can deadlock.

use super::account::{lock_pair, SharedAccount};
use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

struct BankState {
    name: String,
    accounts: Vec<SharedAccount>,
}

// ============================================================================
// BANK ENTITY
// ============================================================================

/// Shared handle to a bank. Clones refer to the same bank.
#[derive(Clone)]
pub struct Bank(Arc<RwLock<BankState>>);

impl Bank {
    /// Create a bank with no accounts
    pub fn new(name: impl Into<String>) -> Self {
        Bank(Arc::new(RwLock::new(BankState {
            name: name.into(),
            accounts: Vec::new(),
        })))
    }

    pub fn name(&self) -> String {
        self.0.read().name.clone()
    }

    /// Rename the bank. Accounts already added see the new name.
    pub fn set_name(&self, name: impl Into<String>) {
        self.0.write().name = name.into();
    }

    /// Append `account` and point its bank link at this bank.
    ///
    /// Adding the same account to this bank again appends a duplicate entry.
    /// An account that belongs to a different bank which is still alive is
    /// rejected with [`LedgerError::AccountAlreadyInBank`]; if that bank has
    /// been dropped, this bank takes the account over.
    pub fn add_account(&self, account: &SharedAccount) -> LedgerResult<()> {
        let mut acc = account.write();

        if let Some(current) = acc.bank_link().and_then(|link| link.upgrade()) {
            if !current.ptr_eq(self) {
                let err = LedgerError::AccountAlreadyInBank {
                    owner: acc.owner_name().to_string(),
                    bank: current.name(),
                };
                warn!(owner = acc.owner_name(), bank = %current.name(), "account already belongs to another bank");
                return Err(err);
            }
        }

        let bank_name = {
            let mut state = self.0.write();
            state.accounts.push(account.clone());
            state.name.clone()
        };
        acc.set_bank(self.downgrade());

        debug!(bank = %bank_name, owner = acc.owner_name(), "account added");
        Ok(())
    }

    /// Move `amount` from `source` to `destination`.
    ///
    /// The debit is checked first; if it would fail the call returns that
    /// error and neither account changes. Both new balances are computed
    /// before either is written. The accounts do not have to belong to this
    /// bank.
    pub fn transfer(
        &self,
        source: &SharedAccount,
        destination: &SharedAccount,
        amount: Money,
    ) -> LedgerResult<()> {
        let bank_name = self.name();

        if source.ptr_eq(destination) {
            // Debit and credit cancel out, only the funds check remains
            let acc = source.read();
            if let Err(err) = acc.debited_balance(amount) {
                warn!(bank = %bank_name, owner = acc.owner_name(), %amount, error = %err, "transfer rejected");
                return Err(err);
            }
            debug!(bank = %bank_name, owner = acc.owner_name(), %amount, "self transfer applied");
            return Ok(());
        }

        let (mut src, mut dst) = lock_pair(source, destination);

        let prepared = src
            .debited_balance(amount)
            .and_then(|debited| dst.credited_balance(amount).map(|credited| (debited, credited)));

        match prepared {
            Ok((debited, credited)) => {
                src.commit_balance(debited);
                dst.commit_balance(credited);
                debug!(
                    bank = %bank_name,
                    from = src.owner_name(),
                    to = dst.owner_name(),
                    %amount,
                    "transfer applied"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    bank = %bank_name,
                    from = src.owner_name(),
                    to = dst.owner_name(),
                    %amount,
                    error = %err,
                    "transfer rejected"
                );
                Err(err)
            }
        }
    }

    /// Account handles in insertion order
    pub fn accounts(&self) -> Vec<SharedAccount> {
        self.0.read().accounts.clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().accounts.is_empty()
    }

    /// First account (in insertion order) whose owner name matches exactly
    pub fn find_account(&self, owner_name: &str) -> Option<SharedAccount> {
        self.accounts()
            .into_iter()
            .find(|account| account.read().owner_name() == owner_name)
    }

    /// Sum of the balances of every entry, duplicates counted each time
    pub fn total_balance(&self) -> LedgerResult<Money> {
        self.accounts()
            .iter()
            .try_fold(Money::ZERO, |total, account| total.checked_add(account.balance()))
    }

    /// True when both handles refer to the same bank
    pub fn ptr_eq(&self, other: &Bank) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakBank {
        WeakBank(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.read();
        f.debug_struct("Bank")
            .field("name", &state.name)
            .field("accounts", &state.accounts.len())
            .finish()
    }
}

// ============================================================================
// BACK-REFERENCE
// ============================================================================

/// Non-owning link from an account to its bank
#[derive(Clone)]
pub struct WeakBank(Weak<RwLock<BankState>>);

impl WeakBank {
    pub fn upgrade(&self) -> Option<Bank> {
        self.0.upgrade().map(Bank)
    }
}

impl fmt::Debug for WeakBank {
    // Does not lock: an account may be printed while its bank is locked
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.0.strong_count() > 0 { "alive" } else { "dropped" };
        f.debug_tuple("WeakBank").field(&state).finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
