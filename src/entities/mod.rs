// Entity Models
//
// "Account id is IDENTITY, owner name and balance are VALUES"
//
// - Account: owner name + exact balance, guarded debit
// - Bank: ordered account handles + transfer

pub mod account;
pub mod bank;

pub use account::{Account, SharedAccount};
pub use bank::{Bank, WeakBank};
