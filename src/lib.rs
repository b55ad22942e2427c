// Bank Ledger - Core Library
// Exposes the ledger core (money, accounts, banks) and the scripted driver
// used by the CLI and tests

pub mod error;
pub mod money;
pub mod entities;
pub mod script;   // CSV ledger scripts
pub mod driver;   // Runs scripts against a bank, builds reports

// Re-export commonly used types
pub use error::{LedgerError, LedgerResult, INSUFFICIENT_FUNDS_MESSAGE};
pub use money::Money;
pub use entities::{Account, Bank, SharedAccount, WeakBank};
pub use script::{load_script, parse_steps, Script, Step, StepKind};
pub use driver::{
    AccountBalance, Driver, DriverConfig, Platform, RunReport, StepError, StepOutcome, StepReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
