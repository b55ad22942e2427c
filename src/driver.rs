// Scripted driver - runs ledger scripts against a bank and reports
//
// Everything the driver needs to know about its environment arrives in
// DriverConfig. It never inspects the process or host on its own; the
// binary fills in the platform once and passes it down.

use crate::entities::{Bank, SharedAccount};
use crate::error::LedgerError;
use crate::money::Money;
use crate::script::{Script, Step, StepKind};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Host description used to gate `only_on` steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Platform {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Platform this binary was compiled for
    pub fn host() -> Self {
        Platform::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn matches_os(&self, os: &str) -> bool {
        self.os.eq_ignore_ascii_case(os)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::host()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Name of the bank the script's accounts are opened in
    pub bank_name: String,

    /// Stop at the first unexpected failure
    pub stop_on_error: bool,

    pub platform: Platform,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            bank_name: "Ledger Bank".to_string(),
            stop_on_error: false,
            platform: Platform::default(),
        }
    }
}

impl DriverConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }
}

// ============================================================================
// STEP OUTCOMES
// ============================================================================

/// Why a step could not be applied
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("unknown account '{0}'")]
    UnknownAccount(String),

    #[error("balance of '{owner}' is {actual}, expected {expected}")]
    BalanceMismatch {
        owner: String,
        expected: Money,
        actual: Money,
    },

    #[error("step was expected to fail but succeeded")]
    UnexpectedSuccess,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    ExpectedFailure { error: String },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub line: usize,
    pub kind: StepKind,
    pub account: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountBalance {
    pub owner: String,
    pub balance: Money,
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub bank: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
    /// Steps after the first failure were not run (`stop_on_error`)
    pub stopped_early: bool,
    pub accounts: Vec<AccountBalance>,
    pub total_balance: Money,
}

impl RunReport {
    /// No step failed unexpectedly
    pub fn succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Applied))
    }

    pub fn expected_failures(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::ExpectedFailure { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Failed { .. }))
    }

    pub fn balance_of(&self, owner: &str) -> Option<Money> {
        self.accounts
            .iter()
            .find(|a| a.owner == owner)
            .map(|a| a.balance)
    }

    fn count(&self, predicate: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|s| predicate(&s.outcome)).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} on bank '{}' ({}/{})",
            self.run_id, self.bank, self.platform.os, self.platform.arch
        )?;
        for step in &self.steps {
            let status = match &step.outcome {
                StepOutcome::Applied => "applied".to_string(),
                StepOutcome::ExpectedFailure { error } => format!("expected failure: {}", error),
                StepOutcome::Skipped { reason } => format!("skipped: {}", reason),
                StepOutcome::Failed { error } => format!("FAILED: {}", error),
            };
            writeln!(
                f,
                "  line {:<4} {:<9} {:<16} {}",
                step.line, step.kind, step.account, status
            )?;
        }
        if self.stopped_early {
            writeln!(f, "  (stopped after first failure)")?;
        }
        writeln!(f, "balances:")?;
        for account in &self.accounts {
            writeln!(f, "  {:<16} {}", account.owner, account.balance)?;
        }
        writeln!(f, "total: {}", self.total_balance)?;
        write!(
            f,
            "result: {} applied, {} expected failures, {} skipped, {} failed",
            self.applied(),
            self.expected_failures(),
            self.skipped(),
            self.failed()
        )
    }
}

// ============================================================================
// DRIVER
// ============================================================================

/// Runs script steps against one bank.
///
/// The bank lives as long as the driver, so consecutive runs see the
/// accounts earlier runs opened.
pub struct Driver {
    config: DriverConfig,
    bank: Bank,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        let bank = Bank::new(config.bank_name.clone());
        Driver { config, bank }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    pub fn run_script(&self, script: &Script) -> Result<RunReport> {
        let mut report = self.run(&script.steps)?;
        report.script_sha256 = Some(script.sha256.clone());
        Ok(report)
    }

    /// Execute `steps` in order and report on each.
    ///
    /// Errors only when the final balances cannot be summed.
    pub fn run(&self, steps: &[Step]) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, bank = %self.bank.name(), steps = steps.len(), "running ledger script");

        let mut reports = Vec::with_capacity(steps.len());
        let mut stopped_early = false;

        for (index, step) in steps.iter().enumerate() {
            let outcome = self.outcome_of(step);
            debug!(line = step.line, kind = %step.kind, account = %step.account, ?outcome, "step");

            let failed = matches!(outcome, StepOutcome::Failed { .. });
            reports.push(StepReport {
                line: step.line,
                kind: step.kind,
                account: step.account.clone(),
                outcome,
            });

            if failed && self.config.stop_on_error {
                stopped_early = index + 1 < steps.len();
                break;
            }
        }

        let accounts = self
            .bank
            .accounts()
            .iter()
            .map(|account| AccountBalance {
                owner: account.owner_name(),
                balance: account.balance(),
            })
            .collect();
        let total_balance = self
            .bank
            .total_balance()
            .context("Failed to total bank balances")?;

        let report = RunReport {
            run_id,
            bank: self.bank.name(),
            platform: self.config.platform.clone(),
            script_sha256: None,
            started_at,
            finished_at: Utc::now(),
            steps: reports,
            stopped_early,
            accounts,
            total_balance,
        };

        info!(
            %run_id,
            applied = report.applied(),
            expected_failures = report.expected_failures(),
            skipped = report.skipped(),
            failed = report.failed(),
            "ledger script finished"
        );
        Ok(report)
    }

    fn outcome_of(&self, step: &Step) -> StepOutcome {
        if let Some(os) = &step.only_on {
            if !self.config.platform.matches_os(os) {
                return StepOutcome::Skipped {
                    reason: format!("only on {}", os),
                };
            }
        }

        match (self.execute(step), step.expect_error) {
            (Ok(()), false) => StepOutcome::Applied,
            (Ok(()), true) => StepOutcome::Failed {
                error: StepError::UnexpectedSuccess.to_string(),
            },
            (Err(err), true) => StepOutcome::ExpectedFailure {
                error: err.to_string(),
            },
            (Err(err), false) => StepOutcome::Failed {
                error: err.to_string(),
            },
        }
    }

    fn execute(&self, step: &Step) -> Result<(), StepError> {
        match step.kind {
            StepKind::Open => {
                let account = SharedAccount::new(step.account.clone(), step.amount);
                self.bank.add_account(&account)?;
            }
            StepKind::Debit => self.account(&step.account)?.debit(step.amount)?,
            StepKind::Credit => self.account(&step.account)?.credit(step.amount)?,
            StepKind::Transfer => {
                let source = self.account(&step.account)?;
                let target = step.target.as_deref().unwrap_or_default();
                let destination = self.account(target)?;
                self.bank.transfer(&source, &destination, step.amount)?;
            }
            StepKind::Expect => {
                let actual = self.account(&step.account)?.balance();
                if actual != step.amount {
                    return Err(StepError::BalanceMismatch {
                        owner: step.account.clone(),
                        expected: step.amount,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    fn account(&self, owner: &str) -> Result<SharedAccount, StepError> {
        self.bank
            .find_account(owner)
            .ok_or_else(|| StepError::UnknownAccount(owner.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_steps;
    use std::io::Write;

    const HEADER: &str = "op,account,target,amount,only_on,expect_error\n";

    fn steps(body: &str) -> Vec<Step> {
        parse_steps(format!("{}{}", HEADER, body).as_bytes()).unwrap()
    }

    fn linux_config() -> DriverConfig {
        DriverConfig {
            bank_name: "Banco del estado".to_string(),
            stop_on_error: false,
            platform: Platform::new("linux", "x86_64"),
        }
    }

    #[test]
    fn test_run_transfer_scenario() {
        let driver = Driver::new(linux_config());
        let report = driver
            .run(&steps(
                "open,Gigio,,2500,,\n\
                 open,Memo,,1000,,\n\
                 transfer,Gigio,Memo,500,,\n\
                 expect,Memo,,1500,,\n\
                 expect,Gigio,,2000,,\n",
            ))
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.applied(), 5);
        assert_eq!(report.bank, "Banco del estado");
        assert_eq!(report.balance_of("Memo").unwrap().to_string(), "1500");
        assert_eq!(report.balance_of("Gigio").unwrap().to_string(), "2000");
        assert_eq!(report.total_balance, Money::from(3500));
        assert_eq!(driver.bank().len(), 2);
    }

    #[test]
    fn test_expected_insufficient_funds() {
        let driver = Driver::new(linux_config());
        let report = driver
            .run(&steps(
                "open,Gigio,,999.009,,\n\
                 debit,Gigio,,1000,,true\n\
                 expect,Gigio,,999.009,,\n",
            ))
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.expected_failures(), 1);
        assert_eq!(
            report.steps[1].outcome,
            StepOutcome::ExpectedFailure {
                error: "insufficient funds".to_string()
            }
        );
    }

    #[test]
    fn test_unexpected_success_fails_step() {
        let driver = Driver::new(linux_config());
        let report = driver
            .run(&steps("open,Gigio,,100,,\ndebit,Gigio,,10,,true\n"))
            .unwrap();

        assert!(!report.succeeded());
        assert_eq!(
            report.steps[1].outcome,
            StepOutcome::Failed {
                error: "step was expected to fail but succeeded".to_string()
            }
        );
    }

    #[test]
    fn test_balance_mismatch_and_unknown_account() {
        let driver = Driver::new(linux_config());
        let report = driver
            .run(&steps(
                "open,Memo,,1000,,\n\
                 expect,Memo,,1001,,\n\
                 credit,Nobody,,5,,\n",
            ))
            .unwrap();

        assert_eq!(report.failed(), 2);
        assert_eq!(
            report.steps[1].outcome,
            StepOutcome::Failed {
                error: "balance of 'Memo' is 1000, expected 1001".to_string()
            }
        );
        assert_eq!(
            report.steps[2].outcome,
            StepOutcome::Failed {
                error: "unknown account 'Nobody'".to_string()
            }
        );
    }

    #[test]
    fn test_only_on_gating_uses_configured_platform() {
        let script = steps(
            "open,Memo,,1000,,\n\
             credit,Memo,,1,windows,\n\
             credit,Memo,,2,Linux,\n",
        );

        let report = Driver::new(linux_config()).run(&script).unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.balance_of("Memo"), Some(Money::from(1002)));

        let windows = DriverConfig {
            platform: Platform::new("windows", "x86_64"),
            ..linux_config()
        };
        let report = Driver::new(windows).run(&script).unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.balance_of("Memo"), Some(Money::from(1001)));
    }

    #[test]
    fn test_stop_on_error() {
        let config = DriverConfig {
            stop_on_error: true,
            ..linux_config()
        };
        let report = Driver::new(config)
            .run(&steps(
                "open,Memo,,10,,\n\
                 debit,Memo,,20,,\n\
                 credit,Memo,,5,,\n",
            ))
            .unwrap();

        assert_eq!(report.steps.len(), 2);
        assert!(report.stopped_early);
        assert_eq!(report.balance_of("Memo"), Some(Money::from(10)));
    }

    #[test]
    fn test_run_script_records_fingerprint() {
        let script = Script::from_bytes(format!("{}open,Memo,,1,,\n", HEADER).as_bytes()).unwrap();
        let report = Driver::new(linux_config()).run_script(&script).unwrap();

        assert_eq!(report.script_sha256.as_deref(), Some(script.sha256.as_str()));
    }

    #[test]
    fn test_bundled_scenarios_script() {
        let script =
            Script::from_bytes(include_bytes!("../scripts/transfer_scenarios.csv")).unwrap();
        let report = Driver::new(linux_config()).run_script(&script).unwrap();

        assert!(report.succeeded(), "{}", report);
        assert_eq!(report.expected_failures(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.balance_of("NOMBRE1").unwrap().to_string(), "1000.982");
        assert_eq!(report.total_balance.to_string(), "4500.982");
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let report = Driver::new(linux_config())
            .run(&steps("open,Gigio,,999.009,,\ndebit,Gigio,,1000,,true\n"))
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["outcome"]["status"], "applied");
        assert_eq!(json["steps"][1]["outcome"]["status"], "expected_failure");
        assert_eq!(json["accounts"][0]["balance"], "999.009");
        assert!(json.get("script_sha256").is_none());
    }

    #[test]
    fn test_report_display() {
        let report = Driver::new(linux_config())
            .run(&steps("open,Gigio,,2500,,\n"))
            .unwrap();
        let text = report.to_string();

        assert!(text.contains("bank 'Banco del estado' (linux/x86_64)"));
        assert!(text.contains("Gigio"));
        assert!(text.ends_with("result: 1 applied, 0 expected failures, 0 skipped, 0 failed"));
    }

    #[test]
    fn test_config_load_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "bank_name": "bancoTest1", "platform": { "os": "macos", "arch": "aarch64" } }"#)
            .unwrap();

        let config = DriverConfig::load(file.path()).unwrap();

        assert_eq!(config.bank_name, "bancoTest1");
        assert!(!config.stop_on_error);
        assert_eq!(config.platform, Platform::new("macos", "aarch64"));
    }

    #[test]
    fn test_config_load_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let err = DriverConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
