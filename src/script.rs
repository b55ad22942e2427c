// Ledger scripts - CSV sequences of account operations
//
// Format (header required, blank optional columns allowed):
//
//   op,account,target,amount,only_on,expect_error
//   open,Gigio,,2500,,
//   open,Memo,,1000,,
//   transfer,Gigio,Memo,500,,
//   expect,Memo,,1500,,
//   debit,Memo,,99999,,true
//
// Line numbers count the header as line 1, like a text editor would.

use crate::money::Money;
use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

// ============================================================================
// STEP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Create an account with an opening balance and add it to the bank
    Open,
    Debit,
    Credit,
    /// `account` pays `target`
    Transfer,
    /// Assert the balance of `account`
    Expect,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Open => "open",
            StepKind::Debit => "debit",
            StepKind::Credit => "credit",
            StepKind::Transfer => "transfer",
            StepKind::Expect => "expect",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated script line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub line: usize,
    pub kind: StepKind,
    pub account: String,
    /// Destination of a transfer; `None` for every other kind
    pub target: Option<String>,
    pub amount: Money,
    /// Run only when the platform OS matches (case-insensitive)
    pub only_on: Option<String>,
    /// The step is expected to fail
    pub expect_error: bool,
}

/// Row as it appears in the CSV, before validation
#[derive(Debug, Deserialize)]
struct ScriptRow {
    op: StepKind,
    account: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    only_on: Option<String>,
    #[serde(default)]
    expect_error: Option<bool>,
}

impl ScriptRow {
    fn into_step(self, line: usize) -> Result<Step> {
        if self.account.is_empty() {
            bail!("line {}: '{}' needs an account", line, self.op);
        }

        let raw_amount = self
            .amount
            .filter(|a| !a.is_empty())
            .ok_or_else(|| anyhow!("line {}: '{}' needs an amount", line, self.op))?;
        let amount: Money = raw_amount
            .parse()
            .with_context(|| format!("line {}: bad amount", line))?;

        let target = self.target.filter(|t| !t.is_empty());
        match (self.op, &target) {
            (StepKind::Transfer, None) => {
                bail!("line {}: 'transfer' needs a target account", line)
            }
            (StepKind::Transfer, Some(_)) | (_, None) => {}
            (op, Some(_)) => bail!("line {}: '{}' does not take a target", line, op),
        }

        Ok(Step {
            line,
            kind: self.op,
            account: self.account,
            target,
            amount,
            only_on: self.only_on.filter(|os| !os.is_empty()),
            expect_error: self.expect_error.unwrap_or(false),
        })
    }
}

// ============================================================================
// SCRIPT
// ============================================================================

/// Parsed script plus the fingerprint of the bytes it came from
#[derive(Debug, Clone)]
pub struct Script {
    pub steps: Vec<Step>,
    /// Hex SHA-256 of the raw script
    pub sha256: String,
}

impl Script {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let steps = parse_steps(bytes)?;
        Ok(Script {
            steps,
            sha256: fingerprint(bytes),
        })
    }
}

/// Read and parse a script file
pub fn load_script(path: &Path) -> Result<Script> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open script: {}", path.display()))?;
    Script::from_bytes(&bytes).with_context(|| format!("Invalid script: {}", path.display()))
}

/// Parse CSV script rows into validated steps
pub fn parse_steps<R: Read>(reader: R) -> Result<Vec<Step>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut steps = Vec::new();
    for (line_num, result) in reader.deserialize::<ScriptRow>().enumerate() {
        let line = line_num + 2; // 1-indexed + header row
        let row = result.with_context(|| format!("Failed to parse script line {}", line))?;
        steps.push(row.into_step(line)?);
    }

    Ok(steps)
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TRANSFER_SCRIPT: &str = "\
op,account,target,amount,only_on,expect_error
open,Gigio,,2500,,
open,Memo,,1000,,
transfer,Gigio,Memo,500,,
expect,Memo,,1500,,
debit,Memo,,99999,linux,true
";

    #[test]
    fn test_parse_steps() {
        let steps = parse_steps(TRANSFER_SCRIPT.as_bytes()).unwrap();

        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].kind, StepKind::Open);
        assert_eq!(steps[0].line, 2);
        assert_eq!(steps[0].amount.to_string(), "2500");

        assert_eq!(steps[2].kind, StepKind::Transfer);
        assert_eq!(steps[2].account, "Gigio");
        assert_eq!(steps[2].target.as_deref(), Some("Memo"));

        assert_eq!(steps[4].only_on.as_deref(), Some("linux"));
        assert!(steps[4].expect_error);
        assert!(!steps[3].expect_error);
    }

    #[test]
    fn test_parse_trims_fields() {
        let script = "op,account,target,amount,only_on,expect_error\n credit , Memo ,, 12.50 ,,\n";
        let steps = parse_steps(script.as_bytes()).unwrap();

        assert_eq!(steps[0].kind, StepKind::Credit);
        assert_eq!(steps[0].account, "Memo");
        assert_eq!(steps[0].amount.to_string(), "12.50");
    }

    #[test]
    fn test_transfer_without_target_is_rejected() {
        let script = "op,account,target,amount,only_on,expect_error\ntransfer,Gigio,,500,,\n";
        let err = parse_steps(script.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn test_target_on_debit_is_rejected() {
        let script = "op,account,target,amount,only_on,expect_error\ndebit,Gigio,Memo,500,,\n";
        let err = parse_steps(script.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("does not take a target"));
    }

    #[test]
    fn test_missing_amount_is_rejected() {
        let script = "op,account,target,amount,only_on,expect_error\nopen,Gigio,,,,\n";
        let err = parse_steps(script.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("needs an amount"));
    }

    #[test]
    fn test_bad_amount_is_rejected() {
        let script = "op,account,target,amount,only_on,expect_error\nopen,Gigio,,12abc,,\n";
        let err = parse_steps(script.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid monetary value"));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let script = "op,account,target,amount,only_on,expect_error\nwithdraw,Gigio,,10,,\n";
        let err = parse_steps(script.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_script_fingerprint() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TRANSFER_SCRIPT.as_bytes()).unwrap();

        let script = load_script(file.path()).unwrap();

        assert_eq!(script.steps.len(), 5);
        assert_eq!(script.sha256, fingerprint(TRANSFER_SCRIPT.as_bytes()));
        assert_eq!(script.sha256.len(), 64);
    }

    #[test]
    fn test_load_missing_script() {
        let err = load_script(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("Failed to open script"));
    }
}
