use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bank_ledger::{load_script, Bank, Driver, DriverConfig, Money, Platform, SharedAccount};

#[derive(Parser)]
#[command(name = "bank-ledger")]
#[command(version = bank_ledger::VERSION)]
#[command(about = "In-memory accounts and transfers, driven by CSV ledger scripts")]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a ledger script and print the report
    Run {
        script: PathBuf,

        /// JSON driver config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bank name (overrides the config file)
        #[arg(long)]
        bank: Option<String>,

        #[arg(long)]
        stop_on_error: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Walk through the basic account and transfer scenarios
    Demo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).without_time())
        .init();

    match cli.command {
        Command::Run {
            script,
            config,
            bank,
            stop_on_error,
            json,
        } => run_script(script, config, bank, stop_on_error, json),
        Command::Demo => run_demo(),
    }
}

fn run_script(
    script_path: PathBuf,
    config_path: Option<PathBuf>,
    bank: Option<String>,
    stop_on_error: bool,
    json: bool,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig {
            platform: Platform::host(),
            ..DriverConfig::default()
        },
    };
    if let Some(name) = bank {
        config.bank_name = name;
    }
    config.stop_on_error |= stop_on_error;

    let script = load_script(&script_path)?;
    let report = Driver::new(config).run_script(&script)?;

    if json {
        let rendered = serde_json::to_string_pretty(&report).context("Failed to render report")?;
        println!("{}", rendered);
    } else {
        println!("{}", report);
    }

    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_demo() -> Result<()> {
    let money = |s: &str| s.parse::<Money>();

    println!("1. debit 100 from NOMBRE1 (1000.982)");
    let account = SharedAccount::new("NOMBRE1", money("1000.982")?);
    account.debit(money("100")?)?;
    println!("   balance: {}", account.balance());

    println!("2. credit 100 to NOMBRE1 (1000.982)");
    let account = SharedAccount::new("NOMBRE1", money("1000.982")?);
    account.credit(money("100")?)?;
    println!("   balance: {}", account.balance());

    println!("3. debit 1000 from Gigio (999.009)");
    let account = SharedAccount::new("Gigio", money("999.009")?);
    match account.debit(money("1000")?) {
        Ok(()) => println!("   unexpectedly succeeded"),
        Err(err) => println!("   rejected: {}", err),
    }
    println!("   balance: {}", account.balance());

    println!("4. transfer 500 from Gigio (2500) to Memo (1000)");
    let origen = SharedAccount::new("Gigio", money("2500")?);
    let destino = SharedAccount::new("Memo", money("1000")?);
    let bank = Bank::new("Banco del estado");
    bank.add_account(&origen)?;
    bank.add_account(&destino)?;
    bank.transfer(&origen, &destino, money("500")?)?;
    println!(
        "   Gigio: {}, Memo: {}, accounts: {}, Gigio's bank: {}",
        origen.balance(),
        destino.balance(),
        bank.len(),
        origen.bank().map(|b| b.name()).unwrap_or_default()
    );

    println!("5. two NOMBRE1 (1000.982) accounts");
    let first = SharedAccount::new("NOMBRE1", money("1000.982")?);
    let second = SharedAccount::new("NOMBRE1", money("1000.982")?);
    println!("   equal: {}, same account: {}", first == second, first.ptr_eq(&second));

    Ok(())
}
