//! roleguard - OCF resource agent entry point
//!
//! Invoked by the cluster manager as `roleguard <action>` with parameters in
//! `OCF_RESKEY_*` variables. The process exit code is the OCF result.
//!
//! # Usage
//!
//! ```bash
//! roleguard meta-data
//! OCF_RESKEY_ports=5432 OCF_RESKEY_source_ips=10.0.0.0/24 roleguard validate-all
//! roleguard monitor --ports 5432 --state /run/roleguard.state
//! ```

use clap::Parser;
use roleguard::config::{self, Params};
use roleguard::core::agent;
use roleguard::core::backend::runner::SystemRunner;
use roleguard::{Action, Outcome, metadata};
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{Instrument, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roleguard")]
#[command(version = roleguard::build::PKG_VERSION)]
#[command(about = "OCF resource agent for role-dependent firewall rules", long_about = None)]
struct Cli {
    /// start, stop, promote, demote, monitor, notify, validate-all or meta-data
    action: String,

    #[command(flatten)]
    params: Params,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(config::usage_outcome(&e).exit_code());
        }
    };
    init_logging();

    let Ok(action) = Action::from_str(&cli.action) else {
        error!("Unsupported action '{}'", cli.action);
        return ExitCode::from(Outcome::Unimplemented.exit_code());
    };

    if action == Action::MetaData {
        print!("{}", metadata::render());
        return ExitCode::SUCCESS;
    }

    let span = tracing::info_span!(
        "roleguard",
        action = %action,
        instance = tracing::field::Empty
    );
    let outcome = agent::dispatch(action, &cli.params, SystemRunner::new)
        .instrument(span)
        .await;
    ExitCode::from(outcome.exit_code())
}

/// Logs to `HA_LOGFILE` when the cluster manager sets it, stderr otherwise.
fn init_logging() {
    let default_level = if std::env::var("HA_debug").is_ok_and(|v| v == "1") {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(path) = std::env::var_os("HA_LOGFILE").filter(|p| !p.is_empty())
        && let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    {
        builder
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
}
