//! spoolmail - queueing front end for msmtp-compatible transports
//!
//! Without `--q-mgmt` the binary stands in for the transport: it reads one
//! message on stdin and takes the transport's own flags plus the `--q-*`
//! directives. With `--q-mgmt` as the first argument it runs a queue
//! management command.
//!
//! Submission runs in the foreground unless `--q-fork` is given or
//! `SPOOLMAIL_FORK` is set. In the foreground, mail that stays queued keeps
//! this process watching the queue until it drains or SIGTERM/SIGINT arrives;
//! with fork the delivery and the watcher run as detached processes and
//! submission returns as soon as the mail is spooled.

use anyhow::Context;
use clap::Parser;
use spoolmail::commands::{ManageCli, Spool, MGMT_FLAG};
use spoolmail::config::SpoolConfig;
use spoolmail::launcher::SelfLauncher;
use spoolmail::submit::{utf8_args, Directives, Frontend, SubmitOutcome};
use std::io::Read;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = match SpoolConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = spoolmail::logging::init(&config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let argv = match utf8_args(std::env::args_os().skip(1)) {
        Ok(argv) => argv,
        Err(e) => {
            tracing::error!(error = %e, "Rejected command line");
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let mut argv = argv.into_iter().peekable();
    let result = if argv.peek().map(String::as_str) == Some(MGMT_FLAG) {
        argv.next();
        let cli = ManageCli::parse_from(std::iter::once(format!("spoolmail {}", MGMT_FLAG)).chain(argv));
        manage(config, cli).await
    } else {
        submit(config, argv.collect()).await
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "spoolmail failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn manage(config: SpoolConfig, cli: ManageCli) -> anyhow::Result<()> {
    let spool = Spool::from_config(config);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    spool.manage(cli.command, &mut out).await?;
    Ok(())
}

async fn submit(config: SpoolConfig, argv: Vec<String>) -> anyhow::Result<()> {
    let (directives, args) = Directives::split(argv);

    let mut payload = Vec::new();
    std::io::stdin()
        .read_to_end(&mut payload)
        .context("Failed to read message from stdin")?;

    let launcher = Arc::new(SelfLauncher::current()?);
    let spool = Spool::from_config(config);
    let frontend = Frontend::new(&spool.config, spool.flusher.clone(), spool.prober.clone(), launcher);

    let outcome = frontend.submit(&payload, &args, directives).await?;

    match &outcome {
        SubmitOutcome::Sent { id } => tracing::debug!(id = %id, "Delivered inline"),
        SubmitOutcome::Dispatched { id } => tracing::debug!(id = %id, "Delivery detached"),
        SubmitOutcome::Queued { id, reason, watcher } => {
            tracing::debug!(id = %id, ?reason, ?watcher, "Left in queue")
        }
    }
    Ok(())
}
