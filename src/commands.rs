//! Management commands
//!
//! `spoolmail --q-mgmt <command>` inspects and drives the queue. The clap
//! definitions live here together with their handlers so the detached jobs
//! started by the launcher and an operator at a terminal run the same code.

use crate::config::SpoolConfig;
use crate::flush::{FlushReport, Flusher};
use crate::probe::{Prober, TcpProber};
use crate::queue::{EntryId, EntrySummary, QueueStore};
use crate::transport::{CommandTransport, Transport};
use crate::watcher::{Watcher, WatcherExit};
use crate::{Result, SpoolError};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;

/// First argument that switches the binary into management mode
pub const MGMT_FLAG: &str = "--q-mgmt";

/// Queue management
#[derive(Parser, Debug)]
#[command(name = "spoolmail --q-mgmt")]
#[command(version, about = "Inspect and flush the spoolmail queue", long_about = None)]
pub struct ManageCli {
    #[command(subcommand)]
    pub command: ManageCommand,
}

#[derive(Subcommand, Debug)]
pub enum ManageCommand {
    /// List queued mail, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one queued message
    Show {
        /// Entry ID (e.g., 2024-05-01-10.15.42-1a2b3c4d)
        id: String,

        /// Output the summary as JSON
        #[arg(long, conflicts_with = "raw")]
        json: bool,

        /// Print the message exactly as queued
        #[arg(long)]
        raw: bool,
    },

    /// Attempt delivery now, without probing
    Flush {
        /// Flush every queued entry (the default when no IDs are given)
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Entries to flush
        ids: Vec<String>,

        /// Start the watcher afterwards if mail is still queued
        #[arg(long)]
        watch: bool,
    },

    /// Poll connectivity and flush until the queue is empty
    Watch,

    /// Delete queued messages without sending them
    Remove {
        /// Entries to delete
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete orphaned arguments files and abandoned temporary files
    Cleanup {
        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

/// The wired-up components a process works with
#[derive(Clone)]
pub struct Spool {
    pub config: SpoolConfig,
    pub store: QueueStore,
    pub flusher: Flusher,
    pub prober: Arc<dyn Prober>,
}

impl Spool {
    pub fn new(config: SpoolConfig, transport: Arc<dyn Transport>, prober: Arc<dyn Prober>) -> Self {
        let store = QueueStore::new(&config.queue_dir);
        Self {
            flusher: Flusher::new(store.clone(), transport),
            store,
            prober,
            config,
        }
    }

    /// Real transport program and TCP prober
    pub fn from_config(config: SpoolConfig) -> Self {
        let transport = Arc::new(CommandTransport::new(config.transport.clone()));
        Self::new(config, transport, Arc::new(TcpProber::new()))
    }

    pub fn watcher(&self) -> Watcher {
        Watcher::new(&self.config, self.flusher.clone(), self.prober.clone())
    }

    /// Run a management command, writing human output to `out`
    pub async fn manage(&self, command: ManageCommand, out: &mut dyn Write) -> Result<()> {
        match command {
            ManageCommand::List { json } => self.handle_list(json, out),
            ManageCommand::Show { id, json, raw } => self.handle_show(&id, json, raw, out),
            ManageCommand::Flush { all, ids, watch } => {
                self.handle_flush(all, &ids, watch, out).await
            }
            ManageCommand::Watch => {
                let exit = self.watcher().run().await?;
                writeln!(out, "{}", describe_exit(exit))?;
                Ok(())
            }
            ManageCommand::Remove { ids } => self.handle_remove(&ids, out),
            ManageCommand::Cleanup { dry_run } => self.handle_cleanup(dry_run, out),
        }
    }

    fn summaries(&self) -> Result<Vec<EntrySummary>> {
        let mut summaries = Vec::new();
        for id in self.store.list()? {
            match self.store.load(&id) {
                Ok(entry) => summaries.push(entry.summary()),
                // Delivered or removed while we were listing
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    fn handle_list(&self, json: bool, out: &mut dyn Write) -> Result<()> {
        let summaries = self.summaries()?;

        if json {
            writeln!(out, "{}", serde_json::to_string_pretty(&summaries)?)?;
            return Ok(());
        }

        if summaries.is_empty() {
            writeln!(out, "Queue is empty")?;
            return Ok(());
        }

        for summary in &summaries {
            writeln!(
                out,
                "{:<30} {:>8}  {:<30}  {}",
                summary.id,
                format_size(summary.size),
                truncate(summary.subject.as_deref().unwrap_or("(no subject)"), 30),
                summary.args.join(" ")
            )?;
        }
        writeln!(out)?;
        writeln!(out, "Total: {} queued", summaries.len())?;
        Ok(())
    }

    fn handle_show(&self, id: &str, json: bool, raw: bool, out: &mut dyn Write) -> Result<()> {
        let entry = self.store.load(&parse_id(id)?)?;

        if raw {
            out.write_all(&entry.payload)?;
            return Ok(());
        }

        let summary = entry.summary();
        if json {
            writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
            return Ok(());
        }

        writeln!(out, "ID:      {}", summary.id)?;
        if let Some(queued_at) = &summary.queued_at {
            writeln!(out, "Queued:  {}", queued_at)?;
        }
        writeln!(out, "Size:    {}", format_size(summary.size))?;
        if let Some(subject) = &summary.subject {
            writeln!(out, "Subject: {}", subject)?;
        }
        if let Some(to) = entry.header("To") {
            writeln!(out, "To:      {}", to)?;
        }
        writeln!(out, "Args:    {}", summary.args.join(" "))?;
        Ok(())
    }

    async fn handle_flush(
        &self,
        all: bool,
        ids: &[String],
        watch: bool,
        out: &mut dyn Write,
    ) -> Result<()> {
        let by_id = !all && !ids.is_empty();
        let report = if !by_id {
            self.flusher.flush_all().await?
        } else {
            let ids = ids.iter().map(|s| parse_id(s)).collect::<Result<Vec<_>>>()?;
            self.flusher.flush_ids(&ids).await
        };
        write_report(&report, out)?;

        if watch && !self.store.is_empty()? {
            let exit = self.watcher().run().await?;
            writeln!(out, "{}", describe_exit(exit))?;
        }

        // Explicitly named entries that do not exist are an error
        if by_id {
            if let Some(missing) = report.vanished.first() {
                return Err(SpoolError::EntryNotFound(missing.clone()));
            }
        }
        Ok(())
    }

    fn handle_remove(&self, ids: &[String], out: &mut dyn Write) -> Result<()> {
        let ids = ids.iter().map(|s| parse_id(s)).collect::<Result<Vec<_>>>()?;
        let mut missing = None;

        for id in ids {
            match self.store.remove(&id) {
                Ok(true) => writeln!(out, "Removed {}", id)?,
                Ok(false) => writeln!(out, "Skipped {} (being delivered)", id)?,
                Err(e) if e.is_not_found() => {
                    writeln!(out, "Not found: {}", id)?;
                    missing.get_or_insert(id);
                }
                Err(e) => return Err(e),
            }
        }

        match missing {
            Some(id) => Err(SpoolError::EntryNotFound(id)),
            None => Ok(()),
        }
    }

    fn handle_cleanup(&self, dry_run: bool, out: &mut dyn Write) -> Result<()> {
        let paths = if dry_run {
            self.store.orphans()?
        } else {
            self.store.purge_orphans()?
        };

        if paths.is_empty() {
            writeln!(out, "No orphaned files")?;
            return Ok(());
        }

        let verb = if dry_run { "Would delete" } else { "Deleted" };
        for path in &paths {
            writeln!(out, "{} {}", verb, path.display())?;
        }
        Ok(())
    }
}

fn parse_id(s: &str) -> Result<EntryId> {
    EntryId::parse(s).ok_or_else(|| SpoolError::Config(format!("Invalid entry ID: {}", s)))
}

fn write_report(report: &FlushReport, out: &mut dyn Write) -> Result<()> {
    for id in &report.delivered {
        writeln!(out, "Sent     {}", id)?;
    }
    for id in &report.deferred {
        writeln!(out, "Deferred {}", id)?;
    }
    for id in &report.busy {
        writeln!(out, "Busy     {}", id)?;
    }
    for id in &report.vanished {
        writeln!(out, "Gone     {}", id)?;
    }
    writeln!(
        out,
        "{} sent, {} deferred, {} busy",
        report.delivered.len(),
        report.deferred.len(),
        report.busy.len()
    )?;
    Ok(())
}

fn describe_exit(exit: WatcherExit) -> String {
    match exit {
        WatcherExit::AlreadyRunning => "Watcher already running".to_string(),
        WatcherExit::Drained { rounds } => format!("Queue empty after {} round(s)", rounds),
        WatcherExit::Interrupted { rounds } => {
            format!("Watcher stopped after {} round(s), mail still queued", rounds)
        }
    }
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
