//! Filesystem queue store
//!
//! Creation is append-only (payload first, then an atomically renamed
//! arguments file) and deletion is two-step (payload first, then arguments).
//! Every read rescans the directory, so concurrent processes see each
//! other's changes.

use super::entry::{EntryId, QueueEntry};
use super::lock::EntryLock;
use crate::{Result, SpoolError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Payload file extension
pub const PAYLOAD_EXT: &str = "mail";

/// Arguments file extension
pub const ARGS_EXT: &str = "comm";

/// In-flight arguments file extension
pub const TMP_EXT: &str = "tmp";

/// Age after which a leftover `.tmp` file is considered abandoned
const STALE_TMP_AGE: Duration = Duration::from_secs(60);

/// Attempts at finding an unused id before giving up
const MAX_ID_ATTEMPTS: usize = 16;

/// Spool directory handle
#[derive(Debug, Clone)]
pub struct QueueStore {
    dir: PathBuf,
}

impl QueueStore {
    /// Create a store over a spool directory; nothing is touched until use
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The spool directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload_path(&self, id: &EntryId) -> PathBuf {
        self.file_path(id, PAYLOAD_EXT)
    }

    pub fn args_path(&self, id: &EntryId) -> PathBuf {
        self.file_path(id, ARGS_EXT)
    }

    fn tmp_path(&self, id: &EntryId) -> PathBuf {
        self.file_path(id, TMP_EXT)
    }

    fn file_path(&self, id: &EntryId, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id.as_str(), ext))
    }

    fn ensure_dir(&self) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&self.dir).map_err(|source| SpoolError::SpoolDir {
            path: self.dir.clone(),
            source,
        })
    }

    /// Queue a submission and return its new id.
    ///
    /// The payload is written first. The arguments go to `<id>.tmp` and are
    /// renamed to `<id>.comm`, so an arguments file never has partial content.
    pub fn enqueue(&self, payload: &[u8], args: &[String]) -> Result<EntryId> {
        if let Some(bad) = args.iter().find(|a| a.contains(['\n', '\r'])) {
            return Err(SpoolError::Other(format!(
                "transport argument {:?} contains a line break",
                bad
            )));
        }

        self.ensure_dir()?;
        let (id, file) = self.create_payload_file()?;

        if let Err(e) = self.write_entry(&id, file, payload, args) {
            let _ = fs::remove_file(self.payload_path(&id));
            let _ = fs::remove_file(self.tmp_path(&id));
            return Err(e);
        }

        tracing::info!(
            id = %id,
            bytes = payload.len(),
            args = ?args,
            "Queued mail"
        );
        Ok(id)
    }

    fn create_payload_file(&self) -> Result<(EntryId, File)> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = EntryId::generate();
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.payload_path(&id))
            {
                Ok(file) => return Ok((id, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SpoolError::Other(format!(
            "could not find an unused queue id in {}",
            self.dir.display()
        )))
    }

    fn write_entry(&self, id: &EntryId, mut file: File, payload: &[u8], args: &[String]) -> Result<()> {
        file.write_all(payload)?;
        file.sync_all()?;

        let tmp = self.tmp_path(id);
        let mut comm = File::create(&tmp)?;
        for arg in args {
            writeln!(comm, "{}", arg)?;
        }
        comm.sync_all()?;
        drop(comm);

        fs::rename(&tmp, self.args_path(id))?;
        Ok(())
    }

    /// Queued ids in lexical (roughly chronological) order.
    ///
    /// Scans for payload files; a missing spool directory is an empty queue.
    pub fn list(&self) -> Result<Vec<EntryId>> {
        let mut ids: Vec<EntryId> = self
            .scan(PAYLOAD_EXT)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.list()?.is_empty())
    }

    fn scan(&self, ext: &str) -> Result<Vec<(EntryId, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SpoolError::SpoolDir {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push((EntryId::from(stem), path));
            }
        }
        Ok(found)
    }

    /// Both files of the entry are present
    pub fn exists(&self, id: &EntryId) -> bool {
        self.payload_path(id).is_file() && self.args_path(id).is_file()
    }

    /// Transport arguments, one per line
    pub fn read_args(&self, id: &EntryId) -> Result<Vec<String>> {
        let text = fs::read_to_string(self.args_path(id)).map_err(|e| not_found(e, id))?;
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Raw payload bytes
    pub fn read_payload(&self, id: &EntryId) -> Result<Vec<u8>> {
        fs::read(self.payload_path(id)).map_err(|e| not_found(e, id))
    }

    /// Both halves of an entry
    pub fn load(&self, id: &EntryId) -> Result<QueueEntry> {
        Ok(QueueEntry {
            id: id.clone(),
            args: self.read_args(id)?,
            payload: self.read_payload(id)?,
        })
    }

    /// Delete the payload, then the arguments file.
    ///
    /// Failing to remove the arguments file after the payload is gone is
    /// logged, not returned: the entry counts as delivered either way.
    pub fn delete_entry(&self, id: &EntryId) -> Result<()> {
        fs::remove_file(self.payload_path(id)).map_err(|e| not_found(e, id))?;

        match fs::remove_file(self.args_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    id = %id,
                    error = %e,
                    "Payload removed but arguments file left behind"
                );
            }
        }

        tracing::debug!(id = %id, "Removed queue entry");
        Ok(())
    }

    /// Operator-driven removal of a queued entry.
    ///
    /// Takes the entry lock first, so it never pulls an entry out from under
    /// a running flush. Returns `false` if a flush currently holds it.
    pub fn remove(&self, id: &EntryId) -> Result<bool> {
        if !self.payload_path(id).is_file() {
            return Err(SpoolError::EntryNotFound(id.clone()));
        }
        let lock = match EntryLock::try_acquire(self.args_path(id)) {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => return Ok(false),
            // A payload with no arguments file can't be in flight
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        self.delete_entry(id)?;
        if let Some(lock) = lock {
            lock.release()?;
        }
        Ok(true)
    }

    /// Leftovers that are not valid queue entries: arguments files whose
    /// payload is gone, and abandoned `.tmp` files
    pub fn orphans(&self) -> Result<Vec<PathBuf>> {
        let mut orphans: Vec<PathBuf> = self
            .scan(ARGS_EXT)?
            .into_iter()
            .filter(|(id, _)| !self.payload_path(id).exists())
            .map(|(_, path)| path)
            .collect();

        let now = SystemTime::now();
        for (_, path) in self.scan(TMP_EXT)? {
            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.is_some_and(|age| age >= STALE_TMP_AGE) {
                orphans.push(path);
            }
        }

        orphans.sort();
        Ok(orphans)
    }

    /// Delete everything [`orphans`](Self::orphans) reports
    pub fn purge_orphans(&self) -> Result<Vec<PathBuf>> {
        let orphans = self.orphans()?;
        for path in &orphans {
            match fs::remove_file(path) {
                Ok(()) => tracing::info!(path = %path.display(), "Removed orphaned file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(orphans)
    }
}

fn not_found(err: io::Error, id: &EntryId) -> SpoolError {
    if err.kind() == io::ErrorKind::NotFound {
        SpoolError::EntryNotFound(id.clone())
    } else {
        SpoolError::Io(err)
    }
}
