//! Advisory file locks used as cross-process mutexes
//!
//! Both locks are exclusive and non-blocking: whoever gets there first wins
//! and everyone else backs off immediately. A lock is released by
//! [`release`](EntryLock::release), when the guard goes out of scope, or when
//! the process exits.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// An `flock`-style exclusive lock on an open file
#[derive(Debug)]
struct Flock {
    file: File,
    path: PathBuf,
    held: bool,
}

impl Flock {
    fn try_lock(file: File, path: &Path) -> io::Result<Option<Self>> {
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
                held: true,
            })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn release(&mut self) -> io::Result<()> {
        if self.held {
            self.held = false;
            FileExt::unlock(&self.file)?;
        }
        Ok(())
    }
}

impl Drop for Flock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Per-entry lock, taken on the entry's arguments file for one flush attempt
#[derive(Debug)]
pub struct EntryLock(Flock);

impl EntryLock {
    /// Try to lock an existing arguments file.
    ///
    /// `Ok(None)` means another sender holds it. A missing file is an
    /// `io::ErrorKind::NotFound` error.
    pub fn try_acquire(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Flock::try_lock(file, path)?.map(Self))
    }

    /// Path of the locked file
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    /// Release the lock now rather than at end of scope
    pub fn release(mut self) -> io::Result<()> {
        self.0.release()
    }
}

/// Process-lifetime lock that keeps a single watcher running
#[derive(Debug)]
pub struct WatcherLock(Flock);

impl WatcherLock {
    /// Try to lock the well-known watcher file, creating it if absent.
    ///
    /// `Ok(None)` means another watcher is running.
    pub fn try_acquire(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    create_private_dir(parent)?;
                }
                OpenOptions::new()
                    .read(true)
                    .append(true)
                    .create(true)
                    .open(path)?
            }
            Err(e) => return Err(e),
        };
        Ok(Flock::try_lock(file, path)?.map(Self))
    }

    /// Path of the locked file
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    /// Release the lock now rather than at end of scope
    pub fn release(mut self) -> io::Result<()> {
        self.0.release()
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
