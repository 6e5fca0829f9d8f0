//! Durable spool of pending submissions
//!
//! Each entry is a pair of sibling files in the spool directory:
//!
//! ```text
//! <queue_dir>/
//!   2024-05-01-09.14.03-3fa2c1d0.mail   # raw message bytes
//!   2024-05-01-09.14.03-3fa2c1d0.comm   # transport arguments, one per line
//!   2024-05-01-09.14.03-3fa2c1d0.tmp    # transient, renamed to .comm
//! ```
//!
//! Both files present means queued. The `.mail` file going away is the only
//! signal that delivery succeeded; the `.comm` file is removed after it, so a
//! `.comm` with no `.mail` is leftover metadata for manual cleanup.

mod entry;
mod lock;
mod store;

pub use entry::{EntryId, EntrySummary, QueueEntry};
pub use lock::{EntryLock, WatcherLock};
pub use store::{QueueStore, ARGS_EXT, PAYLOAD_EXT, TMP_EXT};
