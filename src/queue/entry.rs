//! Queue entry identifiers and records

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hasher};

/// Timestamp portion of every generated id
const ID_TIME_FORMAT: &str = "%Y-%m-%d-%H.%M.%S";

/// Unique queue entry identifier, also the filename stem of its files
///
/// Format: `YYYY-MM-DD-HH.MM.SS-<suffix>`, so lexical order is
/// approximately submission order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    /// Generate a fresh id from the local time and a random suffix
    pub fn generate() -> Self {
        Self(format!(
            "{}-{}",
            Local::now().format(ID_TIME_FORMAT),
            random_suffix()
        ))
    }

    /// Parse an id supplied by an operator
    ///
    /// Rejects anything that could escape the spool directory.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && !s.starts_with('.')
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
        valid.then(|| Self(s.to_string()))
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Submission time encoded in the id, if it has the generated shape
    pub fn queued_at(&self) -> Option<NaiveDateTime> {
        let stamp = self.0.get(..19)?;
        NaiveDateTime::parse_from_str(stamp, ID_TIME_FORMAT).ok()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Eight hex digits mixed from a per-call random hasher key, the clock,
/// the process id and a counter
fn random_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(nanos);
    hasher.write_u32(std::process::id());
    hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
    format!("{:08x}", hasher.finish() as u32)
}

/// A queued submission, both halves loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: EntryId,
    pub payload: Vec<u8>,
    pub args: Vec<String>,
}

impl QueueEntry {
    /// Value of the first matching header in the payload, unfolded
    pub fn header(&self, name: &str) -> Option<String> {
        let text = String::from_utf8_lossy(&self.payload);
        let mut value: Option<String> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }
            if let Some(current) = value.as_mut() {
                if line.starts_with([' ', '\t']) {
                    current.push(' ');
                    current.push_str(line.trim());
                    continue;
                }
                break;
            }
            if let Some((key, rest)) = line.split_once(':') {
                if key.eq_ignore_ascii_case(name) {
                    value = Some(rest.trim().to_string());
                }
            }
        }

        value
    }

    /// Listing view of this entry
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            id: self.id.clone(),
            queued_at: self.id.queued_at().map(|t| t.to_string()),
            size: self.payload.len(),
            subject: self.header("Subject"),
            args: self.args.clone(),
        }
    }
}

/// What `list` and `show` print for an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub queued_at: Option<String>,
    pub size: usize,
    pub subject: Option<String>,
    pub args: Vec<String>,
}
