//! msmtp configuration lookup
//!
//! Works out which SMTP host and port a transport invocation is going to talk
//! to, without running the transport. The configuration file is scanned top to
//! bottom the way msmtp reads it, tracking the current `account` block.
//!
//! # Example
//!
//! ```no_run
//! use msmtprc::{default_config_path, resolve};
//!
//! let args = vec!["-a".to_string(), "work".to_string(), "bob@example.com".to_string()];
//! let dest = resolve(&args, default_config_path().as_deref())?;
//! println!("{} via {}", dest.account, dest.key());
//! # Ok::<(), msmtprc::Error>(())
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Port used when neither the account nor `defaults` set one
pub const DEFAULT_PORT: u16 = 25;

/// Account looked up when nothing else selects one
pub const FALLBACK_ACCOUNT: &str = "default";

/// Errors that can occur while resolving a destination
#[derive(Error, Debug)]
pub enum Error {
    #[error("no msmtp configuration file found")]
    NoConfig,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("account {0} not found in configuration")]
    UnknownAccount(String),

    #[error("no host configured for account {0}")]
    MissingHost(String),

    #[error("invalid port {value:?} on line {line}")]
    InvalidPort { value: String, line: usize },

    #[error("option {0} requires an argument")]
    MissingValue(String),
}

/// Result type for configuration lookups
pub type Result<T> = std::result::Result<T, Error>;

/// Where a transport invocation will connect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub account: String,
}

impl Destination {
    /// Connectivity identity, `host:port`
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.account)
    }
}

/// Account and configuration file picked out of a transport argument vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub account: Option<String>,
    pub config: Option<PathBuf>,
}

impl Selection {
    /// Scan `args` for `-a`/`--account` and `-C`/`--file`.
    ///
    /// Short forms take the value attached (`-awork`) or, when nothing is
    /// attached, the next token. Long forms take `--account=work`, or the next
    /// token for `--account` and `--account=`. Scanning stops at `--`.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut selection = Self::default();
        let mut iter = args.iter().map(AsRef::as_ref);

        while let Some(arg) = iter.next() {
            if arg == "--" {
                break;
            }

            if let Some(value) = option_value(arg, "-a", "--account") {
                let account = match value {
                    Some(v) => v.to_string(),
                    None => next_value(&mut iter, arg)?,
                };
                selection.account = Some(account);
            } else if let Some(value) = option_value(arg, "-C", "--file") {
                let path = match value {
                    Some(v) => v.to_string(),
                    None => next_value(&mut iter, arg)?,
                };
                selection.config = Some(expand_home(&path));
            }
        }

        Ok(selection)
    }
}

/// Matches `arg` against a short and a long option.
///
/// Returns `Some(Some(v))` for an attached value, `Some(None)` when the value
/// is the following token, and `None` when `arg` is some other argument.
fn option_value<'a>(arg: &'a str, short: &str, long: &str) -> Option<Option<&'a str>> {
    if arg == long {
        return Some(None);
    }
    if let Some(rest) = arg.strip_prefix(long).and_then(|r| r.strip_prefix('=')) {
        return Some(Some(rest).filter(|v| !v.is_empty()));
    }
    if arg.starts_with("--") {
        return None;
    }
    arg.strip_prefix(short)
        .map(|rest| Some(rest).filter(|v| !v.is_empty()))
}

fn next_value<'a>(iter: &mut impl Iterator<Item = &'a str>, option: &str) -> Result<String> {
    iter.next()
        .map(str::to_string)
        .ok_or_else(|| Error::MissingValue(option.to_string()))
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// The configuration file msmtp would read with no `-C`
///
/// `~/.msmtprc` if present, otherwise `$XDG_CONFIG_HOME/msmtp/config`.
pub fn default_config_path() -> Option<PathBuf> {
    let candidates = [
        dirs::home_dir().map(|home| home.join(".msmtprc")),
        dirs::config_dir().map(|dir| dir.join("msmtp").join("config")),
    ];
    candidates.into_iter().flatten().find(|path| path.is_file())
}

#[derive(Debug, Clone, Default)]
struct Block {
    host: Option<String>,
    port: Option<u16>,
}

impl Block {
    fn inherit(&mut self, parent: &Block) {
        if parent.host.is_some() {
            self.host = parent.host.clone();
        }
        if parent.port.is_some() {
            self.port = parent.port;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Defaults,
    Account(String),
}

/// Parsed view of the directives that matter for routing
#[derive(Debug, Clone, Default)]
pub struct Config {
    defaults: Block,
    accounts: HashMap<String, Block>,
    default_account: Option<String>,
}

impl Config {
    /// Read and parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse configuration text.
    ///
    /// Recognised: `defaults`, `account <name>`, `account default: <name>`,
    /// `host <value>` and `port <value>`. Everything else is skipped. Settings
    /// that appear before the first block belong to `defaults`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut scope = Scope::Defaults;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, rest) = match line.split_once(char::is_whitespace) {
                Some((key, rest)) => (key, rest.trim()),
                None => (line, ""),
            };

            match key {
                "defaults" => scope = Scope::Defaults,
                "account" => {
                    if let Some(target) = default_mapping(rest) {
                        if config.default_account.is_none() {
                            config.default_account = Some(target.to_string());
                        }
                        continue;
                    }
                    // `account name : base1, base2` starts from the listed
                    // accounts' settings, later ones winning
                    let (name, bases) = match rest.split_once(':') {
                        Some((name, bases)) => (name.trim(), bases),
                        None => (rest, ""),
                    };
                    if name.is_empty() {
                        continue;
                    }
                    let mut block = Block::default();
                    for base in bases.split(',').map(str::trim).filter(|b| !b.is_empty()) {
                        if let Some(parent) = config.accounts.get(base) {
                            block.inherit(parent);
                        }
                    }
                    config.accounts.insert(name.to_string(), block);
                    scope = Scope::Account(name.to_string());
                }
                "host" => {
                    let host = rest.split_whitespace().next().map(str::to_string);
                    config.block_mut(&scope).host = host;
                }
                "port" => {
                    let port = rest.parse::<u16>().map_err(|_| Error::InvalidPort {
                        value: rest.to_string(),
                        line: index + 1,
                    })?;
                    config.block_mut(&scope).port = Some(port);
                }
                _ => {}
            }
        }

        Ok(config)
    }

    fn block_mut(&mut self, scope: &Scope) -> &mut Block {
        match scope {
            Scope::Defaults => &mut self.defaults,
            Scope::Account(name) => self.accounts.entry(name.clone()).or_default(),
        }
    }

    /// First `account default: <name>` mapping, if any
    pub fn default_account(&self) -> Option<&str> {
        self.default_account.as_deref()
    }

    /// Declared account names, sorted
    pub fn accounts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.accounts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Destination for an explicitly selected account, or the default one
    pub fn destination(&self, account: Option<&str>) -> Result<Destination> {
        let name = account
            .or(self.default_account.as_deref())
            .unwrap_or(FALLBACK_ACCOUNT);

        let block = self
            .accounts
            .get(name)
            .ok_or_else(|| Error::UnknownAccount(name.to_string()))?;

        let host = block
            .host
            .clone()
            .or_else(|| self.defaults.host.clone())
            .ok_or_else(|| Error::MissingHost(name.to_string()))?;
        let port = block.port.or(self.defaults.port).unwrap_or(DEFAULT_PORT);

        Ok(Destination {
            host,
            port,
            account: name.to_string(),
        })
    }
}

/// `default: work` or `default : work` yields `work`
fn default_mapping(rest: &str) -> Option<&str> {
    let after = rest.strip_prefix("default")?.trim_start();
    let target = after.strip_prefix(':')?.trim();
    (!target.is_empty()).then_some(target)
}

/// Resolve the destination for a transport argument vector.
///
/// `fallback` is the configuration file used when `args` carry no `-C`.
pub fn resolve<S: AsRef<str>>(args: &[S], fallback: Option<&Path>) -> Result<Destination> {
    let selection = Selection::from_args(args)?;
    let path = selection
        .config
        .or_else(|| fallback.map(Path::to_path_buf))
        .ok_or(Error::NoConfig)?;
    Config::load(&path)?.destination(selection.account.as_deref())
}
