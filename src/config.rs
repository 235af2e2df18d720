//! Client configuration and backend capability flags

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Which backend variant a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Database lives in this process
    #[default]
    InProcess,
    /// Local database served with the behavior of a remote peer server
    EmulatedRemote,
}

impl BackendKind {
    /// Capability preset of this backend variant
    pub fn capabilities(&self) -> Capabilities {
        match self {
            BackendKind::InProcess => Capabilities::in_process(),
            BackendKind::EmulatedRemote => Capabilities::remote_peer(),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "in-process" | "local" => Ok(BackendKind::InProcess),
            "emulated-remote" | "remote" | "peer-server" => Ok(BackendKind::EmulatedRemote),
            other => Err(Error::Configuration(format!("unknown backend: {other}"))),
        }
    }
}

/// Backend behaviors that differ between variants. Each flag is a declared,
/// tested policy rather than a conditional at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `Connection::db` returns the same view instance until the next
    /// transaction
    pub caches_current_db: bool,
    /// create/delete database is available
    pub database_admin: bool,
    /// as-of/since may be applied to a speculative (`with`) view
    pub filters_on_speculative: bool,
    /// Temp ids are resolved in-process; `TxReport::temp_ids` stays empty
    pub resolves_temp_ids_locally: bool,
    /// AVET scans need `:db/index` or `:db/unique` on the attribute
    pub avet_requires_index: bool,
}

impl Capabilities {
    pub fn in_process() -> Self {
        Self {
            caches_current_db: true,
            database_admin: true,
            filters_on_speculative: true,
            resolves_temp_ids_locally: true,
            avet_requires_index: false,
        }
    }

    pub fn remote_peer() -> Self {
        Self {
            caches_current_db: false,
            database_admin: false,
            filters_on_speculative: false,
            resolves_temp_ids_locally: false,
            avet_requires_index: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::in_process()
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// System name the databases belong to
    pub system: String,
    pub backend: BackendKind,
    /// Per-operation deadline for reads; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Bound on `Connection::sync`
    pub sync_timeout: Duration,
    /// Limit used when a read does not set one
    pub default_limit: i64,
    /// Page size of streamed results
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            system: "datom-view".to_string(),
            backend: BackendKind::InProcess,
            timeout: None,
            sync_timeout: Duration::from_secs(10),
            default_limit: 1000,
            chunk_size: 1000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `DATOM_*` environment variables, falling back
    /// to defaults for unset ones
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let system = lookup("DATOM_SYSTEM").unwrap_or(defaults.system);
        let backend = match lookup("DATOM_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.backend,
        };
        let timeout = match parse_var::<u64>(&lookup, "DATOM_TIMEOUT_MS")? {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.timeout,
        };
        let sync_timeout = parse_var::<u64>(&lookup, "DATOM_SYNC_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.sync_timeout);
        let default_limit =
            parse_var::<i64>(&lookup, "DATOM_DEFAULT_LIMIT")?.unwrap_or(defaults.default_limit);
        let chunk_size =
            parse_var::<usize>(&lookup, "DATOM_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size);

        let config = Self {
            system,
            backend,
            timeout,
            sync_timeout,
            default_limit,
            chunk_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no operation could honor
    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 || self.default_limit < -1 {
            return Err(Error::Configuration(format!(
                "default limit must be positive or -1, got {}",
                self.default_limit
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk size must be positive".to_string()));
        }
        Ok(())
    }

    /// Capability preset of the configured backend
    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Configuration(format!("invalid {name}: {e}")))
        })
        .transpose()
}
