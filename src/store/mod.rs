//! The store collaborator.
//!
//! The workload core never talks to a concrete client. It sees a [`Store`]:
//! keyed records made of named bins, composite `operate` writes, filtered
//! queries returning a lazy record stream, and server-side function calls.
//! [`memory::MemoryStore`] is the in-process backend.

pub mod config;
pub mod memory;

use crate::core::{Result, Value, WorkloadError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

pub use config::StoreConfig;
pub use memory::MemoryStore;

/// Named fields of a record.
pub type Bins = BTreeMap<String, Value>;

/// Lazy sequence of query results. Each item may fail independently.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Record address: namespace, set and an integer user key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub namespace: String,
    pub set: String,
    pub user_key: i64,
}

impl Key {
    pub fn new(namespace: &str, set: &str, user_key: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            set: set.to_string(),
            user_key,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.set, self.user_key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Key,
    pub bins: Bins,
    pub generation: u32,
}

impl Record {
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }
}

/// How a map put treats an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapWriteMode {
    /// Create the entry or replace it.
    Update,
    /// Replace only; fails if the entry is missing.
    UpdateOnly,
    /// Create only; fails if the entry already exists.
    CreateOnly,
}

/// One step of a composite `operate` call. Steps apply in order and the
/// whole call is all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Put {
        bin: String,
        value: Value,
    },
    MapPut {
        bin: String,
        key: Value,
        value: Value,
        mode: MapWriteMode,
    },
    MapRemoveByKey {
        bin: String,
        key: Value,
    },
}

impl Operation {
    pub fn put(bin: &str, value: impl Into<Value>) -> Self {
        Self::Put {
            bin: bin.to_string(),
            value: value.into(),
        }
    }

    pub fn map_put(
        bin: &str,
        key: impl Into<Value>,
        value: impl Into<Value>,
        mode: MapWriteMode,
    ) -> Self {
        Self::MapPut {
            bin: bin.to_string(),
            key: key.into(),
            value: value.into(),
            mode,
        }
    }

    pub fn map_remove_by_key(bin: &str, key: impl Into<Value>) -> Self {
        Self::MapRemoveByKey {
            bin: bin.to_string(),
            key: key.into(),
        }
    }

    pub fn bin(&self) -> &str {
        match self {
            Self::Put { bin, .. } | Self::MapPut { bin, .. } | Self::MapRemoveByKey { bin, .. } => {
                bin
            }
        }
    }
}

/// Wait for the next query record before the query is abandoned.
pub const DEFAULT_QUERY_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Read settings. `socket_timeout` and `max_retries` are passed through to a
/// networked backend; only `total_timeout` is enforced client side.
#[derive(Debug, Clone)]
pub struct ReadPolicy {
    pub total_timeout: Duration,
    pub socket_timeout: Duration,
    pub max_retries: u32,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(5),
            max_retries: 0,
        }
    }
}

/// Write settings. `socket_timeout`, `send_key` and `max_retries` are passed
/// through to a networked backend; `expiration` and `total_timeout` are
/// honoured by every backend.
#[derive(Debug, Clone)]
pub struct WritePolicy {
    /// Record time-to-live. Zero means the record never expires.
    pub expiration: Duration,
    pub total_timeout: Duration,
    pub socket_timeout: Duration,
    /// Store the user key alongside the digest.
    pub send_key: bool,
    pub max_retries: u32,
}

impl WritePolicy {
    /// Write policy with the given record expiration and 2s timeouts.
    pub fn with_expiration(expiration: Duration) -> Self {
        Self {
            expiration,
            total_timeout: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(2),
            send_key: true,
            max_retries: 2,
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Query settings.
///
/// `short_query`, `max_retries` and `sleep_between_retries` are hints for a
/// networked backend; [`memory::MemoryStore`] answers every query in full on
/// the first attempt.
#[derive(Debug, Clone)]
pub struct QueryPolicy {
    /// Short queries trade completeness for latency on the server.
    pub short_query: bool,
    pub max_retries: u32,
    pub sleep_between_retries: Duration,
    /// Bound on starting a query or running an aggregate.
    pub total_timeout: Duration,
    /// Longest wait for the next record of a started query.
    pub socket_timeout: Duration,
}

impl QueryPolicy {
    pub fn short(mut self, short_query: bool) -> Self {
        self.short_query = short_query;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            short_query: false,
            max_retries: 2,
            sleep_between_retries: Duration::from_millis(300),
            total_timeout: Duration::from_secs(30),
            socket_timeout: DEFAULT_QUERY_SOCKET_TIMEOUT,
        }
    }
}

/// Step into a nested bin value before a filter comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum CtxPath {
    ListIndex(usize),
    MapKey(Value),
}

/// Secondary-index predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The (possibly nested) bin value equals `value`.
    Equal {
        bin: String,
        value: Value,
        ctx: Vec<CtxPath>,
    },
    /// The map bin has an entry keyed by `key`.
    ContainsMapKey { bin: String, key: Value },
}

impl Filter {
    pub fn equal(bin: &str, value: impl Into<Value>) -> Self {
        Self::Equal {
            bin: bin.to_string(),
            value: value.into(),
            ctx: Vec::new(),
        }
    }

    pub fn contains_map_key(bin: &str, key: impl Into<Value>) -> Self {
        Self::ContainsMapKey {
            bin: bin.to_string(),
            key: key.into(),
        }
    }

    pub fn with_ctx(mut self, path: Vec<CtxPath>) -> Self {
        if let Self::Equal { ctx, .. } = &mut self {
            *ctx = path;
        }
        self
    }

    pub fn matches(&self, bins: &Bins) -> bool {
        match self {
            Self::Equal { bin, value, ctx } => {
                let mut current = match bins.get(bin) {
                    Some(v) => v,
                    None => return false,
                };
                for step in ctx {
                    let next = match step {
                        CtxPath::ListIndex(idx) => current.as_list().and_then(|l| l.get(*idx)),
                        CtxPath::MapKey(key) => current.as_map().and_then(|m| m.get(key)),
                    };
                    current = match next {
                        Some(v) => v,
                        None => return false,
                    };
                }
                current == value
            }
            Self::ContainsMapKey { bin, key } => bins
                .get(bin)
                .and_then(Value::as_map)
                .is_some_and(|m| m.contains_key(key)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub namespace: String,
    pub set: String,
    pub filter: Option<Filter>,
}

impl Statement {
    pub fn new(namespace: &str, set: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            set: set.to_string(),
            filter: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Client-facing surface of the key-value store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a whole record. Missing records fail with
    /// [`WorkloadError::NotFound`].
    async fn get(&self, key: &Key, policy: &ReadPolicy) -> Result<Record>;

    /// Apply `ops` to one record as a single atomic update.
    async fn operate(&self, key: &Key, ops: &[Operation], policy: &WritePolicy) -> Result<()>;

    async fn query(&self, statement: &Statement, policy: &QueryPolicy) -> Result<RecordStream>;

    /// Run a registered aggregate function over the records a statement
    /// selects.
    async fn query_aggregate(
        &self,
        statement: &Statement,
        policy: &QueryPolicy,
        module: &str,
        function: &str,
    ) -> Result<Value>;

    /// Run a registered record function against one key.
    async fn execute(
        &self,
        key: &Key,
        module: &str,
        function: &str,
        args: &[Value],
        policy: &WritePolicy,
    ) -> Result<Value>;
}

/// Bound a store call by `limit`, mapping expiry to a timeout error.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| WorkloadError::Timeout(format!("store call exceeded {:?}", limit)))?
}
