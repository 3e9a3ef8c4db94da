use super::config::WorkloadConfig;
use super::pool::WorkerPool;
use crate::binspec::CompiledOperation;
use crate::core::{Value, WorkloadError};
use crate::mutation::{self, MutationExecutor};
use crate::rotation::{Rotator, now_secs};
use crate::store::{
    CtxPath, Filter, Key, QueryPolicy, ReadPolicy, Statement, Store, StoreConfig, WritePolicy,
    with_timeout,
};
use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const UDF_MODULE: &str = "sonic-functions";
pub const UDF_FUNCTION: &str = "fetchOrCreate2";
pub const UDF_EXPIRATION: Duration = Duration::from_secs(1440);

pub const AGGREGATE_MODULE: &str = "dsc-query";
pub const AGGREGATE_FUNCTION: &str = "genericQuery";
pub const AGGREGATE_BIN: &str = "globalBktDef";
pub const AGGREGATE_BUCKET_NAME: &str = "MONTHLY_CBU_DATA_BUCKET_OF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Write,
    MapWrite,
    Read,
    ShortQuery,
    LongQuery,
    AggregateQuery,
    UdfCall,
    MapRotate,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::MapWrite => "map_write",
            Self::Read => "read",
            Self::ShortQuery => "short_query",
            Self::LongQuery => "long_query",
            Self::AggregateQuery => "aggregate_query",
            Self::UdfCall => "udf_call",
            Self::MapRotate => "map_rotate",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Write {
        user_key: i64,
        ops: Vec<CompiledOperation>,
    },
    MapWrite {
        user_key: i64,
        payload: Vec<(Value, Value)>,
    },
    Read {
        user_key: i64,
    },
    Query {
        short: bool,
    },
    AggregateQuery,
    UdfCall {
        user_key: i64,
    },
    MapRotate {
        key: Key,
        entries: BTreeMap<Value, Value>,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Write { .. } => TaskKind::Write,
            Self::MapWrite { .. } => TaskKind::MapWrite,
            Self::Read { .. } => TaskKind::Read,
            Self::Query { short: true } => TaskKind::ShortQuery,
            Self::Query { short: false } => TaskKind::LongQuery,
            Self::AggregateQuery => TaskKind::AggregateQuery,
            Self::UdfCall { .. } => TaskKind::UdfCall,
            Self::MapRotate { .. } => TaskKind::MapRotate,
        }
    }

    /// Map-write task carrying the sample payload stamped with `now`.
    pub fn map_write(user_key: i64, now: i64, sentinel: i64) -> Self {
        Self::MapWrite {
            user_key,
            payload: mutation::sample_map_payload(now, sentinel),
        }
    }
}

/// Everything a worker needs, shared read-only by all workers.
pub struct TaskContext {
    store: Arc<dyn Store>,
    config: Arc<WorkloadConfig>,
    namespace: String,
    set: String,
    executor: MutationExecutor,
    rotator: Rotator,
    rotations: WorkerPool,
}

impl TaskContext {
    pub fn new(
        store: Arc<dyn Store>,
        store_config: &StoreConfig,
        config: Arc<WorkloadConfig>,
        rotations: WorkerPool,
    ) -> Self {
        let executor = MutationExecutor::new(store.clone(), store_config);
        let rotator = Rotator::new(store.clone(), config.window, &config.map_bin);
        Self {
            store,
            config,
            namespace: store_config.namespace.clone(),
            set: store_config.set.clone(),
            executor,
            rotator,
            rotations,
        }
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    pub fn rotations(&self) -> &WorkerPool {
        &self.rotations
    }

    pub fn key(&self, user_key: i64) -> Key {
        Key::new(&self.namespace, &self.set, user_key)
    }

    /// Run `task` to completion. Failures are logged here and never
    /// returned.
    ///
    /// Boxed because query tasks submit `MapRotate` tasks through this same
    /// entry point.
    pub fn run(self: Arc<Self>, task: Task) -> BoxFuture<'static, ()> {
        async move {
            match task {
                Task::Write { user_key, ops } => self.executor.write(user_key, ops).await,
                Task::MapWrite { user_key, payload } => {
                    self.executor
                        .write_map_payload(user_key, &self.config.map_bin, payload)
                        .await
                }
                Task::Read { user_key } => self.read(user_key).await,
                Task::Query { short } => self.query(short).await,
                Task::AggregateQuery => self.aggregate().await,
                Task::UdfCall { user_key } => self.call_function(user_key).await,
                Task::MapRotate { key, entries } => self.rotator.rotate(&key, &entries).await,
            }
        }
        .boxed()
    }

    pub fn query_policy(&self, short: bool) -> QueryPolicy {
        QueryPolicy::default()
            .short(short)
            .socket_timeout(self.config.query.socket_timeout)
    }

    async fn read(&self, user_key: i64) {
        let key = self.key(user_key);
        let policy = ReadPolicy::default();
        match with_timeout(policy.total_timeout, self.store.get(&key, &policy)).await {
            Ok(record) => debug!(key = %key, bins = record.bins.len(), "record read"),
            Err(WorkloadError::NotFound) => {}
            Err(err) => warn!(key = %key, error = %err, "unable to read record"),
        }
    }

    /// Filter used by short and long queries.
    pub fn query_statement(&self) -> Statement {
        let filter = match &self.config.query.index_bin {
            Some(bin) => Filter::equal(bin, self.config.query.index_value),
            None => Filter::contains_map_key(&self.config.map_bin, self.config.window.sentinel),
        };
        Statement::new(&self.namespace, &self.set).filter(filter)
    }

    pub fn aggregate_statement(&self) -> Statement {
        let filter = Filter::equal(AGGREGATE_BIN, AGGREGATE_BUCKET_NAME).with_ctx(vec![
            CtxPath::ListIndex(0),
            CtxPath::MapKey(Value::from("name")),
        ]);
        Statement::new(&self.namespace, &self.set).filter(filter)
    }

    /// Stream query results and hand records with elapsed map entries to the
    /// rotation pool. A stream that stalls longer than the socket timeout is
    /// abandoned.
    async fn query(self: &Arc<Self>, short: bool) {
        let policy = self.query_policy(short);
        let statement = self.query_statement();
        let mut records = match with_timeout(
            policy.total_timeout,
            self.store.query(&statement, &policy),
        )
        .await
        {
            Ok(records) => records,
            Err(err) => {
                warn!(short, error = %err, "unable to start query");
                return;
            }
        };

        let mut seen = 0usize;
        let mut rotations = 0usize;
        loop {
            let next = match tokio::time::timeout(policy.socket_timeout, records.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        short,
                        records = seen,
                        timeout = ?policy.socket_timeout,
                        "query stalled, abandoning"
                    );
                    break;
                }
            };
            let record = match next {
                None => break,
                Some(Ok(record)) => record,
                Some(Err(err)) => {
                    warn!(error = %err, "query result failed");
                    continue;
                }
            };
            seen += 1;

            let Some(entries) = self.rotator.elapsed_map(&record, now_secs()) else {
                continue;
            };
            let task = Task::MapRotate {
                key: record.key.clone(),
                entries: entries.clone(),
            };
            if let Err(err) = self.rotations.submit(self.clone().run(task)).await {
                warn!(key = %record.key, error = %err, "unable to schedule rotation");
                break;
            }
            rotations += 1;
        }
        debug!(short, records = seen, rotations, "query finished");
    }

    async fn aggregate(&self) {
        let policy = QueryPolicy::default();
        let statement = self.aggregate_statement();
        match with_timeout(
            policy.total_timeout,
            self.store
                .query_aggregate(&statement, &policy, AGGREGATE_MODULE, AGGREGATE_FUNCTION),
        )
        .await
        {
            Ok(result) => debug!(result = %result, "aggregate query finished"),
            Err(err) => warn!(error = %err, "unable to run aggregate query"),
        }
    }

    async fn call_function(&self, user_key: i64) {
        let key = self.key(user_key);
        let policy = WritePolicy::with_expiration(UDF_EXPIRATION).max_retries(0);
        let args = [Value::from("color"), Value::from("BLACK"), Value::Int(10000)];
        match with_timeout(
            policy.total_timeout,
            self.store
                .execute(&key, UDF_MODULE, UDF_FUNCTION, &args, &policy),
        )
        .await
        {
            Ok(result) => debug!(key = %key, result = %result, "function call finished"),
            Err(err) => warn!(key = %key, error = %err, "unable to call function"),
        }
    }
}
