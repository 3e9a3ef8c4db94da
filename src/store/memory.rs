use super::{
    Bins, Key, MapWriteMode, Operation, QueryPolicy, ReadPolicy, Record, RecordStream, Statement,
    Store, StoreConfig, WritePolicy,
};
use crate::core::{Result, Value, WorkloadError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Record function: mutates the target record's bins and returns a value.
/// Leaving the bins empty deletes the record.
pub type RecordFunction = Arc<dyn Fn(&mut Bins, &[Value]) -> Result<Value> + Send + Sync>;

/// Aggregate function over the records a query selected.
pub type AggregateFunction = Arc<dyn Fn(&[Record]) -> Result<Value> + Send + Sync>;

struct StoredRecord {
    bins: Bins,
    generation: u32,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    operates: AtomicU64,
    queries: AtomicU64,
    aggregates: AtomicU64,
    executes: AtomicU64,
}

/// In-process store backend.
///
/// Holds records in a map guarded by an async lock. Composite writes are
/// applied to a copy of the record and only swapped in when every step
/// succeeded, so a rejected step leaves the record untouched.
pub struct MemoryStore {
    records: RwLock<HashMap<Key, StoredRecord>>,
    functions: StdRwLock<HashMap<String, RecordFunction>>,
    aggregates: StdRwLock<HashMap<String, AggregateFunction>>,
    counters: Counters,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            functions: StdRwLock::new(HashMap::new()),
            aggregates: StdRwLock::new(HashMap::new()),
            counters: Counters::default(),
            latency: None,
        }
    }

    /// Validate the configuration the way a remote client would before
    /// opening connections.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        config.validate().map_err(WorkloadError::Connection)?;
        debug!(endpoint = %config.to_url(), "memory store connected");
        Ok(Self::new())
    }

    /// Delay every call by `latency` to emulate a network round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn register_function(&self, module: &str, name: &str, function: RecordFunction) {
        if let Ok(mut functions) = self.functions.write() {
            functions.insert(qualified(module, name), function);
        }
    }

    pub fn register_aggregate(&self, module: &str, name: &str, function: AggregateFunction) {
        if let Ok(mut aggregates) = self.aggregates.write() {
            aggregates.insert(qualified(module, name), function);
        }
    }

    pub async fn record_count(&self) -> usize {
        let now = Instant::now();
        let records = self.records.read().await;
        records.values().filter(|r| !r.is_expired(now)).count()
    }

    pub async fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            records: self.record_count().await,
            gets: self.counters.gets.load(Ordering::Relaxed),
            operates: self.counters.operates.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
            aggregates: self.counters.aggregates.load(Ordering::Relaxed),
            executes: self.counters.executes.load(Ordering::Relaxed),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn select(&self, statement: &Statement) -> Vec<Record> {
        let now = Instant::now();
        let records = self.records.read().await;
        let mut selected: Vec<Record> = records
            .iter()
            .filter(|(key, stored)| {
                key.namespace == statement.namespace
                    && key.set == statement.set
                    && !stored.is_expired(now)
                    && statement
                        .filter
                        .as_ref()
                        .is_none_or(|filter| filter.matches(&stored.bins))
            })
            .map(|(key, stored)| Record {
                key: key.clone(),
                bins: stored.bins.clone(),
                generation: stored.generation,
            })
            .collect();
        selected.sort_by(|a, b| a.key.cmp(&b.key));
        selected
    }

    fn store_bins(
        records: &mut HashMap<Key, StoredRecord>,
        key: &Key,
        bins: Bins,
        generation: u32,
        expiration: Duration,
        now: Instant,
    ) {
        if bins.is_empty() {
            records.remove(key);
            return;
        }
        let expires_at = if expiration.is_zero() {
            None
        } else {
            Some(now + expiration)
        };
        records.insert(
            key.clone(),
            StoredRecord {
                bins,
                generation,
                expires_at,
            },
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Key, _policy: &ReadPolicy) -> Result<Record> {
        self.simulate_latency().await;
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let records = self.records.read().await;
        match records.get(key) {
            Some(stored) if !stored.is_expired(Instant::now()) => Ok(Record {
                key: key.clone(),
                bins: stored.bins.clone(),
                generation: stored.generation,
            }),
            _ => Err(WorkloadError::NotFound),
        }
    }

    async fn operate(&self, key: &Key, ops: &[Operation], policy: &WritePolicy) -> Result<()> {
        self.simulate_latency().await;
        self.counters.operates.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut records = self.records.write().await;
        let (mut bins, generation) = match records.get(key) {
            Some(stored) if !stored.is_expired(now) => (stored.bins.clone(), stored.generation),
            _ => (Bins::new(), 0),
        };

        for op in ops {
            apply_operation(&mut bins, op)?;
        }

        Self::store_bins(
            &mut records,
            key,
            bins,
            generation.wrapping_add(1),
            policy.expiration,
            now,
        );
        Ok(())
    }

    async fn query(&self, statement: &Statement, _policy: &QueryPolicy) -> Result<RecordStream> {
        self.simulate_latency().await;
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        let selected = self.select(statement).await;
        Ok(stream::iter(selected.into_iter().map(Ok)).boxed())
    }

    async fn query_aggregate(
        &self,
        statement: &Statement,
        _policy: &QueryPolicy,
        module: &str,
        function: &str,
    ) -> Result<Value> {
        self.simulate_latency().await;
        self.counters.aggregates.fetch_add(1, Ordering::Relaxed);

        let name = qualified(module, function);
        let aggregate = self
            .aggregates
            .read()
            .ok()
            .and_then(|aggregates| aggregates.get(&name).cloned())
            .ok_or(WorkloadError::FunctionNotFound(name))?;

        let selected = self.select(statement).await;
        aggregate(&selected)
    }

    async fn execute(
        &self,
        key: &Key,
        module: &str,
        function: &str,
        args: &[Value],
        policy: &WritePolicy,
    ) -> Result<Value> {
        self.simulate_latency().await;
        self.counters.executes.fetch_add(1, Ordering::Relaxed);

        let name = qualified(module, function);
        let udf = self
            .functions
            .read()
            .ok()
            .and_then(|functions| functions.get(&name).cloned())
            .ok_or(WorkloadError::FunctionNotFound(name))?;

        let now = Instant::now();
        let mut records = self.records.write().await;
        let (mut bins, generation) = match records.get(key) {
            Some(stored) if !stored.is_expired(now) => (stored.bins.clone(), stored.generation),
            _ => (Bins::new(), 0),
        };

        let result = udf(&mut bins, args)?;
        Self::store_bins(
            &mut records,
            key,
            bins,
            generation.wrapping_add(1),
            policy.expiration,
            now,
        );
        Ok(result)
    }
}

fn qualified(module: &str, name: &str) -> String {
    format!("{}.{}", module, name)
}

fn apply_operation(bins: &mut Bins, op: &Operation) -> Result<()> {
    match op {
        Operation::Put { bin, value } => {
            if value.is_nil() {
                bins.remove(bin);
            } else {
                bins.insert(bin.clone(), value.clone());
            }
        }
        Operation::MapPut {
            bin,
            key,
            value,
            mode,
        } => {
            let slot = bins
                .entry(bin.clone())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            let held = slot.type_name();
            let Value::Map(entries) = slot else {
                return Err(WorkloadError::Rejected(format!(
                    "bin '{}' holds {}, not a map",
                    bin, held
                )));
            };
            match (mode, entries.contains_key(key)) {
                (MapWriteMode::CreateOnly, true) => {
                    return Err(WorkloadError::Rejected(format!(
                        "map key {} already exists in bin '{}'",
                        key, bin
                    )));
                }
                (MapWriteMode::UpdateOnly, false) => {
                    return Err(WorkloadError::Rejected(format!(
                        "map key {} not found in bin '{}'",
                        key, bin
                    )));
                }
                _ => {
                    entries.insert(key.clone(), value.clone());
                }
            }
        }
        Operation::MapRemoveByKey { bin, key } => match bins.get_mut(bin) {
            None => {}
            Some(Value::Map(entries)) => {
                entries.remove(key);
            }
            Some(other) => {
                return Err(WorkloadError::Rejected(format!(
                    "bin '{}' holds {}, not a map",
                    bin,
                    other.type_name()
                )));
            }
        },
    }
    Ok(())
}

/// Call counters of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub records: usize,
    pub gets: u64,
    pub operates: u64,
    pub queries: u64,
    pub aggregates: u64,
    pub executes: u64,
}

impl std::fmt::Display for MemoryStoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Store Stats: {} records, {} gets, {} operates, {} queries, {} aggregates, {} executes",
            self.records, self.gets, self.operates, self.queries, self.aggregates, self.executes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user_key: i64) -> Key {
        Key::new("bar", "myset", user_key)
    }

    fn policy() -> WritePolicy {
        WritePolicy::with_expiration(Duration::from_secs(360))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        store
            .operate(&key(1), &[Operation::put("color", "blue")], &policy())
            .await
            .unwrap();

        let record = store.get(&key(1), &ReadPolicy::default()).await.unwrap();
        assert_eq!(record.bin("color"), Some(&Value::from("blue")));
        assert_eq!(record.generation, 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(&key(7), &ReadPolicy::default()).await.unwrap_err();
        assert_eq!(err, WorkloadError::NotFound);
    }

    #[tokio::test]
    async fn test_composite_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .operate(
                &key(1),
                &[Operation::map_put("mapBin", 10i64, "a", MapWriteMode::Update)],
                &policy(),
            )
            .await
            .unwrap();

        let ops = [
            Operation::map_remove_by_key("mapBin", 10i64),
            Operation::map_put("mapBin", 20i64, "b", MapWriteMode::Update),
            Operation::map_put("mapBin", 20i64, "c", MapWriteMode::CreateOnly),
        ];
        let err = store.operate(&key(1), &ops, &policy()).await.unwrap_err();
        assert!(matches!(err, WorkloadError::Rejected(_)));

        let record = store.get(&key(1), &ReadPolicy::default()).await.unwrap();
        assert_eq!(record.bin("mapBin"), Some(&Value::map([(10i64, "a")])));
        assert_eq!(record.generation, 1);
    }

    #[tokio::test]
    async fn test_update_only_requires_existing_entry() {
        let store = MemoryStore::new();
        let op = Operation::map_put("mapBin", 1i64, "x", MapWriteMode::UpdateOnly);
        assert!(store.operate(&key(2), &[op], &policy()).await.is_err());
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_record_is_invisible() {
        let store = MemoryStore::new();
        let short = WritePolicy::with_expiration(Duration::from_millis(20));
        store
            .operate(&key(3), &[Operation::put("n", 1i64)], &short)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get(&key(3), &ReadPolicy::default()).await.is_err());
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_execute_unknown_function() {
        let store = MemoryStore::new();
        let err = store
            .execute(&key(1), "mod", "missing", &[], &policy())
            .await
            .unwrap_err();
        assert_eq!(err, WorkloadError::FunctionNotFound("mod.missing".into()));
    }

    #[tokio::test]
    async fn test_execute_registered_function() {
        let store = MemoryStore::new();
        store.register_function(
            "m",
            "touch",
            Arc::new(|bins: &mut Bins, args: &[Value]| {
                bins.insert("touched".to_string(), args[0].clone());
                Ok(Value::Int(bins.len() as i64))
            }),
        );

        let result = store
            .execute(&key(5), "m", "touch", &[Value::Int(9)], &policy())
            .await
            .unwrap();
        assert_eq!(result, Value::Int(1));
        let record = store.get(&key(5), &ReadPolicy::default()).await.unwrap();
        assert_eq!(record.bin("touched"), Some(&Value::Int(9)));
    }
}
