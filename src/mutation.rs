use crate::binspec::CompiledOperation;
use crate::core::{Result, Value};
use crate::store::{Key, MapWriteMode, Operation, Store, StoreConfig, WritePolicy, with_timeout};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Time-to-live of records created by workload writes.
pub const WRITE_EXPIRATION: Duration = Duration::from_secs(360);

/// Submits single-record updates built from compiled bin specs or map
/// payloads.
///
/// The plain methods are fire-and-forget: failures are logged and dropped.
/// The `try_` variants return the store result.
#[derive(Clone)]
pub struct MutationExecutor {
    store: Arc<dyn Store>,
    namespace: String,
    set: String,
    policy: WritePolicy,
}

impl MutationExecutor {
    pub fn new(store: Arc<dyn Store>, config: &StoreConfig) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            set: config.set.clone(),
            policy: WritePolicy::with_expiration(WRITE_EXPIRATION),
        }
    }

    pub fn key(&self, user_key: i64) -> Key {
        Key::new(&self.namespace, &self.set, user_key)
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.policy
    }

    /// Write every compiled operation to record `user_key` in one update.
    pub async fn try_write(&self, user_key: i64, ops: Vec<CompiledOperation>) -> Result<()> {
        let key = self.key(user_key);
        let ops: Vec<Operation> = ops.into_iter().map(CompiledOperation::into_operation).collect();
        self.submit(&key, &ops).await
    }

    pub async fn write(&self, user_key: i64, ops: Vec<CompiledOperation>) {
        if let Err(err) = self.try_write(user_key, ops).await {
            warn!(user_key, error = %err, "unable to write record");
        }
    }

    /// Put one entry into the map bin `bin` of record `user_key`.
    pub async fn try_map_upsert(
        &self,
        user_key: i64,
        bin: &str,
        map_key: impl Into<Value>,
        value: impl Into<Value>,
        mode: MapWriteMode,
    ) -> Result<()> {
        let key = self.key(user_key);
        self.submit(&key, &[Operation::map_put(bin, map_key, value, mode)])
            .await
    }

    pub async fn map_upsert(
        &self,
        user_key: i64,
        bin: &str,
        map_key: impl Into<Value>,
        value: impl Into<Value>,
        mode: MapWriteMode,
    ) {
        if let Err(err) = self.try_map_upsert(user_key, bin, map_key, value, mode).await {
            warn!(user_key, bin, error = %err, "unable to upsert map entry");
        }
    }

    /// Upsert every entry of `payload` into map bin `bin`, as one update.
    pub async fn try_write_map_payload(
        &self,
        user_key: i64,
        bin: &str,
        payload: Vec<(Value, Value)>,
    ) -> Result<()> {
        let key = self.key(user_key);
        let ops: Vec<Operation> = payload
            .into_iter()
            .map(|(map_key, value)| Operation::map_put(bin, map_key, value, MapWriteMode::Update))
            .collect();
        self.submit(&key, &ops).await
    }

    pub async fn write_map_payload(&self, user_key: i64, bin: &str, payload: Vec<(Value, Value)>) {
        if let Err(err) = self.try_write_map_payload(user_key, bin, payload).await {
            warn!(user_key, bin, error = %err, "unable to write map payload");
        }
    }

    async fn submit(&self, key: &Key, ops: &[Operation]) -> Result<()> {
        with_timeout(
            self.policy.total_timeout,
            self.store.operate(key, ops, &self.policy),
        )
        .await?;
        debug!(key = %key, ops = ops.len(), "record updated");
        Ok(())
    }
}

/// The map written by map-write tasks: two timed entries that expire 120s
/// and 360s after `now`, plus the permanent sentinel entry.
pub fn sample_map_payload(now: i64, sentinel: i64) -> Vec<(Value, Value)> {
    let today = chrono::DateTime::from_timestamp(now, 0)
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    vec![
        (
            Value::Int(now + 360),
            Value::map([("timestamp", today.as_str()), ("foo", "bar")]),
        ),
        (
            Value::Int(now + 120),
            Value::map([("name", "John Doe"), ("staticEnv", "STATIC")]),
        ),
        (
            Value::Int(sentinel),
            Value::map([
                ("song", "Jenny"),
                ("artist", "Tommy Tutone"),
                ("released", "1981"),
                ("genre", "Classic Rock"),
            ]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkloadError;
    use crate::store::{MemoryStore, ReadPolicy};

    fn executor() -> (Arc<MemoryStore>, MutationExecutor) {
        let store = Arc::new(MemoryStore::new());
        let executor = MutationExecutor::new(store.clone(), &StoreConfig::default());
        (store, executor)
    }

    #[tokio::test]
    async fn test_write_compiled_ops() {
        let (store, executor) = executor();
        executor
            .try_write(
                42,
                crate::binspec::compile("junk:str:8,randInt:int:200,color:blue"),
            )
            .await
            .unwrap();

        let record = store
            .get(&executor.key(42), &ReadPolicy::default())
            .await
            .unwrap();
        assert_eq!(record.bin("color"), Some(&Value::from("blue")));
        assert_eq!(record.bin("junk").and_then(Value::as_str).map(str::len), Some(8));
        assert_eq!(record.key, Key::new("bar", "myset", 42));
    }

    #[tokio::test]
    async fn test_map_upsert_update_only_fails_on_missing_entry() {
        let (_store, executor) = executor();
        let err = executor
            .try_map_upsert(1, "mapBin", 8675309i64, "v", MapWriteMode::UpdateOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkloadError::Rejected(_)));

        // The fire-and-forget form swallows the same failure.
        executor
            .map_upsert(1, "mapBin", 8675309i64, "v", MapWriteMode::UpdateOnly)
            .await;
    }

    #[tokio::test]
    async fn test_write_map_payload() {
        let (store, executor) = executor();
        let now = 1_700_000_000;
        executor
            .try_write_map_payload(3, "mapBin", sample_map_payload(now, 8675309))
            .await
            .unwrap();

        let record = store
            .get(&executor.key(3), &ReadPolicy::default())
            .await
            .unwrap();
        let map = record.bin("mapBin").and_then(Value::as_map).unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.contains_key(&Value::Int(now + 120)));
        assert!(map.contains_key(&Value::Int(8675309)));
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(200)));
        let mut executor = MutationExecutor::new(store, &StoreConfig::default());
        executor.policy.total_timeout = Duration::from_millis(20);

        let err = executor
            .try_write(1, crate::binspec::compile("a:1"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
