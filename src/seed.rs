//! Startup fixtures: server-side functions for the in-process store and the
//! records the aggregate query runs against.

use crate::core::{Result, Value, WorkloadError};
use crate::store::{
    Bins, Key, MemoryStore, Operation, Record, Store, StoreConfig, WritePolicy, with_timeout,
};
use crate::workload::task::{
    AGGREGATE_BIN, AGGREGATE_BUCKET_NAME, AGGREGATE_FUNCTION, AGGREGATE_MODULE, UDF_FUNCTION,
    UDF_MODULE,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const TARIFF_BIN: &str = "tarriff";

/// Seed writes kept in flight at once.
const SEED_CONCURRENCY: usize = 32;

/// Register `fetchOrCreate2` and `genericQuery` on `store`.
///
/// `fetchOrCreate2(bin, value, ..)` returns the bin's current value, writing
/// `value` first when the bin is absent. `genericQuery` returns how many
/// records the query selected.
pub fn install_functions(store: &MemoryStore) {
    store.register_function(
        UDF_MODULE,
        UDF_FUNCTION,
        Arc::new(|bins: &mut Bins, args: &[Value]| {
            let (Some(bin), Some(value)) = (args.first().and_then(Value::as_str), args.get(1))
            else {
                return Err(WorkloadError::Rejected(format!(
                    "{} expects (bin, value, ..), got {} args",
                    UDF_FUNCTION,
                    args.len()
                )));
            };
            Ok(bins
                .entry(bin.to_string())
                .or_insert_with(|| value.clone())
                .clone())
        }),
    );

    store.register_aggregate(
        AGGREGATE_MODULE,
        AGGREGATE_FUNCTION,
        Arc::new(|records: &[Record]| Ok(Value::Int(records.len() as i64))),
    );
}

/// The `globalBktDef` list: one bucket definition map.
pub fn bucket_definitions(modified: &str) -> Value {
    Value::List(vec![Value::map([
        ("initValue", "123456789"),
        ("modifiedBy", "Colton"),
        ("name", AGGREGATE_BUCKET_NAME),
        ("modifiedDate", modified),
    ])])
}

/// The nested tariff document stored next to the bucket definitions.
pub fn tariff_document() -> Value {
    let data = Value::map([
        ("type", Value::Int(0)),
        ("value", Value::from(AGGREGATE_BUCKET_NAME)),
    ]);
    let parameter = Value::map([
        ("name", Value::from("Data")),
        ("value", Value::map([("data", data)])),
    ]);
    let action = Value::map([
        (
            "attributeInfo",
            Value::map([("name", "Bucket-Selection"), ("resultContext", "RATING")]),
        ),
        ("parameters", Value::List(vec![parameter])),
    ]);
    let rules = Value::map([
        ("actions", Value::List(vec![action])),
        ("condContainer", Value::map([("operator", Value::Int(0))])),
        ("modifiedDate", Value::Int(1_682_446_313_691)),
        ("rulename", Value::from("rule1")),
        ("schemaVersion", Value::Int(0)),
    ]);

    Value::map([(
        "tariff",
        Value::map([
            (
                "id",
                Value::from("CL_MONTHLY_CBU_D_50MBB_OF_1000001_ChargingRules"),
            ),
            ("name", Value::from("ChargingRules")),
            ("rules", rules),
        ]),
    )])
}

/// Write `count` aggregate fixtures under user keys starting at `first_key`.
/// The records never expire. Any failed write aborts seeding.
///
/// Workload writes reset a record's expiration, so callers start past the
/// workload key range to keep the fixtures permanent.
pub async fn seed_aggregate_records(
    store: Arc<dyn Store>,
    config: &StoreConfig,
    first_key: i64,
    count: usize,
) -> Result<usize> {
    if count == 0 {
        return Ok(0);
    }

    let policy = WritePolicy::with_expiration(Duration::ZERO);
    let modified = chrono::Utc::now().to_rfc3339();
    let ops = Arc::new(vec![
        Operation::put(AGGREGATE_BIN, bucket_definitions(&modified)),
        Operation::put(TARIFF_BIN, tariff_document()),
    ]);

    let written = stream::iter(first_key..first_key.saturating_add(count as i64))
        .map(|user_key| {
            let store = store.clone();
            let ops = ops.clone();
            let policy = policy.clone();
            let key = Key::new(&config.namespace, &config.set, user_key);
            async move {
                let write = store.operate(&key, ops.as_slice(), &policy);
                with_timeout(policy.total_timeout, write).await
            }
        })
        .buffer_unordered(SEED_CONCURRENCY)
        .try_fold(0usize, |written, ()| async move { Ok(written + 1) })
        .await?;

    info!(
        records = written,
        first_key,
        namespace = %config.namespace,
        set = %config.set,
        "aggregate records seeded"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Filter, QueryPolicy, ReadPolicy, Statement};

    #[tokio::test]
    async fn test_fetch_or_create() {
        let store = MemoryStore::new();
        install_functions(&store);
        let key = Key::new("bar", "myset", 3);
        let policy = WritePolicy::with_expiration(Duration::from_secs(1440));
        let args = [Value::from("color"), Value::from("BLACK"), Value::Int(10000)];

        let created = store
            .execute(&key, UDF_MODULE, UDF_FUNCTION, &args, &policy)
            .await
            .unwrap();
        assert_eq!(created, Value::from("BLACK"));

        let args = [Value::from("color"), Value::from("WHITE")];
        let fetched = store
            .execute(&key, UDF_MODULE, UDF_FUNCTION, &args, &policy)
            .await
            .unwrap();
        assert_eq!(fetched, Value::from("BLACK"));

        let bad = store
            .execute(&key, UDF_MODULE, UDF_FUNCTION, &[], &policy)
            .await;
        assert!(matches!(bad, Err(WorkloadError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_seeded_records_match_aggregate_filter() {
        let store = Arc::new(MemoryStore::new());
        install_functions(&store);
        let config = StoreConfig::default();

        let written = seed_aggregate_records(store.clone(), &config, 1000, 20)
            .await
            .unwrap();
        assert_eq!(written, 20);

        let key = |user_key| Key::new(&config.namespace, &config.set, user_key);
        let record = store.get(&key(1019), &ReadPolicy::default()).await.unwrap();
        assert!(record.bin(TARIFF_BIN).and_then(Value::as_map).is_some());
        assert!(store.get(&key(999), &ReadPolicy::default()).await.is_err());
        assert!(store.get(&key(1020), &ReadPolicy::default()).await.is_err());

        let statement = Statement::new(&config.namespace, &config.set).filter(
            Filter::equal(AGGREGATE_BIN, AGGREGATE_BUCKET_NAME).with_ctx(vec![
                crate::store::CtxPath::ListIndex(0),
                crate::store::CtxPath::MapKey(Value::from("name")),
            ]),
        );
        let matched = store
            .query_aggregate(
                &statement,
                &QueryPolicy::default(),
                AGGREGATE_MODULE,
                AGGREGATE_FUNCTION,
            )
            .await
            .unwrap();
        assert_eq!(matched, Value::Int(20));
    }

    #[tokio::test]
    async fn test_zero_records_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let written = seed_aggregate_records(store.clone(), &StoreConfig::default(), 1000, 0)
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(store.record_count().await, 0);
    }
}
