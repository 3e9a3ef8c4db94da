//! Time-window rotation of map bins.
//!
//! Map bins hold entries keyed by a unix-seconds time key. Once a key has
//! elapsed the entry is moved forward by the rotation window so the record
//! always looks freshly written. One reserved sentinel key marks the record
//! permanently and is never moved.

use crate::core::{Result, Value};
use crate::store::{Key, MapWriteMode, Operation, Record, Store, WritePolicy, with_timeout};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_ROTATION_WINDOW_SECS: i64 = 360;
pub const DEFAULT_SENTINEL_KEY: i64 = 8675309;

/// Time-to-live applied to records touched by a rotation.
pub const ROTATION_EXPIRATION: Duration = Duration::from_secs(3600);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    #[error("map key {0} is not a 64-bit integer")]
    NonIntegerKey(String),
}

/// A map key as the rotator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKey {
    Sentinel,
    Timed(i64),
}

impl WindowKey {
    pub fn classify(key: &Value, sentinel: i64) -> std::result::Result<Self, RotationError> {
        match key {
            Value::Int(k) if *k == sentinel => Ok(Self::Sentinel),
            Value::Int(k) => Ok(Self::Timed(*k)),
            other => Err(RotationError::NonIntegerKey(other.to_string())),
        }
    }
}

/// One entry moving from an elapsed key to its renewed key.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationMove {
    pub from: i64,
    pub to: i64,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RotationPlan {
    pub moves: Vec<RotationMove>,
}

impl RotationPlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// All removals, then all create-only inserts, as one ordered composite.
    ///
    /// Removing first keeps a renewed key from colliding with an older key
    /// that is itself being moved out in the same composite.
    pub fn to_operations(&self, bin: &str) -> Vec<Operation> {
        let removals = self
            .moves
            .iter()
            .map(|m| Operation::map_remove_by_key(bin, m.from));
        let inserts = self.moves.iter().map(|m| {
            Operation::map_put(bin, m.to, m.payload.clone(), MapWriteMode::CreateOnly)
        });
        removals.chain(inserts).collect()
    }
}

/// Rolling freshness horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub window_secs: i64,
    pub sentinel: i64,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_ROTATION_WINDOW_SECS,
            sentinel: DEFAULT_SENTINEL_KEY,
        }
    }
}

impl TimeWindow {
    /// Whether any non-sentinel integer key is older than `now`.
    /// Non-integer keys are ignored here; `plan` is the one that rejects them.
    pub fn has_elapsed(&self, entries: &BTreeMap<Value, Value>, now: i64) -> bool {
        entries.keys().any(|key| {
            matches!(
                WindowKey::classify(key, self.sentinel),
                Ok(WindowKey::Timed(t)) if t < now
            )
        })
    }

    /// Stage a move for every elapsed key.
    ///
    /// A single non-integer key rejects the whole map so that no partial
    /// rotation is ever submitted for a record of unexpected shape.
    pub fn plan(
        &self,
        entries: &BTreeMap<Value, Value>,
        now: i64,
    ) -> std::result::Result<RotationPlan, RotationError> {
        let mut plan = RotationPlan::default();
        for (key, payload) in entries {
            match WindowKey::classify(key, self.sentinel)? {
                WindowKey::Sentinel => {}
                WindowKey::Timed(t) if t < now => plan.moves.push(RotationMove {
                    from: t,
                    to: t.saturating_add(self.window_secs),
                    payload: payload.clone(),
                }),
                WindowKey::Timed(_) => {}
            }
        }
        Ok(plan)
    }
}

/// Result of one rotation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Nothing elapsed; no store call was made.
    Unchanged,
    /// The map had a non-integer key; no store call was made.
    Rejected,
    /// One composite update moved this many entries.
    Rotated(usize),
}

/// Submits the composite update for one record's map bin.
#[derive(Clone)]
pub struct Rotator {
    store: Arc<dyn Store>,
    window: TimeWindow,
    map_bin: String,
    policy: WritePolicy,
}

impl Rotator {
    pub fn new(store: Arc<dyn Store>, window: TimeWindow, map_bin: &str) -> Self {
        Self {
            store,
            window,
            map_bin: map_bin.to_string(),
            policy: WritePolicy::with_expiration(ROTATION_EXPIRATION),
        }
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn map_bin(&self) -> &str {
        &self.map_bin
    }

    /// The map bin of `record`, when it has elapsed entries to rotate.
    pub fn elapsed_map<'a>(&self, record: &'a Record, now: i64) -> Option<&'a BTreeMap<Value, Value>> {
        record
            .bin(&self.map_bin)
            .and_then(Value::as_map)
            .filter(|entries| self.window.has_elapsed(entries, now))
    }

    pub fn needs_rotation(&self, record: &Record, now: i64) -> bool {
        self.elapsed_map(record, now).is_some()
    }

    pub async fn try_rotate(
        &self,
        key: &Key,
        entries: &BTreeMap<Value, Value>,
        now: i64,
    ) -> Result<RotationOutcome> {
        let plan = match self.window.plan(entries, now) {
            Ok(plan) => plan,
            Err(err) => {
                debug!(key = %key, error = %err, "rotation skipped");
                return Ok(RotationOutcome::Rejected);
            }
        };
        if plan.is_empty() {
            return Ok(RotationOutcome::Unchanged);
        }

        let ops = plan.to_operations(&self.map_bin);
        with_timeout(
            self.policy.total_timeout,
            self.store.operate(key, &ops, &self.policy),
        )
        .await?;

        debug!(key = %key, moved = plan.moves.len(), "map entries rotated");
        Ok(RotationOutcome::Rotated(plan.moves.len()))
    }

    /// Fire-and-forget rotation against the current wall clock.
    pub async fn rotate(&self, key: &Key, entries: &BTreeMap<Value, Value>) {
        if let Err(err) = self.try_rotate(key, entries, now_secs()).await {
            warn!(key = %key, error = %err, "unable to rotate map entries");
        }
    }
}

/// Current unix time in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn sample_map() -> BTreeMap<Value, Value> {
        let mut entries = BTreeMap::new();
        entries.insert(Value::Int(NOW - 10), Value::from("X"));
        entries.insert(Value::Int(NOW + 1000), Value::from("Y"));
        entries.insert(Value::Int(DEFAULT_SENTINEL_KEY), Value::from("Z"));
        entries
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            WindowKey::classify(&Value::Int(DEFAULT_SENTINEL_KEY), DEFAULT_SENTINEL_KEY),
            Ok(WindowKey::Sentinel)
        );
        assert_eq!(
            WindowKey::classify(&Value::Int(5), DEFAULT_SENTINEL_KEY),
            Ok(WindowKey::Timed(5))
        );
        assert!(WindowKey::classify(&Value::from("5"), DEFAULT_SENTINEL_KEY).is_err());
    }

    #[test]
    fn test_plan_moves_only_elapsed_keys() {
        let plan = TimeWindow::default().plan(&sample_map(), NOW).unwrap();
        assert_eq!(plan.moves, vec![RotationMove {
            from: NOW - 10,
            to: NOW + 350,
            payload: Value::from("X"),
        }]);

        let ops = plan.to_operations("mapBin");
        assert_eq!(ops, vec![
            Operation::map_remove_by_key("mapBin", NOW - 10),
            Operation::map_put("mapBin", NOW + 350, "X", MapWriteMode::CreateOnly),
        ]);
    }

    #[test]
    fn test_sentinel_below_now_is_never_moved() {
        let window = TimeWindow {
            window_secs: 360,
            sentinel: 5,
        };
        let mut entries = BTreeMap::new();
        entries.insert(Value::Int(5), Value::from("marker"));
        assert!(!window.has_elapsed(&entries, NOW));
        assert!(window.plan(&entries, NOW).unwrap().is_empty());
    }

    #[test]
    fn test_non_integer_key_rejects_whole_map() {
        let mut entries = sample_map();
        entries.insert(Value::from("label"), Value::from("?"));
        let window = TimeWindow::default();

        assert!(window.has_elapsed(&entries, NOW));
        assert_eq!(
            window.plan(&entries, NOW),
            Err(RotationError::NonIntegerKey("\"label\"".into()))
        );
    }

    #[test]
    fn test_removals_precede_inserts() {
        let mut entries = BTreeMap::new();
        entries.insert(Value::Int(NOW - 370), Value::from("old"));
        entries.insert(Value::Int(NOW - 10), Value::from("new"));
        let ops = TimeWindow::default()
            .plan(&entries, NOW)
            .unwrap()
            .to_operations("m");

        assert!(matches!(ops[0], Operation::MapRemoveByKey { .. }));
        assert!(matches!(ops[1], Operation::MapRemoveByKey { .. }));
        assert!(matches!(ops[2], Operation::MapPut { .. }));
        assert!(matches!(ops[3], Operation::MapPut { .. }));
    }
}
