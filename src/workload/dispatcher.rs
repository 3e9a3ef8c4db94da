use super::admission::AdmissionPool;
use super::config::{WorkloadConfig, WorkloadMix};
use super::pool::WorkerPool;
use super::task::{Task, TaskContext, TaskKind};
use crate::binspec::{BinSpecs, clock_rng};
use crate::core::Result;
use crate::rotation::now_secs;
use crate::store::{Store, StoreConfig};
use rand::Rng;
use rand::rngs::StdRng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching,
}

/// How many tasks of one kind a cycle issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    pub kind: TaskKind,
    /// Index into the configured bin specs, for writes.
    pub spec: Option<usize>,
    pub count: usize,
}

/// Issues one cycle's worth of tasks through the primary worker pool.
pub struct Dispatcher {
    config: Arc<WorkloadConfig>,
    context: Arc<TaskContext>,
    workers: WorkerPool,
    specs: Vec<BinSpecs>,
}

impl Dispatcher {
    /// Validate `config` and build both worker pools.
    pub fn new(
        store: Arc<dyn Store>,
        store_config: &StoreConfig,
        config: WorkloadConfig,
    ) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let workers = WorkerPool::new(AdmissionPool::new("primary", config.capacity));
        let rotations = WorkerPool::new(AdmissionPool::new("rotation", config.rotation_capacity));
        let context = Arc::new(TaskContext::new(
            store,
            store_config,
            config.clone(),
            rotations,
        ));
        let specs = config
            .bin_specs
            .iter()
            .map(|spec| BinSpecs::parse(spec))
            .collect();

        Ok(Self {
            config,
            context,
            workers,
            specs,
        })
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn rotations(&self) -> &WorkerPool {
        self.context.rotations()
    }

    /// Per-kind task counts for one cycle, in issue order.
    pub fn plan(&self) -> Vec<PlannedBatch> {
        let capacity = self.config.capacity;
        let mix: &WorkloadMix = &self.config.mix;
        let count = |divisor| WorkloadMix::count(capacity, divisor);

        let mut plan: Vec<PlannedBatch> = (0..self.specs.len())
            .map(|idx| PlannedBatch {
                kind: TaskKind::Write,
                spec: Some(idx),
                count: count(mix.write),
            })
            .collect();

        let batch = |kind, divisor| PlannedBatch {
            kind,
            spec: None,
            count: count(divisor),
        };
        plan.push(batch(TaskKind::MapWrite, mix.map_write));
        if self.config.udf_enabled {
            plan.push(batch(TaskKind::UdfCall, mix.udf));
        }
        plan.push(batch(TaskKind::Read, mix.read));
        if self.config.query.enabled {
            let query = if self.config.query.short {
                TaskKind::ShortQuery
            } else {
                TaskKind::LongQuery
            };
            plan.push(batch(query, mix.query));
            plan.push(batch(TaskKind::AggregateQuery, mix.aggregate));
        }

        plan.retain(|b| b.count > 0);
        plan
    }

    /// Issue every planned task. Returns how many were submitted.
    ///
    /// Blocks whenever the primary pool is saturated; does not wait for the
    /// issued workers to finish.
    pub async fn run_cycle(&self) -> Result<usize> {
        let mut rng = clock_rng();
        let mut issued = 0usize;

        for batch in self.plan() {
            for _ in 0..batch.count {
                let Some(task) = self.build_task(&batch, &mut rng) else {
                    continue;
                };
                self.workers.submit(self.context.clone().run(task)).await?;
                issued += 1;
            }
            debug!(kind = %batch.kind, count = batch.count, "batch issued");
        }
        Ok(issued)
    }

    fn build_task(&self, batch: &PlannedBatch, rng: &mut StdRng) -> Option<Task> {
        let user_key = rng.gen_range(0..self.config.key_range);
        let task = match batch.kind {
            TaskKind::Write => {
                let ops = batch
                    .spec
                    .and_then(|idx| self.specs.get(idx))
                    .map(|spec| spec.generate(rng))
                    .unwrap_or_default();
                Task::Write { user_key, ops }
            }
            TaskKind::MapWrite => Task::map_write(user_key, now_secs(), self.config.window.sentinel),
            TaskKind::Read => Task::Read { user_key },
            TaskKind::ShortQuery => Task::Query { short: true },
            TaskKind::LongQuery => Task::Query { short: false },
            TaskKind::AggregateQuery => Task::AggregateQuery,
            TaskKind::UdfCall => Task::UdfCall { user_key },
            // Query workers issue rotations for the records they stream.
            TaskKind::MapRotate => return None,
        };
        Some(task)
    }

    /// Stop admitting work and wait for every worker of both pools.
    pub async fn shutdown(&self) {
        self.workers.close();
        self.workers.drain().await;
        self.rotations().close();
        self.rotations().drain().await;
    }
}

/// Repeats dispatch cycles with a pause in between.
pub struct CycleController {
    dispatcher: Dispatcher,
    pause: Duration,
    state: DispatchState,
    cycles: u64,
}

impl CycleController {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let pause = dispatcher.config().pause;
        Self {
            dispatcher,
            pause,
            state: DispatchState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// One Idle → Dispatching → Idle transition.
    pub async fn cycle(&mut self) -> Result<usize> {
        self.cycles += 1;
        self.state = DispatchState::Dispatching;
        let span = info_span!("cycle", n = self.cycles);
        let result = self.dispatcher.run_cycle().instrument(span).await;
        self.state = DispatchState::Idle;

        let issued = result?;
        debug!(
            cycle = self.cycles,
            issued,
            primary = %self.dispatcher.workers().stats(),
            rotation = %self.dispatcher.rotations().stats(),
            "cycle dispatched"
        );
        Ok(issued)
    }

    /// Dispatch forever. Only returns if the primary pool is closed.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            capacity = self.dispatcher.config().capacity,
            pause = ?self.pause,
            "starting workload"
        );
        loop {
            self.cycle().await?;
            tokio::time::sleep(self.pause).await;
        }
    }

    /// Dispatch until `shutdown` resolves, then drain in-flight workers.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.run() => result,
            _ = shutdown => Ok(()),
        };
        info!(cycles = self.cycles, "workload stopping");
        self.state = DispatchState::Idle;
        self.dispatcher.shutdown().await;
        result
    }
}
