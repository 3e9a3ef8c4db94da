use anyhow::{Context, Result};
use clap::Parser;
use kvtraffic::seed::{install_functions, seed_aggregate_records};
use kvtraffic::workload::config::{
    DEFAULT_KEY_RANGE, DEFAULT_POOL_CAPACITY, DEFAULT_ROTATION_CAPACITY,
};
use kvtraffic::{
    CycleController, Dispatcher, MemoryStore, QueryConfig, Store, StoreConfig, WorkloadConfig,
    WorkloadMix,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kvtraffic")]
#[command(about = "Mixed read/write/query traffic generator for key-value stores")]
struct Cli {
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
    #[arg(short, long, default_value = "bar")]
    namespace: String,
    #[arg(short, long, default_value = "myset")]
    set: String,
    /// Primary keys are drawn from [0, KEYS).
    #[arg(short, long, default_value_t = DEFAULT_KEY_RANGE)]
    keys: i64,
    /// Bin spec written each cycle, e.g. "junk:str:8,randInt:int:200,color:blue".
    /// Repeat for several specs; the three colour specs are used when absent.
    #[arg(short, long = "bins")]
    bins: Vec<String>,
    #[arg(short = 'U', long, default_value = "data")]
    user: String,
    #[arg(short = 'P', long, default_value = "data")]
    password: String,
    #[arg(long)]
    services_alternate: bool,
    /// Primary pool size; at least 50.
    #[arg(short, long, default_value_t = DEFAULT_POOL_CAPACITY)]
    capacity: usize,
    #[arg(long, default_value_t = DEFAULT_ROTATION_CAPACITY)]
    rotation_capacity: usize,
    /// Sleep between cycles, e.g. "1s" or "250ms".
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pause: Duration,
    /// Issue secondary-index and aggregate queries.
    #[arg(short, long)]
    query: bool,
    #[arg(long)]
    short_query: bool,
    /// Issue server-side function calls.
    #[arg(short, long)]
    udf: bool,
    #[arg(long)]
    index_bin: Option<String>,
    #[arg(long, default_value_t = 0)]
    index_value: i64,
    /// Abandon a query whose next record takes longer than this.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    query_timeout: Duration,
    /// JSON file overriding the per-kind divisors.
    #[arg(long)]
    mix: Option<PathBuf>,
    /// Aggregate fixture records written before the first cycle, keyed just
    /// past the workload key range.
    #[arg(long, default_value_t = 0)]
    seed_records: usize,
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.user, &self.password)
            .host(&self.host)
            .port(self.port)
            .namespace(&self.namespace)
            .set(&self.set)
            .services_alternate(self.services_alternate)
    }

    fn workload_config(&self) -> Result<WorkloadConfig> {
        let mix = match &self.mix {
            Some(path) => WorkloadMix::from_file(path)
                .with_context(|| format!("failed to load workload mix {}", path.display()))?,
            None => WorkloadMix::default(),
        };
        Ok(WorkloadConfig::default()
            .key_range(self.keys)
            .bin_specs(self.bins.clone())
            .capacity(self.capacity)
            .rotation_capacity(self.rotation_capacity)
            .pause(self.pause)
            .query(QueryConfig {
                enabled: self.query,
                short: self.short_query,
                index_bin: self.index_bin.clone(),
                index_value: self.index_value,
                socket_timeout: self.query_timeout,
            })
            .udf_enabled(self.udf)
            .mix(mix))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store_config = cli.store_config();
    let workload_config = cli.workload_config()?;
    workload_config
        .validate()
        .context("invalid workload configuration")?;

    let memory = MemoryStore::connect(&store_config)
        .with_context(|| format!("failed to connect to {}", store_config.to_url()))?;
    install_functions(&memory);
    let store: Arc<dyn Store> = Arc::new(memory);

    if cli.seed_records > 0 {
        let first_key = workload_config.key_range;
        seed_aggregate_records(store.clone(), &store_config, first_key, cli.seed_records)
            .await
            .context("failed to seed aggregate records")?;
    }

    let dispatcher = Dispatcher::new(store, &store_config, workload_config)
        .context("failed to build dispatcher")?;
    info!(
        endpoint = %store_config.to_url(),
        capacity = dispatcher.config().capacity,
        specs = dispatcher.config().bin_specs.len(),
        queries = dispatcher.config().query.enabled,
        "kvtraffic started"
    );

    let mut controller = CycleController::new(dispatcher);
    controller
        .run_until(shutdown_signal())
        .await
        .context("dispatch stopped")?;

    info!(cycles = controller.cycles(), "kvtraffic stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kvtraffic=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
