//! Simulate command - several consumers of one key against a synthetic backend
//!
//! Consumers attach one after another, a mutation then publishes an article
//! and invalidates the key, and a JSON report shows how many fetches the
//! backend actually served.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{
    fetcher, CacheKeyGenerator, CacheKeyParams, CacheStats, DefaultKeyGenerator, QueryError,
    QueryState,
};
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::logging;
use crate::infrastructure::mutation::{mutation_fn, MutationBinding, MutationOptions};
use crate::infrastructure::observability::init_metrics;
use crate::infrastructure::query::{QueryBinding, QueryClient};

/// Upper bound on waiting for one consumer to settle
const SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Arguments for the simulate command
#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Number of consumers bound to the key
    #[arg(long, default_value_t = 5)]
    pub consumers: usize,

    /// Resource every consumer reads
    #[arg(long, default_value = "articles")]
    pub resource: String,

    /// Page of the resource, part of the shared cache key
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Latency of each backend call in milliseconds
    #[arg(long, default_value_t = 200)]
    pub latency_ms: u64,

    /// Delay between two consumers attaching, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub stagger_ms: u64,

    /// Number of failing fetches before the backend recovers
    #[arg(long, default_value_t = 0)]
    pub failures: usize,

    /// Skip the publish mutation and the invalidation it triggers
    #[arg(long)]
    pub skip_mutation: bool,

    /// Print Prometheus metrics after the report
    #[arg(long)]
    pub metrics: bool,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            consumers: 5,
            resource: "articles".to_string(),
            page: 1,
            latency_ms: 200,
            stagger_ms: 50,
            failures: 0,
            skip_mutation: false,
            metrics: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticlePage {
    pub page: u32,
    pub titles: Vec<String>,
    /// Number of articles published when the page was rendered
    pub revision: u64,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub key: String,
    pub consumers: usize,
    pub fetches_before_mutation: usize,
    pub fetch_invocations: usize,
    pub mutation: Option<MutationReport>,
    pub states: Vec<ConsumerReport>,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct MutationReport {
    pub article_id: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConsumerReport {
    pub binding_id: String,
    pub status: String,
    pub revision: Option<u64>,
    pub is_stale: bool,
    pub error: Option<String>,
}

impl SimulateArgs {
    /// Cache key shared by every consumer
    pub fn cache_key(&self) -> String {
        let params = CacheKeyParams::new(self.resource.as_str()).with_component("page", self.page);
        DefaultKeyGenerator::new().generate(&params)
    }
}

impl ConsumerReport {
    fn from_binding(binding: &QueryBinding<ArticlePage>) -> Self {
        let state = binding.state();

        Self {
            binding_id: binding.id().to_string(),
            status: format!("{:?}", state.status()).to_lowercase(),
            revision: state.data.as_ref().map(|page| page.revision),
            is_stale: state.is_stale,
            error: state.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Synthetic article backend
#[derive(Debug)]
struct Backend {
    page: u32,
    calls: AtomicUsize,
    failures: usize,
    latency: Duration,
    published: AtomicU64,
}

impl Backend {
    fn new(page: u32, failures: usize, latency: Duration) -> Self {
        Self {
            page,
            calls: AtomicUsize::new(0),
            failures,
            latency,
            published: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn fetch_page(&self) -> Result<ArticlePage, QueryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if call < self.failures {
            return Err(QueryError::fetch_with_status(
                503,
                format!("synthetic failure {} of {}", call + 1, self.failures),
            ));
        }

        let revision = self.published.load(Ordering::SeqCst);
        Ok(ArticlePage {
            page: self.page,
            titles: (1..=revision).map(|n| format!("Article {}", n)).collect(),
            revision,
        })
    }

    async fn publish(&self, title: &str) -> Result<u64, QueryError> {
        tokio::time::sleep(self.latency).await;
        let id = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        info!(article_id = id, title = %title, "Synthetic article published");
        Ok(id)
    }
}

/// Run the simulation and print its report
pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging)?;

    let metrics = if args.metrics {
        init_metrics(&config.metrics)
    } else {
        None
    };

    let store = Arc::new(CacheStore::with_config(config.store_config()));
    let _sweeper = store.spawn_sweeper();
    let client = QueryClient::new(store).with_defaults(config.query_options());

    let report = simulate(&client, &args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(metrics) = metrics {
        println!("{}", metrics.render());
    }

    Ok(())
}

pub async fn simulate(client: &QueryClient, args: &SimulateArgs) -> anyhow::Result<SimulationReport> {
    let key = args.cache_key();
    let backend = Arc::new(Backend::new(
        args.page,
        args.failures,
        Duration::from_millis(args.latency_ms),
    ));

    let fetch_page = {
        let backend = Arc::clone(&backend);
        fetcher(move || {
            let backend = Arc::clone(&backend);
            async move { backend.fetch_page().await }
        })
    };

    let mut bindings = Vec::with_capacity(args.consumers);
    for index in 0..args.consumers {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(args.stagger_ms)).await;
        }
        let binding = client.query(key.clone(), Arc::clone(&fetch_page));
        binding.attach();
        bindings.push(binding);
    }

    for binding in &bindings {
        wait_until(binding, QueryState::is_settled).await?;
    }
    let fetches_before_mutation = backend.calls();
    info!(key = %key, fetches = fetches_before_mutation, "Consumers settled");

    let mutation = if args.skip_mutation {
        None
    } else {
        Some(publish_and_refresh(client, &key, &backend, &bindings).await?)
    };

    Ok(SimulationReport {
        key,
        consumers: args.consumers,
        fetches_before_mutation,
        fetch_invocations: backend.calls(),
        mutation,
        states: bindings.iter().map(ConsumerReport::from_binding).collect(),
        cache: client.store().stats(),
    })
}

async fn publish_and_refresh(
    client: &QueryClient,
    key: &str,
    backend: &Arc<Backend>,
    bindings: &[QueryBinding<ArticlePage>],
) -> anyhow::Result<MutationReport> {
    let publish = {
        let backend = Arc::clone(backend);
        mutation_fn(move |title: String| {
            let backend = Arc::clone(&backend);
            async move { backend.publish(&title).await }
        })
    };

    let invalidator = client.clone();
    let key = key.to_string();
    let options = MutationOptions::new().on_success(move |_: &u64, _: &String| {
        if let Err(e) = invalidator.invalidate(&key) {
            warn!(key = %key, error = %e, "Failed to invalidate after publish");
        }
    });

    let mutation = MutationBinding::with_options(publish, options);
    let outcome = mutation.mutate_async("Release notes".to_string()).await;

    if let Ok(&revision) = outcome.as_ref() {
        for binding in bindings {
            wait_until(binding, |state| {
                state.error.is_some()
                    || state
                        .data
                        .as_ref()
                        .is_some_and(|page| page.revision >= revision)
            })
            .await?;
        }
    }

    Ok(MutationReport {
        article_id: outcome.as_ref().ok().copied(),
        error: outcome.err().map(|e| e.to_string()),
    })
}

async fn wait_until(
    binding: &QueryBinding<ArticlePage>,
    condition: impl FnMut(&QueryState<ArticlePage>) -> bool,
) -> anyhow::Result<()> {
    let mut rx = binding.watch();

    tokio::time::timeout(SETTLE_TIMEOUT, rx.wait_for(condition))
        .await
        .with_context(|| format!("Consumer {} did not settle", binding.id()))?
        .context("Binding state channel closed")?;

    Ok(())
}
