//! Concurrent collection across every configured host.
//!
//! Each scrape spawns one worker per host. Workers share a bounded channel;
//! a supervisor task joins them (logging panics) and then drops the last
//! sender so the drain loop ends once every host is done. One host failing,
//! hanging on its CPU sample or panicking never affects another.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{HostTarget, SshConfig};
use crate::executor::ExecutorFactory;
use crate::fact::{Fact, Metric, MetricRegistry};
use crate::sampler::{DEFAULT_CPU_SAMPLE_INTERVAL, HostSampler};

/// Capacity of the fact channel shared by the workers of one scrape.
pub const CHANNEL_CAPACITY: usize = 100;

/// Scheduling knobs for a [`FleetCollector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSettings {
    /// Pause between the two `/proc/stat` reads of every host. Always one
    /// second in production, shorter in tests.
    pub cpu_sample_interval: Duration,
    /// Maximum hosts collected at once, 0 for no limit.
    pub max_concurrency: usize,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            cpu_sample_interval: DEFAULT_CPU_SAMPLE_INTERVAL,
            max_concurrency: 0,
        }
    }
}

impl From<&SshConfig> for FleetSettings {
    fn from(config: &SshConfig) -> Self {
        Self {
            cpu_sample_interval: DEFAULT_CPU_SAMPLE_INTERVAL,
            max_concurrency: config.max_concurrency,
        }
    }
}

/// The facts gathered by one scrape, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    facts: Vec<Fact>,
    hosts: usize,
    elapsed: Duration,
}

impl Snapshot {
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn into_facts(self) -> Vec<Fact> {
        self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Number of hosts the scrape covered.
    pub fn hosts(&self) -> usize {
        self.hosts
    }

    /// Wall-clock duration of the scrape.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Facts of one host, in emission order.
    pub fn for_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a Fact> + 'a {
        self.facts.iter().filter(move |f| f.host() == host)
    }

    /// Number of hosts that reported `host_ssh_status` 1.
    pub fn hosts_up(&self) -> usize {
        self.facts
            .iter()
            .filter(|f| f.metric() == Metric::HostSshStatus && f.value() == 1.0)
            .count()
    }
}

/// Collects from a fixed set of hosts on demand.
pub struct FleetCollector<F: ExecutorFactory> {
    hosts: Arc<[Arc<HostTarget>]>,
    registry: Arc<MetricRegistry>,
    factory: Arc<F>,
    settings: FleetSettings,
    limiter: Option<Arc<Semaphore>>,
    scrape_lock: Arc<Mutex<()>>,
}

impl<F: ExecutorFactory> FleetCollector<F> {
    pub fn new(
        hosts: Vec<HostTarget>,
        registry: Arc<MetricRegistry>,
        factory: F,
        settings: FleetSettings,
    ) -> Self {
        let limiter = (settings.max_concurrency > 0)
            .then(|| Arc::new(Semaphore::new(settings.max_concurrency)));

        Self {
            hosts: hosts.into_iter().map(Arc::new).collect(),
            registry,
            factory: Arc::new(factory),
            settings,
            limiter,
            scrape_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn hosts(&self) -> &[Arc<HostTarget>] {
        &self.hosts
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Collect from every host and merge the results.
    ///
    /// Concurrent calls are serialized: a scrape requested while another is
    /// running waits for it and then runs its own. Once started, a scrape runs
    /// to completion in its own task even if the caller stops waiting, so
    /// sessions from consecutive scrapes never overlap.
    pub async fn scrape(&self) -> Snapshot {
        let guard = Arc::clone(&self.scrape_lock).lock_owned().await;

        let job = ScrapeJob {
            hosts: Arc::clone(&self.hosts),
            registry: Arc::clone(&self.registry),
            factory: Arc::clone(&self.factory),
            cpu_sample_interval: self.settings.cpu_sample_interval,
            limiter: self.limiter.clone(),
        };
        let handle = tokio::spawn(async move {
            let snapshot = job.run().await;
            drop(guard);
            snapshot
        });

        match handle.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Scrape task failed");
                Snapshot {
                    hosts: self.hosts.len(),
                    ..Default::default()
                }
            }
        }
    }
}

/// Everything one scrape needs, owned so it can outlive the caller.
struct ScrapeJob<F: ExecutorFactory> {
    hosts: Arc<[Arc<HostTarget>]>,
    registry: Arc<MetricRegistry>,
    factory: Arc<F>,
    cpu_sample_interval: Duration,
    limiter: Option<Arc<Semaphore>>,
}

impl<F: ExecutorFactory> ScrapeJob<F> {
    async fn run(self) -> Snapshot {
        let started = Instant::now();

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut workers = Vec::with_capacity(self.hosts.len());

        for target in self.hosts.iter() {
            let sampler = HostSampler::new(
                self.factory.executor(target),
                Arc::clone(target),
                Arc::clone(&self.registry),
                tx.clone(),
            )
            .with_cpu_sample_interval(self.cpu_sample_interval);
            let limiter = self.limiter.clone();

            let handle = tokio::spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                sampler.run().await
            });
            workers.push((target.address.clone(), handle));
        }

        let supervisor = tokio::spawn(async move {
            for (host, handle) in workers {
                match handle.await {
                    Ok(count) => debug!(host = %host, facts = count, "Worker finished"),
                    Err(e) if e.is_panic() => error!(host = %host, "Collection worker panicked"),
                    Err(e) => warn!(host = %host, error = %e, "Collection worker cancelled"),
                }
            }
            drop(tx);
        });

        let mut facts = Vec::new();
        while let Some(fact) = rx.recv().await {
            facts.push(fact);
        }
        if let Err(e) = supervisor.await {
            error!(error = %e, "Scrape supervisor failed");
        }

        let snapshot = Snapshot {
            facts,
            hosts: self.hosts.len(),
            elapsed: started.elapsed(),
        };
        info!(
            hosts = snapshot.hosts(),
            up = snapshot.hosts_up(),
            facts = snapshot.len(),
            elapsed_ms = snapshot.elapsed().as_millis() as u64,
            "Scrape complete"
        );
        snapshot
    }
}
