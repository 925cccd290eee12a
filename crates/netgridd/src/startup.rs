//! Startup engine, shutdown sweep and overlay restart.
//!
//! At process start every `created` network is brought up in dependency
//! order: standalone networks first, then networks bound to a physical
//! parent, then logical networks layered on other networks. Networks
//! that fail to start raise a `network-unavailable` warning and are
//! retried by a background task once a minute until they come up or the
//! daemon stops.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use netgrid_catalog::{warnings::ENTITY_TYPE_NETWORK, ProjectNetwork, WarningKind};
use netgrid_core::DEFAULT_PROJECT;
use netgrid_driver::{load_by_name, DriverContext, DriverError, Network, NetworkKind};

/// Called after a retry tick that started at least one network, so
/// instances blocked on their network can be woken.
pub type InstanceStarter =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Dependency class of a network, in start order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum StartPriority {
    /// No dependency on other interfaces.
    Standalone,
    /// Depends on a physical parent interface (`parent`).
    Physical,
    /// Depends on another logical network (`network`).
    Logical,
}

const PRIORITY_ORDER: [StartPriority; 3] = [
    StartPriority::Standalone,
    StartPriority::Physical,
    StartPriority::Logical,
];

type Buckets = BTreeMap<StartPriority, HashSet<ProjectNetwork>>;
type DriverCache = HashMap<ProjectNetwork, Box<dyn Network>>;

/// Priority-ordered initial start with background retry.
pub struct NetworkStartup {
    ctx: DriverContext,
    instance_starter: Option<InstanceStarter>,
    retry_interval: Duration,
}

impl NetworkStartup {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            instance_starter: None,
            retry_interval: Duration::from_secs(60),
        }
    }

    /// Hook invoked once per retry tick that started something.
    pub fn with_instance_starter(mut self, starter: InstanceStarter) -> Self {
        self.instance_starter = Some(starter);
        self
    }

    /// Override the retry cadence (tests).
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Run the first pass and, when networks remain down, spawn the
    /// background retry task. Returns its handle, if spawned.
    pub async fn initialize(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Option<JoinHandle<()>>> {
        let mut buckets = self.seed_buckets()?;

        // Drivers loaded in the first pass are reused within it, then
        // dropped: retries always observe fresh catalog state.
        let mut cache: DriverCache = HashMap::new();
        self.run_pass(&mut buckets, Some(&mut cache)).await;
        drop(cache);

        if remaining(&buckets) == 0 {
            info!("all networks initialized");
            return Ok(None);
        }

        let handle = tokio::spawn(retry_loop(self, buckets, shutdown));
        Ok(Some(handle))
    }

    /// Every `created` network in every project, all seeded standalone;
    /// the classification step re-buckets dependent ones.
    fn seed_buckets(&self) -> anyhow::Result<Buckets> {
        let mut buckets: Buckets = PRIORITY_ORDER
            .iter()
            .map(|p| (*p, HashSet::new()))
            .collect();

        for project in all_projects(&self.ctx)? {
            let names = self.ctx.catalog.list_created_networks(&project)?;
            for network in names {
                buckets
                    .entry(StartPriority::Standalone)
                    .or_default()
                    .insert(ProjectNetwork {
                        project: project.clone(),
                        network,
                    });
            }
        }

        Ok(buckets)
    }

    /// One pass over the buckets in priority order. Returns whether any
    /// network was started.
    async fn run_pass(&self, buckets: &mut Buckets, mut cache: Option<&mut DriverCache>) -> bool {
        let mut any_started = false;

        for priority in PRIORITY_ORDER {
            let entries: Vec<ProjectNetwork> = buckets
                .get(&priority)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();

            for pn in entries {
                match self
                    .load_and_init(buckets, cache.as_deref_mut(), pn.clone(), priority)
                    .await
                {
                    Ok(started) => any_started |= started,
                    Err(e) => {
                        error!(
                            project = %pn.project,
                            network = %pn.network,
                            error = %e,
                            "failed initializing network"
                        );
                    }
                }
            }
        }

        any_started
    }

    /// Load one network, re-bucket it if it has dependencies, otherwise
    /// start it. Classification never actuates.
    async fn load_and_init(
        &self,
        buckets: &mut Buckets,
        cache: Option<&mut DriverCache>,
        pn: ProjectNetwork,
        priority: StartPriority,
    ) -> anyhow::Result<bool> {
        let mut loaded: Option<Box<dyn Network>> = None;

        let driver: &dyn Network = match cache {
            Some(cache) => {
                if !cache.contains_key(&pn) {
                    match load_by_name(self.ctx.clone(), &pn.project, &pn.network) {
                        Ok(driver) => {
                            cache.insert(pn.clone(), driver);
                        }
                        Err(DriverError::NotFound) => {
                            // Deleted since listing.
                            remove_entry(buckets, priority, &pn);
                            return Ok(false);
                        }
                        Err(e) => return Err(anyhow::anyhow!("failed loading: {e}")),
                    }
                }
                cache[&pn].as_ref()
            }
            None => match load_by_name(self.ctx.clone(), &pn.project, &pn.network) {
                Ok(driver) => {
                    loaded = Some(driver);
                    loaded.as_ref().unwrap().as_ref()
                }
                Err(DriverError::NotFound) => {
                    remove_entry(buckets, priority, &pn);
                    return Ok(false);
                }
                Err(e) => return Err(anyhow::anyhow!("failed loading: {e}")),
            },
        };

        let config = driver.config().clone();
        driver
            .validate(&config)
            .map_err(|e| anyhow::anyhow!("failed validating: {e}"))?;

        let has_key = |key: &str| config.get(key).map(|v| !v.is_empty()).unwrap_or(false);

        if has_key("parent") && priority != StartPriority::Physical {
            move_entry(buckets, priority, StartPriority::Physical, pn);
            return Ok(false);
        }
        if has_key("network") && priority != StartPriority::Logical {
            move_entry(buckets, priority, StartPriority::Logical, pn);
            return Ok(false);
        }

        match driver.start().await {
            Ok(()) => {
                remove_entry(buckets, priority, &pn);
                let _ = self.ctx.catalog.resolve_warning(
                    self.ctx.cluster.local_member(),
                    &pn.project,
                    ENTITY_TYPE_NETWORK,
                    driver.id(),
                    WarningKind::NetworkUnavailable,
                );
                info!(project = %pn.project, network = %pn.network, "initialized network");
                Ok(true)
            }
            Err(e) => {
                let message = format!("Failed starting: {e}");
                let _ = self.ctx.catalog.upsert_warning(
                    self.ctx.cluster.local_member(),
                    &pn.project,
                    ENTITY_TYPE_NETWORK,
                    driver.id(),
                    WarningKind::NetworkUnavailable,
                    &message,
                );
                Err(anyhow::anyhow!(message))
            }
        }
    }
}

async fn retry_loop(
    engine: Arc<NetworkStartup>,
    mut buckets: Buckets,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(engine.retry_interval) => {
                let any_started = engine.run_pass(&mut buckets, None).await;

                let left = remaining(&buckets);
                if left == 0 {
                    info!("all networks initialized");
                }

                // Wake instances that were blocked on their network.
                if any_started {
                    if let Some(starter) = &engine.instance_starter {
                        starter().await;
                    }
                }

                if left == 0 {
                    return;
                }
            }
        }
    }
}

fn remaining(buckets: &Buckets) -> usize {
    buckets.values().map(HashSet::len).sum()
}

fn remove_entry(buckets: &mut Buckets, priority: StartPriority, pn: &ProjectNetwork) {
    if let Some(set) = buckets.get_mut(&priority) {
        set.remove(pn);
    }
}

fn move_entry(buckets: &mut Buckets, from: StartPriority, to: StartPriority, pn: ProjectNetwork) {
    remove_entry(buckets, from, &pn);
    buckets.entry(to).or_default().insert(pn);
}

fn all_projects(ctx: &DriverContext) -> anyhow::Result<Vec<String>> {
    let mut projects = ctx.catalog.project_names()?;
    if !projects.iter().any(|p| p == DEFAULT_PROJECT) {
        projects.insert(0, DEFAULT_PROJECT.to_string());
    }
    Ok(projects)
}

// ── Shutdown ──────────────────────────────────────────────────────

/// Bring every managed network down. Errors are logged and never abort
/// the sweep.
pub async fn network_shutdown(ctx: &DriverContext) {
    let projects = match all_projects(ctx) {
        Ok(projects) => projects,
        Err(e) => {
            error!(error = %e, "failed shutting down networks, couldn't load projects");
            return;
        }
    };

    for project in projects {
        let names = match ctx.catalog.list_networks(&project) {
            Ok(names) => names,
            Err(e) => {
                error!(%project, error = %e, "failed shutting down networks, couldn't load project networks");
                continue;
            }
        };

        for name in names {
            let driver = match load_by_name(ctx.clone(), &project, &name) {
                Ok(driver) => driver,
                Err(e) => {
                    error!(%project, network = %name, error = %e, "failed shutting down network, couldn't load");
                    continue;
                }
            };

            if let Err(e) = driver.stop().await {
                error!(%project, network = %name, error = %e, "failed to bring down network");
            }
        }
    }
}

// ── Overlay restart ───────────────────────────────────────────────

/// Restart every created overlay network (driver start is idempotent).
/// The first error aborts the remainder.
pub async fn restart_ovn_networks(ctx: &DriverContext) -> anyhow::Result<()> {
    info!("restarting OVN networks");

    for project in all_projects(ctx)? {
        let names = ctx
            .catalog
            .list_created_networks(&project)
            .map_err(|e| anyhow::anyhow!("failed to load networks for project {project:?}: {e}"))?;

        for name in names {
            let driver = load_by_name(ctx.clone(), &project, &name).map_err(|e| {
                anyhow::anyhow!("failed to load network {name:?} in project {project:?}: {e}")
            })?;

            if driver.db_type() != NetworkKind::Ovn.db_type() {
                continue;
            }

            driver.start().await.map_err(|e| {
                anyhow::anyhow!("failed to restart network {name:?} in project {project:?}: {e}")
            })?;
        }
    }

    Ok(())
}
