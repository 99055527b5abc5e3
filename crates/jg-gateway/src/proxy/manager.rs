//! Proxy registry, persistence and recovery

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jg_core::config::ProxyConfig;
use jg_core::{JobId, JsonStore, ProxyKey, ProxyMeta, Record, Scheduler};

use super::cleanup::run_periodic_clean;
use super::port::find_available_port;
use super::probe::probe_target;
use super::service::ProxyService;
use super::ProxyError;

/// Live services and their durable records, mutated together
struct Registry {
    proxies: HashMap<ProxyKey, ProxyService>,
    store: JsonStore<ProxyMeta>,
}

impl Registry {
    fn used_ports(&self) -> HashSet<u16> {
        self.proxies.values().map(ProxyService::port).collect()
    }

    fn persist(&self, meta: &ProxyMeta) {
        if let Err(e) = self.store.save(meta.clone()) {
            warn!("Failed to persist proxy {}: {}", meta.proxy_port, e);
        }
    }

    fn forget(&self, key: &ProxyKey) {
        if let Err(e) = self.store.delete(key) {
            warn!("Failed to delete persisted proxy {}: {}", key, e);
        }
    }
}

struct Cleaner {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns every proxy tunnel of the gateway
pub struct ProxyManager {
    registry: Mutex<Registry>,
    scheduler: Arc<dyn Scheduler>,
    config: ProxyConfig,
    cleaner: std::sync::Mutex<Option<Cleaner>>,
}

impl ProxyManager {
    /// Create a manager persisting tunnel metadata to `store`
    pub fn new(scheduler: Arc<dyn Scheduler>, store: JsonStore<ProxyMeta>, config: ProxyConfig) -> Self {
        Self {
            registry: Mutex::new(Registry {
                proxies: HashMap::new(),
                store,
            }),
            scheduler,
            config,
            cleaner: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Start one tunnel per `(node, port)` pair.
    ///
    /// Pairs that already have a live tunnel are left alone. Returns the
    /// records of every requested tunnel, new or existing. A failure to
    /// persist a record is logged; the tunnel keeps running.
    pub async fn create_and_start_proxy(
        &self,
        job_name: &str,
        job_id: JobId,
        nodes: &[String],
        ports: &[u16],
    ) -> Result<Vec<ProxyMeta>, ProxyError> {
        let mut registry = self.registry.lock().await;
        let mut metas = Vec::with_capacity(nodes.len() * ports.len());

        for node in nodes {
            for &port in ports {
                let key = ProxyKey::new(job_id, node.as_str(), port);
                if let Some(existing) = registry.proxies.get(&key) {
                    debug!("Proxy for {} already running on {}", key, existing.port());
                    metas.push(existing.meta().clone());
                    continue;
                }

                let proxy_port =
                    find_available_port(&self.config.bind_host, self.config.port_range(), &registry.used_ports()).await?;
                let service = ProxyService::start(job_name, key.clone(), proxy_port, &self.config).await?;

                registry.persist(service.meta());
                metas.push(service.meta().clone());
                registry.proxies.insert(key, service);
            }
        }

        Ok(metas)
    }

    /// Stop every tunnel of `job_name` on each of `nodes`.
    ///
    /// Fails on the first node without a tunnel; nodes before it have
    /// already been torn down. Returns how many tunnels were stopped.
    pub async fn stop_and_remove_proxy(&self, job_name: &str, nodes: &[String]) -> Result<usize, ProxyError> {
        let mut registry = self.registry.lock().await;
        let mut stopped = 0;

        for node in nodes {
            let keys: Vec<ProxyKey> = registry
                .proxies
                .iter()
                .filter(|(key, service)| key.node == *node && service.meta().job_name == job_name)
                .map(|(key, _)| key.clone())
                .collect();

            if keys.is_empty() {
                return Err(ProxyError::NotFound {
                    job_name: job_name.to_string(),
                    node: node.clone(),
                });
            }

            for key in keys {
                if let Some(service) = registry.proxies.remove(&key) {
                    service.stop().await;
                }
                registry.forget(&key);
                stopped += 1;
            }
        }

        info!("Removed {} proxies of job {}", stopped, job_name);
        Ok(stopped)
    }

    /// Restart every persisted tunnel on its recorded port.
    ///
    /// Meant to run once at startup. Returns how many tunnels were restored.
    pub async fn recover_proxies(&self) -> usize {
        let mut registry = self.registry.lock().await;
        let metas = match registry.store.load_all() {
            Ok(metas) => metas,
            Err(e) => {
                warn!("Failed to load persisted proxies: {}", e);
                return 0;
            }
        };

        let mut recovered = 0;
        for meta in metas {
            let key = match recovery_key(&meta) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping persisted proxy {}: {}", meta.proxy_port, e);
                    continue;
                }
            };
            if registry.proxies.contains_key(&key) {
                continue;
            }
            if self.config.probe_before_recover && !probe_target(&meta.target_addr, self.config.probe_timeout).await {
                warn!("Not recovering proxy {}: {} is unreachable", meta.proxy_port, meta.target_addr);
                continue;
            }

            match ProxyService::start(&meta.job_name, key.clone(), meta.proxy_port, &self.config).await {
                Ok(service) => {
                    registry.proxies.insert(key, service);
                    recovered += 1;
                }
                Err(e) => warn!("Failed to recover proxy {} -> {}: {}", meta.proxy_port, meta.target_addr, e),
            }
        }

        info!("Recovered {} proxies", recovered);
        recovered
    }

    /// Tear down tunnels whose job is no longer pending or running.
    ///
    /// Jobs whose status cannot be queried are kept for the next cycle.
    /// Status queries run without holding the registry lock. Returns how
    /// many tunnels were removed.
    pub async fn clean_invalid_proxies(&self) -> usize {
        let metas = {
            let registry = self.registry.lock().await;
            match registry.store.load_all() {
                Ok(metas) => metas,
                Err(e) => {
                    warn!("Failed to load persisted proxies: {}", e);
                    return 0;
                }
            }
        };

        let job_ids: HashSet<JobId> = metas.iter().map(|m| m.job_id).collect();
        let mut finished = HashSet::new();
        for job_id in job_ids {
            match self.scheduler.query_job_status(job_id).await {
                Ok(status) if status.is_active() => {}
                Ok(status) => {
                    debug!("Job {} is {}, removing its proxies", job_id, status);
                    finished.insert(job_id);
                }
                Err(e) => warn!("Failed to query status of job {}, keeping its proxies: {}", job_id, e),
            }
        }

        if finished.is_empty() {
            return 0;
        }

        let mut registry = self.registry.lock().await;
        let mut removed = 0;
        for meta in metas.iter().filter(|m| finished.contains(&m.job_id)) {
            let key = meta.key();
            if let Some(service) = registry.proxies.remove(&key) {
                service.stop().await;
            }
            registry.forget(&key);
            removed += 1;
        }

        info!("Cleaned {} proxies of finished jobs", removed);
        removed
    }

    /// Run [`Self::clean_invalid_proxies`] every `interval` until
    /// [`Self::stop_periodic_clean`]. A running cleaner is replaced.
    pub fn start_periodic_clean(self: &Arc<Self>, interval: Duration) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_periodic_clean(Arc::clone(self), interval, cancel.clone()));

        let previous = self
            .cleaner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Cleaner { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Stop the periodic cleaner and wait for it to exit
    pub async fn stop_periodic_clean(&self) {
        let cleaner = self.cleaner.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(cleaner) = cleaner {
            cleaner.cancel.cancel();
            let _ = cleaner.task.await;
        }
    }

    /// Snapshot of every live tunnel
    pub async fn list(&self) -> Vec<ProxyMeta> {
        let registry = self.registry.lock().await;
        let mut metas: Vec<ProxyMeta> = registry.proxies.values().map(|s| s.meta().clone()).collect();
        metas.sort_by(|a, b| (a.job_id, &a.target_node, a.proxy_port).cmp(&(b.job_id, &b.target_node, b.proxy_port)));
        metas
    }

    /// Adapter port of a live tunnel
    pub async fn proxy_port(&self, key: &ProxyKey) -> Option<u16> {
        self.registry.lock().await.proxies.get(key).map(ProxyService::port)
    }

    /// Number of live tunnels
    pub async fn len(&self) -> usize {
        self.registry.lock().await.proxies.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop every listener but keep their records, so the next start
    /// recovers them.
    pub async fn shutdown(&self) {
        self.stop_periodic_clean().await;

        let mut registry = self.registry.lock().await;
        let count = registry.proxies.len();
        for (_, service) in registry.proxies.drain() {
            service.stop().await;
        }
        info!("Stopped {} proxies", count);
    }
}

fn recovery_key(meta: &ProxyMeta) -> Result<ProxyKey, ProxyError> {
    let port = meta
        .container_port()
        .ok_or_else(|| ProxyError::InvalidTarget(meta.target_addr.clone()))?;
    Ok(ProxyKey::new(meta.job_id, meta.target_node.as_str(), port))
}
