//! Job submission and cancellation hooks
//!
//! Submission reserves host ports for a job's container ports before the
//! scheduler has assigned an id, records the binding once it has, and later
//! exposes the ports through proxy tunnels on the nodes the job landed on.
//! Cancellation tears the tunnels down and forgets the binding.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use jg_core::{JobId, JsonStore, ProxyMeta, Scheduler, SchedulerError, StoreError, SubmitJobInfo};

use crate::proxy::{generate_unused_random_port, ProxyError, ProxyManager};

/// Errors from job access hooks
#[derive(Error, Debug)]
pub enum JobAccessError {
    /// No reservation or submission record exists for the job
    #[error("unknown job {0}")]
    UnknownJob(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ports reserved for a job that has not been assigned an id yet
#[derive(Debug, Clone)]
struct Reservation {
    job_type: String,
    host_ports: Vec<u16>,
    container_ports: Vec<u16>,
}

/// Programmatic access surface used by job submission and cancellation
pub struct JobAccess {
    scheduler: Arc<dyn Scheduler>,
    proxies: Arc<ProxyManager>,
    submissions: JsonStore<SubmitJobInfo>,
    pending: Mutex<HashMap<String, Reservation>>,
    port_range: RangeInclusive<u16>,
}

impl JobAccess {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        proxies: Arc<ProxyManager>,
        submissions: JsonStore<SubmitJobInfo>,
        port_range: RangeInclusive<u16>,
    ) -> Self {
        Self {
            scheduler,
            proxies,
            submissions,
            pending: Mutex::new(HashMap::new()),
            port_range,
        }
    }

    /// Pick one host port per container port for `job_name`.
    ///
    /// Ports already recorded for other jobs, or reserved by submissions in
    /// flight, are never handed out twice.
    pub fn reserve_ports(
        &self,
        job_name: &str,
        job_type: &str,
        container_ports: &[u16],
    ) -> Result<Vec<u16>, JobAccessError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        let mut used: HashSet<u16> = self
            .submissions
            .load_all()?
            .into_iter()
            .flat_map(|info| info.host_ports)
            .collect();
        used.extend(
            pending
                .iter()
                .filter(|(name, _)| name.as_str() != job_name)
                .flat_map(|(_, r)| r.host_ports.iter().copied()),
        );

        let mut rng = rand::thread_rng();
        let mut host_ports = Vec::with_capacity(container_ports.len());
        for _ in container_ports {
            let port = generate_unused_random_port(self.port_range.clone(), &used, &mut rng)?;
            used.insert(port);
            host_ports.push(port);
        }

        pending.insert(
            job_name.to_string(),
            Reservation {
                job_type: job_type.to_string(),
                host_ports: host_ports.clone(),
                container_ports: container_ports.to_vec(),
            },
        );
        Ok(host_ports)
    }

    /// Bind a reservation to the id the scheduler assigned and persist it.
    ///
    /// A write failure is logged; the returned record is still valid.
    pub fn record_submission(&self, job_name: &str, job_id: JobId) -> Result<SubmitJobInfo, JobAccessError> {
        let reservation = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_name)
            .ok_or_else(|| JobAccessError::UnknownJob(job_name.to_string()))?;

        let info = SubmitJobInfo {
            job_name: job_name.to_string(),
            job_id,
            job_type: reservation.job_type,
            host_ports: reservation.host_ports,
            container_ports: reservation.container_ports,
        };
        if let Err(e) = self.submissions.save(info.clone()) {
            warn!("Failed to persist submission of job {}: {}", job_name, e);
        }
        Ok(info)
    }

    /// Drop a reservation whose submission never reached the scheduler.
    ///
    /// Returns the ports handed back, or `None` if nothing was reserved.
    pub fn cancel_reservation(&self, job_name: &str) -> Option<Vec<u16>> {
        let reservation = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_name)?;
        debug!("Released ports {:?} reserved for job {}", reservation.host_ports, job_name);
        Some(reservation.host_ports)
    }

    /// Open tunnels to the job's host ports on every node it runs on
    pub async fn expose(&self, job_name: &str, job_id: JobId) -> Result<Vec<ProxyMeta>, JobAccessError> {
        let info = self.submission(job_name)?;
        if info.host_ports.is_empty() {
            return Ok(Vec::new());
        }

        let nodes = self.scheduler.query_job_topology(job_id).await?;
        let metas = self
            .proxies
            .create_and_start_proxy(job_name, job_id, &nodes, &info.host_ports)
            .await?;
        info!("Exposed job {} through {} proxies", job_name, metas.len());
        Ok(metas)
    }

    /// Close the job's tunnels and forget its port binding.
    ///
    /// The binding is forgotten even when teardown fails, so a cancelled
    /// job never keeps ports reserved; leftover tunnels are collected by the
    /// proxy cleaner once the job is no longer running.
    pub async fn release(&self, job_name: &str, job_id: JobId) -> Result<usize, JobAccessError> {
        let info = self.submission(job_name)?;

        let stopped = if info.host_ports.is_empty() {
            Ok(0)
        } else {
            match self.scheduler.query_job_topology(job_id).await {
                Ok(nodes) => self
                    .proxies
                    .stop_and_remove_proxy(job_name, &nodes)
                    .await
                    .map_err(JobAccessError::from),
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = self.submissions.delete(&info.job_name) {
            warn!("Failed to delete submission of job {}: {}", job_name, e);
        }
        stopped
    }

    /// Every persisted submission
    pub fn submissions(&self) -> Result<Vec<SubmitJobInfo>, JobAccessError> {
        Ok(self.submissions.load_all()?)
    }

    fn submission(&self, job_name: &str) -> Result<SubmitJobInfo, JobAccessError> {
        self.submissions
            .load_all()?
            .into_iter()
            .find(|info| info.job_name == job_name)
            .ok_or_else(|| JobAccessError::UnknownJob(job_name.to_string()))
    }
}
