//! Install-job persistence
//!
//! Thin wrapper over the replicated `(tenant, job)` map. Every stage
//! change is written through eagerly so any other gateway process polling
//! the job sees current progress.

use std::sync::Arc;

use modgate_common::{GatewayResult, InstallJob};

use crate::map::TypedMap2;

/// Per-tenant install jobs on the replicated map
#[derive(Clone)]
pub struct JobStore {
    map: Arc<dyn TypedMap2<InstallJob>>,
}

impl JobStore {
    /// Store over the given replicated map
    pub fn new(map: Arc<dyn TypedMap2<InstallJob>>) -> Self {
        Self { map }
    }

    /// Job by id, failing `NotFound` when absent
    pub async fn get(&self, tenant_id: &str, job_id: &str) -> GatewayResult<InstallJob> {
        self.map.get_or_fail(tenant_id, job_id).await
    }

    /// Register a new job; fails when the id is taken
    pub async fn add(&self, tenant_id: &str, job: &InstallJob) -> GatewayResult<()> {
        self.map.add(tenant_id, &job.id, job.clone()).await
    }

    /// Write the job's current state through to the map
    pub async fn put(&self, tenant_id: &str, job: &InstallJob) -> GatewayResult<()> {
        self.map.put(tenant_id, &job.id, job.clone()).await
    }

    /// All jobs for a tenant
    pub async fn list(&self, tenant_id: &str) -> GatewayResult<Vec<InstallJob>> {
        self.map.list(tenant_id).await
    }

    /// Remove a job, failing `NotFound` when absent
    pub async fn remove(&self, tenant_id: &str, job_id: &str) -> GatewayResult<()> {
        self.map.remove_or_fail(tenant_id, job_id).await
    }
}
