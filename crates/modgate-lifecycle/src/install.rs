//! Install jobs: multi-module changes driven through staged execution
//!
//! A job's plan is validated and expanded by the resolver, persisted with
//! every stage change, then executed item by item:
//! pending → deploy → invoke → done, with undeploy of orphaned artifacts
//! at the end. A failed item either short-circuits the job or, with
//! `ignore_errors`, records its message and lets the rest continue.

use std::collections::HashMap;

use chrono::Utc;
use modgate_common::{
    latest_of, GatewayError, GatewayResult, InstallJob, ModuleAction, ModuleDescriptor, ModuleId,
    ModuleStage, Tenant, TenantModuleDescriptor,
};
use tracing::{info, warn};

use crate::external::CallContext;
use crate::manager::TenantLifecycleManager;
use crate::options::InstallOptions;
use crate::resolver;

impl TenantLifecycleManager {
    /// Create and run an install/upgrade job.
    ///
    /// With no plan, an "upgrade everything" plan is synthesized. With
    /// `options.simulate` the expanded plan is returned without
    /// persisting a job. With `options.background` the plan snapshot is
    /// returned immediately and the job runs detached.
    pub async fn install_upgrade_create(
        &self,
        tenant_id: &str,
        install_id: &str,
        options: &InstallOptions,
        plan: Option<Vec<TenantModuleDescriptor>>,
    ) -> GatewayResult<Vec<TenantModuleDescriptor>> {
        info!(tenant = tenant_id, install_id, "install job create");
        if let Some(items) = &plan {
            for tm in items {
                if tm.action.is_none() {
                    return Err(GatewayError::user(format!(
                        "missing action for module {}",
                        tm.id
                    )));
                }
            }
        }
        let tenant = self.inner.tenants.get_or_fail(tenant_id).await?;
        let modules = self
            .inner
            .registry
            .modules_with_filter(options.pre_release, options.npm_snapshot, None)
            .await?;
        let mut available = HashMap::with_capacity(modules.len());
        let mut enabled = HashMap::new();
        for md in modules {
            if tenant.is_enabled(&md.id) {
                enabled.insert(md.id.clone(), md.clone());
            }
            available.insert(md.id.clone(), md);
        }

        let items = match plan {
            Some(items) => items,
            None => upgrade_plan(&available, &enabled),
        };
        let items = resolver::install_simulate(&available, &enabled, &items)?;
        if options.simulate {
            return Ok(items);
        }

        let mut job = InstallJob::new(install_id, items);
        for tm in &mut job.modules {
            tm.stage = Some(ModuleStage::Pending);
        }
        self.inner.jobs.add(tenant_id, &job).await?;

        if options.background {
            let snapshot = job.modules.iter().map(|tm| tm.without_stage()).collect();
            let manager = self.clone();
            let options = options.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.run_job(tenant, &options, &available, job).await {
                    warn!(error = %e, "background install job failed");
                }
            });
            return Ok(snapshot);
        }
        self.run_job(tenant, options, &available, job).await
    }

    /// Job by id; the tenant must exist
    pub async fn install_upgrade_get(
        &self,
        tenant_id: &str,
        install_id: &str,
    ) -> GatewayResult<InstallJob> {
        self.inner.tenants.get_or_fail(tenant_id).await?;
        self.inner.jobs.get(tenant_id, install_id).await
    }

    /// All jobs for the tenant
    pub async fn install_upgrade_get_list(&self, tenant_id: &str) -> GatewayResult<Vec<InstallJob>> {
        self.inner.tenants.get_or_fail(tenant_id).await?;
        self.inner.jobs.list(tenant_id).await
    }

    /// Delete a finished job; fails `USER` while the job is in flight
    pub async fn install_upgrade_delete(
        &self,
        tenant_id: &str,
        install_id: &str,
    ) -> GatewayResult<()> {
        let job = self.install_upgrade_get(tenant_id, install_id).await?;
        if !job.complete {
            return Err(GatewayError::user(format!(
                "install job {install_id} not complete"
            )));
        }
        self.inner.jobs.remove(tenant_id, install_id).await
    }

    /// Delete every finished job for the tenant, skipping in-flight ones
    pub async fn install_upgrade_delete_list(&self, tenant_id: &str) -> GatewayResult<()> {
        for job in self.install_upgrade_get_list(tenant_id).await? {
            if job.complete {
                self.inner.jobs.remove(tenant_id, &job.id).await?;
            }
        }
        Ok(())
    }

    /// Execute a persisted job to completion
    async fn run_job(
        &self,
        mut tenant: Tenant,
        options: &InstallOptions,
        available: &HashMap<String, ModuleDescriptor>,
        mut job: InstallJob,
    ) -> GatewayResult<Vec<TenantModuleDescriptor>> {
        let tenant_id = tenant.id().to_string();
        let mut ctx = CallContext::new();
        let mut fatal: Option<GatewayError> = None;

        for idx in 0..job.modules.len() {
            if fatal.is_some() {
                // remaining items stay pending
                break;
            }
            let action = job.modules[idx].action;

            if options.deploy
                && matches!(
                    action,
                    Some(ModuleAction::Enable) | Some(ModuleAction::Uptodate)
                )
            {
                job.modules[idx].stage = Some(ModuleStage::Deploy);
                self.inner.jobs.put(&tenant_id, &job).await?;
                if let Some(md) = available.get(&job.modules[idx].id) {
                    if let Err(e) = self.inner.proxy.auto_deploy(md).await {
                        job.modules[idx].message = Some(e.to_string());
                        self.inner.jobs.put(&tenant_id, &job).await?;
                    }
                }
            }

            if job.modules[idx].message.is_none() {
                job.modules[idx].stage = Some(ModuleStage::Invoke);
                self.inner.jobs.put(&tenant_id, &job).await?;
                let tm = job.modules[idx].clone();
                if let Err(e) = self
                    .install_tenant_module(&mut tenant, options, available, &tm, &mut ctx)
                    .await
                {
                    job.modules[idx].message = Some(e.to_string());
                    self.inner.jobs.put(&tenant_id, &job).await?;
                    if options.ignore_errors {
                        warn!(
                            tenant = %tenant_id,
                            module = %job.modules[idx].id,
                            error = %e,
                            "ignoring module install error"
                        );
                    } else {
                        fatal = Some(e);
                    }
                }
            } else if !options.ignore_errors {
                fatal = Some(GatewayError::internal(
                    job.modules[idx].message.clone().unwrap_or_default(),
                ));
            }

            if job.modules[idx].message.is_none() {
                job.modules[idx].stage = Some(ModuleStage::Done);
                self.inner.jobs.put(&tenant_id, &job).await?;
            }
        }

        if options.deploy && fatal.is_none() {
            self.auto_undeploy_unused(&tenant_id, available, &mut job)
                .await?;
            for tm in &mut job.modules {
                if tm.message.is_none() {
                    tm.stage = Some(ModuleStage::Done);
                }
            }
            self.inner.jobs.put(&tenant_id, &job).await?;
        }

        job.end_date = Some(Utc::now());
        job.complete = true;
        self.inner.jobs.put(&tenant_id, &job).await?;
        info!(tenant = %tenant_id, job = %job.id, "install job complete");

        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(job.modules.iter().map(|tm| tm.without_stage()).collect())
    }

    /// Undeploy artifacts of modules no tenant references any more
    async fn auto_undeploy_unused(
        &self,
        tenant_id: &str,
        available: &HashMap<String, ModuleDescriptor>,
        job: &mut InstallJob,
    ) -> GatewayResult<()> {
        for idx in 0..job.modules.len() {
            let md_id = match job.modules[idx].action {
                Some(ModuleAction::Enable) => job.modules[idx].from.clone(),
                Some(ModuleAction::Disable) => Some(job.modules[idx].id.clone()),
                _ => None,
            };
            let Some(md_id) = md_id else { continue };
            let Some(md) = available.get(&md_id) else {
                continue;
            };
            if !self.module_users(&md.id).await?.is_empty() {
                // still in use by some tenant, keep it deployed
                continue;
            }
            job.modules[idx].stage = Some(ModuleStage::Undeploy);
            self.inner.jobs.put(tenant_id, job).await?;
            if let Err(e) = self.inner.proxy.auto_undeploy(md).await {
                warn!(module = %md.id, error = %e, "auto-undeploy failed");
                if job.modules[idx].message.is_none() {
                    job.modules[idx].message = Some(e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Run one plan item's hook sequence; uptodate/conflict items no-op
    async fn install_tenant_module(
        &self,
        tenant: &mut Tenant,
        options: &InstallOptions,
        available: &HashMap<String, ModuleDescriptor>,
        tm: &TenantModuleDescriptor,
        ctx: &mut CallContext,
    ) -> GatewayResult<()> {
        let mut md_from = None;
        let mut md_to = None;
        match tm.action {
            Some(ModuleAction::Enable) => {
                if let Some(from) = &tm.from {
                    md_from = available.get(from);
                }
                md_to = available.get(&tm.id);
            }
            Some(ModuleAction::Disable) => {
                md_from = available.get(&tm.id);
            }
            _ => {}
        }
        self.enable_and_disable_inner(tenant, options, md_from, md_to, ctx)
            .await
            .map(|_| ())
    }
}

/// Synthesize an "upgrade everything" plan: one enable item per enabled
/// module whose latest available version differs
fn upgrade_plan(
    available: &HashMap<String, ModuleDescriptor>,
    enabled: &HashMap<String, ModuleDescriptor>,
) -> Vec<TenantModuleDescriptor> {
    let mut ids: Vec<&String> = enabled.keys().collect();
    ids.sort();
    let mut out = Vec::new();
    for id in ids {
        let Ok(mid) = ModuleId::parse(id) else { continue };
        let Some(latest) = latest_of(&mid, available.keys().map(String::as_str)) else {
            continue;
        };
        if latest != **id {
            let mut tm = TenantModuleDescriptor::enable(latest);
            tm.from = Some((*id).clone());
            out.push(tm);
        }
    }
    out
}
