//! Tenant lifecycle façade
//!
//! Owns tenant state on the replicated map, drives module enable/disable
//! through the hook sequence, keeps the per-tenant module cache current
//! and publishes tenant-change events that re-arm timers cluster-wide.
//!
//! The store is the canonical truth: every mutation writes the store
//! first and treats the replicated-map write as the commit point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use modgate_common::{
    compare_code, system_interfaces, GatewayError, GatewayResult, InterfaceDescriptor,
    InterfaceType, ModuleDescriptor, ModuleId, Tenant, TenantDescriptor, TenantModuleDescriptor,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::cache::EnabledModuleCache;
use crate::external::{CallContext, Discovery, ModuleRegistry, ProxyClient, TenantStoreBackend};
use crate::hooks::{find_system_interface, HookInvoker};
use crate::jobs::JobStore;
use crate::map::{ClusterKv, ClusterMap, ClusterMap2, LocalMap, LocalMap2, TypedMap, TypedMap2};
use crate::options::InstallOptions;
use crate::timers::TimerScheduler;

const TENANTS_MAP: &str = "tenants";
const JOBS_MAP: &str = "installJobs";

/// External collaborators the lifecycle core is wired with
pub struct LifecycleDeps {
    /// Module-descriptor registry
    pub registry: Arc<dyn ModuleRegistry>,
    /// Persistent tenant store
    pub store: Arc<dyn TenantStoreBackend>,
    /// Proxy data plane for hook calls and artifact deployment
    pub proxy: Arc<dyn ProxyClient>,
    /// Cluster leader election
    pub discovery: Arc<dyn Discovery>,
}

pub(crate) struct LifecycleInner {
    pub(crate) tenants: Arc<dyn TypedMap<Tenant>>,
    pub(crate) jobs: JobStore,
    pub(crate) registry: Arc<dyn ModuleRegistry>,
    pub(crate) store: Arc<dyn TenantStoreBackend>,
    pub(crate) proxy: Arc<dyn ProxyClient>,
    pub(crate) bus: EventBus,
    pub(crate) cache: Arc<EnabledModuleCache>,
    pub(crate) timers: TimerScheduler,
    pub(crate) hooks: HookInvoker,
    consumer_started: AtomicBool,
}

/// Public façade over tenant state and module lifecycle
#[derive(Clone)]
pub struct TenantLifecycleManager {
    pub(crate) inner: Arc<LifecycleInner>,
}

impl TenantLifecycleManager {
    /// Manager with in-process maps (single-node deployment)
    pub fn new(deps: LifecycleDeps) -> Self {
        Self::with_maps(
            deps,
            Arc::new(LocalMap::new()),
            Arc::new(LocalMap2::new()),
        )
    }

    /// Manager with maps on a shared cluster KV backend
    pub fn clustered(deps: LifecycleDeps, kv: Arc<dyn ClusterKv>) -> Self {
        Self::with_maps(
            deps,
            Arc::new(ClusterMap::new(Arc::clone(&kv), TENANTS_MAP)),
            Arc::new(ClusterMap2::new(kv, JOBS_MAP)),
        )
    }

    fn with_maps(
        deps: LifecycleDeps,
        tenants: Arc<dyn TypedMap<Tenant>>,
        jobs_map: Arc<dyn TypedMap2<modgate_common::InstallJob>>,
    ) -> Self {
        let cache = Arc::new(EnabledModuleCache::new());
        let timers = TimerScheduler::new(
            Arc::clone(&tenants),
            Arc::clone(&cache),
            Arc::clone(&deps.discovery),
            Arc::clone(&deps.proxy),
        );
        let hooks = HookInvoker::new(Arc::clone(&deps.proxy));
        Self {
            inner: Arc::new(LifecycleInner {
                tenants,
                jobs: JobStore::new(jobs_map),
                registry: deps.registry,
                store: deps.store,
                proxy: deps.proxy,
                bus: EventBus::new(),
                cache,
                timers,
                hooks,
                consumer_started: AtomicBool::new(false),
            }),
        }
    }

    /// Populate the tenant map from the store iff this is the first
    /// instance up; later instances see a populated map and skip
    pub async fn init(&self) -> GatewayResult<()> {
        if !self.inner.tenants.keys().await?.is_empty() {
            return Ok(());
        }
        for tenant in self.inner.store.list_tenants().await? {
            let id = tenant.id().to_string();
            match self.inner.tenants.add(&id, tenant).await {
                // another instance won the race for this key
                Err(GatewayError::User(_)) => {}
                other => other?,
            }
        }
        Ok(())
    }

    /// Register a new tenant; fails `USER` when the id is taken
    pub async fn insert(&self, tenant: Tenant) -> GatewayResult<String> {
        let id = tenant.id().to_string();
        if self.inner.tenants.get(&id).await?.is_some() {
            return Err(GatewayError::user(format!("tenant {id} already exists")));
        }
        self.inner.store.insert(&tenant).await?;
        self.inner.tenants.add(&id, tenant).await?;
        Ok(id)
    }

    /// Update display attributes, preserving an existing enabled set
    pub async fn update_descriptor(&self, td: TenantDescriptor) -> GatewayResult<()> {
        let tenant = match self.inner.tenants.get(&td.id).await? {
            Some(existing) => Tenant::with_enabled(td.clone(), existing.enabled),
            None => Tenant::new(td.clone()),
        };
        self.inner.store.update_descriptor(&td).await?;
        self.inner.tenants.put(&td.id, tenant).await
    }

    /// Tenant by id
    pub async fn get(&self, tenant_id: &str) -> GatewayResult<Tenant> {
        self.inner.tenants.get_or_fail(tenant_id).await
    }

    /// Descriptors of all tenants
    pub async fn list(&self) -> GatewayResult<Vec<TenantDescriptor>> {
        let mut out = Vec::new();
        for key in self.inner.tenants.keys().await? {
            out.push(self.inner.tenants.get_or_fail(&key).await?.descriptor);
        }
        Ok(out)
    }

    /// Delete a tenant, store first, and evict its cache entry
    pub async fn delete(&self, tenant_id: &str) -> GatewayResult<()> {
        if !self.inner.store.delete(tenant_id).await? {
            return Err(GatewayError::not_found(tenant_id.to_string()));
        }
        self.inner.tenants.remove_or_fail(tenant_id).await?;
        self.reload_enabled_modules(tenant_id).await
    }

    /// Liveness probe: the store answers
    pub async fn is_alive(&self) -> GatewayResult<()> {
        self.inner.store.list_tenants().await.map(|_| ())
    }

    /// Resolved descriptors of the tenant's enabled modules, from the
    /// last committed cache snapshot
    pub fn enabled_modules(&self, tenant: &Tenant) -> Vec<ModuleDescriptor> {
        self.inner.cache.modules(tenant.id())
    }

    /// Ternary permission-expansion flag for the tenant
    pub fn expand_module_permissions(&self, tenant_id: &str) -> Option<bool> {
        self.inner.cache.expand_permissions(tenant_id)
    }

    /// Enable, upgrade or disable a single module for a tenant.
    ///
    /// `module_from` is the currently enabled module (absent for a fresh
    /// enable); `td` names the target (absent for a disable). Returns the
    /// target module id, or the empty string when both are absent.
    pub async fn enable_and_disable_module(
        &self,
        tenant_id: &str,
        options: &InstallOptions,
        module_from: Option<&str>,
        td: Option<&TenantModuleDescriptor>,
    ) -> GatewayResult<String> {
        let mut tenant = self.inner.tenants.get_or_fail(tenant_id).await?;
        let md_from = match module_from {
            Some(id) => Some(self.inner.registry.get(id).await?),
            None => None,
        };
        let md_to = match td {
            Some(td) => Some(self.inner.registry.get_latest(&td.id).await?),
            None => None,
        };
        if options.dep_check {
            self.enable_and_disable_check(&tenant, md_from.as_ref(), md_to.as_ref())?;
        }
        let mut ctx = CallContext::new();
        self.enable_and_disable_inner(&mut tenant, options, md_from.as_ref(), md_to.as_ref(), &mut ctx)
            .await
    }

    /// Dependency/conflict gate for a prospective single-module change
    fn enable_and_disable_check(
        &self,
        tenant: &Tenant,
        md_from: Option<&ModuleDescriptor>,
        md_to: Option<&ModuleDescriptor>,
    ) -> GatewayResult<()> {
        let mut mods: HashMap<String, ModuleDescriptor> = self
            .enabled_modules(tenant)
            .into_iter()
            .map(|md| (md.id.clone(), md))
            .collect();
        if md_to.is_none() && !crate::resolver::check_all_dependencies(&mods).is_empty() {
            // failures predate the removal; removing cannot make it worse
            return Ok(());
        }
        if let Some(from) = md_from {
            mods.remove(&from.id);
        }
        if let Some(to) = md_to {
            if mods.contains_key(&to.id) {
                return Err(GatewayError::user(format!(
                    "module {} already provided",
                    to.id
                )));
            }
            mods.insert(to.id.clone(), to.clone());
        }
        let conflicts = crate::resolver::check_all_conflicts(&mods);
        let deps = crate::resolver::check_all_dependencies(&mods);
        if !conflicts.is_empty() || !deps.is_empty() {
            let joined = format!("{conflicts} {deps}");
            return Err(GatewayError::user(joined.trim().to_string()));
        }
        Ok(())
    }

    /// The strict per-module sequence: announce permissions, invoke the
    /// tenant hook, bootstrap a new permissions module, then commit
    pub(crate) async fn enable_and_disable_inner(
        &self,
        tenant: &mut Tenant,
        options: &InstallOptions,
        md_from: Option<&ModuleDescriptor>,
        md_to: Option<&ModuleDescriptor>,
        ctx: &mut CallContext,
    ) -> GatewayResult<String> {
        if md_from.is_none() && md_to.is_none() {
            return Ok(String::new());
        }
        self.invoke_permissions(tenant, options, md_to, ctx).await?;
        self.inner
            .hooks
            .invoke_tenant_interface(tenant, options, md_from, md_to, ctx)
            .await?;
        self.invoke_permissions_perm_mod(tenant, options, md_to, ctx)
            .await?;
        self.commit_module_change(tenant, md_from, md_to).await?;
        Ok(md_to.map(|m| m.id.clone()).unwrap_or_default())
    }

    /// Announce a non-permissions module's permissions to the enabled
    /// permissions module, when there is one
    async fn invoke_permissions(
        &self,
        tenant: &Tenant,
        options: &InstallOptions,
        md_to: Option<&ModuleDescriptor>,
        ctx: &mut CallContext,
    ) -> GatewayResult<()> {
        let Some(md_to) = md_to else {
            return Ok(());
        };
        if !options.invoke
            || md_to
                .system_interface(system_interfaces::TENANT_PERMISSIONS)
                .is_some()
        {
            return Ok(());
        }
        let enabled = self.enabled_modules(tenant);
        let Some(perms_module) =
            find_system_interface(&enabled, system_interfaces::TENANT_PERMISSIONS)
        else {
            return Ok(());
        };
        self.inner
            .hooks
            .announce_permissions(tenant, md_to, perms_module, ctx)
            .await
    }

    /// When enabling a permissions module: load permissions of every
    /// already-enabled module into it, then its own
    async fn invoke_permissions_perm_mod(
        &self,
        tenant: &Tenant,
        options: &InstallOptions,
        md_to: Option<&ModuleDescriptor>,
        ctx: &mut CallContext,
    ) -> GatewayResult<()> {
        let Some(md_to) = md_to else {
            return Ok(());
        };
        if !options.invoke
            || md_to
                .system_interface(system_interfaces::TENANT_PERMISSIONS)
                .is_none()
        {
            return Ok(());
        }
        let enabled = self.enabled_modules(tenant);
        if find_system_interface(&enabled, system_interfaces::TENANT_PERMISSIONS).is_none() {
            let module_ids: Vec<String> = tenant.modules().map(str::to_string).collect();
            for module_id in module_ids {
                let md = self.inner.registry.get(&module_id).await?;
                self.inner
                    .hooks
                    .announce_permissions(tenant, &md, md_to, ctx)
                    .await?;
            }
        }
        self.inner
            .hooks
            .announce_permissions(tenant, md_to, md_to, ctx)
            .await
    }

    /// Commit the enabled-set change and notify the cluster
    async fn commit_module_change(
        &self,
        tenant: &mut Tenant,
        md_from: Option<&ModuleDescriptor>,
        md_to: Option<&ModuleDescriptor>,
    ) -> GatewayResult<()> {
        self.update_module_commit(
            tenant,
            md_from.map(|m| m.id.as_str()),
            md_to.map(|m| m.id.as_str()),
        )
        .await?;
        if md_to.is_some() {
            self.inner.bus.publish_timer(tenant.id());
        }
        Ok(())
    }

    /// Apply a module change to the tenant, store first, then the map,
    /// then rebuild the cache snapshot
    pub(crate) async fn update_module_commit(
        &self,
        tenant: &mut Tenant,
        module_from: Option<&str>,
        module_to: Option<&str>,
    ) -> GatewayResult<()> {
        if let Some(from) = module_from {
            tenant.disable_module(from);
        }
        if let Some(to) = module_to {
            tenant.enable_module(to);
        }
        let found = self
            .inner
            .store
            .update_modules(tenant.id(), &tenant.enabled)
            .await?;
        if !found {
            return Err(GatewayError::not_found(tenant.id().to_string()));
        }
        self.inner.tenants.put(tenant.id(), tenant.clone()).await?;
        self.inner.cache.rebuild(tenant, self.inner.registry.as_ref()).await
    }

    /// Disable every module enabled for the tenant (dep-check suppressed)
    pub async fn disable_modules(
        &self,
        tenant_id: &str,
        options: &InstallOptions,
    ) -> GatewayResult<()> {
        let mut options = options.clone();
        options.dep_check = false;
        for md in self.list_modules(tenant_id).await? {
            self.enable_and_disable_module(tenant_id, &options, Some(&md.id), None)
                .await?;
        }
        Ok(())
    }

    /// Full descriptors of the tenant's enabled modules via the registry
    pub async fn list_modules(&self, tenant_id: &str) -> GatewayResult<Vec<ModuleDescriptor>> {
        let tenant = self.inner.tenants.get_or_fail(tenant_id).await?;
        let mut out = Vec::with_capacity(tenant.enabled.len());
        for id in tenant.modules() {
            out.push(self.inner.registry.get(id).await?);
        }
        Ok(out)
    }

    /// Interfaces provided by the tenant's enabled modules.
    ///
    /// With `full == false` the result is deduplicated by (id, version)
    /// and trimmed to id/version pairs.
    pub async fn list_interfaces(
        &self,
        tenant_id: &str,
        full: bool,
        interface_type: Option<InterfaceType>,
    ) -> GatewayResult<Vec<InterfaceDescriptor>> {
        let tenant = self.inner.tenants.get_or_fail(tenant_id).await?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for md in self.enabled_modules(&tenant) {
            for provide in &md.provides {
                if interface_type.is_some_and(|t| !provide.is_type(t)) {
                    continue;
                }
                if full {
                    out.push(provide.clone());
                } else if seen.insert((provide.id.clone(), provide.version.clone())) {
                    out.push(provide.brief());
                }
            }
        }
        Ok(out)
    }

    /// Enabled modules providing the named interface
    pub async fn list_modules_from_interface(
        &self,
        tenant_id: &str,
        interface_name: &str,
        interface_type: Option<InterfaceType>,
    ) -> GatewayResult<Vec<ModuleDescriptor>> {
        let tenant = self.inner.tenants.get_or_fail(tenant_id).await?;
        let mut out = Vec::new();
        for md in self.enabled_modules(&tenant) {
            let provides = md.provides.iter().any(|p| {
                p.id == interface_name && interface_type.map_or(true, |t| p.is_type(t))
            });
            if provides {
                out.push(md);
            }
        }
        Ok(out)
    }

    /// Tenants that currently have the module enabled
    pub async fn module_users(&self, module_id: &str) -> GatewayResult<Vec<String>> {
        let mut users = Vec::new();
        for key in self.inner.tenants.keys().await? {
            if let Some(tenant) = self.inner.tenants.get(&key).await? {
                if tenant.is_enabled(module_id) {
                    users.push(key);
                }
            }
        }
        Ok(users)
    }

    /// Bootstrap the timer plane: rebuild every tenant's cache, arm its
    /// timers, promote the gateway's own module where needed and start
    /// consuming cluster tenant-change events
    pub async fn start_timers(&self, gateway_module: &ModuleDescriptor) -> GatewayResult<()> {
        let keys = self.inner.tenants.keys().await?;
        for tenant_id in &keys {
            self.reload_enabled_modules(tenant_id).await?;
            self.inner.timers.arm_tenant(tenant_id);
        }
        for tenant_id in &keys {
            self.upgrade_gateway_module(tenant_id, gateway_module).await?;
        }
        self.consume_timer_events();
        Ok(())
    }

    /// Promote the tenant's enabled gateway module to this build's own
    /// module id; never downgrade
    pub(crate) async fn upgrade_gateway_module(
        &self,
        tenant_id: &str,
        md: &ModuleDescriptor,
    ) -> GatewayResult<()> {
        let mut tenant = self.get(tenant_id).await?;
        let to_id = ModuleId::parse(&md.id)?;
        let mut module_from = None;
        for enabled in tenant.modules() {
            if ModuleId::parse(enabled)
                .map(|m| m.same_name(&to_id))
                .unwrap_or(false)
            {
                module_from = Some(enabled.to_string());
            }
        }
        let Some(module_from) = module_from else {
            info!(tenant = tenant_id, "tenant has no gateway module enabled");
            return Ok(());
        };
        if module_from == md.id {
            info!(tenant = tenant_id, module = %md.id, "gateway module already current");
            return Ok(());
        }
        let from_id = ModuleId::parse(&module_from)?;
        if compare_code(&from_id, &to_id) >= 4 {
            warn!(
                tenant = tenant_id,
                from = %module_from,
                to = %md.id,
                "will not downgrade gateway module"
            );
            return Ok(());
        }
        info!(tenant = tenant_id, from = %module_from, to = %md.id, "promoting gateway module");
        let options = InstallOptions::default();
        let mut ctx = CallContext::new();
        self.invoke_permissions(&tenant, &options, Some(md), &mut ctx)
            .await?;
        self.update_module_commit(&mut tenant, Some(&module_from), Some(&md.id))
            .await
    }

    /// React to cluster tenant-change events: rebuild the cache and
    /// re-arm timers. Idempotent, started once per process.
    fn consume_timer_events(&self) {
        if self.inner.consumer_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        let mut rx = self.inner.bus.subscribe_timer();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(tenant_id) => {
                        if let Err(e) = manager.reload_enabled_modules(&tenant_id).await {
                            warn!(tenant = %tenant_id, error = %e, "cache rebuild failed");
                        }
                        manager.inner.timers.arm_tenant(&tenant_id);
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }

    /// Rebuild the tenant's cache snapshot, or evict it when the tenant
    /// is gone
    pub(crate) async fn reload_enabled_modules(&self, tenant_id: &str) -> GatewayResult<()> {
        match self.inner.tenants.get(tenant_id).await? {
            Some(tenant) => {
                self.inner
                    .cache
                    .rebuild(&tenant, self.inner.registry.as_ref())
                    .await
            }
            None => {
                self.inner.cache.evict(tenant_id);
                Ok(())
            }
        }
    }
}
