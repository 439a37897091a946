//! Process-local cache of each tenant's resolved module set
//!
//! Derived state: rebuilt on every enabled-set commit and at bootstrap,
//! evicted on tenant deletion. Readers clone an `Arc` snapshot and never
//! block behind a rebuild.

use std::sync::Arc;

use dashmap::DashMap;
use modgate_common::{system_interfaces, GatewayResult, InterfaceVersion, ModuleDescriptor, Tenant};

use crate::external::ModuleRegistry;

/// Immutable snapshot of one tenant's enabled modules
#[derive(Debug, Clone, Default)]
pub struct ModuleSnapshot {
    /// Resolved descriptors, in enabled-map order
    pub modules: Vec<ModuleDescriptor>,
    /// `Some(true)` if any enabled module provides `_tenantPermissions`
    /// ≥ 1.1, `Some(false)` if only 1.0 is present, `None` if no enabled
    /// module provides the interface
    pub expand_permissions: Option<bool>,
}

/// Per-tenant snapshots of resolved module descriptors
#[derive(Debug, Default)]
pub struct EnabledModuleCache {
    entries: DashMap<String, Arc<ModuleSnapshot>>,
}

impl EnabledModuleCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed snapshot for the tenant, if any
    pub fn get(&self, tenant_id: &str) -> Option<Arc<ModuleSnapshot>> {
        self.entries.get(tenant_id).map(|e| Arc::clone(e.value()))
    }

    /// Resolved descriptors for the tenant (empty when not cached)
    pub fn modules(&self, tenant_id: &str) -> Vec<ModuleDescriptor> {
        self.get(tenant_id)
            .map(|snap| snap.modules.clone())
            .unwrap_or_default()
    }

    /// The tenant's permission-expansion flag
    pub fn expand_permissions(&self, tenant_id: &str) -> Option<bool> {
        self.get(tenant_id).and_then(|snap| snap.expand_permissions)
    }

    /// Drop the tenant's snapshot
    pub fn evict(&self, tenant_id: &str) {
        self.entries.remove(tenant_id);
    }

    /// Re-resolve the tenant's enabled set through the registry and
    /// publish a fresh snapshot
    pub async fn rebuild(
        &self,
        tenant: &Tenant,
        registry: &dyn ModuleRegistry,
    ) -> GatewayResult<()> {
        let mut modules = Vec::with_capacity(tenant.enabled.len());
        let mut expand = None;
        for id in tenant.modules() {
            let md = registry.get(id).await?;
            if let Some(perm) = md.system_interface(system_interfaces::TENANT_PERMISSIONS) {
                let expanded = InterfaceVersion::parse(&perm.version)
                    .map(|v| v.major > 1 || (v.major == 1 && v.minor >= 1))
                    .unwrap_or(false);
                expand = Some(expand.unwrap_or(false) || expanded);
            }
            modules.push(md);
        }
        self.entries
            .insert(tenant.id().to_string(), Arc::new(ModuleSnapshot {
                modules,
                expand_permissions: expand,
            }));
        Ok(())
    }
}
