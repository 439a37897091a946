//! External collaborator seams
//!
//! The lifecycle core never talks to the registry, the persistent store,
//! the proxy data plane or the discovery service directly; it depends on
//! the traits here and the hosting process wires in real implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modgate_common::{GatewayResult, ModuleDescriptor, RoutingEntry, Tenant, TenantDescriptor};
use uuid::Uuid;

/// Read access to the static module-descriptor registry
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    /// Descriptor for an exact module id
    async fn get(&self, id: &str) -> GatewayResult<ModuleDescriptor>;

    /// Latest descriptor for a product name or exact id
    async fn get_latest(&self, name_or_id: &str) -> GatewayResult<ModuleDescriptor>;

    /// All descriptors passing the pre-release / npm-snapshot filters,
    /// optionally restricted to one product
    async fn modules_with_filter(
        &self,
        pre_release: bool,
        npm_snapshot: bool,
        filter_id: Option<&str>,
    ) -> GatewayResult<Vec<ModuleDescriptor>>;
}

/// Persistent tenant storage; the canonical truth behind the replicated map
#[async_trait]
pub trait TenantStoreBackend: Send + Sync {
    /// All persisted tenants
    async fn list_tenants(&self) -> GatewayResult<Vec<Tenant>>;

    /// Persist a new tenant
    async fn insert(&self, tenant: &Tenant) -> GatewayResult<()>;

    /// Persist descriptor changes
    async fn update_descriptor(&self, td: &TenantDescriptor) -> GatewayResult<()>;

    /// Persist the enabled-module map; `false` when the tenant is unknown
    async fn update_modules(
        &self,
        id: &str,
        enabled: &BTreeMap<String, DateTime<Utc>>,
    ) -> GatewayResult<bool>;

    /// Remove a tenant; `false` when the tenant is unknown
    async fn delete(&self, id: &str) -> GatewayResult<bool>;
}

/// Cluster-wide leader election, consulted at timer fire time
pub trait Discovery: Send + Sync {
    /// Whether this process currently holds cluster leadership
    fn is_leader(&self) -> bool;
}

/// A fully resolved target for one system-interface call
#[derive(Debug, Clone)]
pub struct ModuleInstance {
    /// Module being called
    pub module: ModuleDescriptor,
    /// Routing entry the path came from, when one matched
    pub routing_entry: Option<RoutingEntry>,
    /// Request path
    pub path: String,
    /// HTTP method
    pub method: String,
    /// Marks the request as a platform-internal call
    pub system_call: bool,
    /// Whether the proxy should retry transient failures
    pub retry: bool,
}

impl ModuleInstance {
    /// Instance for a system call to `module`
    pub fn new(
        module: ModuleDescriptor,
        routing_entry: Option<RoutingEntry>,
        path: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            module,
            routing_entry,
            path: path.into(),
            method: method.into(),
            system_call: true,
            retry: false,
        }
    }

    /// Enable transient-failure retries on this instance
    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }
}

/// Per-operation call context: request id plus accumulated trace headers
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Request id propagated on every hop of the operation
    pub request_id: String,
    /// Gateway trace headers gathered from hook responses
    pub trace_headers: Vec<String>,
}

impl CallContext {
    /// Fresh context with a generated request id
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_headers: Vec::new(),
        }
    }

    /// Forward the trace headers a hook response carried
    pub fn absorb_trace(&mut self, response: &CallResponse) {
        self.trace_headers
            .extend(response.trace_headers.iter().cloned());
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Response of a system-interface call
#[derive(Debug, Clone, Default)]
pub struct CallResponse {
    /// HTTP status
    pub status: u16,
    /// Response body
    pub body: String,
    /// Gateway trace headers emitted by the module
    pub trace_headers: Vec<String>,
}

/// Outbound access to modules through the proxy data plane
#[async_trait]
pub trait ProxyClient: Send + Sync {
    /// Invoke a system interface on behalf of a tenant
    async fn call_system_interface(
        &self,
        tenant_id: &str,
        instance: &ModuleInstance,
        body: &str,
        ctx: &CallContext,
    ) -> GatewayResult<CallResponse>;

    /// Deploy the module's artifact
    async fn auto_deploy(&self, md: &ModuleDescriptor) -> GatewayResult<()>;

    /// Undeploy the module's artifact
    async fn auto_undeploy(&self, md: &ModuleDescriptor) -> GatewayResult<()>;
}
