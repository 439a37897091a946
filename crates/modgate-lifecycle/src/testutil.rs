//! Hand-written mock collaborators shared by the crate's tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modgate_common::{
    latest_of, GatewayError, GatewayResult, InterfaceDescriptor, InterfaceType, ModuleDescriptor,
    ModuleId, RoutingEntry, Tenant, TenantDescriptor,
};
use parking_lot::Mutex;

use crate::external::{
    CallContext, CallResponse, Discovery, ModuleInstance, ModuleRegistry, ProxyClient,
    TenantStoreBackend,
};

/// Shared, ordered record of observable side effects across mocks
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Registry over a fixed descriptor set
pub struct MockRegistry {
    modules: HashMap<String, ModuleDescriptor>,
}

impl MockRegistry {
    pub fn new(modules: Vec<ModuleDescriptor>) -> Self {
        Self {
            modules: modules.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }
}

#[async_trait]
impl ModuleRegistry for MockRegistry {
    async fn get(&self, id: &str) -> GatewayResult<ModuleDescriptor> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("module {id}")))
    }

    async fn get_latest(&self, name_or_id: &str) -> GatewayResult<ModuleDescriptor> {
        if let Some(md) = self.modules.get(name_or_id) {
            return Ok(md.clone());
        }
        let name = ModuleId::parse(name_or_id)?;
        latest_of(&name, self.modules.keys().map(String::as_str))
            .and_then(|id| self.modules.get(&id).cloned())
            .ok_or_else(|| GatewayError::not_found(format!("module {name_or_id}")))
    }

    async fn modules_with_filter(
        &self,
        pre_release: bool,
        _npm_snapshot: bool,
        filter_id: Option<&str>,
    ) -> GatewayResult<Vec<ModuleDescriptor>> {
        let mut out: Vec<ModuleDescriptor> = self
            .modules
            .values()
            .filter(|md| {
                if let Some(filter) = filter_id {
                    if md.id != filter {
                        return false;
                    }
                }
                if !pre_release {
                    if let Ok(mid) = ModuleId::parse(&md.id) {
                        if mid.version().is_some_and(|v| v.to_string().contains('-')) {
                            return false;
                        }
                    }
                }
                true
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

/// In-memory tenant store, optionally recording writes to a shared log
#[derive(Default)]
pub struct MockStore {
    tenants: Mutex<HashMap<String, Tenant>>,
    log: Option<EventLog>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            tenants: Mutex::new(HashMap::new()),
            log: Some(log),
        }
    }

    pub fn seed(&self, tenant: Tenant) {
        self.tenants.lock().insert(tenant.id().to_string(), tenant);
    }

    fn record(&self, event: String) {
        if let Some(log) = &self.log {
            log.lock().push(event);
        }
    }
}

#[async_trait]
impl TenantStoreBackend for MockStore {
    async fn list_tenants(&self) -> GatewayResult<Vec<Tenant>> {
        let mut out: Vec<Tenant> = self.tenants.lock().values().cloned().collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(out)
    }

    async fn insert(&self, tenant: &Tenant) -> GatewayResult<()> {
        self.tenants
            .lock()
            .insert(tenant.id().to_string(), tenant.clone());
        Ok(())
    }

    async fn update_descriptor(&self, td: &TenantDescriptor) -> GatewayResult<()> {
        let mut map = self.tenants.lock();
        let enabled = map
            .get(&td.id)
            .map(|t| t.enabled.clone())
            .unwrap_or_default();
        map.insert(td.id.clone(), Tenant::with_enabled(td.clone(), enabled));
        Ok(())
    }

    async fn update_modules(
        &self,
        id: &str,
        enabled: &BTreeMap<String, DateTime<Utc>>,
    ) -> GatewayResult<bool> {
        let mut map = self.tenants.lock();
        let Some(t) = map.get_mut(id) else {
            return Ok(false);
        };
        t.enabled = enabled.clone();
        self.record(format!("store:update_modules:{id}"));
        Ok(true)
    }

    async fn delete(&self, id: &str) -> GatewayResult<bool> {
        Ok(self.tenants.lock().remove(id).is_some())
    }
}

/// One recorded system-interface call
#[derive(Debug, Clone)]
pub struct ProxyCall {
    pub tenant_id: String,
    pub module_id: String,
    pub path: String,
    pub method: String,
    pub body: String,
    pub retry: bool,
}

/// Proxy that records calls and can be told to fail specific paths
#[derive(Default)]
pub struct RecordingProxy {
    calls: Mutex<Vec<ProxyCall>>,
    deploys: Mutex<Vec<String>>,
    undeploys: Mutex<Vec<String>>,
    fail_paths: Mutex<Vec<String>>,
    log: Option<EventLog>,
}

impl RecordingProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn fail_on(&self, path: &str) {
        self.fail_paths.lock().push(path.to_string());
    }

    pub fn calls(&self) -> Vec<ProxyCall> {
        self.calls.lock().clone()
    }

    pub fn deployed(&self) -> Vec<String> {
        self.deploys.lock().clone()
    }

    pub fn undeployed(&self) -> Vec<String> {
        self.undeploys.lock().clone()
    }

    fn record(&self, event: String) {
        if let Some(log) = &self.log {
            log.lock().push(event);
        }
    }
}

#[async_trait]
impl ProxyClient for RecordingProxy {
    async fn call_system_interface(
        &self,
        tenant_id: &str,
        instance: &ModuleInstance,
        body: &str,
        _ctx: &CallContext,
    ) -> GatewayResult<CallResponse> {
        if self.fail_paths.lock().iter().any(|p| p == &instance.path) {
            return Err(GatewayError::internal(format!(
                "call to {} failed",
                instance.path
            )));
        }
        self.record(format!("proxy:{}:{}", instance.method, instance.path));
        self.calls.lock().push(ProxyCall {
            tenant_id: tenant_id.to_string(),
            module_id: instance.module.id.clone(),
            path: instance.path.clone(),
            method: instance.method.clone(),
            body: body.to_string(),
            retry: instance.retry,
        });
        Ok(CallResponse {
            status: 204,
            body: String::new(),
            trace_headers: vec![format!("GET {} : 204", instance.path)],
        })
    }

    async fn auto_deploy(&self, md: &ModuleDescriptor) -> GatewayResult<()> {
        if self.fail_paths.lock().iter().any(|p| p == &md.id) {
            return Err(GatewayError::internal(format!("deploy of {} failed", md.id)));
        }
        self.deploys.lock().push(md.id.clone());
        Ok(())
    }

    async fn auto_undeploy(&self, md: &ModuleDescriptor) -> GatewayResult<()> {
        self.undeploys.lock().push(md.id.clone());
        Ok(())
    }
}

/// Discovery with a fixed leadership answer
pub struct StaticDiscovery {
    leader: bool,
}

impl StaticDiscovery {
    pub fn new(leader: bool) -> Self {
        Self { leader }
    }
}

impl Discovery for StaticDiscovery {
    fn is_leader(&self) -> bool {
        self.leader
    }
}

fn base_module(id: &str) -> ModuleDescriptor {
    let name = ModuleId::parse(id)
        .map(|m| m.name().to_string())
        .unwrap_or_else(|_| id.to_string());
    ModuleDescriptor {
        id: id.to_string(),
        name,
        provides: vec![],
        requires: vec![],
        optional: vec![],
        permission_sets: vec![],
        expanded_permission_sets: vec![],
    }
}

/// Module providing one proxy interface, no hooks
pub fn simple_module(id: &str, interface: &str, version: &str) -> ModuleDescriptor {
    let mut md = base_module(id);
    md.provides.push(InterfaceDescriptor {
        id: interface.to_string(),
        version: version.to_string(),
        interface_type: InterfaceType::Proxy,
        routing_entries: vec![],
    });
    md
}

/// Add a `_tenant` system interface with POST/DELETE entries
pub fn with_tenant_hook(mut md: ModuleDescriptor, version: &str) -> ModuleDescriptor {
    md.provides.push(InterfaceDescriptor {
        id: "_tenant".to_string(),
        version: version.to_string(),
        interface_type: InterfaceType::System,
        routing_entries: vec![
            RoutingEntry {
                methods: vec!["POST".into()],
                static_path: Some("/_/tenant".into()),
                delay: None,
                unit: None,
            },
            RoutingEntry {
                methods: vec!["POST".into()],
                static_path: Some("/_/tenant/disable".into()),
                delay: None,
                unit: None,
            },
            RoutingEntry {
                methods: vec!["DELETE".into()],
                static_path: Some("/_/tenant".into()),
                delay: None,
                unit: None,
            },
        ],
    });
    md
}

/// Module providing `_tenantPermissions` at the given version
pub fn perms_module(id: &str, version: &str) -> ModuleDescriptor {
    let mut md = simple_module(id, "permissions", "1.0");
    md.provides.push(InterfaceDescriptor {
        id: "_tenantPermissions".to_string(),
        version: version.to_string(),
        interface_type: InterfaceType::System,
        routing_entries: vec![RoutingEntry {
            methods: vec!["POST".into()],
            static_path: Some("/_/tenantPermissions".into()),
            delay: None,
            unit: None,
        }],
    });
    md
}

/// Module declaring one `_timer` routing entry
pub fn timer_module(id: &str, path: &str, delay_ms: u64) -> ModuleDescriptor {
    let mut md = base_module(id);
    md.provides.push(InterfaceDescriptor {
        id: "_timer".to_string(),
        version: "1.0".to_string(),
        interface_type: InterfaceType::System,
        routing_entries: vec![RoutingEntry {
            methods: vec!["POST".into()],
            static_path: Some(path.to_string()),
            delay: Some(delay_ms),
            unit: Some(modgate_common::DelayUnit::Millis),
        }],
    });
    md
}

/// Add a required-interface reference
pub fn with_requirement(mut md: ModuleDescriptor, interface: &str, version: &str) -> ModuleDescriptor {
    md.requires.push(modgate_common::InterfaceReference {
        id: interface.to_string(),
        version: version.to_string(),
    });
    md
}

/// Set the module's permission sets (plain and expanded)
pub fn with_permissions(
    mut md: ModuleDescriptor,
    perms: serde_json::Value,
    expanded: serde_json::Value,
) -> ModuleDescriptor {
    md.permission_sets = vec![perms];
    md.expanded_permission_sets = vec![expanded];
    md
}
