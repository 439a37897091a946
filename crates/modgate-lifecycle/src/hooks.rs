//! Module hook invocation through the proxy
//!
//! Covers the two hooks the lifecycle drives: the `_tenant`
//! install/upgrade/disable hook (with its three supported interface
//! versions) and the `_tenantPermissions` announcement sink.

use std::sync::Arc;

use modgate_common::{
    system_interfaces, GatewayError, GatewayResult, InterfaceDescriptor, InterfaceType,
    ModuleDescriptor, Tenant,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::external::{CallContext, ModuleInstance, ProxyClient};
use crate::options::InstallOptions;

/// First enabled module providing the named system interface
pub(crate) fn find_system_interface<'a>(
    modules: &'a [ModuleDescriptor],
    interface: &str,
) -> Option<&'a ModuleDescriptor> {
    modules
        .iter()
        .find(|md| md.system_interface(interface).is_some())
}

/// Invokes `_tenant` and `_tenantPermissions` hooks via the proxy
#[derive(Clone)]
pub struct HookInvoker {
    proxy: Arc<dyn ProxyClient>,
}

impl HookInvoker {
    /// Invoker sending through the given proxy
    pub fn new(proxy: Arc<dyn ProxyClient>) -> Self {
        Self { proxy }
    }

    /// Invoke the `_tenant` hook for a module change.
    ///
    /// A 2xx result body is ignored; its trace headers are forwarded into
    /// the call context. Modules without a usable `_tenant` interface are
    /// skipped silently.
    pub async fn invoke_tenant_interface(
        &self,
        tenant: &Tenant,
        options: &InstallOptions,
        md_from: Option<&ModuleDescriptor>,
        md_to: Option<&ModuleDescriptor>,
        ctx: &mut CallContext,
    ) -> GatewayResult<()> {
        if !options.invoke {
            return Ok(());
        }
        let mut body = Map::new();
        if let Some(to) = md_to {
            body.insert("module_to".to_string(), json!(to.id));
        }
        if let Some(from) = md_from {
            body.insert("module_from".to_string(), json!(from.id));
        }
        let purge = md_to.is_none() && options.purge;
        let instance = tenant_instance_for_module(
            md_from,
            md_to,
            &mut body,
            options.tenant_parameters.as_deref(),
            purge,
        )?;
        let Some(instance) = instance else {
            let id = md_to.or(md_from).map(|m| m.id.as_str()).unwrap_or("");
            debug!(module = id, "has no support for tenant init");
            return Ok(());
        };
        let req = if purge {
            String::new()
        } else {
            serde_json::to_string(&Value::Object(body))
                .map_err(|e| GatewayError::internal(e.to_string()))?
        };
        let response = self
            .proxy
            .call_system_interface(tenant.id(), &instance, &req, ctx)
            .await?;
        ctx.absorb_trace(&response);
        Ok(())
    }

    /// POST `md_to`'s permission sets to `perms_module`.
    ///
    /// Version 1.0 of `_tenantPermissions` receives the plain permission
    /// sets; 1.1 and later receive the expanded ones.
    pub async fn announce_permissions(
        &self,
        tenant: &Tenant,
        md_to: &ModuleDescriptor,
        perms_module: &ModuleDescriptor,
        ctx: &mut CallContext,
    ) -> GatewayResult<()> {
        debug!(
            module = %md_to.id,
            perms_module = %perms_module.id,
            "loading permissions"
        );
        let perm_int = perms_module
            .system_interface(system_interfaces::TENANT_PERMISSIONS)
            .ok_or_else(|| {
                GatewayError::internal(format!(
                    "module {} does not provide {}",
                    perms_module.id,
                    system_interfaces::TENANT_PERMISSIONS
                ))
            })?;
        let perms = if perm_int.version == "1.0" {
            &md_to.permission_sets
        } else {
            &md_to.expanded_permission_sets
        };
        let body = json!({ "moduleId": md_to.id, "perms": perms });

        let mut instance = None;
        for re in &perm_int.routing_entries {
            if re.matches_method("POST") {
                if let Some(path) = &re.static_path {
                    instance = Some(ModuleInstance::new(
                        perms_module.clone(),
                        Some(re.clone()),
                        path.clone(),
                        "POST",
                    ));
                }
            }
        }
        let Some(instance) = instance else {
            return Err(GatewayError::user(format!(
                "bad {} interface in module {}: no path to POST to",
                system_interfaces::TENANT_PERMISSIONS,
                perms_module.id
            )));
        };
        let req = serde_json::to_string(&body).map_err(|e| GatewayError::internal(e.to_string()))?;
        let response = self
            .proxy
            .call_system_interface(tenant.id(), &instance, &req, ctx)
            .await?;
        ctx.absorb_trace(&response);
        debug!(
            perms_module = %perms_module.id,
            module = %md_to.id,
            tenant = %tenant.id(),
            "permissions announced"
        );
        Ok(())
    }
}

/// Resolve which HTTP call implements the `_tenant` hook for this change.
///
/// `Ok(None)` means the module offers no usable tenant interface and the
/// hook is skipped.
fn tenant_instance_for_module(
    md_from: Option<&ModuleDescriptor>,
    md_to: Option<&ModuleDescriptor>,
    body: &mut Map<String, Value>,
    tenant_parameters: Option<&str>,
    purge: bool,
) -> GatewayResult<Option<ModuleInstance>> {
    let Some(md) = md_to.or(md_from) else {
        return Ok(None);
    };
    let method = if purge { "DELETE" } else { "POST" };
    for pi in &md.provides {
        if pi.id != system_interfaces::TENANT {
            continue;
        }
        match pi.version.as_str() {
            "1.0" => {
                if md_to.is_some() || purge {
                    if let Some(instance) = instance_for_interface(pi, md, md_to, method) {
                        return Ok(Some(instance));
                    } else if !purge {
                        warn!(
                            module = %md.id,
                            "module uses legacy tenant interface without a \
                             routing entry; falling back to POST /_/tenant"
                        );
                        return Ok(Some(
                            ModuleInstance::new(md.clone(), None, "/_/tenant", "POST").with_retry(),
                        ));
                    }
                }
            }
            "1.1" => {
                if let Some(instance) = instance_for_interface(pi, md, md_to, method) {
                    return Ok(Some(instance));
                }
            }
            "1.2" => {
                put_tenant_parameters(body, tenant_parameters);
                if let Some(instance) = instance_for_interface(pi, md, md_to, method) {
                    return Ok(Some(instance));
                }
            }
            v => {
                return Err(GatewayError::user(format!(
                    "unsupported _tenant interface version {v} in module {}",
                    md.id
                )))
            }
        }
    }
    Ok(None)
}

/// Pick the routing entry for `method` within a `_tenant` interface.
///
/// `/_/tenant/disable` entries serve only pure disables; other POST
/// entries serve installs/upgrades; DELETE entries serve purges.
fn instance_for_interface(
    pi: &InterfaceDescriptor,
    md: &ModuleDescriptor,
    md_to: Option<&ModuleDescriptor>,
    method: &str,
) -> Option<ModuleInstance> {
    if !pi.is_type(InterfaceType::System) {
        return None;
    }
    for re in &pi.routing_entries {
        if !re.matches_method(method) {
            continue;
        }
        let Some(path) = re.static_path.clone() else {
            continue;
        };
        if method == "DELETE" {
            return Some(ModuleInstance::new(
                md.clone(),
                Some(re.clone()),
                path,
                "DELETE",
            ));
        } else if path == "/_/tenant/disable" {
            if md_to.is_none() {
                return Some(ModuleInstance::new(md.clone(), Some(re.clone()), path, "POST"));
            }
        } else if md_to.is_some() {
            return Some(
                ModuleInstance::new(md.clone(), Some(re.clone()), path, "POST").with_retry(),
            );
        }
    }
    None
}

/// Parse a comma-separated `k=v` list into the 1.2 `parameters` array
fn put_tenant_parameters(body: &mut Map<String, Value>, tenant_parameters: Option<&str>) {
    let Some(params) = tenant_parameters else {
        return;
    };
    let mut array = Vec::new();
    for pair in params.split(',') {
        let mut kv = pair.splitn(2, '=');
        let key = kv.next().unwrap_or_default();
        if key.is_empty() {
            continue;
        }
        let mut obj = Map::new();
        obj.insert("key".to_string(), json!(key));
        if let Some(value) = kv.next() {
            obj.insert("value".to_string(), json!(value));
        }
        array.push(Value::Object(obj));
    }
    body.insert("parameters".to_string(), Value::Array(array));
}
