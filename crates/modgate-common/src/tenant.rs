//! Tenants, install jobs and plan items

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant identity and display attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescriptor {
    /// Stable opaque tenant id
    pub id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An isolated customer account with its enabled module set
///
/// The enabled map is ordered (module id → enablement time); the
/// permissions bootstrap announces modules in this iteration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Identity and display attributes
    pub descriptor: TenantDescriptor,
    /// Enabled module ids and when each was enabled
    #[serde(default)]
    pub enabled: BTreeMap<String, DateTime<Utc>>,
}

impl Tenant {
    /// New tenant with an empty enabled set
    pub fn new(descriptor: TenantDescriptor) -> Self {
        Self {
            descriptor,
            enabled: BTreeMap::new(),
        }
    }

    /// New tenant preserving an existing enabled set
    pub fn with_enabled(
        descriptor: TenantDescriptor,
        enabled: BTreeMap<String, DateTime<Utc>>,
    ) -> Self {
        Self { descriptor, enabled }
    }

    /// Tenant id
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Whether the module id is enabled
    pub fn is_enabled(&self, module_id: &str) -> bool {
        self.enabled.contains_key(module_id)
    }

    /// Enabled module ids in map order
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.enabled.keys().map(String::as_str)
    }

    /// Mark a module enabled as of now
    pub fn enable_module(&mut self, module_id: &str) {
        self.enabled.insert(module_id.to_string(), Utc::now());
    }

    /// Remove a module from the enabled set
    pub fn disable_module(&mut self, module_id: &str) {
        self.enabled.remove(module_id);
    }
}

/// Requested change for one module in an install plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleAction {
    /// Enable the module (an upgrade when `from` is set)
    Enable,
    /// Disable the module
    Disable,
    /// Already at the requested version; nothing to do
    Uptodate,
    /// The request cannot be satisfied; see `message`
    Conflict,
}

/// Progress of one plan item through the install engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStage {
    /// Queued, not started
    Pending,
    /// Artifact deployment in progress
    Deploy,
    /// Tenant/permissions hooks being invoked
    Invoke,
    /// Artifact undeployment in progress
    Undeploy,
    /// Finished successfully
    Done,
}

/// One module change within an install job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantModuleDescriptor {
    /// Target module id
    pub id: String,
    /// Previous module id for upgrades
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Requested change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ModuleAction>,
    /// Engine progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ModuleStage>,
    /// Failure text when the item did not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TenantModuleDescriptor {
    /// Enable item for `id`
    pub fn enable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: None,
            action: Some(ModuleAction::Enable),
            stage: None,
            message: None,
        }
    }

    /// Disable item for `id`
    pub fn disable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: None,
            action: Some(ModuleAction::Disable),
            stage: None,
            message: None,
        }
    }

    /// Copy for API responses, with engine progress stripped
    pub fn without_stage(&self) -> Self {
        Self {
            stage: None,
            ..self.clone()
        }
    }
}

/// Durable record of a planned multi-module change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallJob {
    /// Job id, chosen by the caller
    pub id: String,
    /// When the job was created
    pub start_date: DateTime<Utc>,
    /// When the job finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Whether the job has run to completion
    pub complete: bool,
    /// Plan items in execution order
    pub modules: Vec<TenantModuleDescriptor>,
}

impl InstallJob {
    /// New incomplete job starting now
    pub fn new(id: impl Into<String>, modules: Vec<TenantModuleDescriptor>) -> Self {
        Self {
            id: id.into(),
            start_date: Utc::now(),
            end_date: None,
            complete: false,
            modules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> Tenant {
        Tenant::new(TenantDescriptor {
            id: id.into(),
            name: Some(id.to_uppercase()),
            description: None,
        })
    }

    #[test]
    fn test_enable_disable() {
        let mut t = tenant("diku");
        t.enable_module("mod-users-1.0.0");
        assert!(t.is_enabled("mod-users-1.0.0"));
        t.disable_module("mod-users-1.0.0");
        assert!(!t.is_enabled("mod-users-1.0.0"));
    }

    #[test]
    fn test_module_iteration_is_ordered() {
        let mut t = tenant("diku");
        t.enable_module("mod-b-1.0.0");
        t.enable_module("mod-a-1.0.0");
        let ids: Vec<_> = t.modules().collect();
        assert_eq!(ids, vec!["mod-a-1.0.0", "mod-b-1.0.0"]);
    }

    #[test]
    fn test_without_stage() {
        let mut tm = TenantModuleDescriptor::enable("mod-a-1.0.0");
        tm.stage = Some(ModuleStage::Done);
        let clean = tm.without_stage();
        assert!(clean.stage.is_none());
        assert_eq!(clean.id, "mod-a-1.0.0");
        assert_eq!(clean.action, Some(ModuleAction::Enable));
    }

    #[test]
    fn test_tenant_serde_round_trip() {
        let mut t = tenant("diku");
        t.enable_module("mod-users-1.0.0");
        let json = serde_json::to_string(&t).unwrap();
        let back: Tenant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
