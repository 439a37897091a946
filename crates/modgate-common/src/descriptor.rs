//! Module descriptors: provided/required interfaces and routing entries
//!
//! Descriptors are owned by the external module registry; this crate only
//! models the attributes the lifecycle core consumes.

use serde::{Deserialize, Serialize};

/// How an interface is exposed through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Regular proxied interface; at most one provider per tenant
    #[default]
    Proxy,
    /// Platform-internal hook (`_tenant`, `_tenantPermissions`, `_timer`)
    System,
    /// Proxied interface that tolerates multiple providers
    Multiple,
}

/// Time unit for timer routing entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    /// Milliseconds
    Millis,
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
}

impl DelayUnit {
    fn millis_per_unit(self) -> u64 {
        match self {
            Self::Millis => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
        }
    }
}

/// One routable entry on an interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// Accepted HTTP methods (`*` matches any)
    #[serde(default)]
    pub methods: Vec<String>,
    /// Fixed path the entry serves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_path: Option<String>,
    /// Firing period for `_timer` entries, in `unit`s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Unit for `delay`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<DelayUnit>,
}

impl RoutingEntry {
    /// Firing period in milliseconds; zero when the entry declares none
    pub fn delay_millis(&self) -> u64 {
        let delay = self.delay.unwrap_or(0);
        let unit = self.unit.unwrap_or(DelayUnit::Millis);
        delay.saturating_mul(unit.millis_per_unit())
    }

    /// Whether the entry accepts `method`
    pub fn matches_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method || m == "*")
    }

    /// First declared method, or `fallback` when none is declared
    pub fn default_method(&self, fallback: &str) -> String {
        self.methods
            .iter()
            .find(|m| *m != "*")
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// A provided interface on a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// Interface id, e.g. `users` or `_tenant`
    pub id: String,
    /// Interface version `major.minor`
    pub version: String,
    /// Exposure type
    #[serde(default)]
    pub interface_type: InterfaceType,
    /// Routable entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_entries: Vec<RoutingEntry>,
}

impl InterfaceDescriptor {
    /// Trimmed copy carrying only id and version
    pub fn brief(&self) -> Self {
        Self {
            id: self.id.clone(),
            version: self.version.clone(),
            interface_type: InterfaceType::default(),
            routing_entries: Vec::new(),
        }
    }

    /// Whether this interface has the given type name
    pub fn is_type(&self, interface_type: InterfaceType) -> bool {
        self.interface_type == interface_type
    }
}

/// A required or optional interface reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceReference {
    /// Interface id
    pub id: String,
    /// Minimum acceptable version `major.minor`
    pub version: String,
}

/// Machine-readable description of a published module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Module id of the form `name-semver`
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Interfaces the module provides
    #[serde(default)]
    pub provides: Vec<InterfaceDescriptor>,
    /// Interfaces the module requires
    #[serde(default)]
    pub requires: Vec<InterfaceReference>,
    /// Interfaces the module uses when present
    #[serde(default)]
    pub optional: Vec<InterfaceReference>,
    /// Permission sets the module defines (opaque to the lifecycle)
    #[serde(default)]
    pub permission_sets: Vec<serde_json::Value>,
    /// Permission sets with sub-permissions expanded
    #[serde(default)]
    pub expanded_permission_sets: Vec<serde_json::Value>,
}

impl ModuleDescriptor {
    /// The provided system interface named `name`, if any
    pub fn system_interface(&self, name: &str) -> Option<&InterfaceDescriptor> {
        self.provides
            .iter()
            .find(|p| p.id == name && p.is_type(InterfaceType::System))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_entry(delay: u64, unit: DelayUnit) -> RoutingEntry {
        RoutingEntry {
            methods: vec!["POST".into()],
            static_path: Some("/t".into()),
            delay: Some(delay),
            unit: Some(unit),
        }
    }

    #[test]
    fn test_delay_millis() {
        assert_eq!(timer_entry(100, DelayUnit::Millis).delay_millis(), 100);
        assert_eq!(timer_entry(2, DelayUnit::Seconds).delay_millis(), 2_000);
        assert_eq!(timer_entry(5, DelayUnit::Minutes).delay_millis(), 300_000);
        assert_eq!(RoutingEntry::default().delay_millis(), 0);
    }

    #[test]
    fn test_method_matching() {
        let re = timer_entry(1, DelayUnit::Seconds);
        assert!(re.matches_method("POST"));
        assert!(!re.matches_method("DELETE"));
        assert_eq!(re.default_method("GET"), "POST");

        let any = RoutingEntry {
            methods: vec!["*".into()],
            ..Default::default()
        };
        assert!(any.matches_method("DELETE"));
        assert_eq!(any.default_method("POST"), "POST");
    }

    #[test]
    fn test_system_interface_lookup() {
        let md = ModuleDescriptor {
            id: "mod-perms-1.0.0".into(),
            name: "perms".into(),
            provides: vec![
                InterfaceDescriptor {
                    id: "perms".into(),
                    version: "1.0".into(),
                    interface_type: InterfaceType::Proxy,
                    routing_entries: vec![],
                },
                InterfaceDescriptor {
                    id: "_tenantPermissions".into(),
                    version: "1.1".into(),
                    interface_type: InterfaceType::System,
                    routing_entries: vec![],
                },
            ],
            requires: vec![],
            optional: vec![],
            permission_sets: vec![],
            expanded_permission_sets: vec![],
        };
        assert!(md.system_interface("_tenantPermissions").is_some());
        // proxy interfaces never resolve as system hooks
        assert!(md.system_interface("perms").is_none());
    }
}
