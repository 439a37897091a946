//! ModGate Common - Shared domain types for the modular-service gateway
//!
//! This crate provides the vocabulary shared by the gateway's planes:
//! - Module descriptors, interfaces and routing entries
//! - Tenants, install jobs and plan items
//! - Module-id and interface-version arithmetic
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod error;
pub mod module_id;
pub mod tenant;

pub use descriptor::*;
pub use error::*;
pub use module_id::*;
pub use tenant::*;

/// Well-known system interface ids
pub mod system_interfaces {
    /// Install/upgrade/disable hook
    pub const TENANT: &str = "_tenant";
    /// Permission-announcement sink
    pub const TENANT_PERMISSIONS: &str = "_tenantPermissions";
    /// Periodic routing entries
    pub const TIMER: &str = "_timer";
}
