//! Options for install/upgrade operations

use serde::{Deserialize, Serialize};

/// Caller-supplied knobs for module enable/disable and install jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    /// Ask the proxy to auto-deploy/undeploy module artifacts
    pub deploy: bool,
    /// Compute and return the expanded plan without persisting a job
    pub simulate: bool,
    /// Return the plan snapshot immediately and run the job in background
    pub background: bool,
    /// Record per-item failures and keep going instead of short-circuiting
    pub ignore_errors: bool,
    /// Include pre-release module versions in the available set
    pub pre_release: bool,
    /// Include npm-snapshot module versions in the available set
    pub npm_snapshot: bool,
    /// Verify the dependency/conflict closure before applying a change
    pub dep_check: bool,
    /// Invoke the module's tenant and permissions hooks
    pub invoke: bool,
    /// On disable, purge the module's tenant data (DELETE hook)
    pub purge: bool,
    /// Comma-separated `k=v` list forwarded to `_tenant` 1.2 hooks
    pub tenant_parameters: Option<String>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            deploy: false,
            simulate: false,
            background: false,
            ignore_errors: false,
            pre_release: false,
            npm_snapshot: false,
            dep_check: true,
            invoke: true,
            purge: false,
            tenant_parameters: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = InstallOptions::default();
        assert!(opts.dep_check);
        assert!(opts.invoke);
        assert!(!opts.deploy);
        assert!(!opts.purge);
    }

    #[test]
    fn test_partial_deserialization() {
        let opts: InstallOptions = serde_json::from_str(r#"{"simulate": true}"#).unwrap();
        assert!(opts.simulate);
        assert!(opts.dep_check);
    }
}
