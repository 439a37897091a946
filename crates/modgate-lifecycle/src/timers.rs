//! Periodic timer scheduling for `_timer` routing entries
//!
//! Each armed `(tenant, module, seq)` key owns one spawned task that
//! sleeps for the entry's delay, re-validates the key against the current
//! tenant state, fires on the cluster leader only, and re-arms. A key
//! whose tenant or module disappears removes itself at the next wake-up,
//! so a stale process fires at most one extra time after a disable.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use modgate_common::{system_interfaces, ModuleDescriptor, RoutingEntry, Tenant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::EnabledModuleCache;
use crate::external::{CallContext, Discovery, ModuleInstance, ProxyClient};
use crate::map::TypedMap;

/// Identity of one armed timer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    /// Tenant the timer belongs to
    pub tenant_id: String,
    /// Module declaring the `_timer` entry
    pub module_id: String,
    /// 1-based routing-entry number within the interface
    pub seq: usize,
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.tenant_id, self.module_id, self.seq)
    }
}

/// Arms and drives per-tenant timers; firing is leader-exclusive
#[derive(Clone)]
pub struct TimerScheduler {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    tenants: Arc<dyn TypedMap<Tenant>>,
    cache: Arc<EnabledModuleCache>,
    discovery: Arc<dyn Discovery>,
    proxy: Arc<dyn ProxyClient>,
    timers: DashMap<TimerKey, Arc<AtomicBool>>,
}

impl TimerScheduler {
    /// Scheduler over the shared tenant map and process-local cache
    pub fn new(
        tenants: Arc<dyn TypedMap<Tenant>>,
        cache: Arc<EnabledModuleCache>,
        discovery: Arc<dyn Discovery>,
        proxy: Arc<dyn ProxyClient>,
    ) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                tenants,
                cache,
                discovery,
                proxy,
                timers: DashMap::new(),
            }),
        }
    }

    /// Arm every `_timer` entry of the tenant's enabled modules that is
    /// not armed yet in this process
    pub fn arm_tenant(&self, tenant_id: &str) {
        for md in self.inner.cache.modules(tenant_id) {
            let Some(timer_int) = md.system_interface(system_interfaces::TIMER) else {
                continue;
            };
            for (idx, re) in timer_int.routing_entries.iter().enumerate() {
                let seq = idx + 1;
                let delay = re.delay_millis();
                if delay == 0 || re.static_path.is_none() {
                    continue;
                }
                let key = TimerKey {
                    tenant_id: tenant_id.to_string(),
                    module_id: md.id.clone(),
                    seq,
                };
                if self.inner.timers.contains_key(&key) {
                    continue;
                }
                let cancelled = Arc::new(AtomicBool::new(false));
                self.inner.timers.insert(key.clone(), Arc::clone(&cancelled));
                info!(timer = %key, delay_ms = delay, "arming timer");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    TimerInner::run(inner, key, cancelled, delay).await;
                });
            }
        }
    }

    /// Number of timers currently armed in this process
    pub fn active_timers(&self) -> usize {
        self.inner.timers.len()
    }

    /// Flag every armed timer for cancellation at its next wake-up
    pub fn cancel_all(&self) {
        for entry in self.inner.timers.iter() {
            entry.value().store(true, Ordering::Relaxed);
        }
    }
}

impl TimerInner {
    async fn run(inner: Arc<Self>, key: TimerKey, cancelled: Arc<AtomicBool>, mut delay: u64) {
        loop {
            sleep(Duration::from_millis(delay)).await;
            if cancelled.load(Ordering::Relaxed) {
                inner.stop(&key);
                return;
            }
            match inner.tenants.get(&key.tenant_id).await {
                Ok(Some(_)) => {}
                _ => {
                    inner.stop(&key);
                    return;
                }
            }
            let Some((md, entry)) = inner.current_entry(&key) else {
                inner.stop(&key);
                return;
            };
            delay = entry.delay_millis();
            if delay == 0 {
                inner.stop(&key);
                return;
            }
            if inner.discovery.is_leader() {
                inner.fire(&key, &md, &entry).await;
            }
            // non-leaders re-arm too; leadership may move between fires
        }
    }

    /// The routing entry the key refers to in the current snapshot
    fn current_entry(&self, key: &TimerKey) -> Option<(ModuleDescriptor, RoutingEntry)> {
        let snapshot = self.cache.get(&key.tenant_id)?;
        let md = snapshot.modules.iter().find(|m| m.id == key.module_id)?;
        let timer_int = md.system_interface(system_interfaces::TIMER)?;
        let re = timer_int.routing_entries.get(key.seq - 1)?;
        re.static_path.as_ref()?;
        Some((md.clone(), re.clone()))
    }

    async fn fire(&self, key: &TimerKey, md: &ModuleDescriptor, re: &RoutingEntry) {
        let path = re.static_path.clone().unwrap_or_default();
        let method = re.default_method("POST");
        let instance = ModuleInstance::new(md.clone(), Some(re.clone()), path, method);
        let ctx = CallContext::new();
        debug!(module = %md.id, tenant = %key.tenant_id, "timer call start");
        match self
            .proxy
            .call_system_interface(&key.tenant_id, &instance, "", &ctx)
            .await
        {
            Ok(_) => {
                debug!(module = %md.id, tenant = %key.tenant_id, "timer call succeeded");
            }
            Err(e) => {
                // failures are logged and ignored; the timer re-arms
                warn!(
                    module = %md.id,
                    tenant = %key.tenant_id,
                    error = %e,
                    "timer call failed"
                );
            }
        }
    }

    fn stop(&self, key: &TimerKey) {
        info!(timer = %key, "removing timer");
        self.timers.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{timer_module, MockRegistry, RecordingProxy, StaticDiscovery};
    use crate::map::LocalMap;
    use modgate_common::{Tenant, TenantDescriptor};

    async fn setup(
        leader: bool,
        tenants: Arc<dyn TypedMap<Tenant>>,
        delay_ms: u64,
    ) -> (TimerScheduler, Arc<RecordingProxy>) {
        let registry = MockRegistry::new(vec![timer_module("mod-timer-1.0.0", "/t", delay_ms)]);
        let cache = Arc::new(EnabledModuleCache::new());
        let tenant = tenants.get_or_fail("diku").await.unwrap();
        cache.rebuild(&tenant, &registry).await.unwrap();
        let proxy = Arc::new(RecordingProxy::new());
        let scheduler = TimerScheduler::new(
            tenants,
            cache,
            Arc::new(StaticDiscovery::new(leader)),
            proxy.clone(),
        );
        (scheduler, proxy)
    }

    fn tenant_with_timer() -> Tenant {
        let mut t = Tenant::new(TenantDescriptor {
            id: "diku".into(),
            name: None,
            description: None,
        });
        t.enable_module("mod-timer-1.0.0");
        t
    }

    #[tokio::test]
    async fn test_leader_fires_follower_does_not() {
        let tenants: Arc<dyn TypedMap<Tenant>> = Arc::new(LocalMap::new());
        tenants.add("diku", tenant_with_timer()).await.unwrap();

        // two processes sharing the tenant map; only one is leader
        let (leader, leader_proxy) = setup(true, tenants.clone(), 40).await;
        let (follower, follower_proxy) = setup(false, tenants.clone(), 40).await;
        leader.arm_tenant("diku");
        follower.arm_tenant("diku");

        sleep(Duration::from_millis(220)).await;

        let fired = leader_proxy.calls();
        assert!(fired.len() >= 2, "leader fired {} times", fired.len());
        assert!(fired.iter().all(|c| c.path == "/t" && c.method == "POST"));
        assert!(follower_proxy.calls().is_empty());

        leader.cancel_all();
        follower.cancel_all();
    }

    #[tokio::test]
    async fn test_arming_is_idempotent_per_key() {
        let tenants: Arc<dyn TypedMap<Tenant>> = Arc::new(LocalMap::new());
        tenants.add("diku", tenant_with_timer()).await.unwrap();
        let (scheduler, _proxy) = setup(false, tenants, 60_000).await;

        scheduler.arm_tenant("diku");
        scheduler.arm_tenant("diku");
        assert_eq!(scheduler.active_timers(), 1);
        scheduler.cancel_all();
    }

    #[tokio::test]
    async fn test_timer_stops_when_tenant_disappears() {
        let tenants: Arc<dyn TypedMap<Tenant>> = Arc::new(LocalMap::new());
        tenants.add("diku", tenant_with_timer()).await.unwrap();
        let (scheduler, proxy) = setup(true, tenants.clone(), 30).await;

        scheduler.arm_tenant("diku");
        tenants.remove("diku").await.unwrap();
        sleep(Duration::from_millis(120)).await;

        assert_eq!(scheduler.active_timers(), 0);
        assert!(proxy.calls().is_empty());
    }

    #[tokio::test]
    async fn test_timer_stops_when_module_no_longer_enabled() {
        let tenants: Arc<dyn TypedMap<Tenant>> = Arc::new(LocalMap::new());
        tenants.add("diku", tenant_with_timer()).await.unwrap();
        let (scheduler, _proxy) = setup(false, tenants, 30).await;

        scheduler.arm_tenant("diku");
        assert_eq!(scheduler.active_timers(), 1);

        // simulate a disable commit: the rebuilt snapshot loses the module
        let registry = MockRegistry::new(vec![]);
        let mut bare = tenant_with_timer();
        bare.disable_module("mod-timer-1.0.0");
        scheduler
            .inner
            .cache
            .rebuild(&bare, &registry)
            .await
            .unwrap();

        sleep(Duration::from_millis(120)).await;
        assert_eq!(scheduler.active_timers(), 0);
    }
}
