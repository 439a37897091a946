//! ModGate Lifecycle - tenant lifecycle core for the modular-service gateway
//!
//! The control plane behind the gateway's proxy: owns tenant state on a
//! replicated map, resolves module inter-dependencies, orchestrates
//! multi-step install/upgrade jobs, drives each module's tenant and
//! permissions hooks in order, and schedules `_timer` routing entries on
//! the cluster leader.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    TENANT LIFECYCLE MANAGER                      │
//! │                                                                  │
//! │  ┌──────────┐  ┌───────────┐  ┌──────────┐  ┌───────────────┐   │
//! │  │ Replic.  │  │ Dependency│  │ Install  │  │    Timer      │   │
//! │  │   Maps   │  │  Resolver │  │  Engine  │  │  Scheduler    │   │
//! │  └────┬─────┘  └─────┬─────┘  └────┬─────┘  └──────┬────────┘   │
//! │       │              │             │               │            │
//! │       └──────────────┴──────┬──────┴───────────────┘            │
//! │                             │                                   │
//! │                      ┌──────┴───────┐                           │
//! │                      │ Hook Invoker │                           │
//! │                      └──────┬───────┘                           │
//! └─────────────────────────────┼───────────────────────────────────┘
//!                               │
//!              Registry ── Store ── Proxy ── Discovery
//!                     (external collaborators)
//! ```
//!
//! The proxy data plane, module registry, persistent store and discovery
//! service are external; this crate depends on them only through the
//! traits in [`external`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod cache;
pub mod external;
pub mod hooks;
pub mod install;
pub mod jobs;
pub mod map;
pub mod manager;
pub mod options;
pub mod resolver;
pub mod timers;

#[cfg(test)]
pub(crate) mod testutil;

pub use bus::EventBus;
pub use cache::{EnabledModuleCache, ModuleSnapshot};
pub use external::{
    CallContext, CallResponse, Discovery, ModuleInstance, ModuleRegistry, ProxyClient,
    TenantStoreBackend,
};
pub use hooks::HookInvoker;
pub use jobs::JobStore;
pub use manager::{LifecycleDeps, TenantLifecycleManager};
pub use map::{ClusterKv, ClusterMap, ClusterMap2, LocalMap, LocalMap2, MemoryKv, TypedMap, TypedMap2};
pub use options::InstallOptions;
pub use timers::{TimerKey, TimerScheduler};
