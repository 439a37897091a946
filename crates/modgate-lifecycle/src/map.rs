//! Replicated key/value maps shared by all gateway processes
//!
//! Two shapes: [`TypedMap`] keyed by a single string and [`TypedMap2`]
//! keyed by a (tenant, subkey) pair. A successful write happens-before a
//! subsequent read on any process. The façade depends only on the traits;
//! `Local*` serves single-process deployments and `Cluster*` adapts any
//! distributed KV exposing [`ClusterKv`], with JSON at the boundary.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use modgate_common::{GatewayError, GatewayResult};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Cluster-wide map keyed by a single string
#[async_trait]
pub trait TypedMap<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Value for `key`, or `None`
    async fn get(&self, key: &str) -> GatewayResult<Option<V>>;

    /// Value for `key`, failing `NotFound` when absent
    async fn get_or_fail(&self, key: &str) -> GatewayResult<V> {
        self.get(key)
            .await?
            .ok_or_else(|| GatewayError::not_found(key.to_string()))
    }

    /// Insert only if absent; fails when the key exists
    async fn add(&self, key: &str, value: V) -> GatewayResult<()>;

    /// Overwrite unconditionally
    async fn put(&self, key: &str, value: V) -> GatewayResult<()>;

    /// Remove; `false` when the key was absent
    async fn remove(&self, key: &str) -> GatewayResult<bool>;

    /// Remove, failing `NotFound` when absent
    async fn remove_or_fail(&self, key: &str) -> GatewayResult<()> {
        if self.remove(key).await? {
            Ok(())
        } else {
            Err(GatewayError::not_found(key.to_string()))
        }
    }

    /// Snapshot of all keys
    async fn keys(&self) -> GatewayResult<Vec<String>>;
}

/// Cluster-wide map keyed by a (primary, secondary) string pair
#[async_trait]
pub trait TypedMap2<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Value for the key pair, or `None`
    async fn get(&self, k1: &str, k2: &str) -> GatewayResult<Option<V>>;

    /// Value for the key pair, failing `NotFound` when absent
    async fn get_or_fail(&self, k1: &str, k2: &str) -> GatewayResult<V> {
        self.get(k1, k2)
            .await?
            .ok_or_else(|| GatewayError::not_found(k2.to_string()))
    }

    /// Insert only if absent; fails when the key pair exists
    async fn add(&self, k1: &str, k2: &str, value: V) -> GatewayResult<()>;

    /// Overwrite unconditionally
    async fn put(&self, k1: &str, k2: &str, value: V) -> GatewayResult<()>;

    /// Remove, failing `NotFound` when absent
    async fn remove_or_fail(&self, k1: &str, k2: &str) -> GatewayResult<()>;

    /// All values under the primary key
    async fn list(&self, k1: &str) -> GatewayResult<Vec<V>>;
}

fn exists_error(key: &str) -> GatewayError {
    GatewayError::user(format!("{key} already exists"))
}

/// In-process [`TypedMap`] for single-node deployments and tests
#[derive(Debug)]
pub struct LocalMap<V> {
    inner: Arc<RwLock<HashMap<String, V>>>,
}

impl<V> LocalMap<V> {
    /// Empty map
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V> Default for LocalMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for LocalMap<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<V> TypedMap<V> for LocalMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> GatewayResult<Option<V>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn add(&self, key: &str, value: V) -> GatewayResult<()> {
        let mut map = self.inner.write();
        if map.contains_key(key) {
            return Err(exists_error(key));
        }
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn put(&self, key: &str, value: V) -> GatewayResult<()> {
        self.inner.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> GatewayResult<bool> {
        Ok(self.inner.write().remove(key).is_some())
    }

    async fn keys(&self) -> GatewayResult<Vec<String>> {
        let mut keys: Vec<String> = self.inner.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-process [`TypedMap2`]
#[derive(Debug)]
pub struct LocalMap2<V> {
    inner: Arc<RwLock<HashMap<String, BTreeMap<String, V>>>>,
}

impl<V> LocalMap2<V> {
    /// Empty map
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<V> Default for LocalMap2<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for LocalMap2<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<V> TypedMap2<V> for LocalMap2<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, k1: &str, k2: &str) -> GatewayResult<Option<V>> {
        Ok(self
            .inner
            .read()
            .get(k1)
            .and_then(|sub| sub.get(k2))
            .cloned())
    }

    async fn add(&self, k1: &str, k2: &str, value: V) -> GatewayResult<()> {
        let mut map = self.inner.write();
        let sub = map.entry(k1.to_string()).or_default();
        if sub.contains_key(k2) {
            return Err(exists_error(k2));
        }
        sub.insert(k2.to_string(), value);
        Ok(())
    }

    async fn put(&self, k1: &str, k2: &str, value: V) -> GatewayResult<()> {
        self.inner
            .write()
            .entry(k1.to_string())
            .or_default()
            .insert(k2.to_string(), value);
        Ok(())
    }

    async fn remove_or_fail(&self, k1: &str, k2: &str) -> GatewayResult<()> {
        let mut map = self.inner.write();
        let removed = map.get_mut(k1).and_then(|sub| sub.remove(k2)).is_some();
        if removed {
            Ok(())
        } else {
            Err(GatewayError::not_found(k2.to_string()))
        }
    }

    async fn list(&self, k1: &str) -> GatewayResult<Vec<V>> {
        Ok(self
            .inner
            .read()
            .get(k1)
            .map(|sub| sub.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Raw string KV a distributed backend must expose for `Cluster*` maps
#[async_trait]
pub trait ClusterKv: Send + Sync {
    /// Raw value for `key`
    async fn get(&self, key: &str) -> GatewayResult<Option<String>>;

    /// Atomic insert-if-absent; `false` when the key already exists
    async fn put_if_absent(&self, key: &str, value: String) -> GatewayResult<bool>;

    /// Unconditional write
    async fn put(&self, key: &str, value: String) -> GatewayResult<()>;

    /// Remove; `false` when the key was absent
    async fn remove(&self, key: &str) -> GatewayResult<bool>;

    /// Keys starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> GatewayResult<Vec<String>>;
}

/// In-process [`ClusterKv`] backend (single-node clusters and tests)
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterKv for MemoryKv {
    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn put_if_absent(&self, key: &str, value: String) -> GatewayResult<bool> {
        let mut map = self.inner.write();
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), value);
        Ok(true)
    }

    async fn put(&self, key: &str, value: String) -> GatewayResult<()> {
        self.inner.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> GatewayResult<bool> {
        Ok(self.inner.write().remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> GatewayResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

fn encode<V: Serialize>(value: &V) -> GatewayResult<String> {
    serde_json::to_string(value).map_err(|e| GatewayError::internal(e.to_string()))
}

fn decode<V: DeserializeOwned>(raw: &str) -> GatewayResult<V> {
    serde_json::from_str(raw).map_err(|e| GatewayError::internal(e.to_string()))
}

/// [`TypedMap`] over a distributed backend, JSON at the boundary
pub struct ClusterMap<V> {
    kv: Arc<dyn ClusterKv>,
    name: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> ClusterMap<V> {
    /// Map named `name` on the shared backend
    pub fn new(kv: Arc<dyn ClusterKv>, name: impl Into<String>) -> Self {
        Self {
            kv,
            name: name.into(),
            _marker: PhantomData,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.name, key)
    }
}

#[async_trait]
impl<V> TypedMap<V> for ClusterMap<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn get(&self, key: &str) -> GatewayResult<Option<V>> {
        match self.kv.get(&self.full_key(key)).await? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn add(&self, key: &str, value: V) -> GatewayResult<()> {
        let raw = encode(&value)?;
        if self.kv.put_if_absent(&self.full_key(key), raw).await? {
            Ok(())
        } else {
            Err(exists_error(key))
        }
    }

    async fn put(&self, key: &str, value: V) -> GatewayResult<()> {
        let raw = encode(&value)?;
        self.kv.put(&self.full_key(key), raw).await
    }

    async fn remove(&self, key: &str) -> GatewayResult<bool> {
        self.kv.remove(&self.full_key(key)).await
    }

    async fn keys(&self) -> GatewayResult<Vec<String>> {
        let prefix = format!("{}/", self.name);
        let keys = self.kv.keys_with_prefix(&prefix).await?;
        Ok(keys
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .collect())
    }
}

/// [`TypedMap2`] over a distributed backend
pub struct ClusterMap2<V> {
    kv: Arc<dyn ClusterKv>,
    name: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> ClusterMap2<V> {
    /// Map named `name` on the shared backend
    pub fn new(kv: Arc<dyn ClusterKv>, name: impl Into<String>) -> Self {
        Self {
            kv,
            name: name.into(),
            _marker: PhantomData,
        }
    }

    fn full_key(&self, k1: &str, k2: &str) -> String {
        format!("{}/{}/{}", self.name, k1, k2)
    }
}

#[async_trait]
impl<V> TypedMap2<V> for ClusterMap2<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn get(&self, k1: &str, k2: &str) -> GatewayResult<Option<V>> {
        match self.kv.get(&self.full_key(k1, k2)).await? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn add(&self, k1: &str, k2: &str, value: V) -> GatewayResult<()> {
        let raw = encode(&value)?;
        if self.kv.put_if_absent(&self.full_key(k1, k2), raw).await? {
            Ok(())
        } else {
            Err(exists_error(k2))
        }
    }

    async fn put(&self, k1: &str, k2: &str, value: V) -> GatewayResult<()> {
        let raw = encode(&value)?;
        self.kv.put(&self.full_key(k1, k2), raw).await
    }

    async fn remove_or_fail(&self, k1: &str, k2: &str) -> GatewayResult<()> {
        if self.kv.remove(&self.full_key(k1, k2)).await? {
            Ok(())
        } else {
            Err(GatewayError::not_found(k2.to_string()))
        }
    }

    async fn list(&self, k1: &str) -> GatewayResult<Vec<V>> {
        let prefix = format!("{}/{}/", self.name, k1);
        let keys = self.kv.keys_with_prefix(&prefix).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.kv.get(&key).await? {
                out.push(decode(&raw)?);
            }
        }
        Ok(out)
    }
}
