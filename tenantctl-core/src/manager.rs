//! Per-tenant connection manager
//!
//! # Architecture
//!
//! ```text
//! get_connection(tenant_id)
//!   → registry lookup → schema name
//!     → Ready slot    → touch access metadata, return handle
//!     → Pending slot  → wait for the in-flight init
//!     → no slot       → Pending, spawn init task:
//!                         ensure schema → drop obsolete indexes (admin)
//!                         → connect → evict LRU if full → Ready
//! ```
//!
//! Cached connections and in-flight initializations share one map keyed by
//! schema name, so a schema is never both cached and initializing. The map
//! lives behind a `std::sync::Mutex` that is never held across an `.await`;
//! handles are removed under the lock and closed after it is released, so a
//! handle is closed at most once no matter which path evicted it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::catalog::{ConnectionHandle, Connector};
use crate::config::ManagerConfig;
use crate::error::{ConfigError, ManagerError, Result};
use crate::indexes::IndexSynchronizer;
use crate::model::DataModel;
use crate::provision;
use crate::registry::{TenantRecord, TenantRegistry};

type Waiter<H> = oneshot::Sender<Result<H>>;

/// Slot state for one schema.
enum Slot<H> {
    /// Connect in progress; every waiter receives the shared outcome
    Pending(Vec<Waiter<H>>),
    /// Connected and cached
    Ready(ConnectionEntry<H>),
}

/// A cached connection with access metadata.
struct ConnectionEntry<H> {
    handle: H,
    last_accessed: Instant,
    last_accessed_at: DateTime<Utc>,
    access_count: u64,
}

impl<H> ConnectionEntry<H> {
    fn new(handle: H) -> Self {
        Self {
            handle,
            last_accessed: Instant::now(),
            last_accessed_at: Utc::now(),
            access_count: 1,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }
}

/// Snapshot returned by [`TenantConnectionManager::connection_stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub initializing_connections: usize,
    pub connection_details: Vec<ConnectionDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetail {
    pub schema_name: String,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

struct Inner<R, C: Connector> {
    registry: R,
    connector: C,
    indexes: IndexSynchronizer,
    config: ManagerConfig,
    slots: Mutex<HashMap<String, Slot<C::Handle>>>,
    shutting_down: AtomicBool,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

/// Lazily connects to tenant schemas and caches the connections.
///
/// Cheap to clone; clones share the same cache. Construct one per process
/// and call [`shutdown`](Self::shutdown) on teardown.
pub struct TenantConnectionManager<R, C: Connector> {
    inner: Arc<Inner<R, C>>,
}

impl<R, C: Connector> Clone for TenantConnectionManager<R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, C> TenantConnectionManager<R, C>
where
    R: TenantRegistry,
    C: Connector,
{
    pub fn new(
        registry: R,
        connector: C,
        model: DataModel,
        config: ManagerConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                connector,
                indexes: IndexSynchronizer::new(Arc::new(model)),
                config,
                slots: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                maintenance: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn model(&self) -> &DataModel {
        self.inner.indexes.model()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<C::Handle>>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a tenant id to its registry record.
    ///
    /// Fails with `NotFound` for unknown tenants and `InvalidState` when the
    /// record carries a blank schema name.
    pub async fn resolve_tenant(&self, tenant_id: &str) -> Result<TenantRecord> {
        let record = self
            .inner
            .registry
            .find_tenant(tenant_id)
            .await
            .map_err(ManagerError::registry)?
            .ok_or_else(|| ManagerError::not_found(tenant_id))?;

        if record.schema_name.trim().is_empty() {
            error!(tenant_id = %tenant_id, "tenant record has a blank schema name");
            return Err(ManagerError::invalid_state(
                tenant_id,
                "schema name is empty",
            ));
        }

        if !record.is_active || record.is_deleted {
            warn!(
                tenant_id = %tenant_id,
                schema = %record.schema_name,
                is_active = record.is_active,
                is_deleted = record.is_deleted,
                "resolving connection for inactive tenant"
            );
        }

        Ok(record)
    }

    /// Get the connection for a tenant, connecting on first use.
    ///
    /// Concurrent calls for the same tenant share one physical connect and
    /// all observe the same handle or the same error.
    pub async fn get_connection(&self, tenant_id: &str) -> Result<C::Handle> {
        if self.is_shutting_down() {
            return Err(ManagerError::ShuttingDown);
        }

        let schema = self.resolve_tenant(tenant_id).await?.schema_name;

        let rx = {
            let mut slots = self.slots();
            if self.is_shutting_down() {
                return Err(ManagerError::ShuttingDown);
            }

            match slots.get_mut(&schema) {
                Some(Slot::Ready(entry)) => {
                    entry.touch();
                    return Ok(entry.handle.clone());
                }
                Some(Slot::Pending(waiters)) => {
                    debug!(schema = %schema, "joining in-flight initialization");
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(schema.clone(), Slot::Pending(vec![tx]));

                    // The init runs detached so a dropped caller never strands its waiters.
                    let manager = self.clone();
                    let init_schema = schema.clone();
                    tokio::spawn(async move { manager.initialize(init_schema).await });
                    rx
                }
            }
        };

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ManagerError::InitAborted { schema }),
        }
    }

    async fn initialize(self, schema: String) {
        let mut guard = PendingGuard {
            manager: &self,
            schema: &schema,
            armed: true,
        };

        debug!(schema = %schema, "initializing tenant connection");
        let outcome = self.open(&schema).await;
        guard.armed = false;

        self.publish(&schema, outcome).await;
    }

    /// Provision, clean up indexes through the admin connection, then connect.
    async fn open(&self, schema: &str) -> Result<C::Handle> {
        let admin = self.inner.connector.admin();

        provision::ensure_schema_exists(admin, schema)
            .await
            .map_err(|e| ManagerError::provision(schema, e))?;

        self.inner.indexes.drop_obsolete(admin, schema).await;

        self.inner
            .connector
            .connect(schema)
            .await
            .map_err(|e| ManagerError::connect(schema, e))
    }

    /// Settle the pending slot for `schema` and notify every waiter.
    async fn publish(&self, schema: &str, outcome: Result<C::Handle>) {
        let mut to_close = Vec::new();

        {
            let mut slots = self.slots();
            let shutting_down = self.is_shutting_down();

            match slots.remove(schema) {
                Some(Slot::Pending(waiters)) => match outcome {
                    Ok(handle) if !shutting_down => {
                        to_close = self.evict_for_capacity(&mut slots);

                        slots.insert(
                            schema.to_string(),
                            Slot::Ready(ConnectionEntry::new(handle.clone())),
                        );
                        for tx in waiters {
                            let _ = tx.send(Ok(handle.clone()));
                        }
                        info!(schema = %schema, cached = slots.len(), "tenant connection ready");
                    }
                    Ok(handle) => {
                        for tx in waiters {
                            let _ = tx.send(Err(ManagerError::ShuttingDown));
                        }
                        to_close.push((schema.to_string(), handle));
                    }
                    Err(e) => {
                        warn!(schema = %schema, error = %e, "tenant connection failed");
                        for tx in waiters {
                            let _ = tx.send(Err(e.clone()));
                        }
                    }
                },
                other => {
                    // Slot was drained by shutdown while connecting
                    if let Some(slot) = other {
                        slots.insert(schema.to_string(), slot);
                    }
                    if let Ok(handle) = outcome {
                        to_close.push((schema.to_string(), handle));
                    }
                }
            }
        }

        close_handles(to_close, "evicted").await;
    }

    /// Remove least-recently-used entries until one more fits.
    ///
    /// Called with the slot lock held; the caller closes the returned handles.
    fn evict_for_capacity(
        &self,
        slots: &mut HashMap<String, Slot<C::Handle>>,
    ) -> Vec<(String, C::Handle)> {
        let max = self.inner.config.max_cached_connections;

        let mut ready: Vec<(String, Instant)> = slots
            .iter()
            .filter_map(|(schema, slot)| match slot {
                Slot::Ready(entry) => Some((schema.clone(), entry.last_accessed)),
                Slot::Pending(_) => None,
            })
            .collect();

        if ready.len() < max {
            return Vec::new();
        }

        ready.sort_by_key(|(_, last_accessed)| *last_accessed);
        let excess = ready.len() + 1 - max;

        ready
            .into_iter()
            .take(excess)
            .filter_map(|(schema, _)| {
                let handle = take_ready(slots, &schema)?;
                info!(schema = %schema, max_cached = max, "evicting least recently used connection");
                Some((schema, handle))
            })
            .collect()
    }

    /// Close and forget the cached connection for `schema`, if any.
    pub async fn close_connection(&self, schema: &str) {
        let handle = take_ready(&mut self.slots(), schema);

        if let Some(handle) = handle {
            close_handles(vec![(schema.to_string(), handle)], "closed").await;
        } else {
            debug!(schema = %schema, "no cached connection to close");
        }
    }

    /// Close every cached connection idle for longer than the idle timeout.
    ///
    /// Returns the schemas evicted.
    pub async fn sweep_idle(&self) -> Vec<String> {
        let now = Instant::now();
        let idle_timeout = self.inner.config.idle_timeout;

        let expired: Vec<(String, C::Handle)> = {
            let mut slots = self.slots();
            let schemas: Vec<String> = slots
                .iter()
                .filter_map(|(schema, slot)| match slot {
                    Slot::Ready(entry)
                        if now.saturating_duration_since(entry.last_accessed) > idle_timeout =>
                    {
                        Some(schema.clone())
                    }
                    _ => None,
                })
                .collect();

            schemas
                .into_iter()
                .filter_map(|schema| take_ready(&mut slots, &schema).map(|h| (schema, h)))
                .collect()
        };

        let evicted: Vec<String> = expired.iter().map(|(schema, _)| schema.clone()).collect();
        if !evicted.is_empty() {
            info!(count = evicted.len(), schemas = ?evicted, "evicting idle connections");
        }
        close_handles(expired, "idle").await;
        evicted
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `cleanup_interval` until shutdown.
    ///
    /// Replaces a previously spawned sweeper.
    pub fn spawn_maintenance(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.cleanup_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = TenantConnectionManager { inner };
                if manager.is_shutting_down() {
                    break;
                }
                let evicted = manager.sweep_idle().await;
                debug!(evicted = evicted.len(), "idle sweep finished");
            }
        });

        let previous = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let slots = self.slots();

        let mut connection_details: Vec<ConnectionDetail> = slots
            .iter()
            .filter_map(|(schema, slot)| match slot {
                Slot::Ready(entry) => Some(ConnectionDetail {
                    schema_name: schema.clone(),
                    last_accessed_at: entry.last_accessed_at,
                    access_count: entry.access_count,
                }),
                Slot::Pending(_) => None,
            })
            .collect();
        connection_details.sort_by(|a, b| a.schema_name.cmp(&b.schema_name));

        ConnectionStats {
            total_connections: connection_details.len(),
            initializing_connections: slots.len() - connection_details.len(),
            connection_details,
        }
    }

    pub fn is_cached(&self, schema: &str) -> bool {
        matches!(self.slots().get(schema), Some(Slot::Ready(_)))
    }

    /// Ensure a schema exists through the administrative connection.
    pub async fn ensure_schema_exists(&self, schema: &str) -> Result<bool> {
        provision::ensure_schema_exists(self.inner.connector.admin(), schema)
            .await
            .map_err(|e| ManagerError::provision(schema, e))
    }

    /// Drop indexes the data model no longer declares.
    ///
    /// Uses the tenant's cached connection when there is one, the
    /// administrative connection otherwise.
    pub async fn drop_obsolete_indexes(&self, schema: &str) -> Vec<String> {
        let cached = match self.slots().get(schema) {
            Some(Slot::Ready(entry)) => Some(entry.handle.clone()),
            _ => None,
        };

        match cached {
            Some(handle) => self.inner.indexes.drop_obsolete(&handle, schema).await,
            None => self.drop_obsolete_indexes_with_global_connection(schema).await,
        }
    }

    /// Drop obsolete indexes through the administrative connection.
    pub async fn drop_obsolete_indexes_with_global_connection(&self, schema: &str) -> Vec<String> {
        self.inner
            .indexes
            .drop_obsolete(self.inner.connector.admin(), schema)
            .await
    }

    /// Close every cached connection and stop the sweeper.
    ///
    /// Pending initializations fail with `ShuttingDown`; their connections are
    /// closed as soon as they settle. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);

        let sweeper = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        let drained: Vec<(String, Slot<C::Handle>)> = self.slots().drain().collect();

        let mut handles = Vec::new();
        let mut pending = 0usize;
        for (schema, slot) in drained {
            match slot {
                Slot::Ready(entry) => handles.push((schema, entry.handle)),
                Slot::Pending(waiters) => {
                    pending += 1;
                    for tx in waiters {
                        let _ = tx.send(Err(ManagerError::ShuttingDown));
                    }
                }
            }
        }

        info!(
            connections = handles.len(),
            pending = pending,
            "shutting down tenant connection manager"
        );
        close_handles(handles, "shutdown").await;
    }
}

/// Remove `schema` only if it is cached (never a pending slot).
fn take_ready<H>(slots: &mut HashMap<String, Slot<H>>, schema: &str) -> Option<H> {
    if !matches!(slots.get(schema), Some(Slot::Ready(_))) {
        return None;
    }
    match slots.remove(schema) {
        Some(Slot::Ready(entry)) => Some(entry.handle),
        _ => None,
    }
}

/// Close handles concurrently; failures are logged, never returned.
async fn close_handles<H: ConnectionHandle>(handles: Vec<(String, H)>, reason: &'static str) {
    if handles.is_empty() {
        return;
    }

    let closes = handles.into_iter().map(|(schema, handle)| async move {
        match handle.close().await {
            Ok(()) => debug!(schema = %schema, reason = reason, "closed tenant connection"),
            Err(e) => warn!(schema = %schema, reason = reason, error = %e, "failed to close tenant connection"),
        }
    });
    join_all(closes).await;
}

/// Clears a pending slot if its init task unwinds before publishing.
struct PendingGuard<'a, R, C>
where
    R: TenantRegistry,
    C: Connector,
{
    manager: &'a TenantConnectionManager<R, C>,
    schema: &'a str,
    armed: bool,
}

impl<R, C> Drop for PendingGuard<'_, R, C>
where
    R: TenantRegistry,
    C: Connector,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.manager.slots();
        if matches!(slots.get(self.schema), Some(Slot::Pending(_))) {
            // Dropping the senders wakes waiters with InitAborted
            slots.remove(self.schema);
            error!(schema = %self.schema, "tenant initialization aborted");
        }
    }
}
