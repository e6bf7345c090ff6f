//! Resource pool implementation.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::lifecycle::{ResourceFactory, ResourceMetadata};

/// The capabilities a query executor needs from a pool.
///
/// [`Pool`] implements this trait, but any pool that can lend out resources,
/// take them back, drain, clear and report in-flight creations can stand in
/// for it.
#[async_trait::async_trait]
pub trait ResourcePool: Send + Sync {
    /// The pooled resource.
    type Resource: Send + Sync + 'static;

    /// Guard giving exclusive access to an acquired resource.
    type Lease: Deref<Target = Self::Resource> + DerefMut + Send + 'static;

    /// Acquire a resource.
    ///
    /// `None` applies the pool's configured acquire timeout.
    async fn acquire(&self, timeout: Option<Duration>) -> Result<Self::Lease>;

    /// Return a resource to the pool.
    fn release(&self, lease: Self::Lease) -> Result<()>;

    /// Stop lending out resources and wait for every lease to come back.
    async fn drain(&self) -> Result<()>;

    /// Destroy every idle resource.
    async fn clear(&self) -> Result<()>;

    /// Number of resource creations currently in flight.
    fn pending_creations(&self) -> u32;
}

/// A bounded async resource pool.
///
/// The pool lends out resources created by a [`ResourceFactory`], reuses
/// returned ones, validates idle resources before reuse, destroys resources
/// that sit idle past the idle timeout and keeps a minimum number alive.
///
/// Cloning a `Pool` is cheap; clones share the same resources.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: ResourceFactory> {
    config: PoolConfig,
    factory: F,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleResource<F::Resource>>>,
    total: AtomicU32,
    pending: AtomicU32,
    leased: AtomicU32,
    draining: AtomicBool,
    cleared: AtomicBool,
    next_id: AtomicU64,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    stop_maintenance: Arc<Notify>,
}

struct IdleResource<R> {
    resource: R,
    meta: ResourceMetadata,
}

/// Decrements the pending-creation counter when the creation settles,
/// including when the creating future is dropped.
struct PendingCreation<'a>(&'a AtomicU32);

impl<'a> PendingCreation<'a> {
    fn start(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingCreation<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a pool and start its maintenance task.
    ///
    /// Must be called within a Tokio runtime. Resources up to
    /// `min_resources` are created by the maintenance task on its first
    /// tick, so they only show up as pending creations once that task has
    /// run.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| {
            PoolError::Configuration("pool must be created within a Tokio runtime".into())
        })?;

        let inner = Arc::new(PoolInner {
            permits: Arc::new(Semaphore::new(config.max_resources as usize)),
            config,
            factory,
            idle: Mutex::new(VecDeque::new()),
            total: AtomicU32::new(0),
            pending: AtomicU32::new(0),
            leased: AtomicU32::new(0),
            draining: AtomicBool::new(false),
            cleared: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            maintenance: Mutex::new(None),
            stop_maintenance: Arc::new(Notify::new()),
        });

        if inner.config.min_resources > 0 || !inner.config.idle_timeout.is_zero() {
            let task = spawn_maintenance(&inner, &handle);
            *inner.maintenance.lock() = Some(task);
        }

        tracing::debug!(
            min = inner.config.min_resources,
            max = inner.config.max_resources,
            "resource pool created"
        );

        Ok(Self { inner })
    }

    /// Get a resource from the pool.
    ///
    /// Returns an idle resource when one passes validation, otherwise
    /// creates a new one if the pool is below capacity. At capacity this
    /// waits for a resource to be returned, up to `timeout` (or the
    /// configured acquire timeout when `None`; zero means no limit).
    pub async fn get(&self, timeout: Option<Duration>) -> Result<Pooled<F>> {
        let inner = &self.inner;
        if inner.draining.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        let budget = inner
            .config
            .effective_acquire_timeout(timeout)
            .map(|limit| (Instant::now() + limit, limit));

        tracing::trace!("acquiring resource from pool");

        let permit = within(budget, Arc::clone(&inner.permits).acquire_owned())
            .await?
            .map_err(|_| PoolError::PoolClosed)?;

        // Waiters queued before a drain still get permits handed to them.
        if inner.draining.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        loop {
            let candidate = inner.idle.lock().pop_back();
            let Some(IdleResource {
                mut resource,
                mut meta,
            }) = candidate
            else {
                break;
            };

            if inner.config.test_on_borrow && !inner.factory.validate(&mut resource).await {
                tracing::debug!(id = meta.id, "idle resource failed validation, destroying");
                if let Err(e) = inner.destroy(resource).await {
                    tracing::warn!(id = meta.id, error = %e, "failed to destroy invalid resource");
                }
                continue;
            }

            meta.mark_checkout();
            tracing::trace!(id = meta.id, "reusing idle resource");
            return Ok(Pooled::new(resource, meta, Arc::clone(inner), permit));
        }

        let (resource, mut meta) = within(budget, inner.create()).await??;
        meta.mark_checkout();
        Ok(Pooled::new(resource, meta, Arc::clone(inner), permit))
    }

    /// Return a resource to the pool.
    ///
    /// Dropping a [`Pooled`] does the same; this variant reports a lease that
    /// belongs to another pool. Such a lease still goes back to its own pool.
    pub fn release(&self, lease: Pooled<F>) -> Result<()> {
        if !Arc::ptr_eq(&self.inner, &lease.pool) {
            return Err(PoolError::ForeignResource);
        }
        tracing::trace!(id = lease.meta.id, "returning resource to pool");
        drop(lease);
        Ok(())
    }

    /// Stop lending out resources and wait until all leases are returned.
    ///
    /// After draining, every acquisition fails with [`PoolError::PoolClosed`].
    /// Creations already in flight finish and land in the idle queue, where
    /// [`Pool::clear`] picks them up. The maintenance task is stopped between
    /// passes, so a reap that already started destroys its resources first.
    pub async fn drain(&self) -> Result<()> {
        let inner = &self.inner;
        inner.draining.store(true, Ordering::Release);
        if inner.permits.is_closed() {
            return Ok(());
        }

        tracing::debug!("draining resource pool");

        let maintenance = inner.maintenance.lock().take();
        if let Some(task) = maintenance {
            inner.stop_maintenance.notify_one();
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "pool maintenance task failed");
            }
        }

        match Arc::clone(&inner.permits)
            .acquire_many_owned(inner.config.max_resources)
            .await
        {
            Ok(all) => all.forget(),
            // Another drain finished first.
            Err(_) => return Ok(()),
        }
        inner.permits.close();

        tracing::debug!("resource pool drained");
        Ok(())
    }

    /// Destroy every idle resource.
    ///
    /// All idle resources are destroyed even if some fail; the first failure
    /// is returned. On a drained pool this is terminal: resources returned
    /// afterwards are destroyed instead of kept.
    pub async fn clear(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.draining.load(Ordering::Acquire) {
            inner.cleared.store(true, Ordering::Release);
        }

        let idle: Vec<_> = inner.idle.lock().drain(..).collect();
        tracing::debug!(count = idle.len(), "clearing idle resources");

        let mut first_error = None;
        for entry in idle {
            if let Err(e) = inner.destroy(entry.resource).await {
                tracing::warn!(id = entry.meta.id, error = %e, "failed to destroy resource");
                first_error.get_or_insert(e);
            }
        }

        if inner.cleared.load(Ordering::Acquire) {
            tracing::info!("resource pool closed");
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Number of resource creations currently in flight.
    #[must_use]
    pub fn pending_creations(&self) -> u32 {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let max = inner.config.max_resources;
        PoolStatus {
            available: u32::try_from(inner.idle.lock().len()).unwrap_or(u32::MAX),
            in_use: inner.leased.load(Ordering::Acquire),
            total: inner.total.load(Ordering::Acquire),
            max,
            pending: inner.pending.load(Ordering::Acquire),
        }
    }

    /// Check if the pool is draining or drained.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the resource factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<F: ResourceFactory> ResourcePool for Pool<F> {
    type Resource = F::Resource;
    type Lease = Pooled<F>;

    async fn acquire(&self, timeout: Option<Duration>) -> Result<Pooled<F>> {
        self.get(timeout).await
    }

    fn release(&self, lease: Pooled<F>) -> Result<()> {
        Pool::release(self, lease)
    }

    async fn drain(&self) -> Result<()> {
        Pool::drain(self).await
    }

    async fn clear(&self) -> Result<()> {
        Pool::clear(self).await
    }

    fn pending_creations(&self) -> u32 {
        Pool::pending_creations(self)
    }
}

impl<F: ResourceFactory> PoolInner<F> {
    async fn create(&self) -> Result<(F::Resource, ResourceMetadata)> {
        let _pending = PendingCreation::start(&self.pending);
        let resource = self
            .factory
            .create()
            .await
            .map_err(|e| PoolError::Creation(e.to_string()))?;
        self.total.fetch_add(1, Ordering::AcqRel);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, "created pooled resource");
        Ok((resource, ResourceMetadata::new(id)))
    }

    async fn destroy(&self, resource: F::Resource) -> Result<()> {
        let outcome = self.factory.destroy(resource).await;
        self.total.fetch_sub(1, Ordering::AcqRel);
        outcome.map_err(|e| PoolError::Destroy(e.to_string()))
    }

    fn checkin(self: &Arc<Self>, resource: F::Resource, mut meta: ResourceMetadata) {
        if self.cleared.load(Ordering::Acquire) {
            tracing::debug!(id = meta.id, "pool cleared, destroying returned resource");
            match Handle::try_current() {
                Ok(handle) => {
                    let inner = Arc::clone(self);
                    handle.spawn(async move {
                        if let Err(e) = inner.destroy(resource).await {
                            tracing::warn!(error = %e, "failed to destroy returned resource");
                        }
                    });
                }
                Err(_) => {
                    self.total.fetch_sub(1, Ordering::AcqRel);
                    drop(resource);
                }
            }
            return;
        }

        meta.mark_checkin();
        self.idle.lock().push_back(IdleResource { resource, meta });
    }

    async fn reap_idle(&self) {
        let idle_timeout = self.config.idle_timeout;
        if idle_timeout.is_zero() {
            return;
        }

        let expired: Vec<_> = {
            let mut idle = self.idle.lock();
            let mut removable = self
                .total
                .load(Ordering::Acquire)
                .saturating_sub(self.config.min_resources);
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut expired = Vec::new();
            while let Some(entry) = idle.pop_front() {
                if removable > 0 && entry.meta.is_idle_expired(idle_timeout) {
                    removable -= 1;
                    expired.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *idle = kept;
            expired
        };

        for entry in expired {
            tracing::debug!(id = entry.meta.id, "destroying resource past idle timeout");
            if let Err(e) = self.destroy(entry.resource).await {
                tracing::warn!(id = entry.meta.id, error = %e, "failed to destroy idle resource");
            }
        }
    }

    async fn fill_minimum(self: &Arc<Self>) {
        loop {
            if self.draining.load(Ordering::Acquire) {
                return;
            }
            let live = self.total.load(Ordering::Acquire) + self.pending.load(Ordering::Acquire);
            if live >= self.config.min_resources {
                return;
            }
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                return;
            };
            match self.create().await {
                Ok((resource, meta)) => self.checkin(resource, meta),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create minimum resource");
                    return;
                }
            }
            drop(permit);
        }
    }
}

fn spawn_maintenance<F: ResourceFactory>(inner: &Arc<PoolInner<F>>, handle: &Handle) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let stop = Arc::clone(&inner.stop_maintenance);
    let period = inner.config.reap_interval;
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // Only the wait is cancelled; a pass always runs to completion.
            tokio::select! {
                _ = ticker.tick() => {}
                () = stop.notified() => break,
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.draining.load(Ordering::Acquire) {
                break;
            }
            inner.reap_idle().await;
            inner.fill_minimum().await;
        }
    })
}

async fn within<T>(budget: Option<(Instant, Duration)>, fut: impl Future<Output = T>) -> Result<T> {
    match budget {
        Some((deadline, limit)) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| PoolError::AcquisitionTimeout(limit)),
        None => Ok(fut.await),
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle resources available.
    pub available: u32,
    /// Number of resources currently lent out.
    ///
    /// Capacity reserved by a borrower that is still creating its resource,
    /// or by a drain waiting for leases, is not counted.
    pub in_use: u32,
    /// Total number of live resources.
    pub total: u32,
    /// Maximum allowed resources.
    pub max: u32,
    /// Resource creations in flight.
    pub pending: u32,
}

impl PoolStatus {
    /// Share of capacity lent out, as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// A resource lent out by a [`Pool`].
///
/// When dropped, the resource is automatically returned to the pool.
pub struct Pooled<F: ResourceFactory> {
    resource: Option<F::Resource>,
    meta: ResourceMetadata,
    pool: Arc<PoolInner<F>>,
    _permit: OwnedSemaphorePermit,
}

impl<F: ResourceFactory> Pooled<F> {
    fn new(
        resource: F::Resource,
        meta: ResourceMetadata,
        pool: Arc<PoolInner<F>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        pool.leased.fetch_add(1, Ordering::AcqRel);
        Self {
            resource: Some(resource),
            meta,
            pool,
            _permit: permit,
        }
    }

    /// Metadata the pool keeps for this resource.
    #[must_use]
    pub fn metadata(&self) -> &ResourceMetadata {
        &self.meta
    }

    /// Detach the resource from the pool.
    ///
    /// The resource no longer counts against the pool and is not returned
    /// when the caller is done with it.
    #[must_use]
    pub fn detach(mut self) -> Option<F::Resource> {
        let resource = self.resource.take();
        if resource.is_some() {
            self.pool.total.fetch_sub(1, Ordering::AcqRel);
        }
        resource
    }
}

impl<F: ResourceFactory> Deref for Pooled<F> {
    type Target = F::Resource;

    #[allow(clippy::expect_used)] // Only `detach` and `drop` take the resource, both consume the guard.
    fn deref(&self) -> &F::Resource {
        self.resource.as_ref().expect("pooled resource present until returned")
    }
}

impl<F: ResourceFactory> DerefMut for Pooled<F> {
    #[allow(clippy::expect_used)] // Only `detach` and `drop` take the resource, both consume the guard.
    fn deref_mut(&mut self) -> &mut F::Resource {
        self.resource.as_mut().expect("pooled resource present until returned")
    }
}

impl<F: ResourceFactory> fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("meta", &self.meta).finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        self.pool.leased.fetch_sub(1, Ordering::AcqRel);
        if let Some(resource) = self.resource.take() {
            tracing::trace!(id = self.meta.id, "returning resource to pool");
            self.pool.checkin(resource, self.meta.clone());
        }
    }
}
