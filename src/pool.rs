//! Bounded resource pool with FIFO waiters and idle reaping

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{IdleStrategy, PoolConfigUpdate, PoolConfiguration};
use crate::errors::{BoxError, ConfigError, PoolError, PoolResult};
use crate::health::HealthReport;
use crate::maintenance::{self, MaintenanceHandle, Sweep};
use crate::metrics::{PoolGauges, PoolMetricsTracker, PoolStats};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Idle handles examined per lock acquisition during a reap
const REAP_BATCH: usize = 64;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Produces and tears down the resources a pool hands out
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use resource_lifecycle::{BoxError, ResourceFactory};
///
/// struct Connector;
///
/// #[async_trait]
/// impl ResourceFactory for Connector {
///     type Resource = String;
///
///     async fn create(&self) -> Result<String, BoxError> {
///         Ok("connection".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;

    async fn create(&self) -> Result<Self::Resource, BoxError>;

    /// Called once for every resource the pool retires
    async fn destroy(&self, resource: Self::Resource) {
        drop(resource);
    }
}

type CreateFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;

/// [`ResourceFactory`] backed by an async closure
///
/// The closure is boxed so the pool's futures only name `T`, which keeps
/// them `Send` for `tokio::spawn`.
pub struct FnFactory<T> {
    create: Box<dyn Fn() -> CreateFuture<T> + Send + Sync>,
}

/// Build a factory from an async closure
///
/// # Examples
///
/// ```
/// use resource_lifecycle::{factory_fn, BoxError, Pool, PoolConfiguration};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let pool = Pool::new(
///     factory_fn(|| async { Ok::<_, BoxError>(Vec::<u8>::with_capacity(1024)) }),
///     PoolConfiguration::new().with_min_size(1).with_max_size(4),
/// )
/// .await
/// .unwrap();
///
/// let buffer = pool.acquire_default().await.unwrap();
/// assert_eq!(buffer.capacity(), 1024);
/// # });
/// ```
pub fn factory_fn<F, Fut, T>(create: F) -> FnFactory<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Send + 'static,
{
    FnFactory {
        create: Box::new(move || -> CreateFuture<T> { Box::pin(create()) }),
    }
}

#[async_trait]
impl<T: Send + 'static> ResourceFactory for FnFactory<T> {
    type Resource = T;

    async fn create(&self) -> Result<T, BoxError> {
        (self.create)().await
    }
}

impl<T> fmt::Debug for FnFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory").finish_non_exhaustive()
    }
}

/// Pool-unique handle identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Bookkeeping attached to every pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleInfo {
    pub id: HandleId,
    pub created_at: Instant,

    /// Last time the handle was leased out or returned
    pub last_used_at: Instant,

    /// Number of times the handle has been leased
    pub use_count: u64,
}

impl HandleInfo {
    fn new(id: HandleId, now: Instant) -> Self {
        Self {
            id,
            created_at: now,
            last_used_at: now,
            use_count: 0,
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Whether the handle is past `max_lifetime`
    pub fn outlived(&self, max_lifetime: Option<Duration>, now: Instant) -> bool {
        max_lifetime.is_some_and(|lifetime| self.age(now) >= lifetime)
    }
}

struct Slot<T> {
    resource: T,
    info: HandleInfo,
}

/// What a waiter receives when it reaches the head of the queue
enum Grant<T> {
    /// A handle, already registered as leased
    Handle(Slot<T>),

    /// A reserved slot the waiter must fill by creating a resource
    Capacity,
}

struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Grant<T>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Release,
    Discard,

    /// Granted to a waiter that went away before taking it
    Recycle,
}

struct PoolState<T> {
    config: PoolConfiguration,
    idle: VecDeque<Slot<T>>,
    waiters: VecDeque<Waiter<T>>,

    /// Idle, leased and in-creation handles
    total: usize,
    closed: bool,
    next_waiter: u64,
}

/// Accepts handles coming back from a [`Lease`]
trait CheckIn<T>: Send + Sync {
    fn check_in(&self, slot: Slot<T>, disposition: Disposition);
}

struct PoolShared<F: ResourceFactory> {
    id: u64,
    factory: Arc<F>,
    state: Mutex<PoolState<F::Resource>>,

    /// Leased handles and when they were handed out
    leased: DashMap<HandleId, Instant>,
    metrics: PoolMetricsTracker,
    breaker: Option<CircuitBreaker>,
    drained: Notify,
    next_handle: AtomicU64,
}

/// Slot counted in `total` that has no resource yet
///
/// Dropping it unsettled gives the slot back, handing it to the longest
/// waiter if there is one.
struct Reservation<'a, F: ResourceFactory> {
    shared: &'a PoolShared<F>,
    settled: bool,
}

impl<'a, F: ResourceFactory> Reservation<'a, F> {
    fn new(shared: &'a PoolShared<F>) -> Self {
        Self {
            shared,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl<F: ResourceFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.release_reservation();
        }
    }
}

/// Factory call in flight; tells the breaker if the caller walks away
struct CreationAttempt<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl CreationAttempt<'_> {
    fn settle(mut self) {
        self.breaker = None;
    }
}

impl Drop for CreationAttempt<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker {
            breaker.record_abandoned();
        }
    }
}

enum Withdrawal<T> {
    Withdrawn,
    Granted(Grant<T>),
    Closed,
}

/// A queued acquire. Dropping it before it settles leaves the queue cleanly
/// and recycles anything that was granted in the meantime.
struct PendingAcquire<'a, F: ResourceFactory> {
    shared: &'a PoolShared<F>,
    waiter_id: u64,
    rx: oneshot::Receiver<Grant<F::Resource>>,
    settled: bool,
}

impl<F: ResourceFactory> PendingAcquire<'_, F> {
    async fn wait(
        &mut self,
        deadline: Instant,
        timeout: Duration,
    ) -> PoolResult<Grant<F::Resource>> {
        let received = tokio::time::timeout_at(deadline, &mut self.rx).await;
        let outcome = match received {
            Ok(Ok(grant)) => Ok(grant),
            Ok(Err(_)) => Err(PoolError::ShuttingDown),
            // A grant that raced the deadline is kept, not bounced
            Err(_) => match self.withdraw() {
                Withdrawal::Withdrawn => Err(PoolError::AcquireTimeout(timeout)),
                Withdrawal::Granted(grant) => Ok(grant),
                Withdrawal::Closed => Err(PoolError::ShuttingDown),
            },
        };
        self.settled = true;
        outcome
    }

    fn withdraw(&mut self) -> Withdrawal<F::Resource> {
        {
            let mut state = self.shared.state.lock();
            if let Some(position) = state.waiters.iter().position(|w| w.id == self.waiter_id) {
                state.waiters.remove(position);
                return Withdrawal::Withdrawn;
            }
        }
        // Grants are sent under the pool lock, so it is already here if any
        match self.rx.try_recv() {
            Ok(grant) => Withdrawal::Granted(grant),
            Err(_) => Withdrawal::Closed,
        }
    }
}

impl<F: ResourceFactory> Drop for PendingAcquire<'_, F> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Withdrawal::Granted(grant) = self.withdraw() {
            match grant {
                Grant::Handle(slot) => self.shared.check_in(slot, Disposition::Recycle),
                Grant::Capacity => self.shared.release_reservation(),
            }
        }
    }
}

enum Plan<T> {
    Ready(Slot<T>),
    Create,
    Wait(u64, oneshot::Receiver<Grant<T>>),
}

impl<F: ResourceFactory> PoolShared<F> {
    fn gauges(&self) -> PoolGauges {
        let state = self.state.lock();
        PoolGauges {
            total: state.total,
            active: self.leased.len(),
            idle: state.idle.len(),
            waiting: state.waiters.len(),
            min_size: state.config.min_size,
            max_size: state.config.max_size,
        }
    }

    fn lease(self: &Arc<Self>, slot: Slot<F::Resource>) -> Lease<F::Resource> {
        let home: Arc<dyn CheckIn<F::Resource>> = self.clone();
        Lease {
            slot: Some(slot),
            home,
            pool_id: self.id,
        }
    }

    fn mark_leased(&self, slot: &mut Slot<F::Resource>, now: Instant) {
        slot.info.last_used_at = now;
        slot.info.use_count += 1;
        self.leased.insert(slot.info.id, now);
    }

    /// Hand the resource to the factory's destroy hook off the caller's path
    fn dispose(&self, resource: F::Resource) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let factory = Arc::clone(&self.factory);
                runtime.spawn(async move { factory.destroy(resource).await });
            }
            Err(_) => drop(resource),
        }
    }

    async fn create_slot(&self) -> PoolResult<Slot<F::Resource>> {
        if let Some(breaker) = &self.breaker
            && !breaker.allow_request()
        {
            self.metrics.creation_failures.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::CircuitBreakerOpen);
        }

        let attempt = CreationAttempt {
            breaker: self.breaker.as_ref(),
        };
        let created = self.factory.create().await;
        attempt.settle();

        match created {
            Ok(resource) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                self.metrics.created.fetch_add(1, Ordering::Relaxed);
                let id = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
                debug!(pool = self.id, handle = %id, "resource created");
                Ok(Slot {
                    resource,
                    info: HandleInfo::new(id, Instant::now()),
                })
            }
            Err(err) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_failure();
                }
                self.metrics.creation_failures.fetch_add(1, Ordering::Relaxed);
                warn!(pool = self.id, error = %err, "resource creation failed");
                Err(PoolError::creation(err))
            }
        }
    }

    /// Fill a reservation and lease the new handle to the caller
    async fn create_leased(
        self: &Arc<Self>,
        reservation: Reservation<'_, F>,
    ) -> PoolResult<Lease<F::Resource>> {
        if self.state.lock().closed {
            return Err(PoolError::ShuttingDown);
        }

        let mut slot = self.create_slot().await?;
        let closed = {
            let state = self.state.lock();
            if !state.closed {
                self.mark_leased(&mut slot, Instant::now());
            }
            state.closed
        };

        if closed {
            self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
            self.dispose(slot.resource);
            return Err(PoolError::ShuttingDown);
        }

        reservation.settle();
        Ok(self.lease(slot))
    }

    fn release_reservation(&self) {
        let mut state = self.state.lock();
        state.total -= 1;
        if !state.closed {
            self.grant_headroom(&mut state);
        }
    }

    /// Give free capacity to queued waiters, oldest first
    fn grant_headroom(&self, state: &mut PoolState<F::Resource>) {
        while state.total < state.config.max_size {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.total += 1;
            if waiter.tx.send(Grant::Capacity).is_err() {
                state.total -= 1;
            }
        }
    }

    /// Hand a handle to the longest waiter. Returns it when nobody is waiting.
    fn dispatch(
        &self,
        state: &mut PoolState<F::Resource>,
        mut slot: Slot<F::Resource>,
    ) -> Option<Slot<F::Resource>> {
        while let Some(waiter) = state.waiters.pop_front() {
            self.mark_leased(&mut slot, Instant::now());
            let Err(Grant::Handle(mut returned)) = waiter.tx.send(Grant::Handle(slot)) else {
                return None;
            };
            self.leased.remove(&returned.info.id);
            returned.info.use_count -= 1;
            slot = returned;
        }
        Some(slot)
    }

    fn park(&self, state: &mut PoolState<F::Resource>, slot: Slot<F::Resource>) {
        if let Some(slot) = self.dispatch(state, slot) {
            state.idle.push_back(slot);
        }
    }

    /// Take a reusable idle handle, retiring any that outlived their lifetime
    fn take_idle(&self, state: &mut PoolState<F::Resource>) -> Option<Slot<F::Resource>> {
        let now = Instant::now();
        loop {
            let mut slot = match state.config.idle_strategy {
                IdleStrategy::Lifo => state.idle.pop_back(),
                IdleStrategy::Fifo => state.idle.pop_front(),
            }?;

            if slot.info.outlived(state.config.max_lifetime, now) {
                state.total -= 1;
                self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
                debug!(pool = self.id, handle = %slot.info.id, "retiring outlived handle");
                self.dispose(slot.resource);
                continue;
            }

            self.mark_leased(&mut slot, now);
            return Some(slot);
        }
    }

    /// Create handles until the pool is back at its floor
    async fn replenish(&self) -> usize {
        let mut created = 0;
        loop {
            let reservation = {
                let mut state = self.state.lock();
                if state.closed || state.total >= state.config.min_size {
                    break;
                }
                state.total += 1;
                Reservation::new(self)
            };

            // Stop at the first failure rather than hammering the factory
            let Ok(slot) = self.create_slot().await else {
                break;
            };

            {
                let mut state = self.state.lock();
                if state.closed {
                    drop(state);
                    self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
                    self.dispose(slot.resource);
                    break;
                }
                self.park(&mut state, slot);
            }
            reservation.settle();
            created += 1;
        }

        if created > 0 {
            debug!(pool = self.id, created, "replenished pool to its floor");
        }
        created
    }

    async fn reap(&self) -> usize {
        let mut reaped = 0;
        loop {
            let now = Instant::now();
            let victims = {
                let mut state = self.state.lock();
                if state.closed {
                    return reaped;
                }

                let idle_timeout = state.config.idle_timeout;
                let max_lifetime = state.config.max_lifetime;
                let mut victims = Vec::new();
                let mut index = 0;
                while index < state.idle.len()
                    && victims.len() < REAP_BATCH
                    && state.total > state.config.min_size
                {
                    let info = state.idle[index].info;
                    if info.idle_for(now) > idle_timeout || info.outlived(max_lifetime, now) {
                        if let Some(slot) = state.idle.remove(index) {
                            state.total -= 1;
                            victims.push(slot);
                        }
                    } else {
                        index += 1;
                    }
                }
                victims
            };

            let batch = victims.len();
            self.metrics.destroyed.fetch_add(batch as u64, Ordering::Relaxed);
            for slot in victims {
                debug!(pool = self.id, handle = %slot.info.id, "reaping idle handle");
                self.factory.destroy(slot.resource).await;
            }

            reaped += batch;
            if batch < REAP_BATCH {
                break;
            }
            tokio::task::yield_now().await;
        }

        if reaped > 0 {
            info!(pool = self.id, reaped, "reaped idle handles");
        }

        let replenish = self.state.lock().config.replenish;
        if replenish {
            self.replenish().await;
        }
        reaped
    }
}

impl<F: ResourceFactory> CheckIn<F::Resource> for PoolShared<F> {
    fn check_in(&self, mut slot: Slot<F::Resource>, disposition: Disposition) {
        let id = slot.info.id;
        if self.leased.remove(&id).is_none() {
            self.metrics.ignored_releases.fetch_add(1, Ordering::Relaxed);
            warn!(pool = self.id, handle = %id, "ignoring release of untracked handle");
            self.dispose(slot.resource);
            return;
        }

        match disposition {
            Disposition::Release => {
                self.metrics.released.fetch_add(1, Ordering::Relaxed);
            }
            Disposition::Discard => {
                self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            }
            Disposition::Recycle => {}
        }

        let now = Instant::now();
        slot.info.last_used_at = now;

        let mut state = self.state.lock();
        let retire = disposition == Disposition::Discard
            || state.closed
            || slot.info.outlived(state.config.max_lifetime, now)
            || state.total > state.config.max_size;

        if retire {
            state.total -= 1;
            let closed = state.closed;
            if !closed {
                self.grant_headroom(&mut state);
            }
            drop(state);

            self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
            debug!(pool = self.id, handle = %id, ?disposition, "handle retired");
            self.dispose(slot.resource);
            if closed {
                self.drained.notify_waiters();
            }
        } else {
            self.park(&mut state, slot);
        }
    }
}

#[async_trait]
impl<F: ResourceFactory> Sweep for PoolShared<F> {
    fn interval(&self) -> Duration {
        self.state.lock().config.reap_interval
    }

    fn retired(&self) -> bool {
        self.state.lock().closed
    }

    async fn sweep(&self) {
        self.reap().await;
    }
}

/// A leased resource that returns to its pool when dropped
///
/// Derefs to the resource. Use [`Pool::discard`] instead of dropping when
/// the resource turned out to be broken.
pub struct Lease<T: Send + 'static> {
    slot: Option<Slot<T>>,
    home: Arc<dyn CheckIn<T>>,
    pool_id: u64,
}

impl<T: Send + 'static> Lease<T> {
    pub fn id(&self) -> HandleId {
        self.slot().info.id
    }

    pub fn info(&self) -> HandleInfo {
        self.slot().info
    }

    fn slot(&self) -> &Slot<T> {
        self.slot.as_ref().expect("lease already returned")
    }

    fn finish(mut self, disposition: Disposition) {
        if let Some(slot) = self.slot.take() {
            self.home.check_in(slot, disposition);
        }
    }
}

impl<T: Send + 'static> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.slot().resource
    }
}

impl<T: Send + 'static> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self
            .slot
            .as_mut()
            .expect("lease already returned")
            .resource
    }
}

impl<T: Send + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.home.check_in(slot, Disposition::Release);
        }
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool_id)
            .field("handle", &self.slot.as_ref().map(|slot| slot.info.id))
            .field("resource", &self.slot.as_ref().map(|slot| &slot.resource))
            .finish()
    }
}

/// Bounded pool of reusable resources
///
/// Cloning is cheap and yields another handle to the same pool.
///
/// # Examples
///
/// ```
/// use resource_lifecycle::{factory_fn, BoxError, Pool, PoolConfiguration};
/// use std::time::Duration;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let pool = Pool::new(
///     factory_fn(|| async { Ok::<_, BoxError>(0u32) }),
///     PoolConfiguration::new().with_min_size(0).with_max_size(1),
/// )
/// .await
/// .unwrap();
///
/// let lease = pool.acquire(Duration::from_millis(10)).await.unwrap();
/// assert!(pool.acquire(Duration::from_millis(10)).await.is_err());
///
/// pool.release(lease);
/// assert!(pool.acquire(Duration::from_millis(10)).await.is_ok());
/// # });
/// ```
pub struct Pool<F: ResourceFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a pool, pre-creating `min_size` handles when warm-up is on
    ///
    /// Warm-up failures are logged and leave the pool to grow lazily.
    pub async fn new(factory: F, config: PoolConfiguration) -> Result<Self, ConfigError> {
        config.validate()?;

        let breaker = config
            .circuit_breaker
            .map(|settings| CircuitBreaker::new(settings.threshold, settings.reset_timeout));
        let warmup = config.warmup;
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);

        info!(
            pool = id,
            min_size = config.min_size,
            max_size = config.max_size,
            "creating pool"
        );

        let shared = Arc::new(PoolShared {
            id,
            factory: Arc::new(factory),
            state: Mutex::new(PoolState {
                config,
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                total: 0,
                closed: false,
                next_waiter: 0,
            }),
            leased: DashMap::new(),
            metrics: PoolMetricsTracker::new(),
            breaker,
            drained: Notify::new(),
            next_handle: AtomicU64::new(1),
        });

        if warmup {
            shared.replenish().await;
        }

        Ok(Self { shared })
    }

    /// Lease a handle, waiting up to `timeout` for one to free up
    ///
    /// Idle handles are reused first, then new ones are created up to
    /// `max_size`. Beyond that callers queue and are served in arrival order.
    pub async fn acquire(&self, timeout: Duration) -> PoolResult<Lease<F::Resource>> {
        let started = Instant::now();
        let deadline = maintenance::deadline_after(started, timeout);
        let result = self.acquire_until(deadline, timeout).await;

        match &result {
            Ok(_) => self.shared.metrics.record_acquired(started.elapsed()),
            Err(PoolError::AcquireTimeout(_)) => {
                self.shared.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(pool = self.shared.id, ?timeout, "acquire timed out");
            }
            Err(PoolError::ShuttingDown) => {
                self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        result
    }

    /// Lease a handle using the configured `acquire_timeout`
    pub async fn acquire_default(&self) -> PoolResult<Lease<F::Resource>> {
        let timeout = self.shared.state.lock().config.acquire_timeout;
        self.acquire(timeout).await
    }

    /// Lease a handle without queueing
    ///
    /// Returns `Ok(None)` when every handle is leased and the pool is at
    /// `max_size`. May still wait for the factory when it has room to grow.
    pub async fn try_acquire(&self) -> PoolResult<Option<Lease<F::Resource>>> {
        let started = Instant::now();
        let plan = {
            let mut state = self.shared.state.lock();
            if state.closed {
                self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::ShuttingDown);
            }
            if let Some(slot) = self.shared.take_idle(&mut state) {
                Plan::Ready(slot)
            } else if state.total < state.config.max_size {
                state.total += 1;
                Plan::Create
            } else {
                return Ok(None);
            }
        };

        let lease = match plan {
            Plan::Ready(slot) => self.shared.lease(slot),
            _ => match self
                .shared
                .create_leased(Reservation::new(&self.shared))
                .await
            {
                Ok(lease) => lease,
                Err(err) => {
                    if matches!(err, PoolError::ShuttingDown) {
                        self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    return Err(err);
                }
            },
        };
        self.shared.metrics.record_acquired(started.elapsed());
        Ok(Some(lease))
    }

    async fn acquire_until(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> PoolResult<Lease<F::Resource>> {
        let shared = &self.shared;
        let plan = {
            let mut state = shared.state.lock();
            if state.closed {
                return Err(PoolError::ShuttingDown);
            }
            if let Some(slot) = shared.take_idle(&mut state) {
                Plan::Ready(slot)
            } else if state.total < state.config.max_size {
                state.total += 1;
                Plan::Create
            } else {
                let (tx, rx) = oneshot::channel();
                state.next_waiter += 1;
                let waiter_id = state.next_waiter;
                state.waiters.push_back(Waiter { id: waiter_id, tx });
                Plan::Wait(waiter_id, rx)
            }
        };

        match plan {
            Plan::Ready(slot) => Ok(shared.lease(slot)),
            Plan::Create => shared.create_leased(Reservation::new(shared)).await,
            Plan::Wait(waiter_id, rx) => {
                let mut pending = PendingAcquire {
                    shared,
                    waiter_id,
                    rx,
                    settled: false,
                };
                match pending.wait(deadline, timeout).await? {
                    Grant::Handle(slot) => Ok(shared.lease(slot)),
                    Grant::Capacity => shared.create_leased(Reservation::new(shared)).await,
                }
            }
        }
    }

    /// Return a lease to the pool
    ///
    /// Equivalent to dropping it. A lease from another pool is logged and
    /// goes back to the pool it came from.
    pub fn release(&self, lease: Lease<F::Resource>) {
        if lease.pool_id != self.shared.id {
            self.reject_foreign(&lease);
        }
        lease.finish(Disposition::Release);
    }

    /// Return a broken lease; its resource is destroyed instead of reused
    pub fn discard(&self, lease: Lease<F::Resource>) {
        if lease.pool_id != self.shared.id {
            self.reject_foreign(&lease);
            lease.finish(Disposition::Release);
            return;
        }
        lease.finish(Disposition::Discard);
    }

    fn reject_foreign(&self, lease: &Lease<F::Resource>) {
        self.shared
            .metrics
            .ignored_releases
            .fetch_add(1, Ordering::Relaxed);
        warn!(
            pool = self.shared.id,
            owner = lease.pool_id,
            handle = %lease.id(),
            "lease belongs to another pool"
        );
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.metrics.snapshot(self.shared.gauges())
    }

    /// Classify pool health from the current statistics
    pub fn health_check(&self) -> HealthReport {
        let thresholds = self.shared.state.lock().config.health_thresholds;
        HealthReport::evaluate(&self.stats(), &thresholds)
    }

    pub fn config(&self) -> PoolConfiguration {
        self.shared.state.lock().config.clone()
    }

    /// Apply a partial configuration update to future operations
    ///
    /// A larger `max_size` wakes queued waiters. A smaller one trims idle
    /// handles now and retires leased ones as they come back.
    pub fn update_config(&self, update: PoolConfigUpdate) -> Result<(), ConfigError> {
        let surplus = {
            let mut state = self.shared.state.lock();
            let next = state.config.apply(&update);
            next.validate()?;
            state.config = next;

            let mut surplus = Vec::new();
            while state.total > state.config.max_size {
                let Some(slot) = state.idle.pop_front() else {
                    break;
                };
                state.total -= 1;
                surplus.push(slot);
            }
            self.shared.grant_headroom(&mut state);

            info!(
                pool = self.shared.id,
                min_size = state.config.min_size,
                max_size = state.config.max_size,
                "pool configuration updated"
            );
            surplus
        };

        self.shared
            .metrics
            .destroyed
            .fetch_add(surplus.len() as u64, Ordering::Relaxed);
        for slot in surplus {
            self.shared.dispose(slot.resource);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Run one maintenance pass now. Returns the number of handles reaped.
    pub async fn reap(&self) -> usize {
        self.shared.reap().await
    }

    /// Start the background reaper
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        maintenance::spawn("pool-reaper", Arc::downgrade(&self.shared))
    }

    /// Shut the pool down
    ///
    /// Pending and future acquires fail with `ShuttingDown`, idle handles
    /// are destroyed, and leased handles get up to `grace` to come back.
    /// Whatever is still out after that is written off: counted destroyed,
    /// and its later release is ignored.
    pub async fn close(&self, grace: Duration) {
        let shared = &self.shared;
        let deadline = maintenance::deadline_after(Instant::now(), grace);

        let idle = {
            let mut state = shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            // Dropping the senders fails every queued acquire
            state.waiters.clear();
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total -= idle.len();
            idle
        };

        info!(
            pool = shared.id,
            idle = idle.len(),
            leased = shared.leased.len(),
            "closing pool"
        );

        shared
            .metrics
            .destroyed
            .fetch_add(idle.len() as u64, Ordering::Relaxed);
        for slot in idle {
            shared.factory.destroy(slot.resource).await;
        }

        loop {
            let notified = shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shared.leased.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified.as_mut())
                .await
                .is_err()
            {
                break;
            }
        }

        let stranded: Vec<HandleId> = shared.leased.iter().map(|entry| *entry.key()).collect();
        let reclaimed = stranded
            .into_iter()
            .filter(|id| shared.leased.remove(id).is_some())
            .count();

        if reclaimed > 0 {
            shared.state.lock().total -= reclaimed;
            shared
                .metrics
                .destroyed
                .fetch_add(reclaimed as u64, Ordering::Relaxed);
            warn!(pool = shared.id, reclaimed, "reclaimed leases still out after grace period");
        }

        info!(pool = shared.id, "pool closed");
    }
}
