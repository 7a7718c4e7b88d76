//! Resources and their per-name job queues.
//!
//! A [`ResourceQueue`] owns everything the scheduler knows about one named
//! resource:
//! - a FIFO of admitted jobs and at most one running job
//! - the state snapshot taken when the running job started, shared by every
//!   concurrent reader
//! - the check slot, a fair async mutex that makes "predict existence, then
//!   enqueue" and "check existence, then serialize" atomic with respect to
//!   each other
//! - the in-flight count, held as [`Lease`]s; when the last lease drops the
//!   queue drains and its manager forgets it

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use super::job::{Job, JobContext, JobHandle, JobOptions};
use crate::{Error, Result};

/// Ground truth about one named resource.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Name of this resource
    fn name(&self) -> &str;

    /// Whether the resource currently exists.
    async fn exists(&self) -> bool {
        false
    }
}

/// A kind of resource: builds [`Resource`] values by name and enumerates
/// the names that exist.
#[async_trait]
pub trait ResourceKind: Send + Sync + 'static {
    type Resource: Resource;

    /// Name used in errors and job views (e.g. `Bundle`)
    fn type_name(&self) -> &'static str;

    /// Construct the resource value for `name`. Must not touch the outside world.
    fn instantiate(&self, name: &str) -> Self::Resource;

    /// Names of all resources of this kind that currently exist.
    async fn list(&self) -> Result<Vec<String>>;

    /// Reject names this kind cannot represent.
    fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_name(
                self.type_name(),
                name,
                "name cannot be empty",
            ));
        }
        Ok(())
    }

    /// One-time asynchronous setup, run by [`ResourceManager::init`](super::ResourceManager::init).
    async fn init(&self) -> Result<()> {
        Ok(())
    }
}

/// Converts a resource into its externally visible state.
#[async_trait]
pub trait StateSerializer<R: Resource>: Send + Sync + 'static {
    async fn build_object(&self, resource: &R) -> Result<Value>;
}

type Snapshot = Option<Result<Value>>;

pub(crate) type DrainHook<K> = Box<dyn Fn(&ResourceQueue<K>) + Send + Sync>;

struct QueuedJob<K: ResourceKind> {
    job: Arc<dyn Job<Kind = K>>,
    handle: JobHandle,
    lease: Lease<K>,
}

struct RunningJob {
    handle: JobHandle,
    snapshot: watch::Receiver<Snapshot>,
}

struct QueueState<K: ResourceKind> {
    pending: VecDeque<QueuedJob<K>>,
    running: Option<RunningJob>,
    in_flight: usize,
}

/// Job queue, snapshot cache and check slot for one named resource.
pub struct ResourceQueue<K: ResourceKind> {
    resource_type: &'static str,
    resource: K::Resource,
    serializer: Arc<dyn StateSerializer<K::Resource>>,
    check: AsyncMutex<()>,
    state: Mutex<QueueState<K>>,
    on_drain: Option<DrainHook<K>>,
}

/// One unit of interest in a [`ResourceQueue`].
///
/// Every queued or running job and every pending state read holds a lease.
/// Dropping the last lease drains the queue.
pub struct Lease<K: ResourceKind> {
    queue: Arc<ResourceQueue<K>>,
}

impl<K: ResourceKind> Lease<K> {
    /// The queue this lease keeps alive
    #[must_use]
    pub const fn queue(&self) -> &Arc<ResourceQueue<K>> {
        &self.queue
    }
}

impl<K: ResourceKind> Drop for Lease<K> {
    fn drop(&mut self) {
        self.queue.release();
    }
}

impl<K: ResourceKind> ResourceQueue<K> {
    /// Create a standalone queue for `resource`.
    pub fn new(
        resource_type: &'static str,
        resource: K::Resource,
        serializer: Arc<dyn StateSerializer<K::Resource>>,
    ) -> Arc<Self> {
        Self::build(resource_type, resource, serializer, None)
    }

    pub(crate) fn with_drain_hook(
        resource_type: &'static str,
        resource: K::Resource,
        serializer: Arc<dyn StateSerializer<K::Resource>>,
        on_drain: DrainHook<K>,
    ) -> Arc<Self> {
        Self::build(resource_type, resource, serializer, Some(on_drain))
    }

    fn build(
        resource_type: &'static str,
        resource: K::Resource,
        serializer: Arc<dyn StateSerializer<K::Resource>>,
        on_drain: Option<DrainHook<K>>,
    ) -> Arc<Self> {
        tracing::trace!(resource_type, resource = resource.name(), "Constructed resource queue");
        Arc::new(Self {
            resource_type,
            resource,
            serializer,
            check: AsyncMutex::new(()),
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: None,
                in_flight: 0,
            }),
            on_drain,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.resource.name()
    }

    #[must_use]
    pub const fn resource_type(&self) -> &'static str {
        self.resource_type
    }

    #[must_use]
    pub const fn resource(&self) -> &K::Resource {
        &self.resource
    }

    /// Queued and running jobs plus pending reads
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    /// Whether a job is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock_state().running.is_some()
    }

    /// Number of admitted jobs waiting behind the running one
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Take a lease, counting one more unit of interest.
    #[must_use]
    pub fn lease(self: &Arc<Self>) -> Lease<K> {
        self.lock_state().in_flight += 1;
        Lease {
            queue: Arc::clone(self),
        }
    }

    /// Ground-truth existence check.
    pub async fn exists(&self) -> bool {
        self.resource.exists().await
    }

    /// Predict whether the resource will exist once every admitted job has run.
    ///
    /// Waits for the check slot so the prediction sees a settled queue.
    pub async fn predict_existence(&self) -> bool {
        let slot = self.check.lock().await;
        self.will_exist(&slot).await
    }

    /// Read the resource's state.
    ///
    /// While a job runs, every reader gets the snapshot taken when that job
    /// started. Otherwise the state is built on demand inside the check slot.
    pub async fn get_state(&self, lease: Lease<K>) -> Result<Value> {
        let state = self.read_state().await;
        drop(lease);
        state
    }

    /// Submit `job` to this queue and return its handle once admitted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResourceName` if the job targets another resource, or
    /// the existence error if its precondition fails against the predicted
    /// existence.
    pub async fn submit(self: &Arc<Self>, job: Arc<dyn Job<Kind = K>>) -> Result<JobHandle> {
        if job.resource_name() != self.name() {
            return Err(Error::invalid_name(
                self.resource_type,
                job.resource_name(),
                format!("job does not target '{}'", self.name()),
            ));
        }
        let handle = JobHandle::new(self.resource_type, job.resource_name(), job.options());
        self.enqueue_job(self.lease(), job, handle.clone()).await?;
        Ok(handle)
    }

    /// Admit `job` if its existence precondition holds against the predicted
    /// existence, then start it when the queue reaches it.
    ///
    /// `lease` must be taken on this queue and `handle` built from `job`.
    /// A rejected job is marked `Rejected` and never queued.
    pub(crate) async fn enqueue_job(
        self: &Arc<Self>,
        lease: Lease<K>,
        job: Arc<dyn Job<Kind = K>>,
        handle: JobHandle,
    ) -> Result<()> {
        debug_assert!(Arc::ptr_eq(lease.queue(), self), "lease taken on another queue");
        debug_assert_eq!(handle.options(), job.options());

        let slot = self.check.lock().await;
        let will_exist = self.will_exist(&slot).await;

        if !job.can_handle_existence(will_exist) {
            let err = self.existence_error(will_exist);
            tracing::debug!(
                resource_type = self.resource_type,
                resource = self.name(),
                job_id = %handle.id(),
                will_exist,
                "Rejected job at admission"
            );
            handle.reject(err.clone());
            drop(lease);
            drop(slot);
            return Err(err);
        }

        handle.mark_queued();
        tracing::debug!(
            resource_type = self.resource_type,
            resource = self.name(),
            job_id = %handle.id(),
            options = %handle.options(),
            "Queued job"
        );
        self.lock_state()
            .pending
            .push_back(QueuedJob { job, handle, lease });
        self.cycle();
        drop(slot);
        Ok(())
    }

    // Only callable with the check slot held, so no job can be admitted
    // between reading the queue and acting on the answer.
    async fn will_exist(&self, _slot: &AsyncMutexGuard<'_, ()>) -> bool {
        let predicted = {
            let state = self.lock_state();
            state
                .pending
                .iter()
                .rev()
                .map(|queued| queued.handle.options())
                .chain(state.running.iter().map(|running| running.handle.options()))
                .find_map(JobOptions::resulting_existence)
        };

        match predicted {
            Some(will_exist) => will_exist,
            None => self.resource.exists().await,
        }
    }

    async fn read_state(&self) -> Result<Value> {
        if let Some(snapshot) = self.running_snapshot() {
            return self.await_snapshot(snapshot).await;
        }

        let slot = self.check.lock().await;

        // A job admitted while we waited for the slot may already be running.
        if let Some(snapshot) = self.running_snapshot() {
            drop(slot);
            return self.await_snapshot(snapshot).await;
        }

        let state = if self.resource.exists().await {
            self.serializer.build_object(&self.resource).await
        } else {
            Err(self.existence_error(false))
        };
        drop(slot);
        state
    }

    fn running_snapshot(&self) -> Option<watch::Receiver<Snapshot>> {
        self.lock_state()
            .running
            .as_ref()
            .map(|running| running.snapshot.clone())
    }

    async fn await_snapshot(&self, mut snapshot: watch::Receiver<Snapshot>) -> Result<Value> {
        let ready = snapshot
            .wait_for(Option::is_some)
            .await
            .map(|built| (*built).clone());

        match ready {
            Ok(Some(state)) => state,
            Ok(None) | Err(_) => Err(Error::SnapshotUnavailable {
                resource_type: self.resource_type.to_string(),
                name: self.name().to_string(),
            }),
        }
    }

    // Start the head of the queue if nothing is running.
    fn cycle(self: &Arc<Self>) {
        self.advance(self.lock_state());
    }

    // Takes the guard so that clearing the finished job and starting the
    // next one happen in one critical section: a reader holding the check
    // slot never sees an idle queue with jobs still pending.
    fn advance(self: &Arc<Self>, mut state: MutexGuard<'_, QueueState<K>>) {
        if state.running.is_some() {
            return;
        }
        let Some(next) = state.pending.pop_front() else {
            return;
        };

        // A job is either pending or running, never both.
        debug_assert!(
            state
                .pending
                .iter()
                .all(|queued| queued.handle.id() != next.handle.id()),
            "job {} is both pending and running",
            next.handle.id()
        );

        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        state.running = Some(RunningJob {
            handle: next.handle.clone(),
            snapshot: snapshot_rx,
        });
        drop(state);

        tokio::spawn(Arc::clone(self).execute(next, snapshot_tx));
    }

    async fn execute(self: Arc<Self>, queued: QueuedJob<K>, snapshot: watch::Sender<Snapshot>) {
        let QueuedJob { job, handle, lease } = queued;

        let outcome = AssertUnwindSafe(self.perform(job.as_ref(), &handle, &snapshot))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let msg = panic_message(panic.as_ref());
                tracing::error!(
                    resource_type = self.resource_type,
                    resource = self.name(),
                    job_id = %handle.id(),
                    panic = %msg,
                    "Job panicked"
                );
                Err(Error::JobPanicked(msg))
            });

        // Release readers even if the snapshot was never built.
        snapshot.send_if_modified(|built| {
            if built.is_some() {
                return false;
            }
            *built = Some(Err(Error::SnapshotUnavailable {
                resource_type: self.resource_type.to_string(),
                name: self.name().to_string(),
            }));
            true
        });

        match &outcome {
            Ok(_) => tracing::info!(
                resource_type = self.resource_type,
                resource = self.name(),
                job_id = %handle.id(),
                "Job succeeded"
            ),
            Err(err) => tracing::warn!(
                resource_type = self.resource_type,
                resource = self.name(),
                job_id = %handle.id(),
                error = %err,
                "Job failed"
            ),
        }

        // Leave the queue before publishing the outcome: a caller woken by
        // the terminal status must not read this job's snapshot.
        self.remove_job(&handle);
        drop(lease);

        // No-op unless `perform` panicked before starting the job.
        handle.mark_running();
        handle.settle(outcome);
    }

    async fn perform(
        &self,
        job: &dyn Job<Kind = K>,
        handle: &JobHandle,
        snapshot: &watch::Sender<Snapshot>,
    ) -> Result<Value> {
        let exists = self.resource.exists().await;
        let state = if exists {
            self.serializer.build_object(&self.resource).await
        } else {
            Err(self.existence_error(false))
        };
        snapshot.send_replace(Some(state));

        handle.mark_running();
        tracing::debug!(
            resource_type = self.resource_type,
            resource = self.name(),
            job_id = %handle.id(),
            "Started job"
        );

        // The prediction made at admission can be wrong when an earlier job
        // failed; re-check against the real state.
        if !job.can_handle_existence(exists) {
            return Err(self.existence_error(exists));
        }

        job.run(&self.resource, &JobContext::new(handle.clone()))
            .await
    }

    fn remove_job(self: &Arc<Self>, handle: &JobHandle) {
        let mut state = self.lock_state();
        debug_assert!(
            state
                .running
                .as_ref()
                .is_some_and(|running| running.handle.id() == handle.id()),
            "finished job {} was not the running job",
            handle.id()
        );
        state.running = None;
        self.advance(state);
    }

    fn release(&self) {
        let remaining = {
            let mut state = self.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.in_flight
        };

        if remaining == 0 {
            tracing::debug!(
                resource_type = self.resource_type,
                resource = self.name(),
                "Resource drained"
            );
            if let Some(on_drain) = &self.on_drain {
                on_drain(self);
            }
        }
    }

    fn existence_error(&self, exists: bool) -> Error {
        Error::existence(self.resource_type, self.name(), exists)
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
