//! Resource managers.
//!
//! A [`ResourceManager`] constructs a [`ResourceQueue`] the first time a name is
//! referenced and forgets it the moment its last [`Lease`] drops. Taking a
//! lease (get-or-create plus increment) and forgetting a drained queue
//! (check-zero plus remove) both happen under the registry lock, so a queue
//! can never be removed while someone is about to use it, and there is never
//! more than one live queue per name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::try_join_all;
use serde_json::Value;

use super::job::{Job, JobHandle};
use super::resource::{Lease, ResourceKind, ResourceQueue, StateSerializer};
use crate::Result;

type Registry<K> = Mutex<HashMap<String, Arc<ResourceQueue<K>>>>;

/// Lazily tracked resources of one kind.
pub struct ResourceManager<K: ResourceKind> {
    kind: Arc<K>,
    serializer: Arc<dyn StateSerializer<K::Resource>>,
    resources: Arc<Registry<K>>,
}

impl<K: ResourceKind> ResourceManager<K> {
    /// Create a manager for `kind`, serializing state with `serializer`.
    pub fn new(kind: K, serializer: impl StateSerializer<K::Resource>) -> Self {
        Self {
            kind: Arc::new(kind),
            serializer: Arc::new(serializer),
            resources: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &K {
        &self.kind
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Run the kind's one-time setup.
    pub async fn init(&self) -> Result<()> {
        self.kind.init().await?;
        tracing::debug!(resource_type = self.type_name(), "Initialized resource manager");
        Ok(())
    }

    /// Submit `job` to the queue of its resource.
    ///
    /// Fails with `NotFound`/`AlreadyExists` if the job's precondition does not
    /// hold against the predicted existence of the resource; the job is then
    /// never queued.
    pub async fn run_job<J>(&self, job: J) -> Result<JobHandle>
    where
        J: Job<Kind = K>,
    {
        let handle = JobHandle::new(self.type_name(), job.resource_name(), job.options());
        self.submit(Arc::new(job), handle.clone()).await?;
        Ok(handle)
    }

    pub(crate) async fn submit(
        &self,
        job: Arc<dyn Job<Kind = K>>,
        handle: JobHandle,
    ) -> Result<()> {
        let lease = match self.lease(job.resource_name()) {
            Ok(lease) => lease,
            Err(err) => {
                handle.reject(err.clone());
                return Err(err);
            }
        };
        let queue = Arc::clone(lease.queue());
        queue.enqueue_job(lease, job, handle).await
    }

    /// State of the resource called `name`.
    pub async fn get(&self, name: &str) -> Result<Value> {
        let lease = self.lease(name)?;
        let queue = Arc::clone(lease.queue());
        queue.get_state(lease).await
    }

    /// State of every existing resource of this kind, in listing order.
    pub async fn list(&self) -> Result<Vec<Value>> {
        let names = self.kind.list().await?;
        let leases = names
            .iter()
            .map(|name| self.lease(name))
            .collect::<Result<Vec<_>>>()?;

        try_join_all(leases.into_iter().map(|lease| async move {
            let queue = Arc::clone(lease.queue());
            queue.get_state(lease).await
        }))
        .await
    }

    /// Whether a queue for `name` is currently tracked
    #[must_use]
    pub fn is_tracked(&self, name: &str) -> bool {
        lock_registry(&self.resources).contains_key(name)
    }

    /// Names of all currently tracked queues, sorted
    #[must_use]
    pub fn tracked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_registry(&self.resources).keys().cloned().collect();
        names.sort();
        names
    }

    // Get-or-create the queue for `name` and take a lease on it, atomically
    // with respect to drain removal.
    fn lease(&self, name: &str) -> Result<Lease<K>> {
        self.kind.validate_name(name)?;

        let mut resources = lock_registry(&self.resources);
        let queue = resources
            .entry(name.to_string())
            .or_insert_with(|| self.construct(name));
        Ok(queue.lease())
    }

    fn construct(&self, name: &str) -> Arc<ResourceQueue<K>> {
        let registry: Weak<Registry<K>> = Arc::downgrade(&self.resources);
        ResourceQueue::with_drain_hook(
            self.type_name(),
            self.kind.instantiate(name),
            Arc::clone(&self.serializer),
            Box::new(move |queue: &ResourceQueue<K>| forget_drained(&registry, queue)),
        )
    }
}

// A lease may have been taken between the drain and this call; only remove
// the queue if it is still the registered one and still idle.
fn forget_drained<K: ResourceKind>(registry: &Weak<Registry<K>>, queue: &ResourceQueue<K>) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let mut resources = lock_registry(&registry);

    let is_current = resources
        .get(queue.name())
        .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), queue));

    if is_current && queue.in_flight() == 0 {
        resources.remove(queue.name());
        tracing::trace!(
            resource_type = queue.resource_type(),
            resource = queue.name(),
            "Forgot drained resource"
        );
    }
}

fn lock_registry<K: ResourceKind>(
    registry: &Registry<K>,
) -> MutexGuard<'_, HashMap<String, Arc<ResourceQueue<K>>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
