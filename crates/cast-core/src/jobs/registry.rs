//! Job registry: one [`ResourceManager`] per resource kind plus the history
//! of submitted jobs.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::job::{Job, JobHandle, JobId, JobView};
use super::manager::ResourceManager;
use super::resource::ResourceKind;
use crate::config::JobsConfig;
use crate::{Error, Result};

struct Registered {
    type_name: &'static str,
    manager: Arc<dyn Any + Send + Sync>,
}

/// Routes jobs to the manager of their resource kind and remembers them.
///
/// Every job handed to [`JobManager::run`] is recorded, including jobs
/// rejected at submission. Once more than `max_retained` jobs are recorded,
/// the oldest finished ones are forgotten; unfinished jobs are always kept.
pub struct JobManager {
    managers: RwLock<HashMap<TypeId, Registered>>,
    jobs: Mutex<VecDeque<JobHandle>>,
    max_retained: usize,
}

impl JobManager {
    #[must_use]
    pub fn new(config: &JobsConfig) -> Self {
        Self {
            managers: RwLock::new(HashMap::new()),
            jobs: Mutex::new(VecDeque::new()),
            max_retained: config.max_retained,
        }
    }

    /// Register the manager for kind `K`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResourceType` if a manager for `K` is already registered.
    pub fn register<K: ResourceKind>(&self, manager: Arc<ResourceManager<K>>) -> Result<()> {
        let type_name = manager.type_name();
        let mut managers = self
            .managers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if managers.contains_key(&TypeId::of::<K>()) {
            return Err(Error::DuplicateResourceType(type_name.to_string()));
        }
        managers.insert(TypeId::of::<K>(), Registered { type_name, manager });
        drop(managers);

        tracing::debug!(resource_type = type_name, "Registered resource manager");
        Ok(())
    }

    /// The registered manager for kind `K`.
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredResourceType` if no manager for `K` is registered.
    pub fn manager<K: ResourceKind>(&self) -> Result<Arc<ResourceManager<K>>> {
        let manager = self
            .managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<K>())
            .map(|registered| Arc::clone(&registered.manager));

        manager
            .and_then(|manager| manager.downcast::<ResourceManager<K>>().ok())
            .ok_or_else(|| {
                Error::UnregisteredResourceType(short_type_name(std::any::type_name::<K>()))
            })
    }

    /// Type names of all registered kinds, sorted
    #[must_use]
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self
            .managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|registered| registered.type_name)
            .collect();
        types.sort_unstable();
        types
    }

    /// Submit `job` to the manager of its kind and record it.
    ///
    /// The job is recorded before submission, so a job rejected by its
    /// precondition still shows up in [`JobManager::list_jobs`].
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredResourceType` if the job's kind has no manager,
    /// or the submission error (`NotFound`, `AlreadyExists`,
    /// `InvalidResourceName`) if the job was rejected.
    pub async fn run<J: Job>(&self, job: J) -> Result<JobHandle> {
        let manager = self.manager::<J::Kind>()?;
        let handle = JobHandle::new(manager.type_name(), job.resource_name(), job.options());
        self.record(handle.clone());

        manager.submit(Arc::new(job), handle.clone()).await?;
        Ok(handle)
    }

    /// Look up a recorded job.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if the job was never recorded or has been pruned.
    pub fn get_job(&self, id: &JobId) -> Result<JobHandle> {
        self.lock_jobs()
            .iter()
            .find(|handle| handle.id() == id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// Views of all recorded jobs, oldest first
    #[must_use]
    pub fn list_jobs(&self) -> Vec<JobView> {
        self.lock_jobs().iter().map(JobHandle::view).collect()
    }

    fn record(&self, handle: JobHandle) {
        let mut jobs = self.lock_jobs();
        jobs.push_back(handle);

        while jobs.len() > self.max_retained {
            let Some(oldest_finished) = jobs.iter().position(|job| job.status().is_terminal())
            else {
                break;
            };
            if let Some(pruned) = jobs.remove(oldest_finished) {
                tracing::trace!(job_id = %pruned.id(), "Pruned job from history");
            }
        }
    }

    fn lock_jobs(&self) -> MutexGuard<'_, VecDeque<JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// `a::b::Kind<c::Marker>` -> `Kind<Marker>`
fn short_type_name(full: &str) -> String {
    full.split_inclusive(['<', '>', ',', ' ', '(', ')', '[', ']', '&', ';'])
        .map(|part| part.rsplit("::").next().unwrap_or(part))
        .collect()
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(&JobsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::jobs::{
        DirectoryKind, DirectoryResource, DirectorySerializer, DirectoryType, JobContext,
        JobOptions, JobStatus,
    };

    enum Bundles {}

    impl DirectoryType for Bundles {
        const TYPE_NAME: &'static str = "Bundle";
    }

    enum Instances {}

    impl DirectoryType for Instances {
        const TYPE_NAME: &'static str = "Instance";
    }

    struct Install(&'static str);

    #[async_trait]
    impl Job for Install {
        type Kind = DirectoryKind<Bundles>;

        fn resource_name(&self) -> &str {
            self.0
        }

        fn options(&self) -> JobOptions {
            JobOptions::Create
        }

        async fn run(&self, resource: &DirectoryResource, ctx: &JobContext) -> Result<Value> {
            ctx.message("unpacking");
            tokio::fs::create_dir(resource.root()).await?;
            Ok(json!({ "installed": self.0 }))
        }
    }

    fn bundles(parent: &std::path::Path) -> Arc<ResourceManager<DirectoryKind<Bundles>>> {
        Arc::new(ResourceManager::new(
            DirectoryKind::new(parent),
            DirectorySerializer,
        ))
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let jobs = JobManager::default();
        assert!(jobs.register(bundles(std::path::Path::new("/tmp/a"))).is_ok());

        let again = jobs.register(bundles(std::path::Path::new("/tmp/b")));
        assert_eq!(
            again,
            Err(Error::DuplicateResourceType("Bundle".to_string()))
        );
    }

    #[test]
    fn test_registered_types_are_sorted() {
        let jobs = JobManager::default();
        let instances = Arc::new(ResourceManager::new(
            DirectoryKind::<Instances>::new("/tmp/i"),
            DirectorySerializer,
        ));
        assert!(jobs.register(instances).is_ok());
        assert!(jobs.register(bundles(std::path::Path::new("/tmp/b"))).is_ok());
        assert_eq!(jobs.registered_types(), vec!["Bundle", "Instance"]);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_an_error() {
        let jobs = JobManager::default();
        let result = jobs.run(Install("web")).await;
        assert_eq!(
            result.err(),
            Some(Error::UnregisteredResourceType(
                "DirectoryKind<Bundles>".to_string()
            ))
        );
        assert!(jobs.list_jobs().is_empty());
    }

    #[test]
    fn test_short_type_name_strips_paths() {
        assert_eq!(short_type_name("Plain"), "Plain");
        assert_eq!(
            short_type_name("a::b::Kind<c::Marker, d::e::Other>"),
            "Kind<Marker, Other>"
        );
    }

    #[tokio::test]
    async fn test_run_records_job_with_messages() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let jobs = JobManager::default();
        jobs.register(bundles(temp.path()))?;

        let handle = jobs.run(Install("web")).await?;
        assert_eq!(handle.outcome().await?, json!({ "installed": "web" }));

        let found = jobs.get_job(handle.id())?;
        assert_eq!(found.messages(), vec!["unpacking"]);

        let views = jobs.list_jobs();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, "succeeded");
        assert_eq!(views[0].resource_type, "Bundle");
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_job_is_recorded() -> Result<()> {
        let temp = tempfile::tempdir()?;
        tokio::fs::create_dir(temp.path().join("web")).await?;
        let jobs = JobManager::default();
        jobs.register(bundles(temp.path()))?;

        let result = jobs.run(Install("web")).await;
        assert_eq!(result.err(), Some(Error::already_exists("Bundle", "web")));

        let views = jobs.list_jobs();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, "rejected");
        Ok(())
    }

    #[tokio::test]
    async fn test_get_unknown_job() {
        let jobs = JobManager::default();
        let missing = JobId::new("nope");
        assert_eq!(
            jobs.get_job(&missing).err(),
            Some(Error::JobNotFound("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_oldest_finished_jobs_are_pruned() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let jobs = JobManager::new(&JobsConfig { max_retained: 2 });
        jobs.register(bundles(temp.path()))?;

        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let handle = jobs.run(Install(name)).await?;
            assert!(matches!(handle.wait().await, JobStatus::Succeeded(_)));
            handles.push(handle);
        }

        assert_eq!(jobs.list_jobs().len(), 2);
        assert!(matches!(
            jobs.get_job(handles[0].id()),
            Err(Error::JobNotFound(_))
        ));
        assert!(jobs.get_job(handles[2].id()).is_ok());
        Ok(())
    }
}
