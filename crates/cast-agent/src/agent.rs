//! The agent's resource kinds, wired into one [`JobManager`].

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cast_core::{
    AgentConfig, DirectoryKind, DirectoryResource, DirectorySerializer, DirectoryType, Job,
    JobContext, JobManager, JobOptions, JobView, ResourceManager, Result,
};
use serde_json::{json, Value};

pub enum Bundles {}

impl DirectoryType for Bundles {
    const TYPE_NAME: &'static str = "Bundle";
}

pub enum Instances {}

impl DirectoryType for Instances {
    const TYPE_NAME: &'static str = "Instance";
}

pub enum SigningRequests {}

impl DirectoryType for SigningRequests {
    const TYPE_NAME: &'static str = "SigningRequest";
}

/// Resource kind as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bundle,
    Instance,
    SigningRequest,
}

impl Kind {
    pub const NAMES: [&'static str; 3] = ["bundles", "instances", "signing-requests"];

    pub fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "bundles" => Ok(Self::Bundle),
            "instances" => Ok(Self::Instance),
            "signing-requests" => Ok(Self::SigningRequest),
            other => anyhow::bail!(
                "Unknown resource kind '{other}', expected one of: {}",
                Self::NAMES.join(", ")
            ),
        }
    }
}

/// Removes a directory-backed resource.
struct RemoveDirectory<T> {
    name: String,
    _type: PhantomData<fn() -> T>,
}

impl<T> RemoveDirectory<T> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            _type: PhantomData,
        }
    }
}

#[async_trait]
impl<T: DirectoryType> Job for RemoveDirectory<T> {
    type Kind = DirectoryKind<T>;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> JobOptions {
        JobOptions::Delete
    }

    async fn run(&self, resource: &DirectoryResource, ctx: &JobContext) -> Result<Value> {
        let root = resource.root();
        ctx.message(format!("Removing {}", root.display()));
        tokio::fs::remove_dir_all(&root).await?;
        Ok(json!({ "removed": self.name }))
    }
}

pub struct Agent {
    jobs: JobManager,
}

impl Agent {
    /// Build and initialize a manager for every resource kind.
    pub async fn start(config: &AgentConfig) -> Result<Self> {
        let jobs = JobManager::new(&config.jobs);
        register::<Bundles>(&jobs, config.bundle_root()).await?;
        register::<Instances>(&jobs, config.instance_root()).await?;
        register::<SigningRequests>(&jobs, config.signing_request_root()).await?;

        tracing::info!(kinds = ?jobs.registered_types(), "Agent started");
        Ok(Self { jobs })
    }

    pub async fn list(&self, kind: Kind) -> Result<Vec<Value>> {
        match kind {
            Kind::Bundle => self.jobs.manager::<DirectoryKind<Bundles>>()?.list().await,
            Kind::Instance => self.jobs.manager::<DirectoryKind<Instances>>()?.list().await,
            Kind::SigningRequest => {
                self.jobs
                    .manager::<DirectoryKind<SigningRequests>>()?
                    .list()
                    .await
            }
        }
    }

    pub async fn get(&self, kind: Kind, name: &str) -> Result<Value> {
        match kind {
            Kind::Bundle => self.jobs.manager::<DirectoryKind<Bundles>>()?.get(name).await,
            Kind::Instance => {
                self.jobs
                    .manager::<DirectoryKind<Instances>>()?
                    .get(name)
                    .await
            }
            Kind::SigningRequest => {
                self.jobs
                    .manager::<DirectoryKind<SigningRequests>>()?
                    .get(name)
                    .await
            }
        }
    }

    /// Run a delete job against `name` and wait for it to finish.
    pub async fn remove(&self, kind: Kind, name: &str) -> Result<JobView> {
        let handle = match kind {
            Kind::Bundle => self.jobs.run(RemoveDirectory::<Bundles>::new(name)).await?,
            Kind::Instance => self.jobs.run(RemoveDirectory::<Instances>::new(name)).await?,
            Kind::SigningRequest => {
                self.jobs
                    .run(RemoveDirectory::<SigningRequests>::new(name))
                    .await?
            }
        };
        handle.wait().await;
        Ok(handle.view())
    }
}

async fn register<T: DirectoryType>(jobs: &JobManager, root: PathBuf) -> Result<()> {
    let manager = ResourceManager::new(DirectoryKind::<T>::new(root), DirectorySerializer);
    manager.init().await?;
    jobs.register(Arc::new(manager))
}
