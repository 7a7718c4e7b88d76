//! Common test utilities and relaxed clippy settings for cast-core integration tests
//!
//! `TestResource`s are directories under a temp dir holding a `data.txt`;
//! the jobs below create, modify and delete them the way the agent's real
//! jobs do.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cast_core::{
    DirectoryKind, DirectoryResource, DirectoryType, Error, Job, JobContext, JobOptions,
    ResourceManager, Result, StateSerializer,
};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

pub enum TestResources {}

impl DirectoryType for TestResources {
    const TYPE_NAME: &'static str = "TestResource";
}

pub type TestKind = DirectoryKind<TestResources>;

pub const DATA_FILE: &str = "data.txt";

/// State is the resource's name and the contents of its data file.
pub struct DataSerializer;

#[async_trait]
impl StateSerializer<DirectoryResource> for DataSerializer {
    async fn build_object(&self, resource: &DirectoryResource) -> Result<Value> {
        let data = tokio::fs::read_to_string(resource.root().join(DATA_FILE)).await?;
        Ok(json!({
            "name": cast_core::Resource::name(resource),
            "data": data,
        }))
    }
}

/// A [`DataSerializer`] that signals `entered` and then holds until `gate`
/// is notified.
pub struct GatedSerializer {
    pub entered: Arc<Notify>,
    pub gate: Arc<Notify>,
}

#[async_trait]
impl StateSerializer<DirectoryResource> for GatedSerializer {
    async fn build_object(&self, resource: &DirectoryResource) -> Result<Value> {
        self.entered.notify_one();
        self.gate.notified().await;
        DataSerializer.build_object(resource).await
    }
}

pub fn test_manager(parent: &Path) -> ResourceManager<TestKind> {
    ResourceManager::new(DirectoryKind::new(parent), DataSerializer)
}

/// Records how many jobs run at once and in which order they ran.
#[derive(Default)]
pub struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    async fn enter(&self, label: &str) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.order.lock().unwrap().push(label.to_string());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Creates the resource directory and its data file.
pub struct CreateResource {
    pub name: String,
    pub data: String,
    /// Pause between creating the directory and writing the data file
    pub pause: Option<Duration>,
}

impl CreateResource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: String::new(),
            pause: None,
        }
    }

    pub fn with_data(name: &str, data: &str) -> Self {
        Self {
            data: data.to_string(),
            ..Self::new(name)
        }
    }

    pub fn slow(name: &str) -> Self {
        Self {
            pause: Some(Duration::from_millis(20)),
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl Job for CreateResource {
    type Kind = TestKind;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> JobOptions {
        JobOptions::Create
    }

    async fn run(&self, resource: &DirectoryResource, ctx: &JobContext) -> Result<Value> {
        tokio::fs::create_dir(resource.root()).await?;
        if let Some(pause) = self.pause {
            tokio::time::sleep(pause).await;
        }
        tokio::fs::write(resource.root().join(DATA_FILE), &self.data).await?;
        ctx.message(format!("created {}", self.name));
        Ok(Value::Null)
    }
}

/// A create that fails without creating anything.
pub struct FailCreateResource {
    pub name: String,
}

#[async_trait]
impl Job for FailCreateResource {
    type Kind = TestKind;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> JobOptions {
        JobOptions::Create
    }

    async fn run(&self, _resource: &DirectoryResource, _ctx: &JobContext) -> Result<Value> {
        Err(Error::job_failed("creation failed on purpose"))
    }
}

/// Appends `text` to the data file of an existing resource.
pub struct ModifyResource {
    pub name: String,
    pub text: String,
    pub probe: Option<Arc<Probe>>,
    /// Held after the write, before the job finishes
    pub gate: Option<Arc<Notify>>,
}

impl ModifyResource {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            text: text.to_string(),
            probe: None,
            gate: None,
        }
    }

    pub fn probed(name: &str, text: &str, probe: &Arc<Probe>) -> Self {
        Self {
            probe: Some(Arc::clone(probe)),
            ..Self::new(name, text)
        }
    }

    pub fn gated(name: &str, text: &str, gate: &Arc<Notify>) -> Self {
        Self {
            gate: Some(Arc::clone(gate)),
            ..Self::new(name, text)
        }
    }
}

#[async_trait]
impl Job for ModifyResource {
    type Kind = TestKind;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> JobOptions {
        JobOptions::Update
    }

    async fn run(&self, resource: &DirectoryResource, _ctx: &JobContext) -> Result<Value> {
        if let Some(probe) = &self.probe {
            probe.enter(&self.text).await;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(resource.root().join(DATA_FILE))
            .await?;
        file.write_all(self.text.as_bytes()).await?;
        file.flush().await?;

        if let Some(probe) = &self.probe {
            probe.leave();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(json!({ "appended": self.text }))
    }
}

/// Updates that always fail.
pub struct FailModifyResource {
    pub name: String,
}

#[async_trait]
impl Job for FailModifyResource {
    type Kind = TestKind;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> JobOptions {
        JobOptions::Update
    }

    async fn run(&self, _resource: &DirectoryResource, _ctx: &JobContext) -> Result<Value> {
        Err(Error::job_failed("modify failed on purpose"))
    }
}

/// Removes the resource directory.
pub struct DeleteResource {
    pub name: String,
}

impl DeleteResource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Job for DeleteResource {
    type Kind = TestKind;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> JobOptions {
        JobOptions::Delete
    }

    async fn run(&self, resource: &DirectoryResource, _ctx: &JobContext) -> Result<Value> {
        tokio::fs::remove_dir_all(resource.root()).await?;
        Ok(Value::Null)
    }
}

/// Poll `cond` until it holds; panics after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within 5s");
}
