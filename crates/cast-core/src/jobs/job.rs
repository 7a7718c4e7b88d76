//! Jobs: units of work against one named resource.
//!
//! A job moves through `Unassigned -> Queued -> Running -> {Succeeded, Failed}`.
//! A job whose existence precondition fails at submission goes
//! `Unassigned -> Rejected` instead and never starts. Every transition is
//! published on a `watch` channel held by the [`JobHandle`]; terminal states
//! are never overwritten, so exactly one of success/error is observed.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use super::resource::ResourceKind;
use crate::{Error, Result};

/// What a job does to the existence of its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOptions {
    /// Operates only on a missing resource and creates it
    Create,
    /// Operates only on an existing resource
    Update,
    /// Creates the resource if missing, updates it otherwise
    CreateOrUpdate,
    /// Removes an existing resource
    Delete,
    /// Neither needs nor changes existence (reads, probes)
    Neutral,
}

impl JobOptions {
    /// Whether the resource exists once this job has run.
    #[must_use]
    pub const fn will_create(self) -> bool {
        matches!(self, Self::Create | Self::CreateOrUpdate)
    }

    /// Whether the resource is gone once this job has run.
    #[must_use]
    pub const fn will_delete(self) -> bool {
        matches!(self, Self::Delete)
    }

    /// The resource must exist before this job runs.
    #[must_use]
    pub const fn resource_must_exist(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }

    /// The resource must not exist before this job runs.
    #[must_use]
    pub const fn resource_must_not_exist(self) -> bool {
        matches!(self, Self::Create)
    }

    /// Whether a job with these options can operate on a resource whose
    /// existence is (or is predicted to be) `exists`.
    #[must_use]
    pub const fn can_handle_existence(self, exists: bool) -> bool {
        if self.resource_must_exist() && !exists {
            return false;
        }
        !(self.resource_must_not_exist() && exists)
    }

    /// Existence of the resource after this job, if the job decides it.
    #[must_use]
    pub const fn resulting_existence(self) -> Option<bool> {
        if self.will_create() {
            Some(true)
        } else if self.will_delete() {
            Some(false)
        } else {
            None
        }
    }
}

impl std::fmt::Display for JobOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::CreateOrUpdate => write!(f, "create_or_update"),
            Self::Delete => write!(f, "delete"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// A unit of work against one resource of kind [`Job::Kind`].
///
/// Implementations name their target, declare their [`JobOptions`] and carry
/// out the effect in [`Job::run`]. The scheduler guarantees that no two jobs
/// run against the same resource name at once.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// The kind of resource this job operates on
    type Kind: ResourceKind;

    /// Name of the target resource.
    fn resource_name(&self) -> &str;

    /// How this job relates to the existence of its resource.
    fn options(&self) -> JobOptions;

    /// Whether this job can operate on a resource whose existence is `exists`.
    ///
    /// Evaluated once against the predicted existence before the job is
    /// queued, and again against the real existence before it runs.
    fn can_handle_existence(&self, exists: bool) -> bool {
        self.options().can_handle_existence(exists)
    }

    /// Carry out the job.
    async fn run(
        &self,
        resource: &<Self::Kind as ResourceKind>::Resource,
        ctx: &JobContext,
    ) -> Result<Value>;
}

/// Unique job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a job ID from an existing string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random job ID
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current phase of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Constructed, not yet submitted
    Unassigned,
    /// Admitted to its resource's queue
    Queued,
    /// Executing
    Running,
    /// Finished successfully
    Succeeded(Value),
    /// Finished with an error
    Failed(Error),
    /// Refused at submission; never queued
    Rejected(Error),
}

impl JobStatus {
    /// Check if this is a terminal state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded(_) | Self::Failed(_) | Self::Rejected(_)
        )
    }

    /// Check if the job was ever started by the scheduler
    #[must_use]
    pub const fn has_started(&self) -> bool {
        matches!(self, Self::Running | Self::Succeeded(_) | Self::Failed(_))
    }

    /// Short status name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unassigned => "unassigned",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
            Self::Rejected(_) => "rejected",
        }
    }

    const fn accepts(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Unassigned, Self::Queued | Self::Rejected(_))
                | (Self::Queued, Self::Running)
                | (Self::Running, Self::Succeeded(_) | Self::Failed(_))
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
struct JobRecord {
    id: JobId,
    resource_type: &'static str,
    resource_name: String,
    options: JobOptions,
    created_at: DateTime<Utc>,
    status: watch::Sender<JobStatus>,
    messages: Mutex<Vec<String>>,
}

/// Shared handle to a submitted job.
///
/// Cheap to clone. Callers use it to observe transitions ([`JobHandle::subscribe`]),
/// wait for the outcome, and read progress messages.
#[derive(Debug, Clone)]
pub struct JobHandle {
    record: Arc<JobRecord>,
}

impl JobHandle {
    /// Create a handle for a job that has not been submitted yet.
    #[must_use]
    pub fn new(
        resource_type: &'static str,
        resource_name: impl Into<String>,
        options: JobOptions,
    ) -> Self {
        let (status, _) = watch::channel(JobStatus::Unassigned);
        Self {
            record: Arc::new(JobRecord {
                id: JobId::generate(),
                resource_type,
                resource_name: resource_name.into(),
                options,
                created_at: Utc::now(),
                status,
                messages: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    #[must_use]
    pub fn resource_type(&self) -> &'static str {
        self.record.resource_type
    }

    #[must_use]
    pub fn resource_name(&self) -> &str {
        &self.record.resource_name
    }

    #[must_use]
    pub fn options(&self) -> JobOptions {
        self.record.options
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.record.status.borrow().clone()
    }

    /// Receiver notified on every transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.record.status.subscribe()
    }

    /// Wait until the job reaches a terminal status and return it.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.subscribe();
        let terminal = rx
            .wait_for(JobStatus::is_terminal)
            .await
            .map(|status| (*status).clone());
        // The sender lives in the record this handle owns, so the channel
        // cannot close while we wait.
        terminal.unwrap_or_else(|_| self.status())
    }

    /// Wait for the job and convert its terminal status into a `Result`.
    pub async fn outcome(&self) -> Result<Value> {
        match self.wait().await {
            JobStatus::Succeeded(value) => Ok(value),
            JobStatus::Failed(err) | JobStatus::Rejected(err) => Err(err),
            other => Err(Error::job_failed(format!(
                "job {} stopped in non-terminal state '{other}'",
                self.id()
            ))),
        }
    }

    /// Progress messages logged by the job so far
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.record
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serializable view of this job
    #[must_use]
    pub fn view(&self) -> JobView {
        let status = self.status();
        let result = match &status {
            JobStatus::Succeeded(value) => Some(JobResultView::Success(value.clone())),
            JobStatus::Failed(err) | JobStatus::Rejected(err) => {
                Some(JobResultView::Error(err.to_string()))
            }
            JobStatus::Unassigned | JobStatus::Queued | JobStatus::Running => None,
        };

        JobView {
            id: self.id().clone(),
            resource_type: self.resource_type().to_string(),
            resource_name: self.resource_name().to_string(),
            options: self.options(),
            status: status.as_str().to_string(),
            messages: self.messages(),
            result,
            created_at: self.created_at(),
        }
    }

    pub(crate) fn mark_queued(&self) -> bool {
        self.transition(JobStatus::Queued)
    }

    pub(crate) fn mark_running(&self) -> bool {
        self.transition(JobStatus::Running)
    }

    pub(crate) fn reject(&self, err: Error) -> bool {
        self.transition(JobStatus::Rejected(err))
    }

    pub(crate) fn settle(&self, outcome: Result<Value>) -> bool {
        match outcome {
            Ok(value) => self.transition(JobStatus::Succeeded(value)),
            Err(err) => self.transition(JobStatus::Failed(err)),
        }
    }

    fn push_message(&self, msg: String) {
        self.record
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
    }

    fn transition(&self, next: JobStatus) -> bool {
        let next_name = next.as_str();
        let applied = self.record.status.send_if_modified(move |current| {
            if current.accepts(&next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if !applied {
            tracing::trace!(
                job_id = %self.id(),
                status = %self.status(),
                refused = next_name,
                "Ignored job transition"
            );
        }
        applied
    }
}

/// Handed to [`Job::run`]; lets a running job report progress.
#[derive(Debug, Clone)]
pub struct JobContext {
    handle: JobHandle,
}

impl JobContext {
    pub(crate) const fn new(handle: JobHandle) -> Self {
        Self { handle }
    }

    /// ID of the running job
    #[must_use]
    pub fn job_id(&self) -> &JobId {
        self.handle.id()
    }

    /// Append a progress message to the job's log
    pub fn message(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::debug!(job_id = %self.handle.id(), message = %msg, "Job message");
        self.handle.push_message(msg);
    }
}

/// Serializable snapshot of a job, as returned by the control API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub resource_type: String,
    pub resource_name: String,
    pub options: JobOptions,
    pub status: String,
    pub messages: Vec<String>,
    pub result: Option<JobResultView>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a finished job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobResultView {
    Success(Value),
    Error(String),
}
