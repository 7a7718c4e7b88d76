//! Per-resource job scheduling.
//!
//! - [`Job`]: one unit of work against one named resource
//! - [`ResourceQueue`]: per-name FIFO job queue, snapshot cache and check slot
//! - [`DirectoryResource`]: a resource backed by a directory
//! - [`ResourceManager`]: lazily builds queues by name and forgets them on drain
//! - [`JobManager`]: routes jobs to the manager of their kind and keeps job history

mod directory;
mod job;
mod manager;
mod registry;
mod resource;

pub use directory::{
    list_directory, DirectoryKind, DirectoryResource, DirectorySerializer, DirectoryType,
};
pub use job::{Job, JobContext, JobHandle, JobId, JobOptions, JobResultView, JobStatus, JobView};
pub use manager::ResourceManager;
pub use registry::JobManager;
pub use resource::{Lease, Resource, ResourceKind, ResourceQueue, StateSerializer};
