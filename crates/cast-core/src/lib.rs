//! # Cast Core
//!
//! Core functionality for the Cast deployment agent: the per-resource job
//! scheduling engine that serializes every mutation of a named resource
//! (bundle, instance, signing request) and hands out consistent state
//! snapshots to concurrent readers.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, Error>`. Use:
//! - `?` operator for propagation
//! - `map`, `and_then` combinators for transformation
//! - `match` / `map_or` / `unwrap_or_else` for defaults

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod jobs;

pub use config::{load_config, AgentConfig, JobsConfig};
pub use error::{Error, Result};
pub use jobs::{
    DirectoryKind, DirectoryResource, DirectorySerializer, DirectoryType, Job, JobContext,
    JobHandle, JobId, JobManager, JobOptions, JobStatus, JobView, Lease, Resource, ResourceKind,
    ResourceManager, ResourceQueue, StateSerializer,
};
