//! Directory-backed resources.
//!
//! Bundles, instances and signing requests each live in a directory named
//! after the resource under a per-kind parent directory. A resource exists
//! iff that directory exists.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::resource::{Resource, ResourceKind, StateSerializer};
use crate::{Error, Result};

/// A resource whose root is `<parent_dir>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResource {
    name: String,
    parent_dir: PathBuf,
}

impl DirectoryResource {
    #[must_use]
    pub fn new(parent_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_dir: parent_dir.into(),
        }
    }

    #[must_use]
    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }

    /// Path to the root of this resource
    #[must_use]
    pub fn root(&self) -> PathBuf {
        self.parent_dir.join(&self.name)
    }
}

#[async_trait]
impl Resource for DirectoryResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> bool {
        tokio::fs::metadata(self.root())
            .await
            .is_ok_and(|meta| meta.is_dir())
    }
}

/// Names the kind of a [`DirectoryKind`].
///
/// Each directory-backed kind gets its own marker type so that managers for
/// different kinds can be told apart by type.
pub trait DirectoryType: Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

/// A resource kind stored as sub-directories of one parent directory.
pub struct DirectoryKind<T: DirectoryType> {
    parent_dir: PathBuf,
    _type: PhantomData<fn() -> T>,
}

impl<T: DirectoryType> DirectoryKind<T> {
    #[must_use]
    pub fn new(parent_dir: impl Into<PathBuf>) -> Self {
        Self {
            parent_dir: parent_dir.into(),
            _type: PhantomData,
        }
    }

    #[must_use]
    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }
}

impl<T: DirectoryType> std::fmt::Debug for DirectoryKind<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryKind")
            .field("type_name", &T::TYPE_NAME)
            .field("parent_dir", &self.parent_dir)
            .finish()
    }
}

#[async_trait]
impl<T: DirectoryType> ResourceKind for DirectoryKind<T> {
    type Resource = DirectoryResource;

    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn instantiate(&self, name: &str) -> DirectoryResource {
        DirectoryResource::new(&self.parent_dir, name)
    }

    /// Sub-directories that are valid resource names. Entries that could
    /// never be addressed by name are skipped.
    async fn list(&self) -> Result<Vec<String>> {
        let names = list_directory(&self.parent_dir).await?;
        Ok(names
            .into_iter()
            .filter(|name| match self.validate_name(name) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        resource_type = T::TYPE_NAME,
                        parent_dir = %self.parent_dir.display(),
                        error = %err,
                        "Skipping unaddressable directory"
                    );
                    false
                }
            })
            .collect())
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        let reason = if name.is_empty() {
            Some("name cannot be empty")
        } else if name == "." || name == ".." {
            Some("name is reserved")
        } else if name.contains(['/', '\\', '\0']) {
            Some("name cannot contain path separators")
        } else {
            None
        };

        reason.map_or(Ok(()), |reason| {
            Err(Error::invalid_name(T::TYPE_NAME, name, reason))
        })
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.parent_dir)
            .await
            .map_err(|e| {
                Error::Io(format!(
                    "Failed to create {} directory {}: {e}",
                    T::TYPE_NAME,
                    self.parent_dir.display()
                ))
            })
    }
}

/// Serializes a directory resource as its name and root path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySerializer;

#[async_trait]
impl StateSerializer<DirectoryResource> for DirectorySerializer {
    async fn build_object(&self, resource: &DirectoryResource) -> Result<Value> {
        Ok(json!({
            "name": resource.name(),
            "root": resource.root().display().to_string(),
        }))
    }
}

/// Names of the sub-directories of `parent`, sorted.
///
/// A missing `parent` lists as empty; entries that are not directories or
/// whose names are not UTF-8 are skipped.
pub async fn list_directory(parent: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(parent).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::Io(format!(
                "Failed to read directory {}: {e}",
                parent.display()
            )))
        }
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry
            .file_type()
            .await
            .is_ok_and(|file_type| file_type.is_dir());
        if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
            names.push(name.to_string());
        }
    }

    names.sort();
    Ok(names)
}
