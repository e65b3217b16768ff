//! Core type definitions shared by tasks, the scheduler and the coordinator.
//!
//! This module defines the fundamental identifiers used throughout the crate:
//! task identifiers, resource keys and the execution context a task runs on.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque task identifier.
///
/// Identifiers are unique for the lifetime of the process, across all
/// [`crate::Scheduler`] instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    /// The raw numeric value, for logging.
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identifier of a remote resource, typically a URL.
///
/// Keys are cheap to clone (reference counted) and compare by value. The
/// crate never parses them; they are handed to the [`crate::Transport`]
/// unchanged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Create a key from anything string-like.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl From<&ResourceKey> for ResourceKey {
    fn from(key: &ResourceKey) -> Self {
        key.clone()
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Where a task is executed once it becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecContext {
    /// The concurrent worker pool. Fetch and cache-store work runs here.
    #[default]
    Worker,
    /// The single serial apply context. The only place caller-visible state
    /// is mutated; apply tasks never run concurrently with each other.
    Apply,
}
