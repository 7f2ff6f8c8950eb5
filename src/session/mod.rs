//! Sessions and the session manager
//!
//! A session is an isolated container of checkpoint chains with its own
//! lifecycle, budget accounting, and expiry. All chain mutation goes through
//! [`SessionManager`], which is the only component allowed to touch chain
//! state.

mod manager;
mod session;

pub use manager::SessionManager;
pub use session::Session;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// Caller-injected access to resource content
///
/// The engine never reads or writes resources on its own; current content
/// flows in through `read` (auto-checkpointing, pre-restore backups) and
/// restored content flows out through `write`. Implementations decide what
/// a key means: a file path, an editor buffer, an object-store key.
#[async_trait]
pub trait ResourceAccess: Send + Sync {
    /// Read the current content of a resource
    async fn read(&self, key: &str) -> EngineResult<String>;

    /// Write content back to a resource
    async fn write(&self, key: &str, content: &str) -> EngineResult<()>;
}

/// In-memory resource access (for testing)
#[derive(Default)]
pub struct MemoryResourceAccess {
    resources: RwLock<HashMap<String, String>>,
}

impl MemoryResourceAccess {
    /// Create an empty resource map
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resource with content
    pub async fn insert(&self, key: impl Into<String>, content: impl Into<String>) {
        self.resources
            .write()
            .await
            .insert(key.into(), content.into());
    }

    /// Get the current content of a resource
    pub async fn get(&self, key: &str) -> Option<String> {
        self.resources.read().await.get(key).cloned()
    }
}

#[async_trait]
impl ResourceAccess for MemoryResourceAccess {
    async fn read(&self, key: &str) -> EngineResult<String> {
        self.resources
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::resource(format!("unknown resource '{}'", key)))
    }

    async fn write(&self, key: &str, content: &str) -> EngineResult<()> {
        self.resources
            .write()
            .await
            .insert(key.to_string(), content.to_string());
        Ok(())
    }
}
