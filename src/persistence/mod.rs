//! Persistence layer for pipeline definitions

pub mod pipeline_store;
#[cfg(feature = "sqlite")]
pub mod store;

pub use pipeline_store::{PipelinePatch, PipelineStore};
#[cfg(feature = "sqlite")]
pub use store::SqlitePipelineStore;

use crate::core::Pipeline;
use anyhow::Result;
use tokio::sync::RwLock;

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Insert or replace a pipeline by id
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()>;

    /// Load a pipeline by ID
    async fn load_pipeline(&self, id: &str) -> Result<Option<Pipeline>>;

    /// Delete a pipeline; true if it existed
    async fn delete_pipeline(&self, id: &str) -> Result<bool>;

    /// All pipelines, in insertion order
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    pipelines: RwLock<Vec<Pipeline>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let mut pipelines = self.pipelines.write().await;
        match pipelines.iter_mut().find(|p| p.id == pipeline.id) {
            Some(existing) => *existing = pipeline.clone(),
            None => pipelines.push(pipeline.clone()),
        }
        Ok(())
    }

    async fn load_pipeline(&self, id: &str) -> Result<Option<Pipeline>> {
        let pipelines = self.pipelines.read().await;
        Ok(pipelines.iter().find(|p| p.id == id).cloned())
    }

    async fn delete_pipeline(&self, id: &str) -> Result<bool> {
        let mut pipelines = self.pipelines.write().await;
        let before = pipelines.len();
        pipelines.retain(|p| p.id != id);
        Ok(pipelines.len() != before)
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let pipelines = self.pipelines.read().await;
        Ok(pipelines.clone())
    }
}
