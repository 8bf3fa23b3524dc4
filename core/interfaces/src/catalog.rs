use async_trait::async_trait;
use cohort_types::AppDescriptor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no such app: {0}")]
    NotFound(String),
    #[error("app already exists: {0}")]
    AlreadyExists(String),
    #[error("catalog storage error: {0}")]
    Storage(String),
}

/// Port onto the on-disk apps/settings catalog, treated as an external
/// collaborator per `spec.md` §1.
#[async_trait]
pub trait AppCatalog: Send + Sync {
    async fn list(&self) -> Vec<AppDescriptor>;
    async fn find(&self, name: &str) -> Option<AppDescriptor>;
    async fn add(&self, app: AppDescriptor) -> Result<(), CatalogError>;
    async fn remove(&self, name: &str) -> Result<(), CatalogError>;
    async fn update(&self, app: AppDescriptor) -> Result<(), CatalogError>;
    async fn search(&self, needle: &str) -> Vec<AppDescriptor>;
}
