//! Default `AppCatalog`: a JSON file at `<storage-root>/apps.json`, loaded
//! once at startup and flushed after every mutation (`spec.md` §2's ambient
//! row for the default catalog adapter).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cohort_interfaces::{AppCatalog, CatalogError};
use cohort_types::AppDescriptor;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct JsonFileAppCatalog {
    path: PathBuf,
    apps: Mutex<Vec<AppDescriptor>>,
}

impl JsonFileAppCatalog {
    /// Loads `<storage_root>/apps.json` if present; an absent or
    /// unparseable file starts from an empty catalog rather than failing
    /// startup, since the catalog is an optional convenience, not a
    /// required store.
    pub async fn load(storage_root: impl AsRef<Path>) -> Self {
        let path = storage_root.as_ref().join("apps.json");
        let apps = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "apps.json is not valid JSON, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            apps: Mutex::new(apps),
        }
    }

    async fn flush(&self, apps: &[AppDescriptor]) -> Result<(), CatalogError> {
        let json = serde_json::to_string_pretty(apps)
            .map_err(|e| CatalogError::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| CatalogError::Storage(e.to_string()))?;
        debug!(path = %self.path.display(), "flushed app catalog");
        Ok(())
    }
}

#[async_trait]
impl AppCatalog for JsonFileAppCatalog {
    async fn list(&self) -> Vec<AppDescriptor> {
        self.apps.lock().await.clone()
    }

    async fn find(&self, name: &str) -> Option<AppDescriptor> {
        self.apps.lock().await.iter().find(|a| a.name == name).cloned()
    }

    async fn add(&self, app: AppDescriptor) -> Result<(), CatalogError> {
        let mut apps = self.apps.lock().await;
        if apps.iter().any(|a| a.name == app.name) {
            return Err(CatalogError::AlreadyExists(app.name));
        }
        apps.push(app);
        self.flush(&apps).await
    }

    async fn remove(&self, name: &str) -> Result<(), CatalogError> {
        let mut apps = self.apps.lock().await;
        let before = apps.len();
        apps.retain(|a| a.name != name);
        if apps.len() == before {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        self.flush(&apps).await
    }

    async fn update(&self, app: AppDescriptor) -> Result<(), CatalogError> {
        let mut apps = self.apps.lock().await;
        let Some(slot) = apps.iter_mut().find(|a| a.name == app.name) else {
            return Err(CatalogError::NotFound(app.name));
        };
        *slot = app;
        self.flush(&apps).await
    }

    async fn search(&self, needle: &str) -> Vec<AppDescriptor> {
        let needle = needle.to_lowercase();
        self.apps
            .lock()
            .await
            .iter()
            .filter(|a| {
                a.name.to_lowercase().contains(&needle)
                    || a.description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_types::ResourceNeeds;

    fn app(name: &str) -> AppDescriptor {
        AppDescriptor {
            name: name.to_string(),
            description: None,
            command: "/bin/true".to_string(),
            params: vec![],
            needs: ResourceNeeds::default(),
        }
    }

    #[tokio::test]
    async fn add_then_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonFileAppCatalog::load(dir.path()).await;
        catalog.add(app("echo")).await.unwrap();
        assert_eq!(catalog.find("echo").await.unwrap().name, "echo");
    }

    #[tokio::test]
    async fn add_duplicate_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonFileAppCatalog::load(dir.path()).await;
        catalog.add(app("echo")).await.unwrap();
        assert!(matches!(
            catalog.add(app("echo")).await,
            Err(CatalogError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn reload_picks_up_flushed_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = JsonFileAppCatalog::load(dir.path()).await;
            catalog.add(app("echo")).await.unwrap();
        }
        let reloaded = JsonFileAppCatalog::load(dir.path()).await;
        assert_eq!(reloaded.list().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_app_errors() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonFileAppCatalog::load(dir.path()).await;
        assert!(matches!(
            catalog.remove("missing").await,
            Err(CatalogError::NotFound(_))
        ));
    }
}
