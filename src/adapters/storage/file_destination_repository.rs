//! File-based Destination Repository
//!
//! Stores each destination config as `{id}.yaml` in one directory.
//! Files are written through a temporary file and renamed into place.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use crate::domain::destination::DestinationOptions;
use crate::domain::foundation::DestinationId;
use crate::ports::{DestinationRepository, StorageError};

/// File-based storage for destination configs
#[derive(Debug, Clone)]
pub struct FileDestinationRepository {
    base_path: PathBuf,
}

impl FileDestinationRepository {
    /// Create a repository rooted at `base_path`
    ///
    /// # Example
    /// ```ignore
    /// let repo = FileDestinationRepository::new("./data/destinations");
    /// ```
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn file_path(&self, id: DestinationId) -> PathBuf {
        self.base_path.join(format!("{}.yaml", id))
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))
    }
}

#[async_trait]
impl DestinationRepository for FileDestinationRepository {
    async fn save(&self, options: &DestinationOptions) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let yaml = serde_yaml::to_string(options)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let file_path = self.file_path(options.id());
        let tmp_path = file_path.with_extension("yaml.tmp");
        fs::write(&tmp_path, yaml)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        fs::rename(&tmp_path, &file_path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: DestinationId) -> Result<bool, StorageError> {
        let file_path = self.file_path(id);
        if !file_path.exists() {
            return Ok(false);
        }
        fs::remove_file(&file_path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(true)
    }

    async fn load_all(&self) -> Result<Vec<DestinationOptions>, StorageError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        let mut configs = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }

            let yaml = fs::read_to_string(&path)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;

            // A broken file should not keep the other destinations from loading
            match serde_yaml::from_str::<DestinationOptions>(&yaml) {
                Ok(options) => configs.push(options),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable destination config"
                ),
            }
        }

        configs.sort_by(|a, b| a.label().cmp(b.label()).then(a.id().cmp(&b.id())));
        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::destination::{SyslogOptions, WebhookAuth, WebhookOptions};
    use tempfile::TempDir;

    fn webhook(label: &str) -> DestinationOptions {
        let mut options = WebhookOptions::new("https://example.test/hook");
        options.common.label = label.into();
        options.auth = Some(WebhookAuth::Bearer {
            token: "t0ken".into(),
        });
        DestinationOptions::Webhook(options)
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let repo = FileDestinationRepository::new(dir.path());
        let options = webhook("b");

        repo.save(&options).await.unwrap();
        let loaded = repo.load_all().await.unwrap();

        assert_eq!(loaded, vec![options]);
    }

    #[tokio::test]
    async fn save_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let repo = FileDestinationRepository::new(dir.path());
        let mut options = webhook("first");
        repo.save(&options).await.unwrap();

        options.common_mut().label = "second".into();
        repo.save(&options).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].label(), "second");
    }

    #[tokio::test]
    async fn load_orders_by_label() {
        let dir = TempDir::new().unwrap();
        let repo = FileDestinationRepository::new(dir.path());
        repo.save(&webhook("zeta")).await.unwrap();
        repo.save(&DestinationOptions::Syslog(SyslogOptions::new("logs")))
            .await
            .unwrap();
        repo.save(&webhook("alpha")).await.unwrap();

        let labels: Vec<String> = repo
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|o| o.label().to_string())
            .collect();
        assert_eq!(labels, vec!["Syslog Server", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let dir = TempDir::new().unwrap();
        let repo = FileDestinationRepository::new(dir.path());
        let options = webhook("x");
        repo.save(&options).await.unwrap();

        assert!(repo.delete(options.id()).await.unwrap());
        assert!(!repo.delete(options.id()).await.unwrap());
        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let repo = FileDestinationRepository::new(dir.path());
        repo.save(&webhook("ok")).await.unwrap();
        fs::write(dir.path().join("broken.yaml"), "__type: kafka\n")
            .await
            .unwrap();

        assert_eq!(repo.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_directory_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let repo = FileDestinationRepository::new(dir.path().join("absent"));
        assert!(repo.load_all().await.unwrap().is_empty());
    }
}
