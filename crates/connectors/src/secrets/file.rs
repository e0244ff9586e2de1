use crate::{
    error::SecretError,
    secrets::{SecretRecord, SecretStore},
};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

/// Reads secrets from `{root}/{name}.json`. Used for local runs and tests.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, SecretError> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if name.is_empty() || escapes {
            return Err(SecretError::Malformed {
                name: name.to_string(),
                reason: "secret name must be a relative path without `..`".to_string(),
            });
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn fetch(&self, name: &str) -> Result<SecretRecord, SecretError> {
        let path = self.path_for(name)?;
        let raw = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                SecretError::NotFound(name.to_string())
            } else {
                SecretError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })?;
        SecretRecord::from_binary(name, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_nested_secret() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("prod")).unwrap();
        std::fs::write(
            dir.path().join("prod/warehouse.json"),
            r#"{"user":"etl","password":"x","host":"h","database":"d","driver":"PostgreSQL Unicode"}"#,
        )
        .unwrap();

        let store = FileSecretStore::new(dir.path());
        let record = store.fetch("prod/warehouse").await.unwrap();
        assert_eq!(record.field(&["host"]).as_deref(), Some("h"));
    }

    #[tokio::test]
    async fn test_missing_and_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path());

        assert!(matches!(
            store.fetch("absent").await,
            Err(SecretError::NotFound(name)) if name == "absent"
        ));
        assert!(matches!(
            store.fetch("../etc/passwd").await,
            Err(SecretError::Malformed { .. })
        ));
    }
}
