use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{ObjectStore, path::Path};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Every non-empty object under `prefix`, in key order. The store client
/// follows continuation tokens itself.
pub async fn list_objects(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<ListedObject>, PipelineError> {
    let trimmed = prefix.trim_matches('/');
    let path = (!trimmed.is_empty()).then(|| Path::from(trimmed));

    let mut objects: Vec<ListedObject> = store
        .list(path.as_ref())
        .try_filter(|meta| futures::future::ready(meta.size > 0))
        .map_ok(|meta| ListedObject {
            key: meta.location.to_string(),
            size: meta.size as u64,
            last_modified: meta.last_modified,
        })
        .try_collect()
        .await
        .map_err(|source| PipelineError::Store {
            operation: format!("listing `{prefix}`"),
            source,
        })?;

    if objects.is_empty() {
        info!(prefix, "No objects under prefix");
    }
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
}
