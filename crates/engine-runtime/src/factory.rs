use crate::{
    config::{AwsSettings, ConfigError, EngineConfig, SecretBackend},
    error::PipelineError,
};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use connectors::{
    broker::ConnectionBroker,
    secrets::{SecretStore, aws::AwsSecretStore, file::FileSecretStore},
};
use engine_core::{
    render::QueryRenderer,
    sink::CompressionSink,
    tasks::{ecs::EcsOrchestrator, lifecycle::TaskLifecycleManager},
};
use object_store::{ObjectStore, aws::AmazonS3Builder};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Shared AWS configuration for the SDK clients.
pub async fn load_sdk_config(aws: &AwsSettings) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &aws.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &aws.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    loader.load().await
}

/// Builds the long-lived clients a run needs from one [`EngineConfig`].
#[derive(Clone)]
pub struct Services {
    config: EngineConfig,
    sdk: SdkConfig,
}

impl Services {
    pub async fn new(config: EngineConfig) -> Self {
        let sdk = load_sdk_config(&config.aws).await;
        Self { config, sdk }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn region(&self) -> Option<String> {
        self.config
            .aws
            .region
            .clone()
            .or_else(|| self.sdk.region().map(|r| r.to_string()))
    }

    pub fn secret_store(&self) -> Result<Arc<dyn SecretStore>, PipelineError> {
        match self.config.secrets.backend {
            SecretBackend::Aws => Ok(Arc::new(AwsSecretStore::from_conf(&self.sdk))),
            SecretBackend::File => {
                let root = self.config.secrets.root.clone().ok_or_else(|| {
                    ConfigError::Invalid("secrets.root is required for the file backend".into())
                })?;
                info!(root = %root.display(), "Using file secret store");
                Ok(Arc::new(FileSecretStore::new(root)))
            }
        }
    }

    pub fn broker(&self) -> Result<ConnectionBroker, PipelineError> {
        Ok(ConnectionBroker::with_drivers(self.secret_store()?))
    }

    /// Template lookups resolve under `root`, or the configured search root.
    pub fn renderer(&self, root: Option<PathBuf>) -> QueryRenderer {
        QueryRenderer::new(root.unwrap_or_else(|| self.config.templates.root.clone()))
    }

    /// An S3 client for `bucket`. Retries of individual requests, multipart
    /// parts included, follow the sink's retry settings.
    pub fn object_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, PipelineError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_allow_http(self.config.aws.allow_http)
            .with_retry(self.config.sink.store_retry());
        if let Some(region) = self.region() {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.config.aws.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        let store = builder.build().map_err(|source| PipelineError::Store {
            operation: format!("configuring bucket `{bucket}`"),
            source,
        })?;
        Ok(Arc::new(store))
    }

    pub fn sink(&self, bucket: &str) -> Result<CompressionSink, PipelineError> {
        Ok(CompressionSink::new(
            self.object_store(bucket)?,
            self.config.sink.to_sink_config(),
        ))
    }

    pub fn task_manager(&self) -> Result<TaskLifecycleManager, PipelineError> {
        self.config.tasks.validate()?;
        let region = self.region().ok_or_else(|| {
            ConfigError::Invalid("an AWS region is required to run remote tasks".into())
        })?;
        let orchestrator = EcsOrchestrator::new(
            aws_sdk_ecs::Client::new(&self.sdk),
            self.config.tasks.cluster.clone(),
            region,
        );
        Ok(TaskLifecycleManager::new(
            Arc::new(orchestrator),
            self.config.tasks.lifecycle(),
        ))
    }
}
