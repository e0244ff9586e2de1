use crate::error::PipelineError;
use connectors::broker::{ConnectionBroker, ConnectionHandle};
use engine_core::{
    render::QueryRenderer,
    sink::{CompressionSink, SinkReport},
};
use model::{execution::context::QueryContext, storage::object_key::ObjectKey};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One source query landing in one object.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub secret_name: String,
    /// Template path relative to the renderer's search root.
    pub template: String,
    pub context: QueryContext,
    pub key: ObjectKey,
}

/// Source database to object storage: open, render, query, stream through
/// the sink, close.
pub struct ExtractionPipeline {
    broker: ConnectionBroker,
    renderer: QueryRenderer,
    sink: CompressionSink,
}

impl ExtractionPipeline {
    pub fn new(broker: ConnectionBroker, renderer: QueryRenderer, sink: CompressionSink) -> Self {
        Self {
            broker,
            renderer,
            sink,
        }
    }

    pub async fn run(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<SinkReport, PipelineError> {
        info!(
            secret = %request.secret_name,
            template = %request.template,
            key = %request.key,
            "Starting extraction"
        );

        let mut handle = self.broker.open(&request.secret_name).await?;
        let result = self.stream(&mut handle, request, cancel).await;

        if let Err(err) = handle.close().await {
            warn!(secret = %request.secret_name, %err, "Failed to close source connection");
        }

        let report = result?;
        info!(key = %report.key, rows = report.rows, bytes = report.bytes_written, "Extraction finished");
        Ok(report)
    }

    async fn stream(
        &self,
        handle: &mut ConnectionHandle,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<SinkReport, PipelineError> {
        let mut context = request.context.clone();
        if context.get("database").is_none() {
            context.insert("database", handle.descriptor().database.clone());
        }

        let sql = self.renderer.render(&request.template, &context)?;

        let conn = handle.connection().map_err(|source| query_error(request, source))?;
        let stream = conn
            .query_stream(&sql)
            .await
            .map_err(|source| query_error(request, source))?;

        let report = self
            .sink
            .write(&stream.columns, stream.rows, &request.key, cancel)
            .await?;
        Ok(report)
    }
}

fn query_error(request: &ExtractRequest, source: connectors::error::DbError) -> PipelineError {
    PipelineError::Query {
        secret: request.secret_name.clone(),
        driver: source.driver_error(),
        source,
    }
}
