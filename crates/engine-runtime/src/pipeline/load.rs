use crate::error::PipelineError;
use connectors::{
    broker::{ConnectionBroker, ConnectionHandle},
    error::DbError,
};
use engine_core::{
    error::LoadError,
    loader::{BulkLoader, LoadReport},
    render::QueryRenderer,
};
use futures::StreamExt;
use model::{execution::context::QueryContext, records::row::ResultSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub source_secret: String,
    pub template: String,
    pub context: QueryContext,
    pub target_secret: String,
    pub target_table: String,
    pub truncate: bool,
}

/// Source query materialised in memory, then bulk-loaded into a table of
/// another database.
pub struct LoadPipeline {
    broker: ConnectionBroker,
    renderer: QueryRenderer,
    loader: BulkLoader,
}

impl LoadPipeline {
    pub fn new(broker: ConnectionBroker, renderer: QueryRenderer) -> Self {
        Self {
            broker,
            renderer,
            loader: BulkLoader,
        }
    }

    pub async fn run(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, PipelineError> {
        info!(
            source = %request.source_secret,
            target = %request.target_secret,
            table = %request.target_table,
            truncate = request.truncate,
            "Starting load"
        );

        let mut source = self.broker.open(&request.source_secret).await?;
        let fetched = self.fetch(&mut source, request, cancel).await;
        close(source, &request.source_secret).await;
        let rows = fetched?;
        info!(rows = rows.len(), "Fetched source rows");

        let mut target = self.broker.open(&request.target_secret).await?;
        let loaded = self.store(&mut target, &rows, request, cancel).await;
        close(target, &request.target_secret).await;
        loaded
    }

    async fn fetch(
        &self,
        handle: &mut ConnectionHandle,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, PipelineError> {
        let mut context = request.context.clone();
        if context.get("database").is_none() {
            context.insert("database", handle.descriptor().database.clone());
        }
        let sql = self.renderer.render(&request.template, &context)?;

        let query_error = |source: DbError| PipelineError::Query {
            secret: request.source_secret.clone(),
            driver: source.driver_error(),
            source,
        };

        let conn = handle.connection().map_err(query_error)?;
        let mut stream = conn.query_stream(&sql).await.map_err(query_error)?;
        let mut rows = ResultSet::new(stream.columns.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PipelineError::Cancelled { operation: "load source read".into() });
                }
                next = stream.rows.next() => next,
            };
            match next {
                None => break,
                Some(row) => {
                    rows.push(row.map_err(query_error)?).map_err(|source| {
                        LoadError::DataIntegrity {
                            table: request.target_table.clone(),
                            source,
                        }
                    })?;
                }
            }
        }
        Ok(rows)
    }

    async fn store(
        &self,
        handle: &mut ConnectionHandle,
        rows: &ResultSet,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, PipelineError> {
        let conn = handle.connection().map_err(|source| LoadError::BulkLoadFailed {
            table: request.target_table.clone(),
            driver: source.driver_error(),
            source,
        })?;

        // Dropping the in-flight insert drops its transaction uncommitted.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { operation: "bulk load".into() }),
            report = self.loader.load(conn, rows, &request.target_table, request.truncate) => {
                Ok(report?)
            }
        }
    }
}

async fn close(handle: ConnectionHandle, secret: &str) {
    if let Err(err) = handle.close().await {
        warn!(secret, %err, "Failed to close connection");
    }
}
