use crate::error::LoadError;
use connectors::sql::base::connection::SqlConnection;
use model::records::{columnar::ColumnarBatch, row::ResultSet};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub rows_loaded: u64,
    pub truncated: bool,
    pub rows_deleted: Option<u64>,
}

/// Loads a materialised result set into a table through one column-major
/// insert.
///
/// The result set is converted to null-masked column arrays before the
/// destination is touched, so a malformed row fails the load without any
/// write. With `truncate`, the delete is committed on its own first; the
/// insert then runs in a single transaction that is rolled back on failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct BulkLoader;

impl BulkLoader {
    pub async fn load(
        &self,
        conn: &mut dyn SqlConnection,
        rows: &ResultSet,
        table: &str,
        truncate: bool,
    ) -> Result<LoadReport, LoadError> {
        let batch =
            ColumnarBatch::from_result_set(rows).map_err(|source| LoadError::DataIntegrity {
                table: table.to_string(),
                source,
            })?;

        let rows_deleted = if truncate {
            let deleted = conn.truncate(table).await.map_err(|source| {
                let driver = source.driver_error();
                error!(table, %driver, "Truncate failed");
                LoadError::TruncateFailed {
                    table: table.to_string(),
                    driver,
                    source,
                }
            })?;
            info!(table, deleted, "Truncated destination table");
            Some(deleted)
        } else {
            None
        };

        let rows_loaded = conn.insert_columns(table, &batch).await.map_err(|source| {
            let driver = source.driver_error();
            error!(table, %driver, "Bulk load failed, transaction rolled back");
            LoadError::BulkLoadFailed {
                table: table.to_string(),
                driver,
                source,
            }
        })?;

        info!(table, rows_loaded, truncate, "Bulk load committed");
        Ok(LoadReport {
            table: table.to_string(),
            rows_loaded,
            truncated: truncate,
            rows_deleted,
        })
    }
}
