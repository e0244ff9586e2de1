use async_trait::async_trait;
use connectors::{
    error::DbError,
    sql::base::connection::{DatabaseKind, RowStream, SqlConnection},
};
use engine_core::{error::LoadError, loader::BulkLoader};
use futures::stream;
use model::{
    core::value::Value,
    records::{columnar::ColumnarBatch, row::ResultSet},
};
use std::sync::{Arc, Mutex};

/// A single-table database that honours the connection's transactional
/// contract: an insert either lands completely or not at all.
#[derive(Default)]
struct MemoryTable {
    rows: Vec<Vec<Value>>,
    not_null: Vec<usize>,
    fail_truncate: bool,
}

struct MemoryConnection(Arc<Mutex<MemoryTable>>);

#[async_trait]
impl SqlConnection for MemoryConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn query_stream<'a>(&'a mut self, _sql: &'a str) -> Result<RowStream<'a>, DbError> {
        let table = self.0.lock().unwrap();
        let rows: Vec<_> = table.rows.iter().cloned().map(Ok).collect();
        Ok(RowStream {
            columns: vec![],
            rows: Box::pin(stream::iter(rows)),
        })
    }

    async fn truncate(&mut self, _table: &str) -> Result<u64, DbError> {
        let mut table = self.0.lock().unwrap();
        if table.fail_truncate {
            return Err(DbError::Decode {
                column: "-".into(),
                message: "permission denied".into(),
            });
        }
        let deleted = table.rows.len() as u64;
        table.rows.clear();
        Ok(deleted)
    }

    async fn insert_columns(&mut self, _table: &str, batch: &ColumnarBatch) -> Result<u64, DbError> {
        let mut staged = Vec::with_capacity(batch.len());
        for row in 0..batch.len() {
            let cells: Vec<Value> = batch
                .columns
                .iter()
                .map(|c| c.cell(row).unwrap_or(Value::Null))
                .collect();
            let table = self.0.lock().unwrap();
            for col in &table.not_null {
                if cells[*col] == Value::Null {
                    return Err(DbError::Encode {
                        column: batch.columns[*col].name.clone(),
                        message: format!("null value in row {row} violates not-null constraint"),
                    });
                }
            }
            staged.push(cells);
        }
        let mut table = self.0.lock().unwrap();
        table.rows.extend(staged);
        Ok(batch.len() as u64)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

fn result_set(rows: Vec<Vec<Value>>) -> ResultSet {
    ResultSet::from_rows(vec!["id".into(), "score".into(), "label".into()], rows).unwrap()
}

fn seeded(rows: Vec<Vec<Value>>) -> Arc<Mutex<MemoryTable>> {
    Arc::new(Mutex::new(MemoryTable {
        rows,
        ..MemoryTable::default()
    }))
}

fn row(id: i64, score: Option<f64>, label: Option<&str>) -> Vec<Value> {
    vec![
        Value::Int(id),
        score.map(Value::Float).unwrap_or(Value::Null),
        label.map(|l| Value::String(l.into())).unwrap_or(Value::Null),
    ]
}

#[tokio::test]
async fn test_truncate_then_load_replaces_contents() {
    let table = seeded(vec![row(100, Some(1.0), Some("old")), row(101, None, None)]);
    let mut conn = MemoryConnection(table.clone());

    let incoming = result_set(vec![row(1, Some(0.5), Some("a")), row(2, Some(2.0), Some("b"))]);
    let report = BulkLoader
        .load(&mut conn, &incoming, "scores", true)
        .await
        .unwrap();

    assert_eq!(report.rows_loaded, 2);
    assert_eq!(report.rows_deleted, Some(2));
    assert_eq!(table.lock().unwrap().rows, incoming.rows().to_vec());
}

#[tokio::test]
async fn test_append_keeps_existing_rows() {
    let table = seeded(vec![row(100, Some(1.0), Some("old"))]);
    let mut conn = MemoryConnection(table.clone());

    let incoming = result_set(vec![row(1, Some(0.5), Some("a"))]);
    BulkLoader
        .load(&mut conn, &incoming, "scores", false)
        .await
        .unwrap();

    assert_eq!(table.lock().unwrap().rows.len(), 2);
}

#[tokio::test]
async fn test_nulls_survive_the_load() {
    let table = seeded(vec![]);
    let mut conn = MemoryConnection(table.clone());

    let incoming = result_set(vec![
        row(1, Some(0.0), Some("")),
        row(2, None, None),
        vec![Value::Int(3), Value::Float(f64::NAN), Value::String("x".into())],
    ]);
    BulkLoader
        .load(&mut conn, &incoming, "scores", false)
        .await
        .unwrap();

    let rows = table.lock().unwrap().rows.clone();
    assert_eq!(rows[0][1], Value::Float(0.0));
    assert_eq!(rows[0][2], Value::String(String::new()));
    assert_eq!(rows[1][1], Value::Null);
    assert_eq!(rows[1][2], Value::Null);
    assert_eq!(rows[2][1], Value::Null);
}

#[tokio::test]
async fn test_malformed_row_writes_nothing() {
    let existing = vec![row(100, Some(1.0), Some("old"))];
    let table = seeded(existing.clone());
    let mut conn = MemoryConnection(table.clone());

    let incoming = result_set(vec![
        row(1, Some(0.5), Some("a")),
        row(2, Some(0.7), Some("b")),
        vec![Value::String("three".into()), Value::Null, Value::Null],
        row(4, Some(0.9), Some("d")),
    ]);
    let err = BulkLoader
        .load(&mut conn, &incoming, "scores", true)
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::DataIntegrity { .. }));
    assert_eq!(table.lock().unwrap().rows, existing);
}

#[tokio::test]
async fn test_rejected_insert_rolls_back() {
    let existing = vec![row(100, Some(1.0), Some("old"))];
    let table = seeded(existing.clone());
    table.lock().unwrap().not_null = vec![2];
    let mut conn = MemoryConnection(table.clone());

    let incoming = result_set(vec![
        row(1, Some(0.5), Some("a")),
        row(2, Some(0.7), None),
        row(3, Some(0.9), Some("c")),
    ]);
    let err = BulkLoader
        .load(&mut conn, &incoming, "scores", false)
        .await
        .unwrap_err();

    match err {
        LoadError::BulkLoadFailed { table: name, driver, .. } => {
            assert_eq!(name, "scores");
            assert!(driver.message.contains("not-null"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(table.lock().unwrap().rows, existing);
}

#[tokio::test]
async fn test_failed_truncate_aborts_load() {
    let existing = vec![row(100, Some(1.0), Some("old"))];
    let table = seeded(existing.clone());
    table.lock().unwrap().fail_truncate = true;
    let mut conn = MemoryConnection(table.clone());

    let err = BulkLoader
        .load(&mut conn, &result_set(vec![row(1, None, None)]), "scores", true)
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::TruncateFailed { .. }));
    assert_eq!(table.lock().unwrap().rows, existing);
}
