pub mod encoder;
pub mod upload;

use crate::{
    error::SinkError,
    retry::{RetryError, RetryPolicy},
    sink::{encoder::CsvGzipEncoder, upload::ObjectUpload},
};
use connectors::error::DbError;
use flate2::Compression;
use futures::{Stream, StreamExt};
use model::{core::value::Value, records::row::check_width, storage::object_key::ObjectKey};
use object_store::{ObjectStore, path::Path};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Smallest part most object stores accept in a multipart upload.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub part_size: usize,
    pub compression_level: u32,
    pub retry: RetryPolicy,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            compression_level: 6,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub key: String,
    pub rows: u64,
    pub uncompressed_bytes: u64,
    pub bytes_written: u64,
    pub parts: usize,
}

/// Writes a row stream to one object as gzip-compressed CSV.
#[derive(Clone)]
pub struct CompressionSink {
    store: Arc<dyn ObjectStore>,
    config: SinkConfig,
}

impl CompressionSink {
    pub fn new(store: Arc<dyn ObjectStore>, config: SinkConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Consumes `rows` lazily and writes them, with a header of `columns`,
    /// to `key`.
    ///
    /// On any failure (a source error, a malformed row, cancellation, or a
    /// storage error) an in-flight multipart upload is aborted, so nothing
    /// new becomes visible at `key`.
    pub async fn write<S>(
        &self,
        columns: &[String],
        rows: S,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<SinkReport, SinkError>
    where
        S: Stream<Item = Result<Vec<Value>, DbError>> + Unpin,
    {
        let path = Path::from(key.as_str());
        let mut encoder = CsvGzipEncoder::new(Compression::new(self.config.compression_level));
        let mut upload = ObjectUpload::new(self.store.clone(), path, self.config.retry.clone());
        let mut bytes_written = 0u64;

        let pumped = self
            .pump(columns, rows, key, cancel, &mut encoder, &mut upload, &mut bytes_written)
            .await;
        if let Err(err) = pumped {
            error!(%key, %err, "Aborting object write");
            upload.abort().await;
            return Err(err);
        }

        let rows = encoder.rows();
        let tail = match encoder.finish() {
            Ok(tail) => tail,
            Err(source) => {
                upload.abort().await;
                return Err(SinkError::Encode {
                    key: key.to_string(),
                    source,
                });
            }
        };
        let uncompressed_bytes = tail.raw_bytes;
        bytes_written += tail.bytes.len() as u64;

        let parts = upload
            .finish(tail.bytes)
            .await
            .map_err(|err| sink_write(key, err))?;

        info!(%key, rows, bytes = bytes_written, parts, "Object written");
        Ok(SinkReport {
            key: key.to_string(),
            rows,
            uncompressed_bytes,
            bytes_written,
            parts,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump<S>(
        &self,
        columns: &[String],
        mut rows: S,
        key: &ObjectKey,
        cancel: &CancellationToken,
        encoder: &mut CsvGzipEncoder,
        upload: &mut ObjectUpload,
        bytes_written: &mut u64,
    ) -> Result<(), SinkError>
    where
        S: Stream<Item = Result<Vec<Value>, DbError>> + Unpin,
    {
        let encode = |source| SinkError::Encode {
            key: key.to_string(),
            source,
        };
        encoder.write_header(columns).map_err(encode)?;

        let mut index = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(SinkError::Cancelled { key: key.to_string() });
                }
                next = rows.next() => next,
            };

            let row = match next {
                None => return Ok(()),
                Some(Err(source)) => {
                    return Err(SinkError::SourceRead {
                        key: key.to_string(),
                        source,
                    });
                }
                Some(Ok(row)) => row,
            };

            check_width(columns.len(), index, &row).map_err(|source| SinkError::DataIntegrity {
                key: key.to_string(),
                source,
            })?;
            encoder.write_row(&row).map_err(encode)?;
            index += 1;

            while let Some(part) = encoder.take_part(self.config.part_size) {
                *bytes_written += part.len() as u64;
                upload
                    .put_part(part)
                    .await
                    .map_err(|err| sink_write(key, err))?;
            }
        }
    }
}

fn sink_write(key: &ObjectKey, err: RetryError<object_store::Error>) -> SinkError {
    let attempts = err.attempts();
    SinkError::SinkWrite {
        key: key.to_string(),
        attempts,
        source: err.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use futures::stream;
    use object_store::memory::InMemory;
    use std::io::Read;

    fn make_sink(part_size: usize) -> (CompressionSink, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());
        let sink = CompressionSink::new(
            store.clone(),
            SinkConfig {
                part_size,
                ..SinkConfig::default()
            },
        );
        (sink, store)
    }

    fn columns() -> Vec<String> {
        vec!["id".into(), "name".into()]
    }

    async fn read_object(store: &InMemory, key: &ObjectKey) -> String {
        let bytes = store
            .get(&Path::from(key.as_str()))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let mut text = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut text).unwrap();
        text
    }

    fn noisy_rows(n: i64) -> Vec<Result<Vec<Value>, DbError>> {
        let mut seed = 0x9e37_79b9_7f4a_7c15u64;
        (0..n)
            .map(|i| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                Ok(vec![Value::Int(i), Value::String(format!("{seed:016x}{seed:x}"))])
            })
            .collect()
    }

    #[tokio::test]
    async fn test_small_payload_single_put() {
        let (sink, store) = make_sink(DEFAULT_PART_SIZE);
        let key = ObjectKey::new("raw/dbo/users/2024/01/01/users.2024-01-01.csv.gz");
        let rows = stream::iter(vec![
            Ok(vec![Value::Int(1), Value::String("ana".into())]),
            Ok(vec![Value::Int(2), Value::Null]),
        ]);

        let report = sink
            .write(&columns(), rows, &key, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.parts, 1);

        let text = read_object(&store, &key).await;
        assert_eq!(text, "id,name\r\n1,ana\r\n2,\r\n");
    }

    #[tokio::test]
    async fn test_large_payload_multipart() {
        let (sink, store) = make_sink(16 * 1024);
        let key = ObjectKey::new("raw/big.csv.gz");

        let report = sink
            .write(&columns(), stream::iter(noisy_rows(20_000)), &key, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.parts > 1);
        assert_eq!(report.rows, 20_000);

        let text = read_object(&store, &key).await;
        assert_eq!(text.lines().count(), 20_001);
        let meta = store.head(&Path::from(key.as_str())).await.unwrap();
        assert_eq!(meta.size as u64, report.bytes_written);
    }

    #[tokio::test]
    async fn test_source_error_after_first_part_leaves_no_object() {
        let (sink, store) = make_sink(16 * 1024);
        let key = ObjectKey::new("raw/broken.csv.gz");

        let mut rows = noisy_rows(20_000);
        rows.push(Err(DbError::Closed));
        rows.extend(noisy_rows(10));

        let err = sink
            .write(&columns(), stream::iter(rows), &key, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::SourceRead { .. }));

        let head = store.head(&Path::from(key.as_str())).await;
        assert!(matches!(head, Err(object_store::Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_mismatched_row_is_integrity_error() {
        let (sink, store) = make_sink(DEFAULT_PART_SIZE);
        let key = ObjectKey::new("raw/short.csv.gz");
        let rows = stream::iter(vec![
            Ok(vec![Value::Int(1), Value::String("ok".into())]),
            Ok(vec![Value::Int(2)]),
        ]);

        let err = sink
            .write(&columns(), rows, &key, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::DataIntegrity { .. }));
        assert!(store.head(&Path::from(key.as_str())).await.is_err());
    }

    #[tokio::test]
    async fn test_rewrite_overwrites_same_key() {
        let (sink, store) = make_sink(DEFAULT_PART_SIZE);
        let key = ObjectKey::new("raw/idempotent.csv.gz");

        for name in ["first", "second"] {
            let rows = stream::iter(vec![Ok(vec![Value::Int(1), Value::String(name.into())])]);
            sink.write(&columns(), rows, &key, &CancellationToken::new())
                .await
                .unwrap();
        }

        let text = read_object(&store, &key).await;
        assert_eq!(text, "id,name\r\n1,second\r\n");
        let listed = store.list_with_delimiter(Some(&Path::from("raw"))).await.unwrap();
        assert_eq!(listed.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_write() {
        let (sink, store) = make_sink(DEFAULT_PART_SIZE);
        let key = ObjectKey::new("raw/cancelled.csv.gz");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sink
            .write(&columns(), stream::pending(), &key, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Cancelled { .. }));
        assert!(store.head(&Path::from(key.as_str())).await.is_err());
    }
}
