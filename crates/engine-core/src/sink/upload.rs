use crate::retry::{RetryDisposition, RetryError, RetryPolicy};
use bytes::Bytes;
use object_store::{MultipartUpload, ObjectStore, PutPayload, path::Path};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transient object-store failures worth another attempt.
pub fn classify_store_error(err: &object_store::Error) -> RetryDisposition {
    match err {
        object_store::Error::Generic { .. } | object_store::Error::JoinError { .. } => {
            RetryDisposition::Retry
        }
        _ => RetryDisposition::Stop,
    }
}

enum State {
    /// Nothing sent yet; a small payload still goes out as one put.
    Buffered,
    Multipart {
        upload: Box<dyn MultipartUpload>,
        parts: usize,
    },
}

/// One object being written, either as a single put or as a multipart
/// upload that is only started once the first full part exists.
///
/// Parts of a multipart upload are not visible at the key until
/// [`finish`](Self::finish) completes it, so [`abort`](Self::abort) leaves the
/// key exactly as it was before the write began.
pub struct ObjectUpload {
    store: Arc<dyn ObjectStore>,
    path: Path,
    retry: RetryPolicy,
    state: State,
}

impl ObjectUpload {
    pub fn new(store: Arc<dyn ObjectStore>, path: Path, retry: RetryPolicy) -> Self {
        Self {
            store,
            path,
            retry,
            state: State::Buffered,
        }
    }

    pub fn parts(&self) -> usize {
        match &self.state {
            State::Buffered => 0,
            State::Multipart { parts, .. } => *parts,
        }
    }

    /// Ships one full part, starting the multipart upload if needed.
    ///
    /// Part uploads are retried by the store client itself; a part cannot be
    /// re-sent here without changing its part number.
    pub async fn put_part(&mut self, data: Vec<u8>) -> Result<(), RetryError<object_store::Error>> {
        if let State::Buffered = self.state {
            let store = self.store.clone();
            let path = self.path.clone();
            let upload = self
                .retry
                .run(
                    "start multipart upload",
                    || store.put_multipart(&path),
                    classify_store_error,
                )
                .await?;
            info!(key = %self.path, "Started multipart upload");
            self.state = State::Multipart { upload, parts: 0 };
        }

        if let State::Multipart { upload, parts } = &mut self.state {
            let size = data.len();
            upload
                .put_part(PutPayload::from(data))
                .await
                .map_err(|error| RetryError::Fatal { error, attempts: 1 })?;
            *parts += 1;
            debug!(key = %self.path, part = *parts, size, "Uploaded part");
        }
        Ok(())
    }

    /// Sends the remaining bytes and makes the object visible.
    pub async fn finish(mut self, tail: Vec<u8>) -> Result<usize, RetryError<object_store::Error>> {
        match std::mem::replace(&mut self.state, State::Buffered) {
            State::Buffered => {
                let body = Bytes::from(tail);
                let store = self.store.clone();
                let path = self.path.clone();
                self.retry
                    .run(
                        "put object",
                        || store.put(&path, PutPayload::from_bytes(body.clone())),
                        classify_store_error,
                    )
                    .await?;
                Ok(1)
            }
            State::Multipart {
                mut upload,
                mut parts,
            } => {
                if !tail.is_empty() {
                    if let Err(error) = upload.put_part(PutPayload::from(tail)).await {
                        abort_quietly(&self.path, upload.as_mut()).await;
                        return Err(RetryError::Fatal { error, attempts: 1 });
                    }
                    parts += 1;
                }
                if let Err(error) = upload.complete().await {
                    abort_quietly(&self.path, upload.as_mut()).await;
                    return Err(RetryError::Fatal { error, attempts: 1 });
                }
                info!(key = %self.path, parts, "Completed multipart upload");
                Ok(parts)
            }
        }
    }

    /// Discards anything sent so far.
    pub async fn abort(mut self) {
        if let State::Multipart { mut upload, .. } =
            std::mem::replace(&mut self.state, State::Buffered)
        {
            abort_quietly(&self.path, upload.as_mut()).await;
        }
    }
}

async fn abort_quietly(path: &Path, upload: &mut dyn MultipartUpload) {
    match upload.abort().await {
        Ok(()) => info!(key = %path, "Aborted multipart upload"),
        Err(err) => warn!(key = %path, %err, "Failed to abort multipart upload"),
    }
}
