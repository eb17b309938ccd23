//! Drives a [`TransferSession`] against a [`RemoteService`].

use smartcompress_protocol::{ChunkUploadQuery, FinalizeRequest, SessionStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::progress::{ProgressEvent, ProgressReporter};
use crate::remote::{RemoteFailure, RemoteService};
use crate::retry::RetryPolicy;
use crate::segment::{Chunk, Segmenter};
use crate::session::TransferSession;
use crate::{Result, TransferError};

/// Uploads the chunks of one file sequentially, then finalizes.
///
/// Chunks go out strictly in index order, one at a time. Each failed chunk is
/// retried under the [`RetryPolicy`]; exhausting it fails the session and the
/// remaining chunks are not sent. Cancellation is checked between chunks, and
/// interrupts an in-flight request or backoff sleep.
pub struct SessionUploader<'a> {
    remote: &'a dyn RemoteService,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> SessionUploader<'a> {
    pub fn new(remote: &'a dyn RemoteService, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            remote,
            policy,
            cancel,
        }
    }

    /// Uploads all missing chunks and finalizes, returning the artifact bytes.
    ///
    /// On any error the session ends `Failed`.
    pub async fn run<E: From<ProgressEvent>>(
        &self,
        session: &mut TransferSession,
        segmenter: Segmenter,
        reporter: &mut ProgressReporter<E>,
    ) -> Result<Vec<u8>> {
        self.upload_chunks(session, segmenter, reporter).await?;
        reporter.status(format!("Finalizing {}", session.file_name()));
        self.finalize(session).await
    }

    /// Uploads every chunk the session has not yet acknowledged.
    ///
    /// A `Created` session is started first; an `Uploading` session resumes
    /// from its first missing chunk. Any other state is rejected before a
    /// byte is read or sent, so a finished or failed session id is never
    /// reused.
    pub async fn upload_chunks<E: From<ProgressEvent>>(
        &self,
        session: &mut TransferSession,
        segmenter: Segmenter,
        reporter: &mut ProgressReporter<E>,
    ) -> Result<()> {
        match session.status() {
            SessionStatus::Created | SessionStatus::Uploading => {}
            status => {
                return Err(TransferError::InvalidState {
                    file: session.file_name().to_string(),
                    op: "upload",
                    status,
                });
            }
        }
        if segmenter.total_size() != session.total_size()
            || segmenter.chunk_size() != session.chunk_size()
        {
            let err = TransferError::InvalidConfiguration(format!(
                "segmenter for {} does not match session layout",
                segmenter.file_name()
            ));
            session.fail(&err.to_string());
            return Err(err);
        }
        if session.status() == SessionStatus::Created {
            session.begin()?;
        }

        info!(
            session = %session.id(),
            file = %session.file_name(),
            endpoint = self.remote.endpoint(),
            chunks = session.num_chunks(),
            missing = session.num_chunks() - session.acknowledged_chunks(),
            "uploading"
        );

        let result = self.upload_missing(session, segmenter, reporter).await;
        if let Err(e) = &result {
            session.fail(&e.to_string());
        }
        result
    }

    async fn upload_missing<E: From<ProgressEvent>>(
        &self,
        session: &mut TransferSession,
        mut segmenter: Segmenter,
        reporter: &mut ProgressReporter<E>,
    ) -> Result<()> {
        for index in session.missing() {
            self.check_cancelled()?;

            let (seg, chunk) = tokio::task::spawn_blocking(move || {
                let chunk = segmenter.chunk_at(index);
                (segmenter, chunk)
            })
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(format!("task join error: {e}"))))?;
            segmenter = seg;
            let chunk = chunk?;

            self.send_with_retry(session, &chunk).await?;
            session.acknowledge(index)?;

            reporter.report(
                session.file_name(),
                session.acknowledged_bytes(),
                session.total_size(),
            );
        }
        Ok(())
    }

    /// Sends one chunk, retrying with backoff. Returns the attempt that
    /// succeeded.
    async fn send_with_retry(&self, session: &TransferSession, chunk: &Chunk) -> Result<u32> {
        let query = ChunkUploadQuery {
            file_id: session.id().to_string(),
            chunk_idx: chunk.index,
            filename: session.file_name().to_string(),
        };
        let attempts = self.policy.attempts();

        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                r = self.remote.upload_chunk(&query, &chunk.checksum, &chunk.data) => r,
            };

            let failure = match outcome {
                Ok(()) => {
                    debug!(file = %query.filename, chunk = chunk.index, attempt, "chunk acknowledged");
                    return Ok(attempt);
                }
                Err(failure) => failure,
            };

            if attempt >= attempts {
                warn!(
                    file = %query.filename,
                    chunk = chunk.index,
                    attempt,
                    error = %failure,
                    "chunk upload failed, giving up"
                );
                return Err(self.exhausted(&query, attempts, failure));
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                file = %query.filename,
                chunk = chunk.index,
                attempt,
                error = %failure,
                retry_in_ms = delay.as_millis() as u64,
                "chunk upload failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn exhausted(&self, query: &ChunkUploadQuery, attempts: u32, source: RemoteFailure) -> TransferError {
        TransferError::SessionFailed {
            file: query.filename.clone(),
            chunk: query.chunk_idx,
            attempts,
            source,
        }
    }

    /// Requests finalization, returning the artifact bytes.
    ///
    /// Refused locally unless every chunk is acknowledged. Any failure from
    /// the service is final: the session ends `Failed` and finalize is not
    /// retried.
    pub async fn finalize(&self, session: &mut TransferSession) -> Result<Vec<u8>> {
        session.begin_finalize()?;

        let request = FinalizeRequest {
            file_id: session.id().to_string(),
        };
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                session.fail("cancelled");
                return Err(TransferError::Cancelled);
            }
            r = self.remote.finalize(&request) => r,
        };

        match outcome {
            Ok(artifact) => {
                session.complete()?;
                info!(
                    session = %session.id(),
                    file = %session.file_name(),
                    artifact_bytes = artifact.len(),
                    "finalized"
                );
                Ok(artifact)
            }
            Err(failure) => {
                let reason = failure.to_string();
                session.fail(&reason);
                warn!(session = %session.id(), file = %session.file_name(), error = %reason, "finalize failed");
                Err(TransferError::FinalizeIncomplete {
                    file: session.file_name().to_string(),
                    reason,
                })
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }
}
