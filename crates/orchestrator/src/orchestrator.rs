//! Job orchestrator.
//!
//! Plans a [`CompressionJob`], routes it to the local or remote path, emits
//! [`JobEvent`]s and enforces the one-job-at-a-time rule.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use smartcompress_codec::{Codec, CompressionEngine, Level};
use smartcompress_protocol::JobMode;
use smartcompress_transfer::{
    ProgressReporter, RemoteService, Segmenter, SessionUploader, TransferError, TransferSession,
};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::JobError;
use crate::guard::JobSlot;
use crate::job::{
    ArtifactResult, CompressionJob, FileFailure, JobEvent, OrchestratorConfig, Route, SourceFile,
};
use crate::local::{self, LocalRun, LocalTarget};

/// Name given to a multi-source archive written into a directory.
const DEFAULT_ARCHIVE_STEM: &str = "archive";

/// Resolved destination of a planned job.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Local(LocalTarget),
    /// Output directory for the finalized artifacts.
    Remote(PathBuf),
}

impl Target {
    fn route(&self) -> Route {
        match self {
            Target::Local(local) => local.route(),
            Target::Remote(_) => Route::Remote,
        }
    }
}

/// One remote artifact, written next to its destination but not yet moved
/// into place.
struct StagedArtifact {
    tmp: NamedTempFile,
    dest: PathBuf,
    bytes_in: u64,
    bytes_out: u64,
}

struct Plan {
    codec: Arc<dyn Codec>,
    level: Level,
    target: Target,
}

/// Everything a running job needs; cloned into spawned tasks.
#[derive(Clone)]
struct Runner {
    engine: Arc<CompressionEngine>,
    remote: Option<Arc<dyn RemoteService>>,
    config: OrchestratorConfig,
    events_tx: mpsc::UnboundedSender<JobEvent>,
}

/// Runs compression jobs, one at a time.
pub struct Orchestrator {
    runner: Runner,
    events_rx: Option<mpsc::UnboundedReceiver<JobEvent>>,
    slot: JobSlot,
    cancel: CancellationToken,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl Orchestrator {
    /// Creates an orchestrator with the built-in codecs and no remote service.
    pub fn new(config: OrchestratorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runner: Runner {
                engine: Arc::new(CompressionEngine::with_defaults()),
                remote: None,
                config,
                events_tx,
            },
            events_rx: Some(events_rx),
            slot: JobSlot::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Enables the remote route.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteService>) -> Self {
        self.runner.remote = Some(remote);
        self
    }

    pub fn with_engine(mut self, engine: CompressionEngine) -> Self {
        self.runner.engine = Arc::new(engine);
        self
    }

    pub fn engine(&self) -> &CompressionEngine {
        &self.runner.engine
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.runner.config
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        self.events_rx.take()
    }

    /// Token that cancels every job run by this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Validates `job` and returns the route it would take, without I/O
    /// beyond inspecting the destination.
    pub fn plan(&self, job: &CompressionJob) -> Result<Route, JobError> {
        Ok(self.runner.plan(job)?.target.route())
    }

    /// Runs `job` to completion on the current task.
    ///
    /// Fails with [`JobError::JobAlreadyRunning`] if another job holds the
    /// orchestrator; that rejection emits no events.
    pub async fn run(&self, job: CompressionJob) -> Result<ArtifactResult, JobError> {
        let guard = self.slot.try_acquire(&job.describe())?;
        let result = self.runner.execute(job, self.cancel.child_token()).await;
        drop(guard);
        result
    }

    /// Starts `job` on a background task.
    ///
    /// The job slot is claimed before this returns, so a following `run` or
    /// `spawn` is rejected until the job ends.
    pub fn spawn(&self, job: CompressionJob) -> Result<JobHandle, JobError> {
        let guard = self.slot.try_acquire(&job.describe())?;
        let id = guard.id().to_string();
        let cancel = self.cancel.child_token();
        let runner = self.runner.clone();
        let job_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let _guard = guard;
            runner.execute(job, job_cancel).await
        });

        Ok(JobHandle { id, cancel, join })
    }
}

/// Handle to a job started with [`Orchestrator::spawn`].
pub struct JobHandle {
    id: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<ArtifactResult, JobError>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Requests cancellation. The job stops at its next checkpoint and
    /// leaves nothing at the destination.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the job to end.
    pub async fn join(self) -> Result<ArtifactResult, JobError> {
        self.join
            .await
            .map_err(|e| JobError::Internal(format!("job task failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

impl Runner {
    fn plan(&self, job: &CompressionJob) -> Result<Plan, JobError> {
        if job.sources.is_empty() {
            return Err(JobError::InvalidConfiguration("no source files".into()));
        }
        let (codec, level) = self.engine.resolve(&job.algorithm, job.level)?;

        let mut names = HashSet::new();
        for source in &job.sources {
            let name = source.file_name();
            if name.is_empty() {
                return Err(JobError::InvalidConfiguration(format!(
                    "source has no file name: {}",
                    source.path.display()
                )));
            }
            if !names.insert(name) {
                return Err(JobError::InvalidConfiguration(format!(
                    "duplicate source name: {}",
                    source.file_name()
                )));
            }
        }
        if job.split_size == Some(0) {
            return Err(JobError::InvalidConfiguration("split size must be greater than zero".into()));
        }

        let target = if self.wants_remote(job)? {
            if self.config.chunk_size == 0 {
                return Err(JobError::InvalidConfiguration("chunk size must be greater than zero".into()));
            }
            Target::Remote(output_dir(&job.output)?)
        } else if let Some(part_size) = job.split_size {
            Target::Local(LocalTarget::Split {
                dir: output_dir(&job.output)?,
                part_size,
            })
        } else {
            if job.sources.len() > 1 && !codec.is_container() {
                return Err(JobError::InvalidConfiguration(format!(
                    "{} compresses a single file per archive; use zip for {} files",
                    codec.id(),
                    job.sources.len()
                )));
            }
            Target::Local(LocalTarget::Archive(archive_path(job, codec.extension())))
        };

        Ok(Plan {
            codec,
            level,
            target,
        })
    }

    /// Remote when a source reaches the size threshold and the job allows it.
    fn wants_remote(&self, job: &CompressionJob) -> Result<bool, JobError> {
        let threshold = self.config.large_file_threshold;
        let large = job.sources.iter().any(|s| s.size >= threshold);
        let wanted = large
            && match job.mode {
                JobMode::Local => false,
                JobMode::Remote => true,
                JobMode::Auto => job.remote_opt_in,
            };
        if wanted && self.remote.is_none() {
            return Err(JobError::InvalidConfiguration(
                "remote route selected but no remote service is configured".into(),
            ));
        }
        Ok(wanted)
    }
}

/// Split and remote output go into a directory, which must not be a file.
fn output_dir(output: &Path) -> Result<PathBuf, JobError> {
    if output.is_file() {
        return Err(JobError::InvalidConfiguration(format!(
            "output must be a directory: {}",
            output.display()
        )));
    }
    Ok(output.to_path_buf())
}

/// An existing directory receives `<source>.<ext>` (or `archive.<ext>` for
/// several sources); anything else is the archive path itself.
fn archive_path(job: &CompressionJob, extension: &str) -> PathBuf {
    if !job.output.is_dir() {
        return job.output.clone();
    }
    let stem = match job.sources.as_slice() {
        [one] => one.file_name(),
        _ => DEFAULT_ARCHIVE_STEM.to_string(),
    };
    job.output.join(format!("{stem}.{extension}"))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl Runner {
    #[instrument(skip_all, fields(job = %job.describe(), algorithm = %job.algorithm))]
    async fn execute(
        &self,
        job: CompressionJob,
        cancel: CancellationToken,
    ) -> Result<ArtifactResult, JobError> {
        let result = self.dispatch(job, &cancel).await;
        match &result {
            Ok(artifact) => {
                info!(
                    route = ?artifact.route,
                    outputs = artifact.outputs.len(),
                    bytes_in = artifact.bytes_in,
                    bytes_out = artifact.bytes_out,
                    failures = artifact.failures.len(),
                    "job completed"
                );
                let _ = self.events_tx.send(JobEvent::Completed {
                    outputs: artifact.outputs.clone(),
                });
            }
            Err(e) => {
                if e.is_cancelled() {
                    warn!("job cancelled");
                } else {
                    error!(error = %e, "job failed");
                }
                let _ = self.events_tx.send(JobEvent::Failed {
                    error: e.to_string(),
                    cancelled: e.is_cancelled(),
                });
            }
        }
        result
    }

    async fn dispatch(
        &self,
        job: CompressionJob,
        cancel: &CancellationToken,
    ) -> Result<ArtifactResult, JobError> {
        let plan = self.plan(&job)?;
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        info!(route = ?plan.target.route(), level = plan.level.get(), "job planned");
        let _ = self.events_tx.send(JobEvent::Status {
            text: format!("Compressing {} with {}", job.describe(), plan.codec.id()),
        });

        match plan.target {
            Target::Remote(dir) => self.run_remote(&job, plan.codec, &dir, cancel).await,
            Target::Local(target) => {
                let tx = self.events_tx.clone();
                let cancel = cancel.clone();
                let (codec, level) = (plan.codec, plan.level);
                tokio::task::spawn_blocking(move || {
                    let mut reporter = ProgressReporter::new(tx);
                    let mut run = LocalRun {
                        codec,
                        level,
                        cancel: &cancel,
                        reporter: &mut reporter,
                    };
                    target.write(&mut run, &job)
                })
                .await
                .map_err(|e| JobError::Internal(format!("compression task failed: {e}")))?
            }
        }
    }

    /// Uploads each source through its own [`TransferSession`] and writes the
    /// finalized artifacts as `<source>.<ext>` in `dir`.
    ///
    /// Sources go one after another. An I/O error on one source (unreadable
    /// source, unwritable staging file) abandons that source only and is
    /// listed in [`ArtifactResult::failures`]; any other error ends the job.
    /// Artifacts are staged until every source is done, then moved into
    /// place together.
    async fn run_remote(
        &self,
        job: &CompressionJob,
        codec: Arc<dyn Codec>,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArtifactResult, JobError> {
        let remote = self.remote.as_deref().ok_or_else(|| {
            JobError::InvalidConfiguration("no remote service is configured".into())
        })?;
        tokio::fs::create_dir_all(dir).await?;

        let uploader = SessionUploader::new(remote, self.config.retry.clone(), cancel.clone());
        let mut reporter = ProgressReporter::new(self.events_tx.clone());
        let mut staged = Vec::with_capacity(job.sources.len());
        let mut failures = Vec::new();
        let mut first_io_error = None;

        for source in &job.sources {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let dest = dir.join(format!("{}.{}", source.file_name(), codec.extension()));
            match self
                .remote_file(&uploader, &mut reporter, source, dir, dest)
                .await
            {
                Ok(artifact) => staged.push(artifact),
                Err(e @ (JobError::Io(_) | JobError::FileIo { .. })) => {
                    warn!(file = %source.file_name(), error = %e, "file skipped");
                    reporter.status(format!("Skipped {}: {e}", source.file_name()));
                    failures.push(FileFailure {
                        file: source.file_name(),
                        error: e.to_string(),
                    });
                    first_io_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if staged.is_empty()
            && let Some(e) = first_io_error
        {
            return Err(e);
        }

        let mut outputs = Vec::with_capacity(staged.len());
        let (mut bytes_in, mut bytes_out) = (0, 0);
        for artifact in staged {
            if let Err(e) = artifact.tmp.persist(&artifact.dest) {
                local::remove_committed(&outputs);
                return Err(JobError::FileIo {
                    file: artifact.dest.display().to_string(),
                    source: e.error,
                });
            }
            bytes_in += artifact.bytes_in;
            bytes_out += artifact.bytes_out;
            outputs.push(artifact.dest);
        }

        Ok(ArtifactResult {
            route: Route::Remote,
            outputs,
            bytes_in,
            bytes_out,
            parts: Vec::new(),
            failures,
        })
    }

    /// Runs one source's session to completion and stages its artifact.
    async fn remote_file(
        &self,
        uploader: &SessionUploader<'_>,
        reporter: &mut ProgressReporter<JobEvent>,
        source: &SourceFile,
        dir: &Path,
        dest: PathBuf,
    ) -> Result<StagedArtifact, JobError> {
        let segmenter = self.open_segmenter(source).await?;
        let mut session = TransferSession::new(
            segmenter.file_name(),
            segmenter.total_size(),
            self.config.chunk_size,
        )?;
        info!(
            session = %session.id(),
            file = %session.file_name(),
            size = session.total_size(),
            "remote session created"
        );

        let artifact = uploader
            .run(&mut session, segmenter, reporter)
            .await
            .map_err(|e| match e {
                TransferError::Io(io) => local::file_error(source, io),
                other => other.into(),
            })?;
        let bytes_out = artifact.len() as u64;

        let staging_dir = dir.to_path_buf();
        let tmp = tokio::task::spawn_blocking(move || -> Result<NamedTempFile, JobError> {
            use std::io::Write;
            let mut tmp = tempfile::Builder::new()
                .prefix(".smartcompress-")
                .suffix(".tmp")
                .tempfile_in(&staging_dir)?;
            tmp.write_all(&artifact)?;
            tmp.as_file().sync_all()?;
            Ok(tmp)
        })
        .await
        .map_err(|e| JobError::Internal(format!("artifact write failed: {e}")))??;

        Ok(StagedArtifact {
            tmp,
            dest,
            bytes_in: session.total_size(),
            bytes_out,
        })
    }

    async fn open_segmenter(&self, source: &SourceFile) -> Result<Segmenter, JobError> {
        let path = source.path.clone();
        let chunk_size = self.config.chunk_size;
        tokio::task::spawn_blocking(move || Segmenter::new(&path, chunk_size))
            .await
            .map_err(|e| JobError::Internal(format!("open task failed: {e}")))?
            .map_err(|e| match e {
                TransferError::Io(io) => local::file_error(source, io),
                other => other.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartcompress_protocol::{ChunkUploadQuery, FinalizeRequest};
    use smartcompress_transfer::{BoxFuture, RemoteFailure, RetryPolicy};
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockRemote {
        uploads: Mutex<Vec<(String, u64)>>,
        finalized: Mutex<Vec<String>>,
        fail_uploads: bool,
        hang_uploads: bool,
    }

    impl MockRemote {
        fn upload_count(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    impl RemoteService for MockRemote {
        fn upload_chunk(
            &self,
            query: &ChunkUploadQuery,
            _checksum: &str,
            _data: &[u8],
        ) -> BoxFuture<'_, Result<(), RemoteFailure>> {
            self.uploads
                .lock()
                .unwrap()
                .push((query.filename.clone(), query.chunk_idx));
            if self.hang_uploads {
                return Box::pin(std::future::pending::<Result<(), RemoteFailure>>());
            }
            let result = if self.fail_uploads {
                Err(RemoteFailure::Transport("connection reset".into()))
            } else {
                Ok(())
            };
            Box::pin(async move { result })
        }

        fn finalize(&self, request: &FinalizeRequest) -> BoxFuture<'_, Result<Vec<u8>, RemoteFailure>> {
            self.finalized.lock().unwrap().push(request.file_id.clone());
            Box::pin(async { Ok(b"REMOTE ARTIFACT".to_vec()) })
        }

        fn endpoint(&self) -> &str {
            "mock://remote"
        }
    }

    fn small_config() -> OrchestratorConfig {
        OrchestratorConfig {
            chunk_size: 50,
            large_file_threshold: 100,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_factor: 2.0,
            },
        }
    }

    fn source(dir: &Path, name: &str, len: usize) -> SourceFile {
        let path = dir.join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        fs::write(&path, data).unwrap();
        SourceFile::from_path(path).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn remote_orchestrator(mock: MockRemote) -> (Orchestrator, Arc<MockRemote>) {
        let mock = Arc::new(mock);
        let orch = Orchestrator::new(small_config()).with_remote(mock.clone());
        (orch, mock)
    }

    #[test]
    fn routing_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let small = source(dir.path(), "small.bin", 10);
        let large = source(dir.path(), "large.bin", 120);
        let out = dir.path().join("out");
        let (orch, _) = remote_orchestrator(MockRemote::default());

        let job = |src: &SourceFile| CompressionJob::new(vec![src.clone()], &out);

        assert_eq!(orch.plan(&job(&small)).unwrap(), Route::LocalArchive);
        assert_eq!(
            orch.plan(&job(&small).with_split_size(4)).unwrap(),
            Route::LocalSplit
        );
        // Large files stay local unless the job opts in.
        assert_eq!(orch.plan(&job(&large)).unwrap(), Route::LocalArchive);
        assert_eq!(
            orch.plan(&job(&large).with_remote_opt_in(true)).unwrap(),
            Route::Remote
        );
        assert_eq!(
            orch.plan(&job(&large).with_mode(JobMode::Remote)).unwrap(),
            Route::Remote
        );
        assert_eq!(
            orch.plan(&job(&large).with_mode(JobMode::Local).with_remote_opt_in(true))
                .unwrap(),
            Route::LocalArchive
        );
        // Below the threshold the remote mode has nothing to do.
        assert_eq!(
            orch.plan(&job(&small).with_mode(JobMode::Remote)).unwrap(),
            Route::LocalArchive
        );
    }

    #[test]
    fn remote_route_requires_service() {
        let dir = tempfile::tempdir().unwrap();
        let large = source(dir.path(), "large.bin", 120);
        let orch = Orchestrator::new(small_config());
        let job = CompressionJob::new(vec![large], dir.path().join("out")).with_remote_opt_in(true);
        assert!(matches!(
            orch.plan(&job),
            Err(JobError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_invalid_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a.bin", 10);
        let b = source(dir.path(), "b.bin", 10);
        let out = dir.path().join("out.zip");
        let orch = Orchestrator::default();

        let empty = CompressionJob::new(Vec::new(), &out);
        assert!(matches!(orch.plan(&empty), Err(JobError::InvalidConfiguration(_))));

        let bad_level = CompressionJob::new(vec![a.clone()], &out).with_level(10);
        assert!(matches!(orch.plan(&bad_level), Err(JobError::InvalidConfiguration(_))));

        let stream_many = CompressionJob::new(vec![a.clone(), b], &out).with_algorithm("gzip");
        assert!(matches!(orch.plan(&stream_many), Err(JobError::InvalidConfiguration(_))));

        let duplicate = CompressionJob::new(vec![a.clone(), a.clone()], &out);
        assert!(matches!(orch.plan(&duplicate), Err(JobError::InvalidConfiguration(_))));

        let zero_split = CompressionJob::new(vec![a], dir.path().join("parts")).with_split_size(0);
        assert!(matches!(orch.plan(&zero_split), Err(JobError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn unknown_algorithm_fails_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "a.bin", 10);
        let out_dir = dir.path().join("out");
        let mut orch = Orchestrator::default();
        let mut rx = orch.take_events().unwrap();

        let job = CompressionJob::new(vec![src], out_dir.join("a.bin.xyz")).with_algorithm("unknown-codec");
        let err = orch.run(job).await.unwrap_err();

        assert!(matches!(err, JobError::UnsupportedAlgorithm(ref a) if a == "unknown-codec"));
        assert!(!out_dir.exists());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], JobEvent::Failed { cancelled: false, .. }));
    }

    #[tokio::test]
    async fn local_archive_completes_with_monotonic_progress() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a.bin", 3_000_000);
        let b = source(dir.path(), "b.bin", 20);
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();
        let mut orch = Orchestrator::default();
        let mut rx = orch.take_events().unwrap();

        let result = orch.run(CompressionJob::new(vec![a, b], &out_dir)).await.unwrap();

        let archive = out_dir.join("archive.zip");
        assert_eq!(result.route, Route::LocalArchive);
        assert_eq!(result.outputs, vec![archive.clone()]);
        assert_eq!(result.bytes_in, 3_000_020);
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 1);

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(JobEvent::Status { .. })));
        assert_eq!(
            events.last(),
            Some(&JobEvent::Completed {
                outputs: vec![archive]
            })
        );
        let mut last = std::collections::HashMap::new();
        for event in &events {
            if let JobEvent::Progress { file, bytes_done, .. } = event {
                let prev = last.insert(file.clone(), *bytes_done).unwrap_or(0);
                assert!(*bytes_done >= prev, "progress for {file} went backwards");
            }
        }
        assert_eq!(last.get("a.bin"), Some(&3_000_000));
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn single_source_into_directory_uses_source_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "notes.txt", 500);
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();
        let orch = Orchestrator::default();

        let job = CompressionJob::new(vec![src], &out_dir).with_algorithm("xz");
        let result = orch.run(job).await.unwrap();
        assert_eq!(result.outputs, vec![out_dir.join("notes.txt.xz")]);
    }

    #[tokio::test]
    async fn split_route_writes_parts() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "big.bin", 250);
        let out_dir = dir.path().join("parts");
        let orch = Orchestrator::default();

        let job = CompressionJob::new(vec![src], &out_dir)
            .with_algorithm("bzip2")
            .with_split_size(100);
        let result = orch.run(job).await.unwrap();

        assert_eq!(result.route, Route::LocalSplit);
        let indices: Vec<u64> = result.parts.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(result.outputs[2], out_dir.join("big.bin.part0002.bzip2"));
    }

    #[tokio::test]
    async fn second_job_is_rejected_while_one_runs() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "a.bin", 1000);
        let orch = Orchestrator::default();

        let handle = orch
            .spawn(CompressionJob::new(vec![src.clone()], dir.path().join("one.zip")))
            .unwrap();
        assert!(orch.is_busy());
        let err = orch
            .run(CompressionJob::new(vec![src.clone()], dir.path().join("two.zip")))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::JobAlreadyRunning));
        assert!(matches!(
            orch.spawn(CompressionJob::new(vec![src.clone()], dir.path().join("two.zip"))),
            Err(JobError::JobAlreadyRunning)
        ));

        handle.join().await.unwrap();
        assert!(!orch.is_busy());
        assert!(!dir.path().join("two.zip").exists());
        orch.run(CompressionJob::new(vec![src], dir.path().join("two.zip")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_job_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "a.bin", 1000);
        let out_dir = dir.path().join("out");
        let mut orch = Orchestrator::default();
        let mut rx = orch.take_events().unwrap();
        orch.cancel_token().cancel();

        let err = orch
            .run(CompressionJob::new(vec![src], out_dir.join("a.zip")))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!out_dir.join("a.zip").exists());
        assert!(matches!(
            drain(&mut rx).last(),
            Some(JobEvent::Failed { cancelled: true, .. })
        ));
    }

    #[tokio::test]
    async fn remote_route_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "movie.mkv", 120);
        let out_dir = dir.path().join("out");
        let (mut orch, mock) = remote_orchestrator(MockRemote::default());
        let mut rx = orch.take_events().unwrap();

        let job = CompressionJob::new(vec![src], &out_dir)
            .with_algorithm("zstd")
            .with_remote_opt_in(true);
        let result = orch.run(job).await.unwrap();

        assert_eq!(result.route, Route::Remote);
        let artifact = out_dir.join("movie.mkv.zstd");
        assert_eq!(result.outputs, vec![artifact.clone()]);
        assert_eq!(fs::read(&artifact).unwrap(), b"REMOTE ARTIFACT");
        assert_eq!(result.bytes_in, 120);
        assert_eq!(result.bytes_out, 15);

        let indices: Vec<u64> = mock.uploads.lock().unwrap().iter().map(|(_, i)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(mock.finalized.lock().unwrap().len(), 1);

        let progress: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::Progress { bytes_done, .. } => Some(bytes_done),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![50, 100, 120]);
    }

    #[tokio::test]
    async fn remote_failure_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "movie.mkv", 120);
        let out_dir = dir.path().join("out");
        let (orch, mock) = remote_orchestrator(MockRemote {
            fail_uploads: true,
            ..MockRemote::default()
        });

        let job = CompressionJob::new(vec![src], &out_dir).with_remote_opt_in(true);
        let err = orch.run(job).await.unwrap_err();

        assert!(matches!(err, JobError::SessionFailed { chunk: 0, attempts: 3, .. }));
        assert!(err.is_retryable_with_new_session());
        assert_eq!(mock.upload_count(), 3);
        assert!(mock.finalized.lock().unwrap().is_empty());
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreadable_source_skips_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a.mkv", 120);
        let b = source(dir.path(), "b.mkv", 120);
        let out_dir = dir.path().join("out");
        let (mut orch, mock) = remote_orchestrator(MockRemote::default());
        let mut rx = orch.take_events().unwrap();
        fs::remove_file(&a.path).unwrap();

        let job = CompressionJob::new(vec![a, b], &out_dir).with_remote_opt_in(true);
        let result = orch.run(job).await.unwrap();

        assert_eq!(result.outputs, vec![out_dir.join("b.mkv.zip")]);
        assert!(!result.is_complete());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].file, "a.mkv");
        assert!(result.failures[0].error.contains("a.mkv"));
        assert_eq!(result.bytes_in, 120);

        let uploads = mock.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 3);
        assert!(uploads.iter().all(|(file, _)| file == "b.mkv"));
        assert_eq!(mock.finalized.lock().unwrap().len(), 1);

        let events = drain(&mut rx);
        assert!(events.iter().any(
            |e| matches!(e, JobEvent::Status { text } if text.starts_with("Skipped a.mkv"))
        ));
        assert!(matches!(events.last(), Some(JobEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn job_fails_when_every_source_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a.mkv", 120);
        let out_dir = dir.path().join("out");
        let (orch, mock) = remote_orchestrator(MockRemote::default());
        fs::remove_file(&a.path).unwrap();

        let job = CompressionJob::new(vec![a], &out_dir).with_remote_opt_in(true);
        let err = orch.run(job).await.unwrap_err();

        assert!(matches!(err, JobError::FileIo { ref file, .. } if file.ends_with("a.mkv")));
        assert_eq!(mock.upload_count(), 0);
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_commit_removes_committed_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let a = source(dir.path(), "a.mkv", 120);
        let b = source(dir.path(), "b.mkv", 120);
        let out_dir = dir.path().join("out");
        // A directory where the second artifact belongs makes its rename fail.
        fs::create_dir_all(out_dir.join("b.mkv.zip")).unwrap();
        let (orch, mock) = remote_orchestrator(MockRemote::default());

        let job = CompressionJob::new(vec![a, b], &out_dir).with_remote_opt_in(true);
        let err = orch.run(job).await.unwrap_err();

        assert!(matches!(err, JobError::FileIo { ref file, .. } if file.ends_with("b.mkv.zip")));
        assert_eq!(mock.finalized.lock().unwrap().len(), 2);
        assert!(!out_dir.join("a.mkv.zip").exists());
        let names: Vec<String> = fs::read_dir(&out_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.mkv.zip"]);
    }

    #[tokio::test]
    async fn handle_cancels_in_flight_upload() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "movie.mkv", 120);
        let out_dir = dir.path().join("out");
        let (orch, mock) = remote_orchestrator(MockRemote {
            hang_uploads: true,
            ..MockRemote::default()
        });

        let handle = orch
            .spawn(CompressionJob::new(vec![src], &out_dir).with_remote_opt_in(true))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while mock.upload_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle.cancel();
        let err = handle.join().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
        assert!(!orch.is_busy());
    }

    #[test]
    fn take_events_once() {
        let mut orch = Orchestrator::default();
        assert!(orch.take_events().is_some());
        assert!(orch.take_events().is_none());
    }
}
