use crate::api::error::UploadError;
use crate::config::UploadConfig;
use crate::models::{FinalizedAttachment, UploadRequest};
use crate::services::attachments::{AttachmentStore, NewAttachment};
use crate::services::storage::{DurableWriter, ensure_dir, sync_dir};
use crate::utils::hash::hash_file;
use crate::utils::validation::{DEFAULT_SIGNATURES, SignatureTable, check_size, sanitize_filename};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle of a single upload. `Failed` is reachable from every
/// non-terminal state; the other states only move forward one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Received,
    SizeChecked,
    Staged,
    MagicValidated,
    Written,
    SizeVerified,
    Hashed,
    Finalized,
    Failed,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("illegal upload transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: UploadState,
    pub to: UploadState,
}

impl UploadState {
    /// Successor on the success path
    pub fn next(self) -> Option<UploadState> {
        use UploadState::*;
        match self {
            Received => Some(SizeChecked),
            SizeChecked => Some(Staged),
            Staged => Some(MagicValidated),
            MagicValidated => Some(Written),
            Written => Some(SizeVerified),
            SizeVerified => Some(Hashed),
            Hashed => Some(Finalized),
            Finalized | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Finalized | UploadState::Failed)
    }

    /// Whether the file may exist under its final path in this state
    pub fn exposes_final_path(self) -> bool {
        matches!(
            self,
            UploadState::Written
                | UploadState::SizeVerified
                | UploadState::Hashed
                | UploadState::Finalized
        )
    }

    pub fn transition(self, to: UploadState) -> Result<UploadState, InvalidTransition> {
        let legal = match to {
            UploadState::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        };
        if legal {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

struct UploadRun {
    id: Uuid,
    state: UploadState,
}

impl UploadRun {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            state: UploadState::Received,
        }
    }

    fn advance(&mut self, to: UploadState) {
        match self.state.transition(to) {
            Ok(next) => {
                tracing::debug!("Upload state {:?} -> {:?}", self.state, next);
                self.state = next;
            }
            Err(e) => {
                tracing::error!("{}", e);
                debug_assert!(false, "{}", e);
                self.state = UploadState::Failed;
            }
        }
    }
}

/// Removes a guarded file now, logging anything but a missing file
fn discard(path: TempPath, label: &str) {
    let path_str = path.display().to_string();
    match path.close() {
        Ok(()) => tracing::debug!("Removed {} file {}", label, path_str),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Cleanup failed for {} file {}: {}", label, path_str, e),
    }
}

#[derive(Error, Debug)]
enum BodyFault {
    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("upload stream interrupted: {0}")]
    Interrupted(String),
}

/// Request body wrapper that enforces the size limit on the running byte
/// count and tags client-side stream failures, so they can be told apart
/// from storage failures once they come back out of the writer.
struct BodyReader<R> {
    inner: R,
    received: u64,
    limit: u64,
}

impl<R> BodyReader<R> {
    fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            received: 0,
            limit,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BodyReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                self.received += (buf.filled().len() - before) as u64;
                // stop before the writer sees bytes past the limit
                if check_size(self.received, self.limit).is_err() {
                    let limit = self.limit;
                    return Poll::Ready(Err(std::io::Error::other(BodyFault::TooLarge { limit })));
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(std::io::Error::new(
                e.kind(),
                BodyFault::Interrupted(e.to_string()),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Maps a staging failure back to the side that caused it
fn staging_error(e: std::io::Error) -> UploadError {
    let client_fault = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<BodyFault>())
        .map(|fault| match fault {
            BodyFault::TooLarge { limit } => UploadError::SizeExceeded { limit: *limit },
            BodyFault::Interrupted(_) => UploadError::Malformed(fault.to_string()),
        });
    client_fault.unwrap_or_else(|| UploadError::DurabilityFault(e))
}

/// Upload bytes received into the staging directory. Dropping it removes
/// the file, which covers request cancellation.
struct StagedFile {
    path: TempPath,
    size: u64,
}

/// Format detected from content
#[derive(Debug, Clone, Copy)]
struct DetectedType {
    mime_type: &'static str,
    extension: &'static str,
}

/// Validated bytes sitting at their final path, not yet finalized
struct FinalArtifact {
    path: TempPath,
    stored_name: String,
    expected_size: u64,
}

/// Sequences size guard, staging, magic-number validation, durable
/// promotion, size verification, hashing and record keeping.
pub struct UploadService {
    config: UploadConfig,
    signatures: &'static SignatureTable,
    writer: Arc<dyn DurableWriter>,
    attachments: Arc<dyn AttachmentStore>,
}

impl UploadService {
    pub fn new(
        config: UploadConfig,
        writer: Arc<dyn DurableWriter>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        Self {
            config,
            signatures: &DEFAULT_SIGNATURES,
            writer,
            attachments,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub async fn upload<R>(
        &self,
        request: UploadRequest<R>,
    ) -> Result<FinalizedAttachment, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("upload", upload_id = %id, owner = %request.owner_id);
        self.run(id, request).instrument(span).await
    }

    async fn run<R>(
        &self,
        id: Uuid,
        request: UploadRequest<R>,
    ) -> Result<FinalizedAttachment, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        tracing::info!(
            "Processing upload '{}' (declared size: {:?}, max: {})",
            request.filename,
            request.declared_size,
            self.config.max_file_size
        );

        let mut run = UploadRun::new(id);
        let result = self.drive(&mut run, request).await;

        match &result {
            Ok(file) => tracing::info!(
                "File validated and saved: {} ({} bytes, sha256 {}...)",
                file.stored_name,
                file.byte_size,
                &file.sha256[..16]
            ),
            Err(e) => {
                let failed_in = run.state;
                run.advance(UploadState::Failed);
                if e.is_client_error() {
                    tracing::warn!("Upload rejected in {:?}: {}", failed_in, e);
                } else {
                    tracing::error!("Upload failed in {:?}: {:?}", failed_in, e);
                }
            }
        }
        result
    }

    async fn drive<R>(
        &self,
        run: &mut UploadRun,
        request: UploadRequest<R>,
    ) -> Result<FinalizedAttachment, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let UploadRequest {
            owner_id,
            filename,
            declared_size,
            body,
        } = request;

        // Received -> SizeChecked: no disk I/O before this passes
        if let Some(declared) = declared_size {
            check_size(declared, self.config.max_file_size)?;
        }
        run.advance(UploadState::SizeChecked);

        // SizeChecked -> Staged
        self.prepare_dirs().await?;
        let staged = self.stage(run.id, body).await?;
        if let Some(declared) = declared_size {
            if declared != staged.size {
                discard(staged.path, "staged");
                return Err(UploadError::Malformed(format!(
                    "declared size {} does not match received size",
                    declared
                )));
            }
        }
        run.advance(UploadState::Staged);

        // Staged -> MagicValidated
        let detected = match self.validate(&staged).await {
            Ok(detected) => detected,
            Err(e) => {
                discard(staged.path, "staged");
                return Err(e);
            }
        };
        run.advance(UploadState::MagicValidated);

        // MagicValidated -> Written
        let artifact = self.promote(run.id, staged, detected).await?;
        run.advance(UploadState::Written);

        // Written -> SizeVerified
        let byte_size = match self.verify(&artifact).await {
            Ok(size) => size,
            Err(e) => {
                discard(artifact.path, "final");
                return Err(e);
            }
        };
        run.advance(UploadState::SizeVerified);

        // SizeVerified -> Hashed
        let sha256 = match hash_file(&artifact.path).await {
            Ok(digest) => digest,
            Err(e) => {
                tracing::error!("Digest failed for {}: {}", artifact.stored_name, e);
                discard(artifact.path, "final");
                return Err(UploadError::DurabilityFault(e));
            }
        };
        run.advance(UploadState::Hashed);

        // Hashed -> Finalized
        let FinalArtifact {
            path, stored_name, ..
        } = artifact;
        let storage_path = path.keep().map_err(|e| UploadError::DurabilityFault(e.error))?;
        let url = self.config.public_url_for(&stored_name);
        let attachment_id = self
            .record(NewAttachment {
                owner_id: owner_id.clone(),
                stored_name: stored_name.clone(),
                extension: detected.extension.to_string(),
                mime_type: detected.mime_type.to_string(),
                byte_size,
                sha256: sha256.clone(),
                url: url.clone(),
            })
            .await;

        run.advance(UploadState::Finalized);

        Ok(FinalizedAttachment {
            owner_id,
            original_filename: sanitize_filename(&filename),
            stored_name,
            storage_path,
            url,
            byte_size,
            mime_type: detected.mime_type.to_string(),
            extension: detected.extension.to_string(),
            sha256,
            attachment_id,
        })
    }

    async fn prepare_dirs(&self) -> Result<(), UploadError> {
        for dir in [&self.config.upload_dir, &self.config.staging_dir] {
            ensure_dir(dir).await.map_err(|e| {
                tracing::error!("Failed to create directory {}: {}", dir.display(), e);
                UploadError::DurabilityFault(e)
            })?;
        }
        Ok(())
    }

    /// Streams the request body through the durable writer into a uniquely
    /// named staging file, enforcing the size limit on the running byte count.
    async fn stage<R>(&self, id: Uuid, body: R) -> Result<StagedFile, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = tempfile::Builder::new()
            .prefix(&format!("{}-", id))
            .suffix(".upload")
            .tempfile_in(&self.config.staging_dir)?
            .into_temp_path();

        let body = BodyReader::new(body, self.config.max_file_size);
        match self.writer.write(Box::pin(body), &path, None).await {
            Ok(size) => {
                tracing::debug!("Staged {} bytes at {}", size, path.display());
                Ok(StagedFile { path, size })
            }
            Err(e) => {
                discard(path, "staged");
                Err(staging_error(e))
            }
        }
    }

    async fn validate(&self, staged: &StagedFile) -> Result<DetectedType, UploadError> {
        let result = self
            .signatures
            .identify(&staged.path, &self.config.allowed_mime_types)
            .await;

        match (result.valid, result.detected_mime_type, result.detected_extension) {
            (true, Some(mime_type), Some(extension)) => {
                tracing::debug!("Magic number accepted: {}", mime_type);
                Ok(DetectedType {
                    mime_type,
                    extension,
                })
            }
            (_, Some(detected), _) => Err(UploadError::TypeMismatch {
                detected: detected.to_string(),
                expected: self.config.allowed_mime_types.join(", "),
            }),
            _ => Err(UploadError::UnrecognizedFormat),
        }
    }

    /// Streams the staged bytes through the durable writer into a partial
    /// file, then renames it onto the final path.
    async fn promote(
        &self,
        id: Uuid,
        staged: StagedFile,
        detected: DetectedType,
    ) -> Result<FinalArtifact, UploadError> {
        let stored_name = format!("{}.{}", id, detected.extension);
        let final_path = self.config.upload_dir.join(&stored_name);
        let partial = TempPath::from_path(
            self.config.staging_dir.join(format!("{}.partial", stored_name)),
        );

        let written = async {
            let source = File::open(&staged.path).await?;
            let progress = |n: u64| tracing::trace!("Promoted {} bytes", n);
            self.writer
                .write(Box::pin(source), &partial, Some(&progress))
                .await
        }
        .await;

        let failure = match written {
            Ok(n) if n == staged.size => None,
            Ok(n) => Some(UploadError::IncompleteWrite {
                expected: staged.size,
                actual: n,
            }),
            Err(e) => Some(UploadError::DurabilityFault(e)),
        };
        if let Some(e) = failure {
            tracing::error!("Durable write of {} failed: {}", stored_name, e);
            discard(partial, "partial");
            discard(staged.path, "staged");
            return Err(e);
        }

        // a failed rename hands the partial back and drops it
        if let Err(e) = partial.persist(&final_path) {
            tracing::error!("Promotion of {} failed: {}", stored_name, e.error);
            discard(staged.path, "staged");
            return Err(UploadError::DurabilityFault(e.error));
        }
        let path = TempPath::from_path(final_path);
        sync_dir(&self.config.upload_dir).await;

        let expected_size = staged.size;
        discard(staged.path, "staged");

        Ok(FinalArtifact {
            path,
            stored_name,
            expected_size,
        })
    }

    /// Compares bytes on disk with bytes received
    async fn verify(&self, artifact: &FinalArtifact) -> Result<u64, UploadError> {
        let actual = tokio::fs::metadata(&artifact.path).await?.len();
        if actual != artifact.expected_size {
            return Err(UploadError::IncompleteWrite {
                expected: artifact.expected_size,
                actual,
            });
        }
        check_size(actual, self.config.max_file_size)?;
        Ok(actual)
    }

    async fn record(&self, attachment: NewAttachment) -> Option<i64> {
        let stored_name = attachment.stored_name.clone();
        match self.attachments.finalize(attachment).await {
            Ok(id) => {
                tracing::info!("Attachment record created: {} ({})", id, stored_name);
                Some(id)
            }
            Err(e) => {
                tracing::error!("Failed to create attachment record for {}: {:?}", stored_name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::{FsyncWriter, ProgressFn};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct NullStore;

    #[async_trait]
    impl AttachmentStore for NullStore {
        async fn finalize(&self, _attachment: NewAttachment) -> anyhow::Result<i64> {
            Ok(1)
        }
    }

    fn is_partial(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "partial")
    }

    /// Stages normally, then runs out of space while promoting
    struct PromotionFailingWriter;

    #[async_trait]
    impl DurableWriter for PromotionFailingWriter {
        async fn write<'a>(
            &'a self,
            source: Pin<Box<dyn AsyncRead + Send + 'a>>,
            destination: &'a Path,
            on_progress: Option<ProgressFn<'a>>,
        ) -> std::io::Result<u64> {
            if !is_partial(destination) {
                return FsyncWriter::new(4).write(source, destination, on_progress).await;
            }
            tokio::fs::write(destination, b"half").await?;
            Err(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "no space left on device",
            ))
        }
    }

    /// Writes every byte on promotion but reports one fewer
    struct MiscountingWriter;

    #[async_trait]
    impl DurableWriter for MiscountingWriter {
        async fn write<'a>(
            &'a self,
            source: Pin<Box<dyn AsyncRead + Send + 'a>>,
            destination: &'a Path,
            on_progress: Option<ProgressFn<'a>>,
        ) -> std::io::Result<u64> {
            let written = FsyncWriter::new(4).write(source, destination, on_progress).await?;
            if is_partial(destination) {
                Ok(written - 1)
            } else {
                Ok(written)
            }
        }
    }

    /// Yields `prefix`, then never makes progress again, like a stalled client
    struct StallingReader {
        prefix: Option<&'static [u8]>,
    }

    impl AsyncRead for StallingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.prefix.take() {
                Some(bytes) => {
                    buf.put_slice(bytes);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Pending,
            }
        }
    }

    /// Yields `good` bytes, then the connection resets
    struct ResettingReader {
        good: usize,
    }

    impl AsyncRead for ResettingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.good == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "client went away",
                )));
            }
            let n = self.good.min(buf.remaining());
            buf.put_slice(&[0xFF, 0xD8, 0xFF, 0xE0].repeat(n)[..n]);
            self.good -= n;
            Poll::Ready(Ok(()))
        }
    }

    fn service_with(dir: &Path, max: u64, writer: Arc<dyn DurableWriter>) -> UploadService {
        let config = UploadConfig::development(dir).with_max_file_size(max);
        UploadService::new(config, writer, Arc::new(NullStore))
    }

    fn service(dir: &Path, max: u64) -> UploadService {
        service_with(dir, max, Arc::new(FsyncWriter::new(4)))
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_file()).collect())
            .unwrap_or_default()
    }

    fn assert_no_artifacts(svc: &UploadService) {
        assert!(files_in(&svc.config.staging_dir).is_empty());
        assert!(files_in(&svc.config.upload_dir).is_empty());
    }

    #[test]
    fn test_success_path_order() {
        let mut state = UploadState::Received;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            state = state.transition(next).unwrap();
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                UploadState::Received,
                UploadState::SizeChecked,
                UploadState::Staged,
                UploadState::MagicValidated,
                UploadState::Written,
                UploadState::SizeVerified,
                UploadState::Hashed,
                UploadState::Finalized,
            ]
        );
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_state() {
        use UploadState::*;
        for state in [Received, SizeChecked, Staged, MagicValidated, Written, SizeVerified, Hashed] {
            assert_eq!(state.transition(Failed), Ok(Failed));
        }
        assert!(Finalized.transition(Failed).is_err());
        assert!(Failed.transition(Failed).is_err());
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        use UploadState::*;
        assert_eq!(
            Staged.transition(Written),
            Err(InvalidTransition { from: Staged, to: Written })
        );
        assert!(Written.transition(Hashed).is_err());
        assert!(Hashed.transition(SizeVerified).is_err());
    }

    #[test]
    fn test_final_path_exposed_only_after_write() {
        use UploadState::*;
        for state in [Received, SizeChecked, Staged, MagicValidated, Failed] {
            assert!(!state.exposes_final_path());
        }
        for state in [Written, SizeVerified, Hashed, Finalized] {
            assert!(state.exposes_final_path());
        }
    }

    #[tokio::test]
    async fn test_stage_stops_at_limit_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 10);
        svc.prepare_dirs().await.unwrap();

        let body = vec![0u8; 11];
        let err = svc.stage(Uuid::new_v4(), &body[..]).await.err().unwrap();
        assert!(matches!(err, UploadError::SizeExceeded { limit: 10 }));
        assert!(files_in(&svc.config.staging_dir).is_empty());
    }

    #[tokio::test]
    async fn test_stage_accepts_exact_limit() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 10);
        svc.prepare_dirs().await.unwrap();

        let body = vec![7u8; 10];
        let staged = svc.stage(Uuid::new_v4(), &body[..]).await.unwrap();
        assert_eq!(staged.size, 10);
        let path = staged.path.to_path_buf();
        assert!(path.exists());

        // dropping the staged file without promotion removes it
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_validate_rejects_unknown_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024);
        svc.prepare_dirs().await.unwrap();

        let staged = svc
            .stage(Uuid::new_v4(), &b"%PDF-1.7 not an image"[..])
            .await
            .unwrap();
        assert!(matches!(
            svc.validate(&staged).await,
            Err(UploadError::UnrecognizedFormat)
        ));
    }

    #[tokio::test]
    async fn test_promote_moves_bytes_and_removes_staging() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024);
        svc.prepare_dirs().await.unwrap();

        let bytes = b"GIF89a\x01\x00\x01\x00";
        let id = Uuid::new_v4();
        let staged = svc.stage(id, &bytes[..]).await.unwrap();
        let detected = svc.validate(&staged).await.unwrap();
        let artifact = svc.promote(id, staged, detected).await.unwrap();

        assert_eq!(artifact.stored_name, format!("{}.gif", id));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), bytes);
        assert!(files_in(&svc.config.staging_dir).is_empty());
        assert_eq!(svc.verify(&artifact).await.unwrap(), bytes.len() as u64);

        let path = artifact.path.keep().unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_declared_size_over_limit_touches_no_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("never-created");
        let svc = service(&root, 8);

        let request = UploadRequest::new("7", "big.png", &b"tiny"[..]).with_declared_size(9);
        let err = svc.upload(request).await.unwrap_err();
        assert!(matches!(err, UploadError::SizeExceeded { limit: 8 }));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_declared_size_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024);

        let body = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        let request = UploadRequest::new("7", "short.jpg", &body[..]).with_declared_size(100);
        let err = svc.upload(request).await.unwrap_err();
        assert_eq!(err.kind(), "Malformed");
        assert_no_artifacts(&svc);
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024);

        let body = StallingReader {
            prefix: Some(&[0xFF, 0xD8, 0xFF, 0xE0]),
        };
        let request = UploadRequest::new("7", "stalled.jpg", body);
        let outcome = tokio::time::timeout(Duration::from_millis(100), svc.upload(request)).await;

        assert!(outcome.is_err(), "upload should still be waiting on the client");
        assert!(svc.config.staging_dir.exists());
        assert_no_artifacts(&svc);
    }

    #[tokio::test]
    async fn test_interrupted_body_is_malformed_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024);

        let request = UploadRequest::new("7", "reset.jpg", ResettingReader { good: 6 });
        let err = svc.upload(request).await.unwrap_err();

        assert_eq!(err.kind(), "Malformed");
        assert!(err.is_client_error());
        assert_no_artifacts(&svc);
    }

    #[tokio::test]
    async fn test_promotion_failure_removes_partial_and_staged() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service_with(dir.path(), 1024, Arc::new(PromotionFailingWriter));

        let body = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        let err = svc
            .upload(UploadRequest::new("7", "full.jpg", &body[..]))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::DurabilityFault(_)));
        assert_no_artifacts(&svc);
    }

    #[tokio::test]
    async fn test_writer_reported_count_is_checked_before_rename() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service_with(dir.path(), 1024, Arc::new(MiscountingWriter));

        let body = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        let err = svc
            .upload(UploadRequest::new("7", "count.jpg", &body[..]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::IncompleteWrite { expected: 8, actual: 7 }
        ));
        assert_no_artifacts(&svc);
    }
}
