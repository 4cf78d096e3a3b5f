use std::sync::Arc;
use tracing::info;
use crate::uploaders::{ChunkedUploader, SimpleUploader};
use super::errors::Result;
use super::plan::{classify, plan};
use super::traits::{AuthToken, UploadApi, Uploader};
use super::types::{
    ChunkCallback,
    ChunkProgress,
    ChunkedConfig,
    FileInfo,
    FileSource,
    Progress,
    ProgressCallback,
    SessionStatus,
    UploadResult,
    UploadStrategy,
};
use super::validation;

/// Smart upload: picks single-shot or chunked by file size.
///
/// The progress callback sees `Progress::Percentage` on the single-shot path
/// and `Progress::Chunks` on the chunked path.
pub struct UploadCoordinator {
    simple: SimpleUploader,
    chunked: ChunkedUploader,
}

impl UploadCoordinator {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self::with_config(api, ChunkedConfig::default())
    }

    pub fn with_config(api: Arc<dyn UploadApi>, chunked: ChunkedConfig) -> Self {
        Self {
            simple: SimpleUploader::new(api.clone()),
            chunked: ChunkedUploader::new(api, chunked),
        }
    }

    pub fn uploader_for(&self, file_size: u64) -> &dyn Uploader {
        match classify(file_size) {
            UploadStrategy::Single => &self.simple,
            UploadStrategy::Chunked => &self.chunked,
        }
    }

    /// 任务开始前的进度，形状与上传路径一致
    pub fn initial_progress(&self, file_size: u64) -> Progress {
        match classify(file_size) {
            UploadStrategy::Single => Progress::zero(),
            UploadStrategy::Chunked => {
                let total_chunks = plan(file_size, self.chunked.config().chunk_size);
                Progress::Chunks(ChunkProgress::new(0, total_chunks))
            }
        }
    }

    pub async fn upload_file(
        &self,
        file: &FileSource,
        auth: &AuthToken,
        on_progress: Option<ProgressCallback>,
        location: Option<&str>,
    ) -> Result<UploadResult> {
        self.upload_file_observed(file, auth, on_progress, None, location).await
    }

    /// Same as [`upload_file`](Self::upload_file) with an extra per-chunk notification on the chunked path.
    pub async fn upload_file_observed(
        &self,
        file: &FileSource,
        auth: &AuthToken,
        on_progress: Option<ProgressCallback>,
        on_chunk: Option<ChunkCallback>,
        location: Option<&str>,
    ) -> Result<UploadResult> {
        let strategy = classify(file.size());
        info!(file = file.name(), size = file.size(), ?strategy, "starting upload");

        match strategy {
            UploadStrategy::Single => self.simple.upload(auth, file, location, on_progress).await,
            UploadStrategy::Chunked => {
                self.chunked
                    .upload_with_callbacks(auth, file, location, on_progress, on_chunk)
                    .await
            }
        }
    }

    pub fn validate_file<S: AsRef<str>>(&self, file: &FileInfo, allowed_types: &[S]) -> Result<()> {
        validation::validate_file(file, allowed_types)
    }

    pub async fn abort_upload(&self, upload_id: &str, auth: &AuthToken) -> Result<()> {
        self.chunked.abort(auth, upload_id).await
    }

    pub async fn check_upload_status(&self, upload_id: &str, auth: &AuthToken) -> Result<SessionStatus> {
        self.chunked.status(auth, upload_id).await
    }
}
