use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};
use crate::core::{
    AuthToken,
    ChunkCallback,
    ChunkPlan,
    ChunkReceipt,
    ChunkedConfig,
    ChunkedSession,
    FileSource,
    InitiateRequest,
    Progress,
    ProgressCallback,
    Result,
    SessionStatus,
    UploadApi,
    UploadError,
    UploadResult,
    UploadStrategy,
    Uploader,
};
use crate::utils::{retry_counted, ChunkCounter, RetryConfig, RetryStrategy};

/// 上传单个分片，失败按指数退避重试
///
/// Every error counts as retryable. Once the attempts are used up the last
/// error message is wrapped in [`UploadError::ChunkUploadFailed`].
pub async fn upload_chunk_with_retry(
    api: &dyn UploadApi,
    auth: &AuthToken,
    chunk: Bytes,
    upload_id: &str,
    part_number: u64,
    retry: &RetryConfig,
) -> Result<ChunkReceipt> {
    retry_counted(retry, || api.upload_chunk(auth, upload_id, part_number, chunk.clone()))
        .await
        .map_err(|(attempts, error)| UploadError::ChunkUploadFailed {
            part_number,
            attempts,
            message: error.user_message(),
        })
}

/// 分片上传器
///
/// Runs initiate, then every part strictly in order, then complete. Parts are
/// never sent concurrently, so the server sees contiguous part numbers.
pub struct ChunkedUploader {
    api: Arc<dyn UploadApi>,
    config: ChunkedConfig,
}

impl ChunkedUploader {
    pub fn new(api: Arc<dyn UploadApi>, config: ChunkedConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ChunkedConfig {
        &self.config
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.config.max_attempts,
            strategy: RetryStrategy::Exponential {
                initial: self.config.initial_backoff,
                multiplier: 2.0,
                max_delay: self.config.initial_backoff * 60,
            },
            ..RetryConfig::default()
        }
    }

    /// 初始化分片上传
    async fn initiate(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        total_chunks: u64,
        location: Option<&str>,
    ) -> Result<ChunkedSession> {
        if location.is_none() {
            warn!(file = file.name(), "No location provided for chunked upload");
        }

        let request = InitiateRequest {
            original_name: file.name().to_string(),
            mime_type: file.mime_type().to_string(),
            total_size: file.size(),
            total_chunks,
            location: location.map(str::to_string),
        };

        let response = self
            .api
            .initiate(auth, &request)
            .await
            .map_err(|err| UploadError::InitiateFailed(err.user_message()))?;

        if response.chunk_size != self.config.chunk_size {
            warn!(
                upload_id = %response.upload_id,
                server_chunk_size = response.chunk_size,
                client_chunk_size = self.config.chunk_size,
                "server chunk size differs, keeping client chunk size"
            );
        }

        info!(upload_id = %response.upload_id, file = file.name(), total_chunks, "chunked upload initiated");

        Ok(ChunkedSession {
            upload_id: response.upload_id,
            file_name: response.file_name,
            chunk_size: self.config.chunk_size,
            total_chunks,
        })
    }

    async fn transfer(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        session: &ChunkedSession,
        on_progress: Option<&ProgressCallback>,
        on_chunk: Option<&ChunkCallback>,
    ) -> Result<()> {
        let retry = self.retry_config();
        let mut counter = ChunkCounter::new(session.total_chunks);

        for (part_number, range) in ChunkPlan::new(file.size(), session.chunk_size) {
            let chunk = file.read_range(range).await?;

            let receipt = upload_chunk_with_retry(
                self.api.as_ref(),
                auth,
                chunk,
                &session.upload_id,
                part_number,
                &retry,
            )
            .await?;

            let progress = counter.record(receipt.uploaded_chunks);
            debug!(
                upload_id = %session.upload_id,
                part_number,
                uploaded = progress.uploaded_chunks,
                total = progress.total_chunks,
                "chunk uploaded"
            );

            if let Some(callback) = on_progress {
                callback(Progress::Chunks(progress));
            }
            if let Some(callback) = on_chunk {
                callback(part_number, session.total_chunks);
            }
        }

        Ok(())
    }

    /// 完成分片上传
    async fn complete(&self, auth: &AuthToken, session: &ChunkedSession) -> Result<UploadResult> {
        let result = self
            .api
            .complete(auth, &session.upload_id)
            .await
            .map_err(|err| UploadError::CompleteFailed(err.user_message()))?;

        info!(upload_id = %session.upload_id, file_id = %result.id, "chunked upload completed");
        Ok(result)
    }

    /// 尽力清理服务端会话，失败只记日志
    async fn release(&self, auth: &AuthToken, session: &ChunkedSession) {
        match self.abort(auth, &session.upload_id).await {
            Ok(()) => info!(upload_id = %session.upload_id, "aborted chunked session after failure"),
            Err(err) => warn!(upload_id = %session.upload_id, %err, "failed to abort chunked session"),
        }
    }

    /// Cancels a server-side session.
    pub async fn abort(&self, auth: &AuthToken, upload_id: &str) -> Result<()> {
        self.api
            .abort(auth, upload_id)
            .await
            .map_err(|err| UploadError::AbortFailed(err.user_message()))
    }

    pub async fn status(&self, auth: &AuthToken, upload_id: &str) -> Result<SessionStatus> {
        self.api
            .status(auth, upload_id)
            .await
            .map_err(|err| UploadError::StatusFailed(err.user_message()))
    }

    pub async fn upload_with_callbacks(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        location: Option<&str>,
        on_progress: Option<ProgressCallback>,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<UploadResult> {
        let total_chunks = ChunkPlan::new(file.size(), self.config.chunk_size).total_chunks();
        if total_chunks == 0 {
            return Err(UploadError::Validation("File is empty".to_string()));
        }

        let session = self.initiate(auth, file, total_chunks, location).await?;

        let outcome = match self
            .transfer(auth, file, &session, on_progress.as_ref(), on_chunk.as_ref())
            .await
        {
            Ok(()) => self.complete(auth, &session).await,
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            warn!(upload_id = %session.upload_id, %err, "chunked upload failed");
            if self.config.abort_on_failure {
                self.release(auth, &session).await;
            }
        }

        outcome
    }
}

#[async_trait]
impl Uploader for ChunkedUploader {
    async fn upload(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        location: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<UploadResult> {
        self.upload_with_callbacks(auth, file, location, on_progress, None).await
    }

    fn strategy(&self) -> UploadStrategy {
        UploadStrategy::Chunked
    }
}
