use async_trait::async_trait;
use bytes::Bytes;
use super::types::{
    ChunkReceipt,
    FileSource,
    InitiateRequest,
    InitiateResponse,
    ProgressCallback,
    SessionStatus,
    UploadResult,
    UploadStrategy,
};
use super::errors::Result;

/// Bearer 凭证，只透传不校验
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// 远端文件服务 - 分片协议和单次上传的全部接口
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// `POST /files/upload`
    async fn upload_single(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        data: Bytes,
        location: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<UploadResult>;

    /// `POST /files/chunk/initiate`
    async fn initiate(&self, auth: &AuthToken, request: &InitiateRequest) -> Result<InitiateResponse>;

    /// `POST /files/chunk/upload`
    async fn upload_chunk(
        &self,
        auth: &AuthToken,
        upload_id: &str,
        part_number: u64,
        chunk: Bytes,
    ) -> Result<ChunkReceipt>;

    /// `POST /files/chunk/complete`
    async fn complete(&self, auth: &AuthToken, upload_id: &str) -> Result<UploadResult>;

    /// `POST /files/chunk/abort`
    async fn abort(&self, auth: &AuthToken, upload_id: &str) -> Result<()>;

    /// `GET /files/chunk/status/{uploadId}`
    async fn status(&self, auth: &AuthToken, upload_id: &str) -> Result<SessionStatus>;
}

/// 上传器 trait - 单次上传和分片上传都实现此接口
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        location: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<UploadResult>;

    fn strategy(&self) -> UploadStrategy;
}
