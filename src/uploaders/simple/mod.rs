use std::sync::Arc;
use async_trait::async_trait;
use tracing::{info, warn};
use crate::core::{
    AuthToken,
    FileSource,
    ProgressCallback,
    Result,
    UploadApi,
    UploadError,
    UploadResult,
    UploadStrategy,
    Uploader,
};

/// 单次上传器：整个文件一个 multipart 请求，不重试
pub struct SimpleUploader {
    api: Arc<dyn UploadApi>,
}

impl SimpleUploader {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Uploader for SimpleUploader {
    async fn upload(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        location: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<UploadResult> {
        if location.is_none() {
            warn!(file = file.name(), "No location provided for upload");
        }

        let data = file
            .read_all()
            .await
            .map_err(|err| UploadError::UploadFailed(err.user_message()))?;

        info!(file = file.name(), size = file.size(), "single-shot upload");

        self.api
            .upload_single(auth, file, data, location, on_progress)
            .await
            .map_err(|err| UploadError::UploadFailed(err.user_message()))
    }

    fn strategy(&self) -> UploadStrategy {
        UploadStrategy::Single
    }
}
