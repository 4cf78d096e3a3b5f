use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;
use crate::config::Config;
use crate::core::{
    AuthToken,
    ChunkReceipt,
    FileSource,
    InitiateRequest,
    InitiateResponse,
    ProgressCallback,
    Result,
    SessionStatus,
    SimpleConfig,
    UploadApi,
    UploadError,
    UploadResult,
};
use crate::utils::{byte_pieces, ProgressStream};

/// 成功响应统一包在 `data` 里
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadIdBody<'a> {
    upload_id: &'a str,
}

/// HTTP client for the file service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    simple: SimpleConfig,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        // 保证以 / 结尾，否则 join 会替换掉最后一段路径
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|_| UploadError::Config(format!("Invalid url: {:?}", base_url)))?;

        Ok(Self {
            client,
            base_url,
            simple: SimpleConfig::default(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.endpoint, config.timeout())
    }

    pub fn with_simple_config(mut self, simple: SimpleConfig) -> Self {
        self.simple = simple;
        self
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| UploadError::Config(format!("Invalid path {:?}: {}", path, e)))
    }

    fn create_headers(auth: &AuthToken) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", auth.as_str()))
            .map_err(|e| UploadError::Config(format!("Invalid auth token: {}", e)))?;
        headers.insert(AUTHORIZATION, value);

        Ok(headers)
    }

    async fn dispatch(request: RequestBuilder, default_message: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Network(format!("Network error occurred: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| default_message.to_string());

            return Err(UploadError::server_error(status.as_u16(), message));
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder, default_message: &str) -> Result<T> {
        let response = Self::dispatch(request, default_message).await?;
        let status = response.status();

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            UploadError::server_error(status.as_u16(), format!("{}: invalid response body: {}", default_message, e))
        })?;

        Ok(envelope.data)
    }
}

#[async_trait]
impl UploadApi for ApiClient {
    async fn upload_single(
        &self,
        auth: &AuthToken,
        file: &FileSource,
        data: Bytes,
        location: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<UploadResult> {
        let total = data.len() as u64;
        let stream = ProgressStream::new(byte_pieces(data, self.simple.stream_chunk_size), total, on_progress);

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file.name().to_string())
            .mime_str(file.mime_type())?;

        let mut form = Form::new().part("file", part);
        if let Some(location) = location {
            form = form.text("location", location.to_string());
        }

        let request = self
            .client
            .post(self.endpoint("files/upload")?)
            .headers(Self::create_headers(auth)?)
            .multipart(form);

        Self::send_json(request, "Upload failed").await
    }

    async fn initiate(&self, auth: &AuthToken, request: &InitiateRequest) -> Result<InitiateResponse> {
        let request = self
            .client
            .post(self.endpoint("files/chunk/initiate")?)
            .headers(Self::create_headers(auth)?)
            .json(request);

        Self::send_json(request, "Failed to initiate upload").await
    }

    async fn upload_chunk(
        &self,
        auth: &AuthToken,
        upload_id: &str,
        part_number: u64,
        chunk: Bytes,
    ) -> Result<ChunkReceipt> {
        debug!(upload_id, part_number, bytes = chunk.len(), "sending chunk");

        let len = chunk.len() as u64;
        let form = Form::new()
            .text("uploadId", upload_id.to_string())
            .text("partNumber", part_number.to_string())
            .part("chunk", Part::stream_with_length(Body::from(chunk), len).file_name("blob"));

        let request = self
            .client
            .post(self.endpoint("files/chunk/upload")?)
            .headers(Self::create_headers(auth)?)
            .multipart(form);

        Self::send_json(request, "Chunk upload failed").await
    }

    async fn complete(&self, auth: &AuthToken, upload_id: &str) -> Result<UploadResult> {
        let request = self
            .client
            .post(self.endpoint("files/chunk/complete")?)
            .headers(Self::create_headers(auth)?)
            .json(&UploadIdBody { upload_id });

        Self::send_json(request, "Failed to complete upload").await
    }

    async fn abort(&self, auth: &AuthToken, upload_id: &str) -> Result<()> {
        let request = self
            .client
            .post(self.endpoint("files/chunk/abort")?)
            .headers(Self::create_headers(auth)?)
            .json(&UploadIdBody { upload_id });

        Self::dispatch(request, "Failed to abort upload").await?;
        Ok(())
    }

    async fn status(&self, auth: &AuthToken, upload_id: &str) -> Result<SessionStatus> {
        let path = format!("files/chunk/status/{}", upload_id);
        let request = self
            .client
            .get(self.endpoint(&path)?)
            .headers(Self::create_headers(auth)?);

        Self::send_json(request, "Failed to check upload status").await
    }
}
