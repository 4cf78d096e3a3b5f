use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;
use super::errors::{Result, UploadError};

/// 分片大小，与服务端约定: 5MB
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 单次上传上限: 100MB，超过走分片
pub const MAX_REGULAR_UPLOAD: u64 = 100 * 1024 * 1024;

/// 单文件上限: 10GB
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// 上传任务唯一标识（客户端生成）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(pub Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 等待中（在队列中）
    Queued,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Error,
}

impl TaskStatus {
    /// Error -> Uploading only through an explicit retry.
    pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (from, to),
            (Queued, Uploading)
                | (Queued, Error)
                | (Uploading, Completed)
                | (Uploading, Error)
                | (Error, Uploading)
                | (Error, Queued)
        )
    }

    pub fn is_removable(&self) -> bool {
        !matches!(self, TaskStatus::Uploading)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// 上传策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadStrategy {
    /// 单次 multipart 上传
    Single,
    /// 分片上传
    Chunked,
}

/// 分片进度
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    pub percentage: f64,
}

impl ChunkProgress {
    pub fn new(uploaded_chunks: u64, total_chunks: u64) -> Self {
        let percentage = if total_chunks > 0 {
            uploaded_chunks as f64 / total_chunks as f64 * 100.0
        } else {
            0.0
        };

        Self {
            uploaded_chunks,
            total_chunks,
            percentage,
        }
    }
}

/// Single-shot uploads report a bare percentage, chunked uploads report chunk counts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Progress {
    Percentage { value: f64 },
    Chunks(ChunkProgress),
}

impl Progress {
    pub fn percentage(&self) -> f64 {
        match self {
            Progress::Percentage { value } => *value,
            Progress::Chunks(chunks) => chunks.percentage,
        }
    }

    pub fn zero() -> Self {
        Progress::Percentage { value: 0.0 }
    }

    pub fn done() -> Self {
        Progress::Percentage { value: 100.0 }
    }

    /// 完成后的进度，保留原来的形状
    pub fn completed(&self) -> Self {
        match self {
            Progress::Percentage { .. } => Progress::done(),
            Progress::Chunks(chunks) => {
                Progress::Chunks(ChunkProgress::new(chunks.total_chunks, chunks.total_chunks))
            }
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// (part_number, total_chunks)
pub type ChunkCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 文件元信息
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
enum Payload {
    Memory(Bytes),
    Disk(PathBuf),
}

/// 待上传的文件，内容只读
#[derive(Debug, Clone)]
pub struct FileSource {
    info: FileInfo,
    payload: Payload,
}

impl FileSource {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            info: FileInfo {
                name: name.into(),
                size: data.len() as u64,
                mime_type: mime_type.into(),
            },
            payload: Payload::Memory(data),
        }
    }

    /// Reads only the metadata; chunks are read lazily from disk.
    pub async fn from_path(path: impl AsRef<Path>, mime_type: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Validation(format!("Not a file: {}", path.display())));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::Validation("Can't read file name".to_string()))?
            .to_string();

        let mime_type = mime_type
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_path(path).to_string());

        Ok(Self {
            info: FileInfo {
                name,
                size: metadata.len(),
                mime_type,
            },
            payload: Payload::Disk(path.to_path_buf()),
        })
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn mime_type(&self) -> &str {
        &self.info.mime_type
    }

    /// 读取 [start, end) 范围的数据。内存数据零拷贝切片
    pub async fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        if range.end > self.info.size || range.start > range.end {
            return Err(UploadError::internal_error(format!(
                "Range {:?} out of bounds for {} bytes",
                range, self.info.size
            )));
        }

        match &self.payload {
            Payload::Memory(data) => Ok(data.slice(range.start as usize..range.end as usize)),
            Payload::Disk(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;

                let mut buffer = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    pub async fn read_all(&self) -> Result<Bytes> {
        self.read_range(0..self.info.size).await
    }
}

/// Guess a MIME type for the media formats the service accepts.
pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// 上传分类，决定 MIME 白名单
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadCategory {
    Images,
    Videos,
    Custom(Vec<String>),
}

impl UploadCategory {
    pub fn allowed_types(&self) -> Vec<String> {
        let defaults: &[&str] = match self {
            UploadCategory::Images => &["image/jpeg", "image/png", "image/gif", "image/webp"],
            UploadCategory::Videos => &["video/mp4", "video/webm", "video/quicktime"],
            UploadCategory::Custom(types) => return types.clone(),
        };

        defaults.iter().map(|t| t.to_string()).collect()
    }
}

/// 服务端返回的最终文件记录
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub id: String,
    pub file_url: String,
    pub file_size: u64,
    pub mime_type: String,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub original_name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub total_chunks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub upload_id: String,
    pub file_name: String,
    pub chunk_size: u64,
}

/// 一次分片上传会话，upload_id 只在本次尝试内有效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedSession {
    pub upload_id: String,
    pub file_name: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

/// 单个分片的服务端回执
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub part_number: u64,
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    pub status: String,
}

/// 分片上传配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkedConfig {
    pub chunk_size: u64,
    pub max_attempts: u32,
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub initial_backoff: Duration,
    /// 失败后尽力调用 abort 清理服务端会话
    pub abort_on_failure: bool,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            abort_on_failure: true,
        }
    }
}

/// 单次上传配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimpleConfig {
    /// 请求体流的分块大小，决定进度回调的粒度
    pub stream_chunk_size: usize,
}

impl Default for SimpleConfig {
    fn default() -> Self {
        Self {
            stream_chunk_size: 64 * 1024,
        }
    }
}

/// 队列配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// None 表示不限制并发
    pub max_concurrent: Option<usize>,
    pub require_location: bool,
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            require_location: false,
            event_capacity: 256,
        }
    }
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub id: UploadId,
    pub file: FileInfo,
    pub status: TaskStatus,
    pub progress: Progress,
    pub error: Option<String>,
    pub result: Option<UploadResult>,
    pub location: Option<String>,
    /// 进入 uploading 的次数
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(file: FileInfo, location: Option<String>) -> Self {
        Self {
            id: UploadId::new(),
            file,
            status: TaskStatus::Queued,
            progress: Progress::zero(),
            error: None,
            result: None,
            location,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// 队列事件
#[derive(Debug, Clone)]
pub enum UploadEvent {
    TaskAdded {
        upload_id: UploadId,
    },
    StateChanged {
        upload_id: UploadId,
        old_state: TaskStatus,
        new_state: TaskStatus,
    },
    Progress {
        upload_id: UploadId,
        progress: Progress,
    },
    ChunkUploaded {
        upload_id: UploadId,
        part_number: u64,
        total_chunks: u64,
    },
    Completed {
        upload_id: UploadId,
        result: UploadResult,
    },
    Failed {
        upload_id: UploadId,
        error: String,
    },
    Removed {
        upload_id: UploadId,
    },
}

// 静态断言确保类型是 Send的
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadTask>();
        assert_send::<UploadEvent>();
        assert_send::<FileSource>();
    }
};
