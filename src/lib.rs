//! Client-side upload pipeline for the memoir file service.
//!
//! Small files go up in one multipart request, large files through the
//! chunked protocol (initiate, sequential parts with retry, complete).
//! [`UploadQueue`] runs a batch of files as independent uploads.

pub mod client;
pub mod config;
pub mod core;
pub mod logging;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use crate::core::{
    AuthToken,
    ChunkProgress,
    FileInfo,
    FileSource,
    Progress,
    Result,
    TaskStatus,
    UploadApi,
    UploadCategory,
    UploadCoordinator,
    UploadError,
    UploadEvent,
    UploadId,
    UploadQueue,
    UploadQueueHandle,
    UploadResult,
    UploadStrategy,
    UploadTask,
    validate_file,
};

pub use client::ApiClient;
pub use config::Config;
pub use uploaders::{ChunkedUploader, SimpleUploader};
pub use utils::format_bytes;

#[cfg(test)]
mod tests;
