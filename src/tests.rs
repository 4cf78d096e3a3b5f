use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use crate::core::*;
use crate::uploaders::*;
use crate::utils::RetryConfig;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Single { name: String, size: u64, location: Option<String> },
    Initiate { total_chunks: u64, total_size: u64 },
    Chunk { upload_id: String, part_number: u64, len: usize },
    Complete { upload_id: String },
    Abort { upload_id: String },
    Status { upload_id: String },
}

/// 模拟文件服务 - 按脚本让指定分片失败
#[derive(Default)]
struct MockApi {
    calls: Mutex<Vec<Call>>,
    /// part_number -> 剩余失败次数
    chunk_failures: Mutex<HashMap<u64, u32>>,
    fail_initiate: AtomicBool,
    fail_complete: AtomicBool,
    sessions: AtomicU64,
    uploaded: Mutex<HashMap<String, (u64, u64, u64)>>,
}

impl MockApi {
    fn fail_chunk(&self, part_number: u64, times: u32) {
        self.chunk_failures.lock().unwrap().insert(part_number, times);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn chunk_parts(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Chunk { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl UploadApi for MockApi {
    async fn upload_single(
        &self,
        _auth: &AuthToken,
        file: &FileSource,
        data: Bytes,
        location: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<UploadResult> {
        self.record(Call::Single {
            name: file.name().to_string(),
            size: data.len() as u64,
            location: location.map(str::to_string),
        });

        if let Some(callback) = on_progress {
            callback(Progress::Percentage { value: 50.0 });
            callback(Progress::Percentage { value: 100.0 });
        }

        Ok(UploadResult {
            id: "single-1".to_string(),
            file_url: format!("https://cdn.example.com/{}", file.name()),
            file_size: data.len() as u64,
            mime_type: file.mime_type().to_string(),
            original_name: file.name().to_string(),
            location: location.map(str::to_string),
        })
    }

    async fn initiate(&self, _auth: &AuthToken, request: &InitiateRequest) -> Result<InitiateResponse> {
        self.record(Call::Initiate {
            total_chunks: request.total_chunks,
            total_size: request.total_size,
        });

        if self.fail_initiate.load(Ordering::SeqCst) {
            return Err(UploadError::server_error(400, "Unsupported media type"));
        }

        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let upload_id = format!("session-{}", n);
        self.uploaded
            .lock()
            .unwrap()
            .insert(upload_id.clone(), (0, request.total_chunks, request.total_size));

        Ok(InitiateResponse {
            upload_id,
            file_name: format!("stored-{}", request.original_name),
            chunk_size: CHUNK_SIZE,
        })
    }

    async fn upload_chunk(
        &self,
        _auth: &AuthToken,
        upload_id: &str,
        part_number: u64,
        chunk: Bytes,
    ) -> Result<ChunkReceipt> {
        self.record(Call::Chunk {
            upload_id: upload_id.to_string(),
            part_number,
            len: chunk.len(),
        });

        {
            let mut failures = self.chunk_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&part_number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(UploadError::server_error(502, "Bad gateway"));
                }
            }
        }

        let mut sessions = self.uploaded.lock().unwrap();
        let entry = sessions
            .get_mut(upload_id)
            .ok_or_else(|| UploadError::server_error(404, "Upload session not found"))?;
        entry.0 += 1;

        Ok(ChunkReceipt {
            part_number,
            uploaded_chunks: entry.0,
            total_chunks: entry.1,
        })
    }

    async fn complete(&self, _auth: &AuthToken, upload_id: &str) -> Result<UploadResult> {
        self.record(Call::Complete { upload_id: upload_id.to_string() });

        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(UploadError::server_error(500, "Failed to complete upload"));
        }

        let (_, _, total_size) = self
            .uploaded
            .lock()
            .unwrap()
            .get(upload_id)
            .copied()
            .ok_or_else(|| UploadError::server_error(404, "Upload session not found"))?;

        Ok(UploadResult {
            id: format!("file-{}", upload_id),
            file_url: format!("https://cdn.example.com/{}", upload_id),
            file_size: total_size,
            mime_type: "video/mp4".to_string(),
            original_name: "clip.mp4".to_string(),
            location: None,
        })
    }

    async fn abort(&self, _auth: &AuthToken, upload_id: &str) -> Result<()> {
        self.record(Call::Abort { upload_id: upload_id.to_string() });
        self.uploaded.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn status(&self, _auth: &AuthToken, upload_id: &str) -> Result<SessionStatus> {
        self.record(Call::Status { upload_id: upload_id.to_string() });

        let sessions = self.uploaded.lock().unwrap();
        let (uploaded, total, _) = sessions
            .get(upload_id)
            .copied()
            .ok_or_else(|| UploadError::server_error(404, "Upload session not found"))?;

        Ok(SessionStatus {
            uploaded_chunks: uploaded,
            total_chunks: total,
            status: "uploading".to_string(),
        })
    }
}

fn auth() -> AuthToken {
    AuthToken::new("test-token")
}

// 只分配虚拟内存，不会真正写入
fn zeroed_file(name: &str, mime: &str, size: u64) -> FileSource {
    FileSource::from_bytes(name, mime, vec![0u8; size as usize])
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<Progress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
    (callback, seen)
}

#[tokio::test]
async fn small_file_goes_single_shot() {
    let api = Arc::new(MockApi::default());
    let coordinator = UploadCoordinator::new(api.clone());
    let file = zeroed_file("photo.png", "image/png", 50 * MB);
    let (callback, seen) = recorder();

    let result = coordinator
        .upload_file(&file, &auth(), Some(callback), Some("Austin, TX"))
        .await
        .unwrap();

    assert_eq!(result.file_size, 50 * MB);
    assert_eq!(result.location.as_deref(), Some("Austin, TX"));
    assert_eq!(
        api.calls(),
        vec![Call::Single {
            name: "photo.png".to_string(),
            size: 50 * MB,
            location: Some("Austin, TX".to_string()),
        }]
    );
    assert!(seen
        .lock()
        .unwrap()
        .iter()
        .all(|p| matches!(p, Progress::Percentage { .. })));
}

#[tokio::test]
async fn strategy_follows_threshold() {
    let coordinator = UploadCoordinator::new(Arc::new(MockApi::default()));
    assert_eq!(coordinator.uploader_for(MAX_REGULAR_UPLOAD).strategy(), UploadStrategy::Single);
    assert_eq!(coordinator.uploader_for(MAX_REGULAR_UPLOAD + 1).strategy(), UploadStrategy::Chunked);
}

#[tokio::test]
async fn large_file_sends_every_part_in_order() {
    let api = Arc::new(MockApi::default());
    let coordinator = UploadCoordinator::new(api.clone());
    let file = zeroed_file("clip.mp4", "video/mp4", 250 * MB);
    let (callback, seen) = recorder();

    let chunk_calls = Arc::new(Mutex::new(Vec::new()));
    let chunk_sink = chunk_calls.clone();
    let on_chunk: ChunkCallback = Arc::new(move |part, total| chunk_sink.lock().unwrap().push((part, total)));

    let result = coordinator
        .upload_file_observed(&file, &auth(), Some(callback), Some(on_chunk), None)
        .await
        .unwrap();
    assert_eq!(result.file_size, 250 * MB);

    assert_eq!(api.chunk_parts(), (1..=50).collect::<Vec<_>>());
    assert_eq!(api.count(|c| matches!(c, Call::Initiate { total_chunks: 50, .. })), 1);
    assert_eq!(api.count(|c| matches!(c, Call::Complete { .. })), 1);
    assert!(matches!(api.calls().last(), Some(Call::Complete { .. })));
    assert!(api.calls().iter().all(|c| match c {
        Call::Chunk { len, .. } => *len as u64 == CHUNK_SIZE,
        _ => true,
    }));

    // 进度严格递增 1，且不超过总数
    let progress = seen.lock().unwrap().clone();
    assert_eq!(progress.len(), 50);
    for (i, p) in progress.iter().enumerate() {
        match p {
            Progress::Chunks(chunks) => {
                assert_eq!(chunks.uploaded_chunks, i as u64 + 1);
                assert_eq!(chunks.total_chunks, 50);
            }
            other => panic!("unexpected progress shape {:?}", other),
        }
    }
    assert_eq!(progress.last().unwrap().percentage(), 100.0);
    assert_eq!(chunk_calls.lock().unwrap().len(), 50);
    assert_eq!(chunk_calls.lock().unwrap()[6], (7, 50));
}

#[tokio::test(start_paused = true)]
async fn chunk_recovers_after_two_failures() {
    let api = Arc::new(MockApi::default());
    api.fail_chunk(2, 2);
    let uploader = ChunkedUploader::new(api.clone(), ChunkedConfig::default());
    let file = zeroed_file("clip.mp4", "video/mp4", 3 * CHUNK_SIZE);

    let start = Instant::now();
    uploader.upload(&auth(), &file, None, None).await.unwrap();

    assert_eq!(api.chunk_parts(), vec![1, 2, 2, 2, 3]);
    // 两次退避: 1s + 2s
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(api.count(|c| matches!(c, Call::Abort { .. })), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_chunk_stops_session_and_aborts() {
    let api = Arc::new(MockApi::default());
    api.fail_chunk(7, 3);
    let uploader = ChunkedUploader::new(api.clone(), ChunkedConfig::default());
    let file = zeroed_file("clip.mp4", "video/mp4", 10 * CHUNK_SIZE);

    let err = uploader.upload(&auth(), &file, None, None).await.unwrap_err();
    match &err {
        UploadError::ChunkUploadFailed { part_number, attempts, message } => {
            assert_eq!(*part_number, 7);
            assert_eq!(*attempts, 3);
            assert_eq!(message, "Bad gateway");
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert_eq!(api.chunk_parts(), vec![1, 2, 3, 4, 5, 6, 7, 7, 7]);
    assert_eq!(api.count(|c| matches!(c, Call::Complete { .. })), 0);
    assert_eq!(
        api.count(|c| *c == Call::Abort { upload_id: "session-1".to_string() }),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn abort_can_be_disabled() {
    let api = Arc::new(MockApi::default());
    api.fail_chunk(1, 3);
    let config = ChunkedConfig {
        abort_on_failure: false,
        ..ChunkedConfig::default()
    };
    let uploader = ChunkedUploader::new(api.clone(), config);
    let file = zeroed_file("clip.mp4", "video/mp4", 2 * CHUNK_SIZE);

    assert!(uploader.upload(&auth(), &file, None, None).await.is_err());
    assert_eq!(api.count(|c| matches!(c, Call::Abort { .. })), 0);

    // 会话留在服务端，调用方可以自己查询和取消
    let coordinator = UploadCoordinator::new(api.clone());
    let status = coordinator.check_upload_status("session-1", &auth()).await.unwrap();
    assert_eq!(status.uploaded_chunks, 0);
    assert_eq!(status.total_chunks, 2);
    coordinator.abort_upload("session-1", &auth()).await.unwrap();
    assert!(coordinator.check_upload_status("session-1", &auth()).await.is_err());
}

#[tokio::test]
async fn initiate_failure_sends_no_chunks() {
    let api = Arc::new(MockApi::default());
    api.fail_initiate.store(true, Ordering::SeqCst);
    let uploader = ChunkedUploader::new(api.clone(), ChunkedConfig::default());
    let file = zeroed_file("clip.mp4", "video/mp4", 2 * CHUNK_SIZE);

    let err = uploader.upload(&auth(), &file, None, None).await.unwrap_err();
    assert!(matches!(err, UploadError::InitiateFailed(_)));
    assert_eq!(err.to_string(), "Unsupported media type");
    assert!(api.chunk_parts().is_empty());
    assert_eq!(api.count(|c| matches!(c, Call::Abort { .. })), 0);
}

#[tokio::test]
async fn complete_failure_is_reported_and_aborted() {
    let api = Arc::new(MockApi::default());
    api.fail_complete.store(true, Ordering::SeqCst);
    let uploader = ChunkedUploader::new(api.clone(), ChunkedConfig::default());
    let file = zeroed_file("clip.mp4", "video/mp4", CHUNK_SIZE + 1);

    let err = uploader.upload(&auth(), &file, None, None).await.unwrap_err();
    assert!(matches!(err, UploadError::CompleteFailed(_)));
    assert_eq!(api.chunk_parts(), vec![1, 2]);
    assert_eq!(api.count(|c| matches!(c, Call::Abort { .. })), 1);
}

#[tokio::test]
async fn last_chunk_is_short() {
    let api = Arc::new(MockApi::default());
    let uploader = ChunkedUploader::new(api.clone(), ChunkedConfig::default());
    let file = zeroed_file("clip.mp4", "video/mp4", 2 * CHUNK_SIZE + 10);

    uploader.upload(&auth(), &file, None, None).await.unwrap();

    let lens: Vec<usize> = api
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Chunk { len, .. } => Some(len),
            _ => None,
        })
        .collect();
    assert_eq!(lens, vec![CHUNK_SIZE as usize, CHUNK_SIZE as usize, 10]);
}

#[tokio::test(start_paused = true)]
async fn retry_helper_wraps_last_error() {
    let api = MockApi::default();
    api.fail_chunk(4, 5);
    api.uploaded
        .lock()
        .unwrap()
        .insert("s".to_string(), (0, 4, 4 * CHUNK_SIZE));

    let err = upload_chunk_with_retry(&api, &auth(), Bytes::from_static(b"x"), "s", 4, &RetryConfig::default())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Failed to upload chunk 4 after 3 attempts: Bad gateway");
    // 不会有第 4 次尝试
    assert_eq!(api.chunk_parts(), vec![4, 4, 4]);
}
