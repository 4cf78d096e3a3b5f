use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use super::coordinator::UploadCoordinator;
use super::errors::{Result, UploadError};
use super::traits::AuthToken;
use super::types::{
    ChunkCallback,
    FileSource,
    Progress,
    ProgressCallback,
    QueueConfig,
    TaskStatus,
    UploadCategory,
    UploadEvent,
    UploadId,
    UploadResult,
    UploadTask,
};
use super::validation::{validate_file, validate_location};

enum QueueCommand {
    AddFiles {
        files: Vec<FileSource>,
        category: UploadCategory,
        auth: AuthToken,
        location: Option<String>,
        reply: oneshot::Sender<Vec<UploadId>>,
    },
    Retry {
        upload_id: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        upload_id: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    GetTask {
        upload_id: UploadId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },
    GetAllTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },
    TakeCompleted {
        reply: oneshot::Sender<Vec<UploadResult>>,
    },
    HasActive {
        reply: oneshot::Sender<bool>,
    },
}

/// 上传 future 回报给 worker 的消息
enum TaskMessage {
    Progress {
        upload_id: UploadId,
        progress: Progress,
    },
    ChunkUploaded {
        upload_id: UploadId,
        part_number: u64,
        total_chunks: u64,
    },
    Finished {
        upload_id: UploadId,
        result: Result<UploadResult>,
    },
}

/// 上传队列，可克隆的句柄
#[derive(Clone)]
pub struct UploadQueue {
    command_tx: mpsc::Sender<QueueCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
}

/// 上传队列句柄 - 包含队列和工作线程
pub struct UploadQueueHandle {
    pub queue: UploadQueue,
    pub worker_handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl UploadQueueHandle {
    /// Stops the worker and cancels every in-flight upload.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        drop(self.queue);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal_error(format!("Worker panic: {}", err)))
    }
}

impl UploadQueue {
    pub fn new(coordinator: Arc<UploadCoordinator>, config: QueueConfig) -> UploadQueueHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let shutdown = CancellationToken::new();

        let worker_handle = tokio::spawn(UploadQueueWorker::run(
            coordinator,
            config,
            command_rx,
            event_tx.clone(),
            shutdown.clone(),
        ));

        UploadQueueHandle {
            queue: Self { command_tx, event_tx },
            worker_handle,
            shutdown,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> QueueCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Validates and enqueues each file. Files that fail validation are kept in `Error`.
    pub async fn add_files(
        &self,
        files: Vec<FileSource>,
        category: UploadCategory,
        auth: AuthToken,
        location: Option<String>,
    ) -> Result<Vec<UploadId>> {
        self.request(|reply| QueueCommand::AddFiles {
            files,
            category,
            auth,
            location,
            reply,
        })
        .await
    }

    /// Restarts a failed task from scratch.
    pub async fn retry(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| QueueCommand::Retry { upload_id, reply }).await?
    }

    pub async fn remove(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| QueueCommand::Remove { upload_id, reply }).await?
    }

    /// 清空所有非上传中的任务，返回移除数量
    pub async fn clear(&self) -> Result<usize> {
        self.request(|reply| QueueCommand::Clear { reply }).await
    }

    pub async fn get_task(&self, upload_id: UploadId) -> Result<Option<UploadTask>> {
        self.request(|reply| QueueCommand::GetTask { upload_id, reply }).await
    }

    pub async fn get_all_tasks(&self) -> Result<Vec<UploadTask>> {
        self.request(|reply| QueueCommand::GetAllTasks { reply }).await
    }

    /// 取出已完成任务的结果并从队列移除
    pub async fn take_completed_results(&self) -> Result<Vec<UploadResult>> {
        self.request(|reply| QueueCommand::TakeCompleted { reply }).await
    }

    pub async fn has_active_uploads(&self) -> Result<bool> {
        self.request(|reply| QueueCommand::HasActive { reply }).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct TaskHandle {
    task: UploadTask,
    source: FileSource,
    auth: AuthToken,
    join_handle: Option<JoinHandle<()>>,
}

struct UploadQueueWorker {
    coordinator: Arc<UploadCoordinator>,
    config: QueueConfig,
    tasks: HashMap<UploadId, TaskHandle>,
    /// 插入顺序
    order: Vec<UploadId>,
    pending: VecDeque<UploadId>,
    active_uploads: usize,
    event_tx: broadcast::Sender<UploadEvent>,
    message_tx: mpsc::UnboundedSender<TaskMessage>,
    shutdown: CancellationToken,
}

impl UploadQueueWorker {
    async fn run(
        coordinator: Arc<UploadCoordinator>,
        config: QueueConfig,
        mut command_rx: mpsc::Receiver<QueueCommand>,
        event_tx: broadcast::Sender<UploadEvent>,
        shutdown: CancellationToken,
    ) {
        let (message_tx, mut message_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            coordinator,
            config,
            tasks: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            active_uploads: 0,
            event_tx,
            message_tx,
            shutdown: shutdown.clone(),
        };
        let mut commands_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = command_rx.recv(), if commands_open => {
                    match command {
                        Some(command) => worker.handle_command(command),
                        None => commands_open = false,
                    }
                }
                Some(message) = message_rx.recv() => {
                    worker.handle_message(message);
                }
            }

            worker.process_queue();

            // 所有句柄都已释放且没有进行中的上传
            if !commands_open && worker.active_uploads == 0 {
                break;
            }
        }

        worker.stop_all();
        debug!("upload queue worker stopped");
    }

    fn has_capacity(&self) -> bool {
        match self.config.max_concurrent {
            Some(max) => self.active_uploads < max.max(1),
            None => true,
        }
    }

    fn process_queue(&mut self) {
        while self.has_capacity() {
            let Some(upload_id) = self.pending.pop_front() else {
                break;
            };

            let queued = self
                .tasks
                .get(&upload_id)
                .is_some_and(|handle| handle.task.status == TaskStatus::Queued);
            if queued {
                self.start_upload(upload_id);
            }
        }
    }

    fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::AddFiles { files, category, auth, location, reply } => {
                let ids = self.add_files(files, category, auth, location);
                let _ = reply.send(ids);
            }
            QueueCommand::Retry { upload_id, reply } => {
                let _ = reply.send(self.retry(upload_id));
            }
            QueueCommand::Remove { upload_id, reply } => {
                let _ = reply.send(self.remove(upload_id));
            }
            QueueCommand::Clear { reply } => {
                let removable: Vec<UploadId> = self
                    .order
                    .iter()
                    .filter(|id| self.tasks.get(*id).is_some_and(|h| h.task.status.is_removable()))
                    .copied()
                    .collect();
                for upload_id in &removable {
                    self.drop_task(*upload_id);
                }
                let _ = reply.send(removable.len());
            }
            QueueCommand::GetTask { upload_id, reply } => {
                let task = self.tasks.get(&upload_id).map(|handle| handle.task.clone());
                let _ = reply.send(task);
            }
            QueueCommand::GetAllTasks { reply } => {
                let tasks = self
                    .order
                    .iter()
                    .filter_map(|id| self.tasks.get(id))
                    .map(|handle| handle.task.clone())
                    .collect();
                let _ = reply.send(tasks);
            }
            QueueCommand::TakeCompleted { reply } => {
                let completed: Vec<UploadId> = self
                    .order
                    .iter()
                    .filter(|id| {
                        self.tasks
                            .get(*id)
                            .is_some_and(|h| h.task.status == TaskStatus::Completed && h.task.result.is_some())
                    })
                    .copied()
                    .collect();

                let results = completed
                    .into_iter()
                    .filter_map(|upload_id| self.drop_task(upload_id))
                    .filter_map(|handle| handle.task.result)
                    .collect();
                let _ = reply.send(results);
            }
            QueueCommand::HasActive { reply } => {
                let active = self
                    .tasks
                    .values()
                    .any(|handle| handle.task.status == TaskStatus::Uploading);
                let _ = reply.send(active);
            }
        }
    }

    fn add_files(
        &mut self,
        files: Vec<FileSource>,
        category: UploadCategory,
        auth: AuthToken,
        location: Option<String>,
    ) -> Vec<UploadId> {
        let allowed = category.allowed_types();
        let mut ids = Vec::with_capacity(files.len());

        for source in files {
            let mut task = UploadTask::new(source.info().clone(), location.clone());
            task.progress = self.coordinator.initial_progress(task.file.size);
            let upload_id = task.id;

            let verdict = validate_file(source.info(), &allowed).and_then(|_| {
                if self.config.require_location {
                    validate_location(location.as_deref())
                } else {
                    Ok(())
                }
            });

            self.tasks.insert(upload_id, TaskHandle {
                task,
                source,
                auth: auth.clone(),
                join_handle: None,
            });
            self.order.push(upload_id);
            ids.push(upload_id);
            let _ = self.event_tx.send(UploadEvent::TaskAdded { upload_id });

            match verdict {
                Ok(()) => self.pending.push_back(upload_id),
                Err(err) => {
                    info!(%upload_id, %err, "validation failed");
                    self.fail(upload_id, err.to_string());
                }
            }
        }

        ids
    }

    fn retry(&mut self, upload_id: UploadId) -> Result<()> {
        let has_capacity = self.has_capacity();
        let handle = self
            .tasks
            .get_mut(&upload_id)
            .ok_or_else(|| UploadError::TaskNotFound(upload_id.to_string()))?;

        if handle.task.status != TaskStatus::Error {
            return Err(UploadError::InvalidTransition {
                from: handle.task.status.to_string(),
                to: TaskStatus::Uploading.to_string(),
            });
        }

        handle.task.progress = self.coordinator.initial_progress(handle.task.file.size);
        handle.task.error = None;
        handle.task.result = None;

        if has_capacity {
            self.start_upload(upload_id);
        } else {
            self.set_status(upload_id, TaskStatus::Queued);
            self.pending.push_back(upload_id);
        }

        Ok(())
    }

    fn remove(&mut self, upload_id: UploadId) -> Result<()> {
        let status = self
            .tasks
            .get(&upload_id)
            .map(|handle| handle.task.status)
            .ok_or_else(|| UploadError::TaskNotFound(upload_id.to_string()))?;

        if !status.is_removable() {
            return Err(UploadError::InvalidTransition {
                from: status.to_string(),
                to: "removed".to_string(),
            });
        }

        self.drop_task(upload_id);
        Ok(())
    }

    fn drop_task(&mut self, upload_id: UploadId) -> Option<TaskHandle> {
        let handle = self.tasks.remove(&upload_id)?;
        self.order.retain(|id| *id != upload_id);
        self.pending.retain(|id| *id != upload_id);
        let _ = self.event_tx.send(UploadEvent::Removed { upload_id });
        Some(handle)
    }

    fn set_status(&mut self, upload_id: UploadId, new_state: TaskStatus) -> bool {
        let Some(handle) = self.tasks.get_mut(&upload_id) else {
            return false;
        };

        let old_state = handle.task.status;
        if !TaskStatus::can_transition(old_state, new_state) {
            error!(%upload_id, %old_state, %new_state, "refusing invalid status transition");
            return false;
        }

        handle.task.status = new_state;
        let _ = self.event_tx.send(UploadEvent::StateChanged {
            upload_id,
            old_state,
            new_state,
        });
        true
    }

    fn fail(&mut self, upload_id: UploadId, message: String) {
        if !self.set_status(upload_id, TaskStatus::Error) {
            return;
        }

        if let Some(handle) = self.tasks.get_mut(&upload_id) {
            handle.task.error = Some(message.clone());
            handle.task.completed_at = Some(Utc::now());
        }
        let _ = self.event_tx.send(UploadEvent::Failed { upload_id, error: message });
    }

    fn start_upload(&mut self, upload_id: UploadId) {
        if !self.set_status(upload_id, TaskStatus::Uploading) {
            return;
        }

        let Some(handle) = self.tasks.get_mut(&upload_id) else {
            return;
        };

        handle.task.attempts += 1;
        handle.task.started_at = Some(Utc::now());
        handle.task.completed_at = None;
        handle.task.progress = self.coordinator.initial_progress(handle.task.file.size);

        let coordinator = self.coordinator.clone();
        let source = handle.source.clone();
        let auth = handle.auth.clone();
        let location = handle.task.location.clone();
        let cancel = self.shutdown.child_token();

        let progress_tx = self.message_tx.clone();
        let on_progress: ProgressCallback = Arc::new(move |progress| {
            let _ = progress_tx.send(TaskMessage::Progress { upload_id, progress });
        });

        let chunk_tx = self.message_tx.clone();
        let on_chunk: ChunkCallback = Arc::new(move |part_number, total_chunks| {
            let _ = chunk_tx.send(TaskMessage::ChunkUploaded {
                upload_id,
                part_number,
                total_chunks,
            });
        });

        let finished_tx = self.message_tx.clone();
        let join_handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%upload_id, "upload cancelled");
                }
                outcome = AssertUnwindSafe(coordinator.upload_file_observed(
                    &source,
                    &auth,
                    Some(on_progress),
                    Some(on_chunk),
                    location.as_deref(),
                ))
                .catch_unwind() => {
                    // panic 也要回报，否则任务会一直停在 uploading
                    let result = outcome.unwrap_or_else(|panic| {
                        Err(UploadError::internal_error(format!("Upload panicked: {}", panic_message(&*panic))))
                    });
                    // 通知完成
                    let _ = finished_tx.send(TaskMessage::Finished { upload_id, result });
                }
            }
        });

        handle.join_handle = Some(join_handle);
        self.active_uploads += 1;
    }

    fn handle_message(&mut self, message: TaskMessage) {
        match message {
            TaskMessage::Progress { upload_id, progress } => {
                if let Some(handle) = self.tasks.get_mut(&upload_id) {
                    if handle.task.status == TaskStatus::Uploading {
                        handle.task.progress = progress;
                        let _ = self.event_tx.send(UploadEvent::Progress { upload_id, progress });
                    }
                }
            }
            TaskMessage::ChunkUploaded { upload_id, part_number, total_chunks } => {
                let _ = self.event_tx.send(UploadEvent::ChunkUploaded {
                    upload_id,
                    part_number,
                    total_chunks,
                });
            }
            TaskMessage::Finished { upload_id, result } => {
                self.active_uploads = self.active_uploads.saturating_sub(1);
                if let Some(handle) = self.tasks.get_mut(&upload_id) {
                    handle.join_handle = None;
                }
                self.handle_task_completion(upload_id, result);
            }
        }
    }

    fn handle_task_completion(&mut self, upload_id: UploadId, result: Result<UploadResult>) {
        match result {
            Ok(result) => {
                if !self.set_status(upload_id, TaskStatus::Completed) {
                    return;
                }
                if let Some(handle) = self.tasks.get_mut(&upload_id) {
                    handle.task.progress = handle.task.progress.completed();
                    handle.task.result = Some(result.clone());
                    handle.task.completed_at = Some(Utc::now());
                }
                info!(%upload_id, file_id = %result.id, "upload completed");
                let _ = self.event_tx.send(UploadEvent::Completed { upload_id, result });
            }
            Err(err) => {
                error!(%upload_id, %err, "upload failed");
                self.fail(upload_id, err.user_message());
            }
        }
    }

    fn stop_all(&mut self) {
        self.shutdown.cancel();
        for handle in self.tasks.values_mut() {
            if let Some(join_handle) = handle.join_handle.take() {
                join_handle.abort();
            }
        }
    }
}
