use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use memoir_upload::logging::init_logging;
use memoir_upload::{
    format_bytes, ApiClient, AuthToken, Config, FileSource, TaskStatus, UploadCategory,
    UploadCoordinator, UploadEvent, UploadQueue,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Category {
    Images,
    Videos,
}

#[derive(Parser, Debug)]
#[command(name = "memoir-upload", about = "Upload photos and videos to the memoir file service")]
struct Args {
    /// Path to config.toml
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides the token in the config file
    #[arg(long, env = "MEMOIR_TOKEN")]
    token: Option<String>,

    #[arg(long, value_enum, default_value_t = Category::Images)]
    category: Category,

    /// "City, State"
    #[arg(long)]
    location: Option<String>,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    init_logging(&config.log_level)?;

    let token = match args.token.or_else(|| config.token.clone()) {
        Some(token) => AuthToken::new(token),
        None => bail!("No auth token: pass --token or set `token` in {}", args.config.display()),
    };

    let api = Arc::new(ApiClient::from_config(&config)?);
    let coordinator = Arc::new(UploadCoordinator::with_config(api, config.chunked_config()));
    let handle = UploadQueue::new(coordinator, config.queue_config());
    let queue = handle.queue.clone();
    let mut events = queue.subscribe();

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = FileSource::from_path(path, None)
            .await
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        files.push(file);
    }

    let category = match args.category {
        Category::Images => UploadCategory::Images,
        Category::Videos => UploadCategory::Videos,
    };
    let ids = queue.add_files(files, category, token, args.location).await?;

    while queue.has_active_uploads().await? {
        match events.recv().await {
            Ok(UploadEvent::ChunkUploaded { upload_id, part_number, total_chunks }) => {
                println!("{}: chunk {}/{} uploaded", upload_id, part_number, total_chunks);
            }
            Ok(UploadEvent::Completed { upload_id, result }) => {
                println!("{}: done {} ({})", upload_id, result.file_url, format_bytes(result.file_size));
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }

    let mut failures = 0;
    for task in queue.get_all_tasks().await? {
        if !ids.contains(&task.id) {
            continue;
        }
        match task.status {
            TaskStatus::Completed => {}
            _ => {
                failures += 1;
                eprintln!(
                    "{} ({}): {}",
                    task.file.name,
                    format_bytes(task.file.size),
                    task.error.unwrap_or_else(|| task.status.to_string())
                );
            }
        }
    }

    handle.shutdown().await?;

    if failures > 0 {
        bail!("{} of {} uploads failed", failures, ids.len());
    }

    Ok(())
}
