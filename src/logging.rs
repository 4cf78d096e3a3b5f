//! 日志初始化，RUST_LOG 优先于配置里的级别

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use crate::core::{Result, UploadError};

pub fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| UploadError::Config(format!("Invalid log level {:?}: {}", default_level, e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| UploadError::internal_error(format!("Logger already initialized: {}", e)))
}
