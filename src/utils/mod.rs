pub mod progress;
pub mod retry;

pub use progress::{byte_pieces, format_bytes, ChunkCounter, ProgressStream};
pub use retry::{retry_counted, RetryConfig, RetryStrategy};
