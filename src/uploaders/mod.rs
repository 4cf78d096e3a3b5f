pub mod simple;
pub mod chunked;

pub use simple::SimpleUploader;
pub use chunked::{upload_chunk_with_retry, ChunkedUploader};
