mod coordinator;
mod errors;
mod plan;
mod queue;
mod traits;
mod types;
mod validation;

pub use coordinator::UploadCoordinator;
pub use errors::{Result, UploadError};
pub use plan::{chunk_range, classify, plan, ChunkPlan};
pub use queue::{UploadQueue, UploadQueueHandle};
pub use traits::{AuthToken, UploadApi, Uploader};
pub use types::*;
pub use validation::{validate_file, validate_location};
