mod coordinator;
mod worker;

pub use coordinator::{UploadCoordinator, MAX_FINISHED_TASKS};
pub use worker::UploadWorker;
