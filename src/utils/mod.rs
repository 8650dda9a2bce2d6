pub mod format;
pub mod retry;

pub use format::format_bytes;
pub use retry::{RetryPolicy, RetryStrategy};
