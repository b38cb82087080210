pub mod retry_policy;

pub use retry_policy::{BackoffStrategy, RetryConfig, RetryError, RetryPolicy, RetryStats};
