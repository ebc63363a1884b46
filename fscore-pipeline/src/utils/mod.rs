//! Utility modules

pub mod retry;

pub use retry::{retry_fixed, RetryExhausted, RetryPolicy};
