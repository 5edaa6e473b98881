//! The HTTP upload path: request construction, status policy and bounded
//! retries.

mod client;
mod retry;
mod upload;

pub use client::HttpSender;
pub use retry::RetryPolicy;
pub use upload::{Batch, Uploader};
