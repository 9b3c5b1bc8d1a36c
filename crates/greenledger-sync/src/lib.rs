//! Network adapters: remote document extraction and webhook alert delivery.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpExtractor, SyncError, WebhookSink};
