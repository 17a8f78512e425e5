//! HTTP host capability for pulse widget scripts.
//!
//! Scripts reach the network only through this crate. Requests are limited to
//! `http`/`https` URLs, carry at most one injected header, and either return the
//! response body or just the status code. Failures are mapped to [`HttpError`]
//! variants that the engine classifies as transient or fatal.

mod client;
mod error;

pub use client::{HttpClient, HttpConfig, ResponseMode};
pub use error::HttpError;
