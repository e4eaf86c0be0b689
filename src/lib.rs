//! Streaming single-file uploads to BitSend.
//!
//! The request body is `multipart/form-data` with an exact `content-length`, assembled from a
//! precomputed [`frame::MultipartFrame`] and the file bytes streamed through a bounded pipe,
//! so the file is never held in memory.

pub mod client;
pub mod error;
pub mod frame;
pub mod rest_types;
pub mod token;
pub mod transport;

pub use client::{BitSend, DEFAULT_BASE_URL, Settings, UploadLinks};
pub use error::UploadError;
pub use transport::UploadProgress;
